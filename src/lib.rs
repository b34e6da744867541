//! GitOps deployment core
//!
//! Manages the Git hosting accounts used for chart repositories, writes
//! charts and values into those repositories, and hands the resulting
//! release to Argo CD, Flux or Helm.

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod services;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Settings;
pub use error::{GitOpsError, GitOpsResult};
pub use services::GitOpsCore;
