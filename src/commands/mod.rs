pub mod config;
pub mod deployment;
pub mod helm_app;
pub mod repo;
