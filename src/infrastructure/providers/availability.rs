//! Polling for freshly created repositories
//!
//! Providers create repositories asynchronously: the API may 404 and clones
//! may fail for a while after creation succeeds.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{GitOpsClient, ProviderRequest};
use crate::error::ProviderError;
use crate::infrastructure::git::GitOpsHelper;
use crate::infrastructure::workdir::{remove_dir_quietly, unique_dir_name};

/// Run `probe` up to `attempts` times, sleeping `interval` between tries.
///
/// `Ok(true)` as soon as a probe succeeds, `Ok(false)` once the budget is
/// spent, `Err` on the first probe error or on cancellation.
pub async fn poll<F, Fut>(
    attempts: u32,
    interval: Duration,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<bool, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<bool, ProviderError>>,
{
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if probe(attempt).await? {
            return Ok(true);
        }
        if attempt < attempts {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            }
        }
    }
    Ok(false)
}

/// Wait until the provider API reports the repository
pub async fn wait_for_http<C: GitOpsClient + ?Sized>(
    client: &C,
    req: &ProviderRequest,
    attempts: u32,
    interval: Duration,
) -> Result<(), ProviderError> {
    let found = poll(attempts, interval, &req.cancel, |attempt| async move {
        let info = client.get_repo_url(req).await?;
        if info.is_none() {
            debug!("Repository {} not visible yet (attempt {})", req.git_repo_name, attempt);
        }
        Ok(info.is_some())
    })
    .await?;
    if found {
        Ok(())
    } else {
        Err(ProviderError::AvailabilityTimeout {
            repo: req.git_repo_name.clone(),
        })
    }
}

/// Scratch directory for one clone probe, unique per call
fn clone_probe_dir(repo: &str) -> String {
    format!("ensure-clone/{}", unique_dir_name(repo))
}

/// Wait until the repository can be cloned into `ensure-clone/<name>-<suffix>`
pub async fn wait_for_clone(
    helper: &GitOpsHelper,
    url: &str,
    req: &ProviderRequest,
    attempts: u32,
    interval: Duration,
) -> Result<(), ProviderError> {
    let dir_name = clone_probe_dir(&req.git_repo_name);
    let dir = helper.clone_directory(&dir_name);
    let found = poll(attempts, interval, &req.cancel, |attempt| {
        let (dir, dir_name) = (dir.clone(), dir_name.clone());
        async move {
            remove_dir_quietly(&dir);
            let result = helper
                .clone_repo(url, &dir_name, &req.target_revision, &req.cancel)
                .await;
            remove_dir_quietly(&dir);
            match result {
                Ok(_) => Ok(true),
                Err(e) => {
                    warn!("Clone of {} failed (attempt {}): {}", url, attempt, e);
                    Ok(false)
                }
            }
        }
    })
    .await?;
    if found {
        Ok(())
    } else {
        Err(ProviderError::AvailabilityTimeout {
            repo: req.git_repo_name.clone(),
        })
    }
}
