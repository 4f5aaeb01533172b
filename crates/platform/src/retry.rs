//! Optimistic-concurrency retry for platform writes.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;

use crate::{PlatformApi, PlatformError, PlatformResult};

pub const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY_MS: u64 = 250;
const MAX_DELAY_MS: u64 = 4_000;

/// Exponential backoff with jitter: `base * 2^attempt`, capped, plus up to
/// 25% random spread so concurrent writers fan out.
fn backoff(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1 << attempt.min(4)).min(MAX_DELAY_MS);
    let jitter = rand::thread_rng().gen_range(0..=exp / 4);
    Duration::from_millis(exp + jitter)
}

/// Run `op` up to [`MAX_ATTEMPTS`] times, backing off between attempts on
/// retryable errors. Terminal errors return immediately.
pub async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> PlatformResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PlatformResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = backoff(attempt);
                tracing::debug!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient platform error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Patch with the fetch-then-patch discipline the platform's conditional
/// writes require: every attempt re-reads the current entity (refreshing
/// the server-side precondition) before re-applying the patch.
pub async fn patch_with_refresh(
    api: &dyn PlatformApi,
    resource: &str,
    id: &str,
    patch: &Value,
) -> PlatformResult<Value> {
    with_retry("patch", || async move {
        api.retrieve(resource, id).await?;
        api.patch(resource, id, patch).await
    })
    .await
}

/// Create with transient-error retry. There is no precondition to refresh,
/// but 429/5xx still deserve the backoff.
pub async fn create_with_retry(
    api: &dyn PlatformApi,
    resource: &str,
    body: &Value,
) -> PlatformResult<Value> {
    with_retry("create", || async move { api.create(resource, body).await }).await
}

/// Delete with transient-error retry. A 404 after a retryable failure is
/// treated as success (the earlier attempt may have landed).
pub async fn delete_with_retry(
    api: &dyn PlatformApi,
    resource: &str,
    id: &str,
) -> PlatformResult<()> {
    let mut attempted = false;
    let result = with_retry("delete", || {
        let first = !attempted;
        attempted = true;
        async move {
            match api.delete(resource, id).await {
                Err(PlatformError::NotFound(_)) if !first => Ok(()),
                other => other,
            }
        }
    })
    .await;
    result
}
