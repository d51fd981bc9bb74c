use std::future::Future;
use std::time::Duration;

use crate::error::CapabilityError;

/// Run `op` up to `attempts` times, each attempt bounded by `timeout`.
///
/// After failed attempt `n` (1-based) the task sleeps `delay * n` before
/// trying again. Returns the last error once the budget is spent.
pub(crate) async fn with_retry<T, F, Fut>(
    label: &str,
    attempts: u32,
    delay: Duration,
    timeout: Duration,
    mut op: F,
) -> Result<T, CapabilityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let attempts = attempts.max(1);
    let mut last = CapabilityError::EmptyResponse;

    for attempt in 1..=attempts {
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last = e,
            Err(_) => last = CapabilityError::Timeout(timeout),
        }
        if attempt < attempts {
            log::warn!("{label}: attempt {attempt}/{attempts} failed ({last}), retrying");
            tokio::time::sleep(delay * attempt).await;
        }
    }

    Err(last)
}
