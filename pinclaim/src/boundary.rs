//! Bounded waits on collaborator calls.

use std::time::Duration;

use crate::error::PinClaimError;

/// Awaits `fut` for at most `limit`.
///
/// Expiry maps to [`PinClaimError::Timeout`]. The remote side may still
/// complete the operation after the local wait gives up.
pub(crate) async fn bounded<F>(
    limit: Duration,
    operation: &'static str,
    target: &str,
    fut: F,
) -> Result<F::Output, PinClaimError>
where
    F: Future,
{
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        tracing::warn!(operation, target, limit_ms = limit.as_millis(), "collaborator call timed out");
        PinClaimError::Timeout {
            operation,
            target: target.to_owned(),
        }
    })
}

/// Awaits a client-facing operation until `deadline` elapses.
pub(crate) async fn within<F, T>(
    deadline: Duration,
    operation: &'static str,
    fut: F,
) -> Result<T, PinClaimError>
where
    F: Future<Output = Result<T, PinClaimError>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| PinClaimError::DeadlineExceeded { operation })?
}
