//! Background eviction of expired staged objects.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::staging::StagedObjectRegistry;
use crate::timestamp::UnixTimestamp;

/// Periodic driver for [`StagedObjectRegistry::sweep_expired`].
///
/// The first sweep runs one `interval` after spawning. The task exits when
/// its [`CancellationToken`] is cancelled; a sweep already in progress runs
/// to completion first.
#[derive(Debug, Clone, Copy)]
pub struct EvictionTask;

impl EvictionTask {
    /// Spawns the eviction loop on the current tokio runtime.
    #[must_use]
    pub fn spawn(
        registry: Arc<StagedObjectRegistry>,
        interval: Duration,
        ttl: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            tracing::info!(
                interval_secs = interval.as_secs(),
                ttl_secs = ttl.as_secs(),
                "staged object eviction started"
            );
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep_expired(UnixTimestamp::now(), ttl).await;
                    }
                }
            }
            tracing::info!("staged object eviction stopped");
        })
    }
}
