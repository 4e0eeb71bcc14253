//! Registry of uploaded objects that nobody has paid to keep yet.
//!
//! Every upload is registered with the time it was admitted. A claim holds
//! the entry while it runs and releases it once recorded; otherwise
//! [`StagedObjectRegistry::sweep_expired`] drops it once it is older than the
//! staging TTL and asks the content store to delete the object. Held entries
//! are never evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::boundary::bounded;
use crate::store::ContentStore;
use crate::timestamp::UnixTimestamp;

/// A staged object and the time it was admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedObjectEntry {
    /// Content id returned by the store.
    pub content_id: String,
    /// Admission time.
    pub staged_at: UnixTimestamp,
    /// Whether a running or unsettled claim shields the entry from eviction.
    #[serde(default)]
    pub held: bool,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    staged_at: UnixTimestamp,
    holds: usize,
}

/// A storage deletion that did not succeed during eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDeletion {
    /// Content id whose deletion failed.
    pub content_id: String,
    /// Error text reported by the store.
    pub error: String,
}

/// Result of one eviction sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionReport {
    /// Every id removed from the registry.
    pub evicted: Vec<String>,
    /// Subset of `evicted` the store confirmed deleting.
    pub deleted: Vec<String>,
    /// Subset of `evicted` the store failed to delete.
    pub failed: Vec<FailedDeletion>,
}

impl EvictionReport {
    /// Returns `true` if the sweep evicted nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// In-memory log of staged content ids.
pub struct StagedObjectRegistry {
    entries: RwLock<HashMap<String, Slot>>,
    store: Arc<dyn ContentStore>,
    timeout: Duration,
}

impl std::fmt::Debug for StagedObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedObjectRegistry")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StagedObjectRegistry {
    /// Creates an empty registry deleting evicted objects from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ContentStore>, timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
            timeout,
        }
    }

    /// Registers `content_id` at the current time.
    ///
    /// See [`register_at`](Self::register_at).
    pub async fn register(&self, content_id: &str) -> bool {
        self.register_at(content_id, UnixTimestamp::now()).await
    }

    /// Registers `content_id` as staged at `staged_at`.
    ///
    /// The first registration wins: re-registering an id keeps its original
    /// timestamp and returns `false`.
    pub async fn register_at(&self, content_id: &str, staged_at: UnixTimestamp) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(content_id) {
            return false;
        }
        entries.insert(content_id.to_owned(), Slot { staged_at, holds: 0 });
        tracing::debug!(cid = %content_id, %staged_at, "registered staged object");
        true
    }

    /// Shields `content_id` from eviction until [`unhold`](Self::unhold) or
    /// [`release`](Self::release).
    ///
    /// Holds nest. Returns `false` if the id is not staged.
    pub async fn hold(&self, content_id: &str) -> bool {
        match self.entries.write().await.get_mut(content_id) {
            Some(slot) => {
                slot.holds += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one hold on `content_id`, making it evictable again once none remain.
    pub async fn unhold(&self, content_id: &str) {
        if let Some(slot) = self.entries.write().await.get_mut(content_id) {
            slot.holds = slot.holds.saturating_sub(1);
        }
    }

    /// Removes `content_id` without touching storage.
    ///
    /// Used once a pin claim takes over retention. Returns `false` if the id
    /// was not staged.
    pub async fn release(&self, content_id: &str) -> bool {
        let released = self.entries.write().await.remove(content_id).is_some();
        if released {
            tracing::debug!(cid = %content_id, "released staged object");
        }
        released
    }

    /// Returns `true` if `content_id` is staged.
    pub async fn contains(&self, content_id: &str) -> bool {
        self.entries.read().await.contains_key(content_id)
    }

    /// Number of staged objects.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if nothing is staged.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// All staged entries, oldest first.
    pub async fn snapshot(&self) -> Vec<StagedObjectEntry> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(content_id, slot)| StagedObjectEntry {
                content_id: content_id.clone(),
                staged_at: slot.staged_at,
                held: slot.holds > 0,
            })
            .collect();
        entries.sort_by(|a, b| {
            a.staged_at
                .cmp(&b.staged_at)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        entries
    }

    /// Evicts entries staged more than `ttl` before `now` and deletes them
    /// from storage.
    ///
    /// An entry exactly `ttl` old survives until the next sweep, and a held
    /// entry survives regardless of age. Evicted ids
    /// leave the registry even when their deletion fails; failures are
    /// logged and listed in the report.
    pub async fn sweep_expired(&self, now: UnixTimestamp, ttl: Duration) -> EvictionReport {
        let ttl = ttl.as_secs();
        let evicted: Vec<String> = {
            let mut entries = self.entries.write().await;
            let mut expired: Vec<String> = entries
                .iter()
                .filter(|(_, slot)| slot.holds == 0 && now.secs_since(slot.staged_at) > ttl)
                .map(|(content_id, _)| content_id.clone())
                .collect();
            expired.sort();
            for content_id in &expired {
                entries.remove(content_id);
            }
            expired
        };

        let mut report = EvictionReport {
            evicted,
            ..EvictionReport::default()
        };
        for content_id in &report.evicted {
            let outcome = match bounded(
                self.timeout,
                "remove",
                content_id,
                self.store.remove(content_id),
            )
            .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match outcome {
                Ok(()) => report.deleted.push(content_id.clone()),
                Err(error) => {
                    tracing::warn!(cid = %content_id, %error, "failed to delete expired staged object");
                    report.failed.push(FailedDeletion {
                        content_id: content_id.clone(),
                        error,
                    });
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(
                evicted = report.evicted.len(),
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "evicted expired staged objects"
            );
        }
        report
    }
}
