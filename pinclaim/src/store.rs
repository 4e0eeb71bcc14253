//! Content store boundary.
//!
//! A [`ContentStore`] is the node that holds staged objects. The lifecycle
//! adds uploads to it, reads object sizes, and asks it to drop objects whose
//! staging window expired.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Options applied when adding an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOptions {
    /// CID version of the returned identifier.
    pub cid_version: u8,
    /// Wrap the file in a directory so the filename is preserved.
    pub wrap_with_directory: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            cid_version: 1,
            wrap_with_directory: true,
        }
    }
}

/// Size information for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStat {
    /// Content identifier the stat was taken for.
    pub content_id: String,
    /// Object size in bytes.
    pub size: u64,
}

/// Errors reported by a [`ContentStore`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The node could not be reached or failed internally.
    #[error("content store unavailable: {0}")]
    Unavailable(String),
    /// The node does not know the object.
    #[error("object not found: {0}")]
    NotFound(String),
    /// The node refused the request.
    #[error("content store rejected request: {0}")]
    Rejected(String),
}

/// Content-addressed object storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Adds `bytes` under `filename` and returns the resulting content id.
    async fn add_object(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &AddOptions,
    ) -> Result<String, StoreError>;

    /// Returns size information for `content_id`.
    async fn stat(&self, content_id: &str) -> Result<ObjectStat, StoreError>;

    /// Removes `content_id` from the node.
    async fn remove(&self, content_id: &str) -> Result<(), StoreError>;
}
