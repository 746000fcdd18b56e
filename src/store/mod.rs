use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::paste::Paste;

pub mod fs;

#[cfg(feature = "storage-s3")]
pub mod s3;

pub use fs::FsStore;

/// Upper bound on any single backend call, so a stuck backend cannot pin a
/// request task.
pub const OP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("storage call timed out")]
    Timeout,

    #[cfg(feature = "storage-s3")]
    #[error("object store error: {0}")]
    Object(String),
}

/// Temporary keys holding a burned paste between the claim and its delivery.
///
/// The stamp makes the keys unique per claim; [`next_claim_stamp`] guarantees
/// monotonicity within the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnClaim {
    pub id: String,
    pub stamp: u64,
}

impl BurnClaim {
    pub fn new(id: &str) -> BurnClaim {
        BurnClaim { id: id.to_owned(), stamp: next_claim_stamp() }
    }

    pub fn content_key(&self) -> String {
        format!("{}.burn.{}", self.id, self.stamp)
    }

    pub fn metadata_key(&self) -> String {
        format!("{}.burn.{}.json", self.id, self.stamp)
    }

    /// Shared marker key used by backends whose claim step is a conditional
    /// put rather than a rename.
    pub fn marker_key(&self) -> String {
        format!("{}.burn", self.id)
    }
}

/// Monotonic, process-unique stamp; seeded from the clock so stamps also
/// order across restarts against leftover temporaries.
fn next_claim_stamp() -> u64 {
    static STAMP: LazyLock<AtomicU64> = LazyLock::new(|| {
        AtomicU64::new(chrono::Utc::now().timestamp_micros().unsigned_abs())
    });

    STAMP.fetch_add(1, Ordering::Relaxed)
}

/// Durable key → (metadata, content) map. One implementation per deployment
/// shape; the service and handlers are backend-agnostic.
///
/// `id` arguments are either plain slugs or burn-claim keys; neither contains
/// path separators.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn put_content(&self, id: &str, bytes: Bytes) -> Result<(), StoreError>;

    async fn put_metadata(&self, id: &str, meta: &Paste) -> Result<(), StoreError>;

    async fn get_metadata(&self, id: &str) -> Result<Option<Paste>, StoreError>;

    async fn get_content(&self, id: &str) -> Result<Option<Bytes>, StoreError>;

    /// Up to `n` leading bytes; a short blob yields what exists.
    async fn get_content_prefix(&self, id: &str, n: usize) -> Result<Option<Bytes>, StoreError>;

    /// Content length without reading the bytes.
    async fn stat_content(&self, id: &str) -> Result<Option<u64>, StoreError>;

    async fn exists(&self, id: &str) -> Result<bool, StoreError>;

    /// Remove both halves; removing an absent record succeeds.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Bump the read counter. Serialized against itself per store;
    /// last-writer-wins is acceptable (the counter is informational).
    async fn increment_read_count(&self, id: &str) -> Result<(), StoreError>;

    /// Atomically move both halves of `id` to claim keys. `Ok(None)` means
    /// the record was already gone (another reader won the claim); any error
    /// leaves the paste intact.
    async fn claim(&self, id: &str) -> Result<Option<BurnClaim>, StoreError>;

    async fn read_claimed(&self, claim: &BurnClaim) -> Result<Bytes, StoreError>;

    /// Best-effort removal of the claim's temporary keys; runs on every exit
    /// path of the burn protocol.
    async fn discard_claim(&self, claim: &BurnClaim);
}

/// Bound a backend call by [`OP_TIMEOUT`].
pub async fn bounded<T>(
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(OP_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_stamps_are_strictly_increasing() {
        let a = next_claim_stamp();
        let b = next_claim_stamp();
        let c = next_claim_stamp();
        assert!(a < b && b < c);
    }

    #[test]
    fn claim_keys_are_siblings_of_the_id() {
        let claim = BurnClaim { id: "ABCDE".into(), stamp: 42 };
        assert_eq!(claim.content_key(), "ABCDE.burn.42");
        assert_eq!(claim.metadata_key(), "ABCDE.burn.42.json");
        assert_eq!(claim.marker_key(), "ABCDE.burn");
    }
}
