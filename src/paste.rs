use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata record for one paste, stored separately from its content bytes.
///
/// Serialized form is the persisted record and the meta-endpoint body;
/// timestamps are RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paste {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Authoritative content length, set once at creation.
    pub size: u64,
    pub content_type: String,
    pub burn_after_read: bool,
    #[serde(default)]
    pub read_count: u64,
}

impl Paste {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}
