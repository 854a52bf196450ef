//! The payload shape carried by the KV-store queue (§4.1) and locks (§4.2).
//! These live in the key-value store, not SQL — this module only defines
//! the wire shape both the in-process and Redis-backed adapters share.

use serde::{Deserialize, Serialize};

use super::voice::ServiceProvider;

/// One pending allocation request, keyed by `voice_id` so duplicate
/// enqueues collapse onto a single entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueEntry {
    pub voice_id: i64,
    pub recording_object_key: String,
    pub filename: String,
    pub user_id: i64,
    pub voice_name: String,
    pub attempts: u32,
    pub service_provider: ServiceProvider,
}

/// A queue entry paired with its eligibility score, as returned by
/// `SlotQueuePort::snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredQueueEntry {
    pub entry: QueueEntry,
    pub score: f64,
}
