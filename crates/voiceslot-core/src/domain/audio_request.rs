//! One user-visible synthesis attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioRequestStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

/// Unique on `(story_id, voice_id)` — at most one audio per pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRequest {
    pub id: i64,
    pub story_id: i64,
    pub voice_id: i64,
    pub user_id: i64,
    pub status: AudioRequestStatus,
    pub object_key: Option<String>,
    pub error_message: Option<String>,
    pub credits_charged: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
