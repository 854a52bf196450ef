//! The append-only voice slot event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every allocation-lifecycle transition emits exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceSlotEventType {
    RecordingUploaded,
    RecordingProcessingQueued,
    RecordingProcessed,
    RecordingProcessingFailed,
    AllocationQueued,
    AllocationStarted,
    AllocationCompleted,
    AllocationFailed,
    SlotLockAcquired,
    SlotLockReleased,
    SlotEvicted,
}

impl VoiceSlotEventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RecordingUploaded => "recording_uploaded",
            Self::RecordingProcessingQueued => "recording_processing_queued",
            Self::RecordingProcessed => "recording_processed",
            Self::RecordingProcessingFailed => "recording_processing_failed",
            Self::AllocationQueued => "allocation_queued",
            Self::AllocationStarted => "allocation_started",
            Self::AllocationCompleted => "allocation_completed",
            Self::AllocationFailed => "allocation_failed",
            Self::SlotLockAcquired => "slot_lock_acquired",
            Self::SlotLockReleased => "slot_lock_released",
            Self::SlotEvicted => "slot_evicted",
        }
    }
}

/// Append-only audit entry. `voice_id` stays nullable so events survive
/// voice deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSlotEvent {
    pub id: i64,
    pub voice_id: Option<i64>,
    pub user_id: Option<i64>,
    pub event_type: VoiceSlotEventType,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl VoiceSlotEvent {
    /// Build a new (unsaved) event with the given fields; `created_at` is
    /// stamped by the repository on insert.
    #[must_use]
    pub fn new(
        voice_id: Option<i64>,
        user_id: Option<i64>,
        event_type: VoiceSlotEventType,
        reason: Option<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            voice_id,
            user_id,
            event_type,
            reason,
            metadata,
            created_at: Utc::now(),
        }
    }
}
