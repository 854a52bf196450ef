//! The Voice entity and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a voice.
///
/// `NeedsRerecord` is reachable only from `Error` by an explicit operator
/// action (outside this core) when the stored sample can never produce an
/// acceptable clone; it exits only back to `Pending` on re-upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStatus {
    Pending,
    Processing,
    Recorded,
    Ready,
    Error,
    NeedsRerecord,
}

/// Slot-allocation status, independent of `VoiceStatus`.
///
/// Invariant: `remote_voice_id.is_some() <=> allocation_status == Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Recorded,
    Allocating,
    Ready,
}

/// Upstream TTS vendor a voice's live clone (if any) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceProvider {
    ElevenLabs,
    Cartesia,
}

impl ServiceProvider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ElevenLabs => "elevenlabs",
            Self::Cartesia => "cartesia",
        }
    }
}

impl std::fmt::Display for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cloned voice owned by a user.
///
/// `recording_object_key` is never mutated after initial upload — it is the
/// source of truth for any future reclone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub id: i64,
    pub owner_user_id: i64,
    pub name: String,
    pub recording_object_key: String,
    pub sample_filename: String,
    pub service_provider: ServiceProvider,
    pub remote_voice_id: Option<String>,
    pub status: VoiceStatus,
    pub allocation_status: AllocationStatus,
    pub allocated_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub slot_lock_expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Voice {
    /// `remote_voice_id ≠ null ⇔ allocation_status = ready`.
    #[must_use]
    pub const fn invariant_holds(&self) -> bool {
        matches!(
            (&self.remote_voice_id, self.allocation_status),
            (Some(_), AllocationStatus::Ready) | (None, AllocationStatus::Recorded | AllocationStatus::Allocating)
        )
    }

    /// A voice with no recording and no live remote clone has nothing to
    /// allocate from.
    #[must_use]
    pub fn has_usable_sample(&self) -> bool {
        !self.recording_object_key.is_empty() || self.remote_voice_id.is_some()
    }

    #[must_use]
    pub fn is_warm_hold_active(&self, now: DateTime<Utc>) -> bool {
        self.slot_lock_expires_at.is_some_and(|expires| now < expires)
    }
}

/// Outcome returned by the slot allocator for a synthesis demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Ready,
    Allocating,
    Queued,
}

/// `SlotAllocator::ensure_active_voice` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotState {
    pub status: SlotStatus,
    pub metadata: serde_json::Value,
}

impl SlotState {
    #[must_use]
    pub fn ready(metadata: serde_json::Value) -> Self {
        Self {
            status: SlotStatus::Ready,
            metadata,
        }
    }

    #[must_use]
    pub fn allocating(queue_position: Option<u64>) -> Self {
        Self {
            status: SlotStatus::Allocating,
            metadata: serde_json::json!({ "queue_position": queue_position }),
        }
    }

    #[must_use]
    pub fn queued(queue_position: Option<u64>) -> Self {
        Self {
            status: SlotStatus::Queued,
            metadata: serde_json::json!({ "queue_position": queue_position }),
        }
    }
}
