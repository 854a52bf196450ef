//! `GET /admin/voice-slots/status` (§6). Unauthenticated-by-this-core, like
//! the rest of the API surface — the reverse proxy in front of this service
//! is expected to restrict this path to operators.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use voiceslot_core::domain::{AllocationStatus, ScoredQueueEntry, Voice, VoiceSlotEvent};

use crate::error::HttpError;
use crate::state::AppState;

const RECENT_EVENTS_LIMIT: u32 = 50;
const QUEUE_SNAPSHOT_LIMIT: u32 = 100;

#[derive(Debug, Serialize)]
pub struct Metrics {
    pub slot_limit: u32,
    pub available_capacity: u32,
    pub ready_count: u32,
    pub allocating_count: u32,
    pub queue_depth: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub metrics: Metrics,
    pub active_voices: Vec<Voice>,
    pub queued_requests: Vec<ScoredQueueEntry>,
    pub recent_events: Vec<VoiceSlotEvent>,
}

/// Snapshot across every provider the deployment is configured with — in
/// practice the single `preferred_voice_service` this build was started
/// with, since capacity is accounted per provider (§6) and this core only
/// wires one provider adapter at a time (see DESIGN.md).
pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, HttpError> {
    let provider = state.preferred_provider;

    let active_voices = state.voices.list_active_allocations(provider).await?;
    let ready_count = active_voices
        .iter()
        .filter(|v| v.allocation_status == AllocationStatus::Ready)
        .count() as u32;
    let allocating_count = active_voices
        .iter()
        .filter(|v| v.allocation_status == AllocationStatus::Allocating)
        .count() as u32;

    let queue_depth = state.queue.length().await?;
    let queued_requests = state.queue.snapshot(QUEUE_SNAPSHOT_LIMIT).await?;
    let recent_events = state.voices.recent_events_global(RECENT_EVENTS_LIMIT).await?;

    let slot_limit = state.allocator_config.slot_limit;
    let available_capacity = slot_limit.saturating_sub(ready_count + allocating_count);

    Ok(Json(StatusResponse {
        metrics: Metrics {
            slot_limit,
            available_capacity,
            ready_count,
            allocating_count,
            queue_depth,
        },
        active_voices,
        queued_requests,
        recent_events,
    }))
}
