//! `POST /synthesize` (§4.8, §6).

use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use voiceslot_core::domain::SlotStatus;
use voiceslot_core::services::SynthesizeOutcome;

use crate::error::HttpError;
use crate::handlers::UserId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub voice_id: i64,
    pub story_id: i64,
}

#[derive(Debug, Serialize)]
pub struct SynthesizeResponseDto {
    pub status: &'static str,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The presigned URL TTL for a just-completed synthesis, handed back
/// inline in the 200 response so the caller doesn't need a second round
/// trip to `GET /audio/url/:voice_id/:story_id`.
const INLINE_URL_TTL: Duration = Duration::from_secs(3600);

pub async fn synthesize(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<SynthesizeRequest>,
) -> Result<(StatusCode, Json<SynthesizeResponseDto>), HttpError> {
    let voice = state.voices.get(req.voice_id).await?;
    if voice.owner_user_id != user_id {
        return Err(HttpError::Forbidden("voice does not belong to this user".into()));
    }

    let text = state.stories.get_text(req.story_id).await?;
    let response = state.orchestrator.synthesize(&voice, req.story_id, &text).await?;

    let (status_code, status, url) = match response.outcome {
        SynthesizeOutcome::Ready => {
            let url = match &response.request.object_key {
                Some(key) => Some(state.object_store.presigned_url(key, INLINE_URL_TTL).await?),
                None => None,
            };
            (StatusCode::OK, "ready", url)
        }
        SynthesizeOutcome::Accepted(SlotStatus::Ready) => (StatusCode::ACCEPTED, "processing", None),
        SynthesizeOutcome::Accepted(SlotStatus::Allocating) => (StatusCode::ACCEPTED, "allocating", None),
        SynthesizeOutcome::Accepted(SlotStatus::Queued) => (StatusCode::ACCEPTED, "queued", None),
        SynthesizeOutcome::Pending => (StatusCode::ACCEPTED, "processing", None),
    };

    Ok((
        status_code,
        Json(SynthesizeResponseDto {
            status,
            id: response.request.id,
            url,
        }),
    ))
}
