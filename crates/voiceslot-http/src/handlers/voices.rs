//! `POST /voices` and `DELETE /voices/:id` (§6).

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use serde::Serialize;

use voiceslot_core::domain::{AllocationStatus, Voice, VoiceSlotEvent, VoiceSlotEventType, VoiceStatus};
use voiceslot_core::ports::PutOptions;

use crate::error::HttpError;
use crate::handlers::UserId;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreateVoiceResponse {
    pub id: i64,
    pub status: &'static str,
    pub task_id: String,
}

/// Accepts a multipart upload with a `name` field and a `sample` file
/// field. Stores the sample permanently under `voice_samples/{user}/...`
/// and records the voice as `recorded` — it has nothing allocated yet,
/// that happens on first `/synthesize` through the allocator.
pub async fn create(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CreateVoiceResponse>), HttpError> {
    let mut name: Option<String> = None;
    let mut sample_bytes: Option<bytes::Bytes> = None;
    let mut sample_filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HttpError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("name") => {
                name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| HttpError::BadRequest(format!("invalid name field: {e}")))?,
                );
            }
            Some("sample") => {
                sample_filename = field.file_name().map(str::to_string);
                sample_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| HttpError::BadRequest(format!("invalid sample field: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| HttpError::BadRequest("missing name field".into()))?;
    let sample_bytes = sample_bytes.ok_or_else(|| HttpError::BadRequest("missing sample field".into()))?;
    let sample_filename = sample_filename.unwrap_or_else(|| "sample.wav".to_string());
    let ext = sample_filename.rsplit('.').next().unwrap_or("wav");

    let object_key = format!(
        "voice_samples/{}/voice_{}_{}.{}",
        user_id,
        uuid::Uuid::new_v4(),
        sample_filename,
        ext
    );

    state
        .object_store
        .upload(&object_key, sample_bytes, PutOptions::default())
        .await?;

    let voice = Voice {
        id: 0,
        owner_user_id: user_id,
        name,
        recording_object_key: object_key,
        sample_filename,
        service_provider: state.preferred_provider,
        remote_voice_id: None,
        status: VoiceStatus::Recorded,
        allocation_status: AllocationStatus::Recorded,
        allocated_at: None,
        last_used_at: None,
        slot_lock_expires_at: None,
        error_message: None,
    };

    let saved = state.voices.create(&voice).await?;

    state
        .voices
        .append_event(VoiceSlotEvent::new(
            Some(saved.id),
            Some(user_id),
            VoiceSlotEventType::RecordingUploaded,
            None,
            serde_json::json!({ "filename": saved.sample_filename }),
        ))
        .await?;

    let task_id = uuid::Uuid::new_v4().to_string();

    Ok((
        StatusCode::CREATED,
        Json(CreateVoiceResponse {
            id: saved.id,
            status: "recorded",
            task_id,
        }),
    ))
}

/// Releases the voice's slot if one is held, deletes both the recording
/// sample and any synthesized audio from object storage, and removes the
/// voice row. Event-log rows referencing this voice are left in place —
/// `voice_id` is nullable precisely so the audit trail survives deletion.
pub async fn delete(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(voice_id): Path<i64>,
) -> Result<StatusCode, HttpError> {
    let voice = state.voices.get(voice_id).await?;
    if voice.owner_user_id != user_id {
        return Err(HttpError::Forbidden("voice does not belong to this user".into()));
    }

    if let Some(remote_voice_id) = &voice.remote_voice_id {
        if let Err(err) = state.provider.delete_voice(remote_voice_id).await {
            tracing::warn!(voice_id, %err, "provider delete_voice failed during voice teardown, continuing");
        }
    }

    let mut keys = vec![voice.recording_object_key.clone()];
    let requests = state.audio_requests.list_by_voice(voice_id).await.unwrap_or_default();
    keys.extend(requests.into_iter().filter_map(|r| r.object_key));
    state.object_store.delete(&keys).await.ok();

    state.voices.delete(voice_id).await?;

    Ok(StatusCode::OK)
}
