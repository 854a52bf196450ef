//! `GET /audio/url/:voice_id/:story_id`, `GET /audio/exists/:voice_id/:story_id`
//! and `GET /audio/:voice_id/:filename` (§6).

use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Serialize;

use crate::error::HttpError;
use crate::state::AppState;

/// TTL on URLs handed out by the dedicated lookup endpoint. Longer than the
/// inline TTL synthesize returns since a caller might sit on this link.
const LOOKUP_URL_TTL: Duration = Duration::from_secs(6 * 3600);

async fn resolve_object_key(state: &AppState, voice_id: i64, story_id: i64) -> Result<Option<String>, HttpError> {
    let request = state.audio_requests.find_by_voice_and_story(voice_id, story_id).await?;
    Ok(request.and_then(|r| r.object_key))
}

pub async fn presigned_url(
    State(state): State<AppState>,
    Path((voice_id, story_id)): Path<(i64, i64)>,
) -> Result<Response, HttpError> {
    let key = resolve_object_key(&state, voice_id, story_id)
        .await?
        .ok_or_else(|| HttpError::NotFound(format!("no synthesized audio for voice {voice_id} story {story_id}")))?;

    let url = state.object_store.presigned_url(&key, LOOKUP_URL_TTL).await?;
    Ok(Redirect::temporary(&url).into_response())
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

pub async fn exists(
    State(state): State<AppState>,
    Path((voice_id, story_id)): Path<(i64, i64)>,
) -> Result<axum::Json<ExistsResponse>, HttpError> {
    let exists = resolve_object_key(&state, voice_id, story_id).await?.is_some();
    Ok(axum::Json(ExistsResponse { exists }))
}

/// Streams the synthesized mp3 for `voice_id`/`filename`, honoring a
/// single-range `Range: bytes=start-end` header with a 206 partial
/// response. Any other range syntax (multi-range, suffix ranges) falls
/// back to a full 200 body — this endpoint is consumed by an `<audio>`
/// element, not a general-purpose range server.
pub async fn stream(
    State(state): State<AppState>,
    Path((voice_id, filename)): Path<(i64, String)>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let story_id = filename
        .strip_suffix(".mp3")
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| HttpError::BadRequest("filename must be {story_id}.mp3".into()))?;

    let key = resolve_object_key(&state, voice_id, story_id)
        .await?
        .ok_or_else(|| HttpError::NotFound(format!("no synthesized audio for voice {voice_id} story {story_id}")))?;

    let bytes = state.object_store.download(&key).await?;
    let total = bytes.len() as u64;

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_byte_range);

    let range = range.map(|(start, end)| (start, end.min(total.saturating_sub(1))));

    match range {
        Some((start, end)) if total > 0 && start < total && start <= end => {
            let slice = bytes.slice(start as usize..=end as usize);
            let mut response = (StatusCode::PARTIAL_CONTENT, Body::from(slice)).into_response();
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
            headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")).unwrap(),
            );
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            Ok(response)
        }
        _ => {
            let mut response = (StatusCode::OK, Body::from(bytes)).into_response();
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            Ok(response)
        }
    }
}

fn parse_byte_range(raw: &str) -> Option<(u64, u64)> {
    let spec = raw.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() { u64::MAX } else { end.parse().ok()? };
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bounded_range() {
        assert_eq!(parse_byte_range("bytes=0-99"), Some((0, 99)));
    }

    #[test]
    fn parses_open_ended_range() {
        assert_eq!(parse_byte_range("bytes=100-"), Some((100, u64::MAX)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_byte_range("nonsense"), None);
    }
}
