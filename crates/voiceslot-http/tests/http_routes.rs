//! End-to-end tests over the real router: a temp-file SQLite database, an
//! in-process queue, and a temp-dir filesystem object store, wired through
//! the same `bootstrap()` the binary uses. No upstream provider HTTP calls
//! are exercised here, so the ElevenLabs key below is never used for
//! anything but passing config validation.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

use voiceslot_core::domain::{CreditSource, ServiceProvider};
use voiceslot_core::ports::PutOptions;
use voiceslot_http::bootstrap::{CorsConfig, ObjectStoreConfig, QueueBackend, ServerConfig, bootstrap};
use voiceslot_http::routes::create_router;

fn test_config(db_path: std::path::PathBuf, object_dir: std::path::PathBuf) -> ServerConfig {
    ServerConfig {
        port: 0,
        database_path: db_path,
        object_store: ObjectStoreConfig::Filesystem(object_dir),
        queue_backend: QueueBackend::InProcess,
        preferred_voice_service: ServiceProvider::ElevenLabs,
        elevenlabs_api_key: Some("test-key".to_string()),
        cartesia_api_key: None,
        allocator: voiceslot_core::config::SlotAllocatorConfig::default(),
        ledger: voiceslot_core::config::LedgerConfig::default(),
        dedup_lock_seconds: 10,
        max_synthesis_attempts: 5,
        cors: CorsConfig::AllowAll,
    }
}

async fn test_router() -> (axum::Router, Arc<voiceslot_http::bootstrap::AppContext>) {
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("test.db");
    let object_dir = tempfile::tempdir().unwrap();
    // Leak the tempdirs for the lifetime of the test process; each test gets
    // its own directories so this doesn't accumulate across the suite.
    std::mem::forget(db_dir);
    let object_dir_path = object_dir.path().to_path_buf();
    std::mem::forget(object_dir);

    let config = test_config(db_path, object_dir_path);
    let (ctx, _runner) = bootstrap(&config).await.expect("bootstrap");
    let ctx = Arc::new(ctx);
    let router = create_router(ctx.clone(), &config.cors);
    (router, ctx)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_is_ok_without_auth() {
    let (router, _ctx) = test_router().await;
    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn credits_endpoint_reports_granted_balance() {
    let (router, ctx) = test_router().await;

    ctx.ledger
        .grant(7, 5000, "signup bonus", CreditSource::Free, None)
        .await
        .unwrap();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/me/credits")
                .header("X-User-Id", "7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["balance"], 5000);
    assert_eq!(body["unit_label"], "character");
    assert_eq!(body["lots"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn credits_endpoint_requires_user_id_header() {
    let (router, _ctx) = test_router().await;
    let response = router
        .oneshot(Request::builder().uri("/me/credits").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_voice_then_delete_round_trips() {
    let (router, ctx) = test_router().await;

    let boundary = "voiceslot-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"name\"\r\n\r\n");
    body.extend_from_slice(b"Narrator\r\n");
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"sample\"; filename=\"sample.wav\"\r\n");
    body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
    body.extend_from_slice(b"RIFF....WAVEfmt ");
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/voices")
                .header("X-User-Id", "3")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let voice_id = created["id"].as_i64().unwrap();
    assert_eq!(created["status"], "recorded");

    let voice = ctx.voices.get(voice_id).await.unwrap();
    assert_eq!(voice.owner_user_id, 3);
    assert_eq!(voice.name, "Narrator");

    let delete_response = router
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/voices/{voice_id}"))
                .header("X-User-Id", "3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete_response.status(), StatusCode::OK);
    assert!(ctx.voices.get(voice_id).await.is_err());
}

#[tokio::test]
async fn delete_voice_rejects_non_owner() {
    let (router, ctx) = test_router().await;

    let voice = voiceslot_core::domain::Voice {
        id: 0,
        owner_user_id: 1,
        name: "Narrator".into(),
        recording_object_key: "voice_samples/1/sample.wav".into(),
        sample_filename: "sample.wav".into(),
        service_provider: ServiceProvider::ElevenLabs,
        remote_voice_id: None,
        status: voiceslot_core::domain::VoiceStatus::Recorded,
        allocation_status: voiceslot_core::domain::AllocationStatus::Recorded,
        allocated_at: None,
        last_used_at: None,
        slot_lock_expires_at: None,
        error_message: None,
    };
    let saved = ctx.voices.create(&voice).await.unwrap();

    let response = router
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/voices/{}", saved.id))
                .header("X-User-Id", "999")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn audio_exists_and_url_and_stream_round_trip() {
    let (router, ctx) = test_router().await;

    let voice = voiceslot_core::domain::Voice {
        id: 0,
        owner_user_id: 1,
        name: "Narrator".into(),
        recording_object_key: "voice_samples/1/sample.wav".into(),
        sample_filename: "sample.wav".into(),
        service_provider: ServiceProvider::ElevenLabs,
        remote_voice_id: Some("remote-1".into()),
        status: voiceslot_core::domain::VoiceStatus::Ready,
        allocation_status: voiceslot_core::domain::AllocationStatus::Ready,
        allocated_at: None,
        last_used_at: None,
        slot_lock_expires_at: None,
        error_message: None,
    };
    let voice = ctx.voices.create(&voice).await.unwrap();

    let request = ctx.audio_requests.create(voice.id, 42, 1).await.unwrap();
    let audio_bytes = Bytes::from_static(b"not really mp3 but good enough for a range test");
    let key = format!("audio_stories/{}/{}.mp3", voice.id, request.story_id);
    ctx.object_store.upload(&key, audio_bytes.clone(), PutOptions::default()).await.unwrap();
    ctx.audio_requests.complete(request.id, key, 1.23).await.unwrap();

    let exists_response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/audio/exists/{}/{}", voice.id, request.story_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(exists_response.status(), StatusCode::OK);
    assert_eq!(body_json(exists_response).await["exists"], true);

    let url_response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/audio/url/{}/{}", voice.id, request.story_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(url_response.status(), StatusCode::TEMPORARY_REDIRECT);

    let full_stream = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/audio/{}/{}.mp3", voice.id, request.story_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(full_stream.status(), StatusCode::OK);
    let full_bytes = full_stream.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(full_bytes, audio_bytes);

    let ranged = router
        .oneshot(
            Request::builder()
                .uri(format!("/audio/{}/{}.mp3", voice.id, request.story_id))
                .header(header::RANGE, "bytes=0-3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ranged.status(), StatusCode::PARTIAL_CONTENT);
    let content_range = ranged.headers().get(header::CONTENT_RANGE).unwrap().to_str().unwrap().to_string();
    assert!(content_range.starts_with("bytes 0-3/"));
    let ranged_bytes = ranged.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(ranged_bytes, Bytes::from_static(b"not "));
}

#[tokio::test]
async fn audio_exists_is_false_for_unknown_pair() {
    let (router, _ctx) = test_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .uri("/audio/exists/999/999")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["exists"], false);
}

#[tokio::test]
async fn admin_status_reports_capacity_and_queue_depth() {
    let (router, ctx) = test_router().await;

    let voice = voiceslot_core::domain::Voice {
        id: 0,
        owner_user_id: 1,
        name: "Narrator".into(),
        recording_object_key: "voice_samples/1/sample.wav".into(),
        sample_filename: "sample.wav".into(),
        service_provider: ServiceProvider::ElevenLabs,
        remote_voice_id: Some("remote-1".into()),
        status: voiceslot_core::domain::VoiceStatus::Ready,
        allocation_status: voiceslot_core::domain::AllocationStatus::Ready,
        allocated_at: None,
        last_used_at: None,
        slot_lock_expires_at: None,
        error_message: None,
    };
    ctx.voices.create(&voice).await.unwrap();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/admin/voice-slots/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["metrics"]["ready_count"], 1);
    assert_eq!(body["metrics"]["queue_depth"], 0);
    assert_eq!(body["active_voices"].as_array().unwrap().len(), 1);
}
