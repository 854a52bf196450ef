//! `AllocationDispatcher` / `SynthesisDispatcher` implementations.
//!
//! Both dispatchers are fire-and-forget: `dispatch` spawns a detached
//! tokio task and returns immediately, matching the way the core's ports
//! are documented ("the task takes over"). Failures inside the spawned
//! task are logged, never propagated — there is no caller left to hand
//! an error back to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use voiceslot_core::domain::{
    AllocationStatus, AudioRequest, AudioRequestStatus, QueueEntry, VoiceSlotEvent, VoiceSlotEventType,
};
use voiceslot_core::errors::VoiceError;
use voiceslot_core::ports::{
    AudioRequestRepositoryPort, MetricsSink, ObjectStorePort, PutOptions, StoryContentPort,
    VoiceRepositoryPort, VoiceServiceProviderPort,
};
use voiceslot_core::services::allocation_worker::AllocationWorker;
use voiceslot_core::services::allocator::AllocationDispatcher;
use voiceslot_core::services::ledger::CreditLedger;
use voiceslot_core::services::orchestrator::SynthesisDispatcher;

/// Dispatches the one-shot clone attempt for a voice that just won
/// capacity under `SlotAllocator::ensure_active_voice` step 8.
pub struct AllocationTaskDispatcher {
    worker: Arc<AllocationWorker>,
    voices: Arc<dyn VoiceRepositoryPort>,
}

impl AllocationTaskDispatcher {
    #[must_use]
    pub const fn new(worker: Arc<AllocationWorker>, voices: Arc<dyn VoiceRepositoryPort>) -> Self {
        Self { worker, voices }
    }
}

#[async_trait]
impl AllocationDispatcher for AllocationTaskDispatcher {
    async fn dispatch(&self, voice_id: i64) {
        let worker = self.worker.clone();
        let voices = self.voices.clone();
        tokio::spawn(async move {
            let voice = match voices.get(voice_id).await {
                Ok(v) => v,
                Err(err) => {
                    error!(voice_id, error = %err, "dispatched allocation found no voice");
                    return;
                }
            };
            let entry = QueueEntry {
                voice_id: voice.id,
                recording_object_key: voice.recording_object_key.clone(),
                filename: voice.sample_filename.clone(),
                user_id: voice.owner_user_id,
                voice_name: voice.name.clone(),
                attempts: 0,
                service_provider: voice.service_provider,
            };
            worker.allocate(&entry).await;
        });
    }
}

/// Tuning for the synthesis worker body, kept separate from
/// `SlotAllocatorConfig` since "how long to wait for a slot before giving
/// up on one synthesis request" is a different knob than the allocator's
/// own circuit breakers.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisWorkerConfig {
    /// How many times to poll for the voice becoming ready before giving
    /// up and refunding.
    pub max_attempts: u32,
    pub retry_poll_interval_seconds: u64,
    /// Warm hold extended on the voice once synthesis completes.
    pub warm_hold_seconds: u64,
}

impl SynthesisWorkerConfig {
    #[must_use]
    pub const fn retry_poll_interval(&self) -> Duration {
        Duration::from_secs(self.retry_poll_interval_seconds)
    }
}

/// Runs the §4.8 "Synthesis worker" body for one accepted request: waits
/// out any in-flight allocation, calls the provider, stores the result,
/// and refunds on any failure along the way.
#[derive(Clone)]
pub struct SynthesisTaskDispatcher {
    voices: Arc<dyn VoiceRepositoryPort>,
    audio_requests: Arc<dyn AudioRequestRepositoryPort>,
    provider: Arc<dyn VoiceServiceProviderPort>,
    object_store: Arc<dyn ObjectStorePort>,
    stories: Arc<dyn StoryContentPort>,
    ledger: Arc<CreditLedger>,
    metrics: Arc<dyn MetricsSink>,
    config: SynthesisWorkerConfig,
}

impl SynthesisTaskDispatcher {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        voices: Arc<dyn VoiceRepositoryPort>,
        audio_requests: Arc<dyn AudioRequestRepositoryPort>,
        provider: Arc<dyn VoiceServiceProviderPort>,
        object_store: Arc<dyn ObjectStorePort>,
        stories: Arc<dyn StoryContentPort>,
        ledger: Arc<CreditLedger>,
        metrics: Arc<dyn MetricsSink>,
        config: SynthesisWorkerConfig,
    ) -> Self {
        Self {
            voices,
            audio_requests,
            provider,
            object_store,
            stories,
            ledger,
            metrics,
            config,
        }
    }

    async fn run(&self, audio_request_id: i64) {
        if let Err(err) = self.run_inner(audio_request_id).await {
            error!(audio_request_id, error = %err, "synthesis worker aborted");
        }
    }

    async fn run_inner(&self, audio_request_id: i64) -> Result<(), VoiceError> {
        let request = self.audio_requests.get(audio_request_id).await?;

        let mut voice = self.voices.get(request.voice_id).await?;
        let mut attempts = 0u32;
        loop {
            voice = self.voices.get(voice.id).await?;
            if voice.remote_voice_id.is_some() && voice.allocation_status == AllocationStatus::Ready {
                break;
            }
            attempts += 1;
            if attempts >= self.config.max_attempts {
                self.give_up(&request, voice.owner_user_id, "voice never became ready in time")
                    .await?;
                return Ok(());
            }
            tokio::time::sleep(self.config.retry_poll_interval()).await;
        }

        let text = match self.stories.get_text(request.story_id).await {
            Ok(text) => text,
            Err(err) => {
                self.give_up(&request, voice.owner_user_id, &format!("story lookup failed: {err}"))
                    .await?;
                return Ok(());
            }
        };

        let remote_voice_id = voice
            .remote_voice_id
            .clone()
            .ok_or(VoiceError::SampleMissing { id: voice.id })?;

        let audio = match self
            .provider
            .synthesize_speech(&remote_voice_id, &text, &serde_json::json!({}))
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                self.give_up(&request, voice.owner_user_id, &format!("synthesis failed: {err}"))
                    .await?;
                return Ok(());
            }
        };

        let object_key = format!("audio_stories/{}/{}.mp3", voice.id, request.story_id);
        if let Err(err) = self
            .object_store
            .upload(&object_key, audio.clone(), PutOptions::default())
            .await
        {
            self.give_up(&request, voice.owner_user_id, &format!("upload failed: {err}"))
                .await?;
            return Ok(());
        }

        // No decoder on hand to read the real mp3 duration; estimate off
        // the encoded size at a nominal 128kbps rather than special-case
        // this one field as unknown.
        let duration_seconds = (audio.len() as f64 * 8.0) / 128_000.0;
        self.audio_requests
            .complete(audio_request_id, object_key, duration_seconds)
            .await?;

        let now = Utc::now();
        voice.last_used_at = Some(now);
        voice.slot_lock_expires_at =
            Some(now + chrono::Duration::seconds(self.config.warm_hold_seconds as i64));
        self.voices.save(&voice).await?;
        self.voices
            .append_event(VoiceSlotEvent::new(
                Some(voice.id),
                Some(voice.owner_user_id),
                VoiceSlotEventType::SlotLockReleased,
                None,
                serde_json::json!({ "audio_request_id": audio_request_id }),
            ))
            .await?;
        self.metrics.incr("audio.synthesis.completed", 1);
        info!(audio_request_id, voice_id = voice.id, "synthesis completed");
        Ok(())
    }

    async fn give_up(&self, request: &AudioRequest, user_id: i64, message: &str) -> Result<(), VoiceError> {
        warn!(audio_request_id = request.id, message, "synthesis worker giving up, refunding");
        let _ = self
            .ledger
            .refund_by_audio_request(request.id, user_id, message)
            .await;
        self.audio_requests
            .set_status(request.id, AudioRequestStatus::Error, Some(message.to_string()))
            .await?;
        self.metrics.incr("audio.synthesis.failed", 1);
        Ok(())
    }
}

#[async_trait]
impl SynthesisDispatcher for SynthesisTaskDispatcher {
    async fn dispatch(&self, audio_request_id: i64) {
        let this = self.clone();
        tokio::spawn(async move { this.run(audio_request_id).await });
    }
}
