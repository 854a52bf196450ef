//! Synthesis Orchestrator (§4.8) and Deduplicator (§4.9).
//!
//! This is the audio-request endpoint handler's business logic, kept free
//! of any HTTP framework type so the `voiceslot-http` crate's handler is a
//! thin adapter over it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{AudioRequest, AudioRequestStatus, SlotStatus, Voice};
use crate::errors::VoiceError;
use crate::ports::{LockPort, VoiceRepositoryPort};
use crate::services::allocator::SlotAllocator;
use crate::services::ledger::CreditLedger;

fn dedup_key(voice_id: i64, story_id: i64) -> String {
    format!("audio:synth:dedup:{voice_id}:{story_id}")
}

/// Dispatches the background synthesis worker task (§4.8's "Synthesis
/// worker") for an accepted request. Implemented by the worker crate's
/// task runner; kept as a port so the orchestrator never depends on the
/// concrete task-scheduling mechanism.
#[async_trait]
pub trait SynthesisDispatcher: Send + Sync {
    async fn dispatch(&self, audio_request_id: i64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesizeOutcome {
    Ready,
    Accepted(SlotStatus),
    Pending,
}

#[derive(Debug)]
pub struct SynthesizeResponse {
    pub outcome: SynthesizeOutcome,
    pub request: AudioRequest,
    pub voice_metadata: serde_json::Value,
    pub message: String,
}

pub struct SynthesisOrchestrator {
    allocator: Arc<SlotAllocator>,
    ledger: Arc<CreditLedger>,
    lock: Arc<dyn LockPort>,
    voices: Arc<dyn VoiceRepositoryPort>,
    audio_requests: Arc<dyn crate::ports::AudioRequestRepositoryPort>,
    dispatcher: Arc<dyn SynthesisDispatcher>,
    dedup_ttl_seconds: u64,
}

impl SynthesisOrchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        allocator: Arc<SlotAllocator>,
        ledger: Arc<CreditLedger>,
        lock: Arc<dyn LockPort>,
        voices: Arc<dyn VoiceRepositoryPort>,
        audio_requests: Arc<dyn crate::ports::AudioRequestRepositoryPort>,
        dispatcher: Arc<dyn SynthesisDispatcher>,
        dedup_ttl_seconds: u64,
    ) -> Self {
        Self {
            allocator,
            ledger,
            lock,
            voices,
            audio_requests,
            dispatcher,
            dedup_ttl_seconds,
        }
    }

    /// Implements the §4.8 steps 1-8. `text` is the resolved story content
    /// used only to compute credit cost; the orchestrator never interprets
    /// it further.
    pub async fn synthesize(
        &self,
        voice: &Voice,
        story_id: i64,
        text: &str,
    ) -> Result<SynthesizeResponse, VoiceError> {
        // Step 2: deduplicate.
        let key = dedup_key(voice.id, story_id);
        if !self.lock.try_acquire(&key, self.dedup_ttl_seconds).await? {
            if let Some(existing) = self
                .audio_requests
                .find_by_voice_and_story(voice.id, story_id)
                .await?
            {
                return Ok(SynthesizeResponse {
                    outcome: SynthesizeOutcome::Pending,
                    request: existing,
                    voice_metadata: serde_json::json!({}),
                    message: "request already in flight".into(),
                });
            }
        }

        // Step 3: find-or-create, short-circuit on existing terminal/active states.
        let existing = self
            .audio_requests
            .find_by_voice_and_story(voice.id, story_id)
            .await?;
        if let Some(request) = existing {
            match request.status {
                AudioRequestStatus::Ready => {
                    return Ok(SynthesizeResponse {
                        outcome: SynthesizeOutcome::Ready,
                        request,
                        voice_metadata: serde_json::json!({}),
                        message: "already synthesized".into(),
                    });
                }
                AudioRequestStatus::Processing => {
                    return Ok(SynthesizeResponse {
                        outcome: SynthesizeOutcome::Pending,
                        request,
                        voice_metadata: serde_json::json!({}),
                        message: "synthesis in progress".into(),
                    });
                }
                AudioRequestStatus::Pending if request.credits_charged.is_some() => {
                    return Ok(SynthesizeResponse {
                        outcome: SynthesizeOutcome::Pending,
                        request,
                        voice_metadata: serde_json::json!({}),
                        message: "synthesis pending".into(),
                    });
                }
                AudioRequestStatus::Error | AudioRequestStatus::Pending => {
                    self.audio_requests
                        .set_status(request.id, AudioRequestStatus::Pending, None)
                        .await?;
                }
            }
        }

        let request = match self
            .audio_requests
            .find_by_voice_and_story(voice.id, story_id)
            .await?
        {
            Some(r) => r,
            None => {
                self.audio_requests
                    .create(voice.id, story_id, voice.owner_user_id)
                    .await?
            }
        };

        // Step 4: compute required credits.
        let required = self.ledger.credits_for_text(text.chars().count() as u64);
        self.audio_requests
            .set_credits_charged(request.id, required)
            .await?;

        // Step 5: debit credits.
        if let Err(err) = self
            .ledger
            .debit(
                voice.owner_user_id,
                required,
                "synthesize",
                Some(request.id),
                Some(story_id),
            )
            .await
        {
            match err {
                crate::errors::LedgerError::InsufficientCredits { needed, available } => {
                    return Err(VoiceError::InsufficientCredits { needed, available });
                }
                other => return Err(VoiceError::other(other.to_string())),
            }
        }

        // Step 6: ensure active voice.
        let slot_state = match self
            .allocator
            .ensure_active_voice(voice, serde_json::json!({ "audio_request_id": request.id }))
            .await
        {
            Ok(state) => state,
            Err(err) => {
                warn!(voice_id = voice.id, error = %err, "allocator failed, refunding");
                let _ = self
                    .ledger
                    .refund_by_audio_request(request.id, voice.owner_user_id, "allocator_failed")
                    .await;
                self.audio_requests
                    .set_status(request.id, AudioRequestStatus::Error, Some(err.to_string()))
                    .await?;
                return Err(err);
            }
        };

        // Step 7: dispatch synthesis worker; mark processing if already ready.
        let status = if slot_state.status == SlotStatus::Ready {
            AudioRequestStatus::Processing
        } else {
            AudioRequestStatus::Pending
        };
        self.audio_requests.set_status(request.id, status, None).await?;
        self.dispatcher.dispatch(request.id).await;

        let message = match slot_state.status {
            SlotStatus::Ready => "synthesis started".to_string(),
            SlotStatus::Allocating => "voice is being allocated".to_string(),
            SlotStatus::Queued => "voice queued for allocation".to_string(),
        };
        info!(voice_id = voice.id, request_id = request.id, "synthesis accepted");

        let request = self.audio_requests.get(request.id).await?;
        Ok(SynthesizeResponse {
            outcome: SynthesizeOutcome::Accepted(slot_state.status),
            request,
            voice_metadata: slot_state.metadata,
            message,
        })
    }
}
