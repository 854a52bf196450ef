//! Allocation Worker (§4.5) — performs the upstream clone for one voice
//! and handles the queue-drain pass.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::{error, info, warn};

use crate::config::SlotAllocatorConfig;
use crate::domain::{
    AllocationStatus, QueueEntry, VoiceSlotEvent, VoiceSlotEventType, VoiceStatus,
};
use crate::errors::VoiceError;
use crate::ports::{MetricsSink, ObjectStorePort, SlotQueuePort, VoiceRepositoryPort, VoiceServiceProviderPort};

pub struct AllocationWorker {
    voices: Arc<dyn VoiceRepositoryPort>,
    queue: Arc<dyn SlotQueuePort>,
    object_store: Arc<dyn ObjectStorePort>,
    provider: Arc<dyn VoiceServiceProviderPort>,
    metrics: Arc<dyn MetricsSink>,
    config: SlotAllocatorConfig,
}

/// Outcome of one allocation attempt, for the worker's caller (the
/// background runner) to decide whether to trigger a fresh drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationOutcome {
    Allocated,
    Requeued,
    Failed,
}

impl AllocationWorker {
    #[must_use]
    pub fn new(
        voices: Arc<dyn VoiceRepositoryPort>,
        queue: Arc<dyn SlotQueuePort>,
        object_store: Arc<dyn ObjectStorePort>,
        provider: Arc<dyn VoiceServiceProviderPort>,
        metrics: Arc<dyn MetricsSink>,
        config: SlotAllocatorConfig,
    ) -> Self {
        Self {
            voices,
            queue,
            object_store,
            provider,
            metrics,
            config,
        }
    }

    /// Performs the clone for one queued entry (§4.5 steps 1-5).
    pub async fn allocate(&self, entry: &QueueEntry) -> AllocationOutcome {
        let voice = match self.voices.get(entry.voice_id).await {
            Ok(v) => v,
            Err(err) => {
                error!(voice_id = entry.voice_id, error = %err, "voice disappeared before allocation");
                return AllocationOutcome::Failed;
            }
        };

        if voice.allocation_status != AllocationStatus::Ready {
            let active = match self.voices.count_active_slots(voice.service_provider).await {
                Ok(n) => n,
                Err(err) => {
                    error!(voice_id = voice.id, error = %err, "capacity check failed");
                    return AllocationOutcome::Failed;
                }
            };
            if active >= self.config.slot_limit {
                self.requeue_with_jitter(entry).await;
                let mut voice = voice;
                voice.status = VoiceStatus::Recorded;
                voice.allocation_status = AllocationStatus::Recorded;
                let _ = self.voices.save(&voice).await;
                return AllocationOutcome::Requeued;
            }
        }

        let sample = match self.object_store.download(&entry.recording_object_key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.fail(&voice, format!("sample download failed: {err}")).await;
                return AllocationOutcome::Failed;
            }
        };

        let _ = self
            .voices
            .append_event(VoiceSlotEvent::new(
                Some(voice.id),
                Some(voice.owner_user_id),
                VoiceSlotEventType::AllocationStarted,
                None,
                serde_json::json!({ "attempts": entry.attempts }),
            ))
            .await;

        match self
            .provider
            .clone_voice(sample, &entry.voice_name, "en")
            .await
        {
            Ok(remote_voice_id) => {
                let mut voice = voice;
                voice.remote_voice_id = Some(remote_voice_id.clone());
                voice.allocation_status = AllocationStatus::Ready;
                voice.status = VoiceStatus::Ready;
                let now = Utc::now();
                voice.allocated_at = Some(now);
                voice.last_used_at = Some(now);
                if let Err(err) = self.voices.save(&voice).await {
                    error!(voice_id = voice.id, error = %err, "failed to persist allocated voice");
                    return AllocationOutcome::Failed;
                }
                let _ = self
                    .voices
                    .append_event(VoiceSlotEvent::new(
                        Some(voice.id),
                        Some(voice.owner_user_id),
                        VoiceSlotEventType::AllocationCompleted,
                        None,
                        serde_json::json!({ "external_voice_id": remote_voice_id }),
                    ))
                    .await;
                let _ = self.queue.remove(voice.id).await;
                self.metrics.incr("voice.allocation.completed", 1);
                info!(voice_id = voice.id, "allocation completed");
                AllocationOutcome::Allocated
            }
            Err(crate::errors::ProviderError::RateLimited { retry_after_secs }) => {
                warn!(voice_id = voice.id, retry_after_secs, "provider rate limited, backing off");
                self.requeue_with_delay(entry, retry_after_secs as i64).await;
                AllocationOutcome::Requeued
            }
            Err(err) => {
                self.fail(&voice, err.to_string()).await;
                AllocationOutcome::Failed
            }
        }
    }

    async fn fail(&self, voice: &crate::domain::Voice, message: String) {
        let mut voice = voice.clone();
        voice.status = VoiceStatus::Error;
        voice.allocation_status = AllocationStatus::Recorded;
        voice.remote_voice_id = None;
        voice.error_message = Some(message.clone());
        let _ = self.voices.save(&voice).await;
        let _ = self
            .voices
            .append_event(VoiceSlotEvent::new(
                Some(voice.id),
                Some(voice.owner_user_id),
                VoiceSlotEventType::AllocationFailed,
                Some(message),
                serde_json::json!({}),
            ))
            .await;
        self.metrics.incr("voice.allocation.failed", 1);
    }

    async fn requeue_with_jitter(&self, entry: &QueueEntry) {
        let base = (self.config.queue_poll_interval_seconds / 2).max(5) as i64;
        let jitter = rand::thread_rng().gen_range(-(base / 3).max(1)..=(base / 3).max(1));
        let delay = (base + jitter).max(5);
        self.requeue_with_delay(entry, delay).await;
    }

    async fn requeue_with_delay(&self, entry: &QueueEntry, delay_seconds: i64) {
        let mut entry = entry.clone();
        entry.attempts += 1;
        let _ = self.queue.enqueue(entry, delay_seconds).await;
    }

    /// Queue-drain pass (§4.5): pops up to `limit` ready entries and
    /// allocates each, stopping early once per-provider capacity is
    /// exhausted. Breaks after `max_consecutive_requeues` in a row to avoid
    /// spinning.
    pub async fn drain_queue(&self, limit: u32) -> Result<u32, VoiceError> {
        let mut allocated = 0;
        let mut consecutive_requeues = 0;
        let entries = self.queue.dequeue_ready_batch(limit).await?;
        for entry in entries {
            match self.allocate(&entry).await {
                AllocationOutcome::Allocated => {
                    allocated += 1;
                    consecutive_requeues = 0;
                }
                AllocationOutcome::Requeued => {
                    consecutive_requeues += 1;
                    if consecutive_requeues > self.config.max_consecutive_requeues {
                        warn!("too many consecutive requeues, ending drain cycle early");
                        break;
                    }
                }
                AllocationOutcome::Failed => {
                    consecutive_requeues = 0;
                }
            }
        }
        Ok(allocated)
    }
}
