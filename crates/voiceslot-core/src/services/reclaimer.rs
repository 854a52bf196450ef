//! Idle Reclaimer (§4.6) — periodic eviction of stale voices to unblock
//! the queue.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::SlotAllocatorConfig;
use crate::domain::{AllocationStatus, ServiceProvider, VoiceSlotEvent, VoiceSlotEventType, VoiceStatus};
use crate::errors::VoiceError;
use crate::ports::{SlotQueuePort, VoiceRepositoryPort, VoiceServiceProviderPort};

pub struct IdleReclaimer {
    voices: Arc<dyn VoiceRepositoryPort>,
    queue: Arc<dyn SlotQueuePort>,
    provider: Arc<dyn VoiceServiceProviderPort>,
    config: SlotAllocatorConfig,
}

impl IdleReclaimer {
    #[must_use]
    pub fn new(
        voices: Arc<dyn VoiceRepositoryPort>,
        queue: Arc<dyn SlotQueuePort>,
        provider: Arc<dyn VoiceServiceProviderPort>,
        config: SlotAllocatorConfig,
    ) -> Self {
        Self {
            voices,
            queue,
            provider,
            config,
        }
    }

    /// Runs one reclamation pass for `service_provider`. No-op unless the
    /// queue is non-empty. Returns the number of voices evicted.
    pub async fn run_once(&self, service_provider: ServiceProvider) -> Result<u32, VoiceError> {
        let queue_length = self.queue.length().await?;
        if queue_length == 0 {
            return Ok(0);
        }

        let max_to_reclaim = queue_length.min(u64::from(self.config.max_reclaim_per_cycle)) as u32;
        let now = Utc::now();
        let warm_hold_before = now - chrono::Duration::seconds(self.config.warm_hold_seconds as i64);
        let candidates = self
            .voices
            .find_reclaim_candidates(service_provider, now, warm_hold_before, max_to_reclaim)
            .await?;

        let mut evicted = 0;
        for voice in candidates {
            let Some(remote_id) = voice.remote_voice_id.clone() else {
                continue;
            };
            match self.provider.delete_voice(&remote_id).await {
                Ok(()) => {
                    let mut voice = voice;
                    voice.allocation_status = AllocationStatus::Recorded;
                    voice.status = VoiceStatus::Recorded;
                    voice.remote_voice_id = None;
                    voice.allocated_at = None;
                    voice.last_used_at = Some(now);
                    self.voices.save(&voice).await?;
                    self.voices
                        .append_event(VoiceSlotEvent::new(
                            Some(voice.id),
                            Some(voice.owner_user_id),
                            VoiceSlotEventType::SlotEvicted,
                            Some("idle reclaim".into()),
                            serde_json::json!({ "external_voice_id": remote_id }),
                        ))
                        .await?;
                    info!(voice_id = voice.id, "voice reclaimed");
                    evicted += 1;
                }
                Err(err) => {
                    // Provider-delete failure: remote slot presumed still
                    // held, do not mutate local state.
                    warn!(voice_id = voice.id, error = %err, "provider delete failed during reclaim");
                }
            }
        }

        Ok(evicted)
    }
}
