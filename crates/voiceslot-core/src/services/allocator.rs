//! Slot Allocator (§4.4) — the sole entry point for "I need this voice
//! ready to synthesize".

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::config::SlotAllocatorConfig;
use crate::domain::{
    AllocationStatus, QueueEntry, SlotState, Voice, VoiceSlotEvent, VoiceSlotEventType, VoiceStatus,
};
use crate::errors::{VoiceError, VoiceResult};
use crate::ports::{LockGuard, LockPort, SlotQueuePort, VoiceRepositoryPort};

fn allocation_lock_key(voice_id: i64) -> String {
    format!("voice_alloc_lock:{voice_id}")
}

/// Dispatches an immediate allocation task for a voice that just won
/// capacity (§4.4 step 8). Implemented by the worker crate's task runner,
/// kept as a port here so the allocator never depends on the concrete
/// task-scheduling mechanism — the same pattern `SynthesisDispatcher`
/// uses for the synthesis worker.
#[async_trait]
pub trait AllocationDispatcher: Send + Sync {
    async fn dispatch(&self, voice_id: i64);
}

/// Arbiter deciding `ready` / `allocating` / `queued` for a synthesis
/// demand. Holds no state of its own beyond its port handles — Voice state
/// lives entirely in the database, queue/lock state entirely in the KV
/// store.
pub struct SlotAllocator {
    voices: Arc<dyn VoiceRepositoryPort>,
    queue: Arc<dyn SlotQueuePort>,
    lock: Arc<dyn LockPort>,
    dispatcher: Arc<dyn AllocationDispatcher>,
    config: SlotAllocatorConfig,
}

impl SlotAllocator {
    #[must_use]
    pub fn new(
        voices: Arc<dyn VoiceRepositoryPort>,
        queue: Arc<dyn SlotQueuePort>,
        lock: Arc<dyn LockPort>,
        dispatcher: Arc<dyn AllocationDispatcher>,
        config: SlotAllocatorConfig,
    ) -> Self {
        Self {
            voices,
            queue,
            lock,
            dispatcher,
            config,
        }
    }

    /// Implements the eight-step algorithm in §4.4.
    #[instrument(skip(self, request_metadata), fields(voice_id = voice.id))]
    pub async fn ensure_active_voice(
        &self,
        voice: &Voice,
        request_metadata: serde_json::Value,
    ) -> VoiceResult<SlotState> {
        // Step 1: reload — the caller may hold a stale copy.
        let voice = self.voices.get(voice.id).await?;

        // Step 2: no sample, no remote clone -> nothing to allocate from.
        if !voice.has_usable_sample() {
            return Err(VoiceError::SampleMissing { id: voice.id });
        }

        // Step 3: ready fast path.
        if voice.remote_voice_id.is_some() && voice.allocation_status == AllocationStatus::Ready {
            let mut voice = voice;
            voice.slot_lock_expires_at =
                Some(Utc::now() + chrono::Duration::seconds(self.config.warm_hold_seconds as i64));
            self.voices.save(&voice).await?;
            return Ok(SlotState::ready(request_metadata));
        }

        // Step 4: already in flight.
        if voice.allocation_status == AllocationStatus::Allocating {
            let position = self.queue.position(voice.id).await?;
            return Ok(SlotState::allocating(position));
        }

        // Step 5: already queued.
        if self.queue.is_enqueued(voice.id).await? {
            let position = self.queue.position(voice.id).await?;
            return Ok(SlotState::queued(position));
        }

        // Step 6: try to start allocation.
        let lock_name = allocation_lock_key(voice.id);
        let Some(guard) =
            LockGuard::try_acquire(self.lock.as_ref(), lock_name, self.config.slot_lock_seconds)
                .await?
        else {
            // Someone else is doing the work.
            let position = self.queue.position(voice.id).await?;
            return Ok(SlotState::allocating(position));
        };

        // Step 7: under the lock, check capacity.
        let active = self.voices.count_active_slots(voice.service_provider).await?;
        if active >= self.config.slot_limit {
            self.enqueue_for_allocation(&voice, 0).await?;
            guard.release().await?;
            return Ok(SlotState::queued(self.queue.position(voice.id).await?));
        }

        // Step 8: claim the slot, dispatch the allocation task, release the
        // lock handle (the task takes over; the lock remains held by TTL).
        let mut voice = voice;
        voice.status = VoiceStatus::Processing;
        voice.allocation_status = AllocationStatus::Allocating;
        voice.slot_lock_expires_at =
            Some(Utc::now() + chrono::Duration::seconds(self.config.slot_lock_seconds as i64));
        self.voices.save(&voice).await?;
        self.voices
            .append_event(VoiceSlotEvent::new(
                Some(voice.id),
                Some(voice.owner_user_id),
                VoiceSlotEventType::SlotLockAcquired,
                None,
                serde_json::json!({}),
            ))
            .await?;
        guard.release().await?;

        self.dispatcher.dispatch(voice.id).await;
        info!(voice_id = voice.id, "allocation dispatched");
        Ok(SlotState::allocating(None))
    }

    /// Enqueues `voice` for allocation with `delay_seconds`, logging
    /// `allocation_queued`. Does not touch `allocation_status` — callers at
    /// different call sites want different transitions around it.
    pub async fn enqueue_for_allocation(&self, voice: &Voice, delay_seconds: i64) -> VoiceResult<()> {
        let entry = QueueEntry {
            voice_id: voice.id,
            recording_object_key: voice.recording_object_key.clone(),
            filename: voice.sample_filename.clone(),
            user_id: voice.owner_user_id,
            voice_name: voice.name.clone(),
            attempts: 0,
            service_provider: voice.service_provider,
        };
        self.queue.enqueue(entry, delay_seconds).await?;
        self.voices
            .append_event(VoiceSlotEvent::new(
                Some(voice.id),
                Some(voice.owner_user_id),
                VoiceSlotEventType::AllocationQueued,
                None,
                serde_json::json!({ "delay_seconds": delay_seconds }),
            ))
            .await?;
        warn!(voice_id = voice.id, delay_seconds, "voice queued for allocation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ServiceProvider;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct FakeVoices {
        inner: StdMutex<HashMap<i64, Voice>>,
        events: StdMutex<Vec<VoiceSlotEvent>>,
    }

    fn sample_voice(id: i64, allocation_status: AllocationStatus, remote: Option<&str>) -> Voice {
        Voice {
            id,
            owner_user_id: 1,
            name: "voice".into(),
            recording_object_key: "voice_samples/1/voice_1.wav".into(),
            sample_filename: "sample.wav".into(),
            service_provider: ServiceProvider::ElevenLabs,
            remote_voice_id: remote.map(str::to_string),
            status: VoiceStatus::Recorded,
            allocation_status,
            allocated_at: None,
            last_used_at: None,
            slot_lock_expires_at: None,
            error_message: None,
        }
    }

    #[async_trait]
    impl VoiceRepositoryPort for FakeVoices {
        async fn get(&self, id: i64) -> VoiceResult<Voice> {
            self.inner
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(VoiceError::NotFound { id })
        }
        async fn get_by_remote_id(
            &self,
            _provider: ServiceProvider,
            _remote_voice_id: &str,
        ) -> VoiceResult<Option<Voice>> {
            Ok(None)
        }
        async fn create(&self, voice: &Voice) -> VoiceResult<Voice> {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.keys().max().copied().unwrap_or(0) + 1;
            let created = Voice { id, ..voice.clone() };
            inner.insert(id, created.clone());
            Ok(created)
        }
        async fn find_by_historical_remote_id(&self, _remote_voice_id: &str) -> VoiceResult<Option<Voice>> {
            Ok(None)
        }
        async fn save(&self, voice: &Voice) -> VoiceResult<()> {
            self.inner.lock().unwrap().insert(voice.id, voice.clone());
            Ok(())
        }
        async fn count_active_slots(&self, provider: ServiceProvider) -> VoiceResult<u32> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .values()
                .filter(|v| {
                    v.service_provider == provider
                        && matches!(
                            v.allocation_status,
                            AllocationStatus::Ready | AllocationStatus::Allocating
                        )
                })
                .count() as u32)
        }
        async fn find_reclaim_candidates(
            &self,
            _provider: ServiceProvider,
            _now: DateTime<Utc>,
            _warm_hold_before: DateTime<Utc>,
            _limit: u32,
        ) -> VoiceResult<Vec<Voice>> {
            Ok(vec![])
        }
        async fn append_event(&self, event: VoiceSlotEvent) -> VoiceResult<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
        async fn recent_events(&self, _voice_id: i64, _limit: u32) -> VoiceResult<Vec<VoiceSlotEvent>> {
            Ok(vec![])
        }
        async fn recent_events_global(&self, _limit: u32) -> VoiceResult<Vec<VoiceSlotEvent>> {
            Ok(vec![])
        }
        async fn list_active_allocations(&self, _provider: ServiceProvider) -> VoiceResult<Vec<Voice>> {
            Ok(vec![])
        }
        async fn delete(&self, id: i64) -> VoiceResult<()> {
            self.inner.lock().unwrap().remove(&id);
            Ok(())
        }
    }

    struct InProcessQueue {
        entries: StdMutex<HashMap<i64, QueueEntry>>,
    }

    #[async_trait]
    impl SlotQueuePort for InProcessQueue {
        async fn enqueue(&self, entry: QueueEntry, _delay_seconds: i64) -> crate::errors::QueueResult<()> {
            self.entries.lock().unwrap().insert(entry.voice_id, entry);
            Ok(())
        }
        async fn dequeue(&self) -> crate::errors::QueueResult<Option<QueueEntry>> {
            let mut map = self.entries.lock().unwrap();
            let key = map.keys().next().copied();
            Ok(key.and_then(|k| map.remove(&k)))
        }
        async fn dequeue_ready_batch(&self, _limit: u32) -> crate::errors::QueueResult<Vec<QueueEntry>> {
            Ok(vec![])
        }
        async fn remove(&self, voice_id: i64) -> crate::errors::QueueResult<()> {
            self.entries.lock().unwrap().remove(&voice_id);
            Ok(())
        }
        async fn length(&self) -> crate::errors::QueueResult<u64> {
            Ok(self.entries.lock().unwrap().len() as u64)
        }
        async fn is_enqueued(&self, voice_id: i64) -> crate::errors::QueueResult<bool> {
            Ok(self.entries.lock().unwrap().contains_key(&voice_id))
        }
        async fn position(&self, voice_id: i64) -> crate::errors::QueueResult<Option<u64>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .contains_key(&voice_id)
                .then_some(0))
        }
        async fn snapshot(&self, _limit: u32) -> crate::errors::QueueResult<Vec<crate::domain::ScoredQueueEntry>> {
            Ok(vec![])
        }
    }

    struct InProcessLock {
        held: StdMutex<HashMap<String, ()>>,
    }

    struct NoopDispatcher;

    #[async_trait]
    impl AllocationDispatcher for NoopDispatcher {
        async fn dispatch(&self, _voice_id: i64) {}
    }

    #[async_trait]
    impl LockPort for InProcessLock {
        async fn try_acquire(&self, name: &str, _ttl_seconds: u64) -> crate::errors::QueueResult<bool> {
            let mut held = self.held.lock().unwrap();
            if held.contains_key(name) {
                Ok(false)
            } else {
                held.insert(name.to_string(), ());
                Ok(true)
            }
        }
        async fn release(&self, name: &str) -> crate::errors::QueueResult<()> {
            self.held.lock().unwrap().remove(name);
            Ok(())
        }
    }

    fn make_allocator(voices: HashMap<i64, Voice>, slot_limit: u32) -> (SlotAllocator, Arc<FakeVoices>) {
        let voices = Arc::new(FakeVoices {
            inner: StdMutex::new(voices),
            events: StdMutex::new(vec![]),
        });
        let queue = Arc::new(InProcessQueue {
            entries: StdMutex::new(HashMap::new()),
        });
        let lock = Arc::new(InProcessLock {
            held: StdMutex::new(HashMap::new()),
        });
        let dispatcher = Arc::new(NoopDispatcher);
        let config = SlotAllocatorConfig {
            slot_limit,
            ..Default::default()
        };
        (
            SlotAllocator::new(voices.clone(), queue, lock, dispatcher, config),
            voices,
        )
    }

    #[tokio::test]
    async fn ready_fast_path_extends_warm_hold() {
        let voice = sample_voice(1, AllocationStatus::Ready, Some("r1"));
        let (allocator, voices) = make_allocator(HashMap::from([(1, voice.clone())]), 30);

        let state = allocator
            .ensure_active_voice(&voice, serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(state.status, crate::domain::SlotStatus::Ready);
        let saved = voices.get(1).await.unwrap();
        assert!(saved.slot_lock_expires_at.is_some());
    }

    #[tokio::test]
    async fn missing_sample_fails() {
        let mut voice = sample_voice(2, AllocationStatus::Recorded, None);
        voice.recording_object_key.clear();
        let (allocator, _voices) = make_allocator(HashMap::from([(2, voice.clone())]), 30);

        let err = allocator
            .ensure_active_voice(&voice, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::SampleMissing { id: 2 }));
    }

    #[tokio::test]
    async fn starts_allocation_when_capacity_available() {
        let voice = sample_voice(3, AllocationStatus::Recorded, None);
        let (allocator, voices) = make_allocator(HashMap::from([(3, voice.clone())]), 30);

        let state = allocator
            .ensure_active_voice(&voice, serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(state.status, crate::domain::SlotStatus::Allocating);
        let saved = voices.get(3).await.unwrap();
        assert_eq!(saved.allocation_status, AllocationStatus::Allocating);
    }

    #[tokio::test]
    async fn queues_when_capacity_exhausted() {
        let busy = sample_voice(10, AllocationStatus::Ready, Some("r10"));
        let candidate = sample_voice(11, AllocationStatus::Recorded, None);
        let (allocator, voices) =
            make_allocator(HashMap::from([(10, busy), (11, candidate.clone())]), 1);

        let state = allocator
            .ensure_active_voice(&candidate, serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(state.status, crate::domain::SlotStatus::Queued);
        let saved = voices.get(11).await.unwrap();
        assert_eq!(saved.allocation_status, AllocationStatus::Recorded);
    }
}
