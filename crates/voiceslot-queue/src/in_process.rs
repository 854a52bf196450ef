//! Single-node `SlotQueuePort` / `LockPort` implementation, backed by
//! in-memory maps behind a `tokio::sync::Mutex`. Adequate for a
//! single-worker deployment or tests; state does not survive a restart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use voiceslot_core::domain::{QueueEntry, ScoredQueueEntry};
use voiceslot_core::errors::QueueResult;
use voiceslot_core::ports::{LockPort, SlotQueuePort};

#[derive(Default)]
pub struct InProcessSlotQueue {
    entries: Mutex<HashMap<i64, (f64, QueueEntry)>>,
}

impl InProcessSlotQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_score() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Orders by score, then lexicographically on the stringified voice id —
/// matching the Redis backend's natural ZRANGEBYSCORE tie-break on member
/// string order (§4.1).
fn score_then_voice_id(score_a: f64, voice_a: i64, score_b: f64, voice_b: i64) -> std::cmp::Ordering {
    score_a
        .partial_cmp(&score_b)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| voice_a.to_string().cmp(&voice_b.to_string()))
}

#[async_trait]
impl SlotQueuePort for InProcessSlotQueue {
    async fn enqueue(&self, entry: QueueEntry, delay_seconds: i64) -> QueueResult<()> {
        let score = now_score() + delay_seconds as f64;
        self.entries.lock().await.insert(entry.voice_id, (score, entry));
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<QueueEntry>> {
        let now = now_score();
        let mut guard = self.entries.lock().await;
        let ready_key = guard
            .iter()
            .filter(|(_, (score, _))| *score <= now)
            .min_by(|a, b| score_then_voice_id(a.1.0, *a.0, b.1.0, *b.0))
            .map(|(k, _)| *k);
        Ok(ready_key.and_then(|key| guard.remove(&key)).map(|(_, entry)| entry))
    }

    async fn dequeue_ready_batch(&self, limit: u32) -> QueueResult<Vec<QueueEntry>> {
        let now = now_score();
        let mut guard = self.entries.lock().await;
        let mut ready: Vec<(i64, f64)> = guard
            .iter()
            .filter(|(_, (score, _))| *score <= now)
            .map(|(k, (score, _))| (*k, *score))
            .collect();
        ready.sort_by(|a, b| score_then_voice_id(a.1, a.0, b.1, b.0));
        ready.truncate(limit as usize);
        Ok(ready
            .into_iter()
            .filter_map(|(key, _)| guard.remove(&key))
            .map(|(_, entry)| entry)
            .collect())
    }

    async fn remove(&self, voice_id: i64) -> QueueResult<()> {
        self.entries.lock().await.remove(&voice_id);
        Ok(())
    }

    async fn length(&self) -> QueueResult<u64> {
        Ok(self.entries.lock().await.len() as u64)
    }

    async fn is_enqueued(&self, voice_id: i64) -> QueueResult<bool> {
        Ok(self.entries.lock().await.contains_key(&voice_id))
    }

    async fn position(&self, voice_id: i64) -> QueueResult<Option<u64>> {
        let guard = self.entries.lock().await;
        let Some((target_score, _)) = guard.get(&voice_id) else {
            return Ok(None);
        };
        let rank = guard
            .values()
            .filter(|(score, _)| score < target_score)
            .count();
        Ok(Some(rank as u64))
    }

    async fn snapshot(&self, limit: u32) -> QueueResult<Vec<ScoredQueueEntry>> {
        let guard = self.entries.lock().await;
        let mut all: Vec<ScoredQueueEntry> = guard
            .values()
            .map(|(score, entry)| ScoredQueueEntry {
                entry: entry.clone(),
                score: *score,
            })
            .collect();
        all.sort_by(|a, b| score_then_voice_id(a.score, a.entry.voice_id, b.score, b.entry.voice_id));
        all.truncate(limit as usize);
        Ok(all)
    }
}

#[derive(Default)]
pub struct InProcessLock {
    holders: Mutex<HashMap<String, Instant>>,
}

impl InProcessLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockPort for InProcessLock {
    async fn try_acquire(&self, name: &str, ttl_seconds: u64) -> QueueResult<bool> {
        let mut guard = self.holders.lock().await;
        let now = Instant::now();
        if let Some(expires) = guard.get(name) {
            if *expires > now {
                return Ok(false);
            }
        }
        guard.insert(name.to_string(), now + Duration::from_secs(ttl_seconds));
        Ok(true)
    }

    async fn release(&self, name: &str) -> QueueResult<()> {
        self.holders.lock().await.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voiceslot_core::domain::ServiceProvider;

    fn entry(voice_id: i64) -> QueueEntry {
        QueueEntry {
            voice_id,
            recording_object_key: "k".into(),
            filename: "f.wav".into(),
            user_id: 1,
            voice_name: "Narrator".into(),
            attempts: 0,
            service_provider: ServiceProvider::ElevenLabs,
        }
    }

    #[tokio::test]
    async fn dequeue_respects_delay() {
        let queue = InProcessSlotQueue::new();
        queue.enqueue(entry(1), 3600).await.unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dequeue_returns_ready_entry_fifo_by_score() {
        let queue = InProcessSlotQueue::new();
        queue.enqueue(entry(1), 0).await.unwrap();
        queue.enqueue(entry(2), 0).await.unwrap();
        let first = queue.dequeue().await.unwrap().unwrap();
        assert!(first.voice_id == 1 || first.voice_id == 2);
        assert_eq!(queue.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repeat_enqueue_collapses_onto_one_entry() {
        let queue = InProcessSlotQueue::new();
        queue.enqueue(entry(1), 3600).await.unwrap();
        queue.enqueue(entry(1), 0).await.unwrap();
        assert_eq!(queue.length().await.unwrap(), 1);
        assert!(queue.dequeue().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn equal_scores_tie_break_lexicographically_on_voice_id() {
        let queue = InProcessSlotQueue::new();
        queue.enqueue(entry(20), 0).await.unwrap();
        queue.enqueue(entry(3), 0).await.unwrap();
        let batch = queue.dequeue_ready_batch(10).await.unwrap();
        let ids: Vec<i64> = batch.iter().map(|e| e.voice_id).collect();
        // "20" sorts before "3" lexicographically, unlike numeric order.
        assert_eq!(ids, vec![20, 3]);
    }

    #[tokio::test]
    async fn lock_try_acquire_is_exclusive_until_ttl() {
        let lock = InProcessLock::new();
        assert!(lock.try_acquire("voice:1", 60).await.unwrap());
        assert!(!lock.try_acquire("voice:1", 60).await.unwrap());
        lock.release("voice:1").await.unwrap();
        assert!(lock.try_acquire("voice:1", 60).await.unwrap());
    }
}
