//! KV Queue (§4.1) and Concurrency Lock (§4.2) ports.
//!
//! Both are ephemeral coordination primitives, not sources of truth — a
//! lost queue entry or a crashed lock holder is recoverable by the next
//! synthesis attempt (see §5's shared-resource policy).

use async_trait::async_trait;

use crate::domain::{QueueEntry, ScoredQueueEntry};
use crate::errors::QueueResult;

/// Delay-scored FIFO of pending allocation requests, keyed by voice id so
/// duplicate enqueues collapse onto one entry.
#[async_trait]
pub trait SlotQueuePort: Send + Sync {
    /// Upserts `entry` under its `voice_id` and sets eligibility to
    /// `now + delay_seconds`. Score is overwritten on a repeat enqueue.
    async fn enqueue(&self, entry: QueueEntry, delay_seconds: i64) -> QueueResult<()>;

    /// Atomically pops one entry whose score has come due, lowest score
    /// first. Must never hand the same entry to two callers.
    async fn dequeue(&self) -> QueueResult<Option<QueueEntry>>;

    /// Same semantics as `dequeue`, up to `limit` entries.
    async fn dequeue_ready_batch(&self, limit: u32) -> QueueResult<Vec<QueueEntry>>;

    async fn remove(&self, voice_id: i64) -> QueueResult<()>;
    async fn length(&self) -> QueueResult<u64>;
    async fn is_enqueued(&self, voice_id: i64) -> QueueResult<bool>;
    /// Zero-based rank of the entry, or `None` if it isn't queued.
    async fn position(&self, voice_id: i64) -> QueueResult<Option<u64>>;
    async fn snapshot(&self, limit: u32) -> QueueResult<Vec<ScoredQueueEntry>>;
}

/// Single-holder lock keyed by a named resource: `SET key value NX EX ttl`.
/// The TTL is a dead-worker safety net — a crashed holder's lock expires on
/// its own.
#[async_trait]
pub trait LockPort: Send + Sync {
    /// Attempts to acquire `name` for `ttl_seconds`. Returns `true` if this
    /// call became the holder.
    async fn try_acquire(&self, name: &str, ttl_seconds: u64) -> QueueResult<bool>;
    async fn release(&self, name: &str) -> QueueResult<()>;
}

/// RAII-style scoped acquisition: releases on every exit path (including
/// panics unwinding through `Drop`, to the extent the adapter supports a
/// synchronous best-effort release).
pub struct LockGuard<'a> {
    lock: &'a dyn LockPort,
    name: String,
    held: bool,
}

impl<'a> LockGuard<'a> {
    /// Tries to acquire `name`; returns `None` if already held elsewhere.
    pub async fn try_acquire(
        lock: &'a dyn LockPort,
        name: impl Into<String>,
        ttl_seconds: u64,
    ) -> QueueResult<Option<Self>> {
        let name = name.into();
        if lock.try_acquire(&name, ttl_seconds).await? {
            Ok(Some(Self {
                lock,
                name,
                held: true,
            }))
        } else {
            Ok(None)
        }
    }

    /// Releases the lock early, ahead of drop.
    pub async fn release(mut self) -> QueueResult<()> {
        self.held = false;
        self.lock.release(&self.name).await
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            // Best-effort: can't await in Drop. Adapters that need a
            // synchronous release path implement it on their release impl;
            // the TTL remains the correctness backstop regardless.
            tracing::debug!(name = %self.name, "lock guard dropped without explicit release, relying on TTL");
        }
    }
}
