//! Persistence ports. The database is the only source of truth for Voice
//! and Ledger state — the KV store (see `slot_queue`) holds only ephemeral
//! coordination.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AudioRequest, AudioRequestStatus, CreditAllocation, CreditLot, CreditSource, CreditTransaction,
    TransactionType, User, Voice, VoiceSlotEvent,
};
use crate::errors::{LedgerError, VoiceError};

/// CRUD + query surface over the `Voice` entity and its event log.
#[async_trait]
pub trait VoiceRepositoryPort: Send + Sync {
    async fn get(&self, id: i64) -> Result<Voice, VoiceError>;
    async fn get_by_remote_id(
        &self,
        provider: crate::domain::ServiceProvider,
        remote_voice_id: &str,
    ) -> Result<Option<Voice>, VoiceError>;

    /// Inserts a brand-new voice row and returns it with its assigned id
    /// filled in. `voice.id` is ignored on input.
    async fn create(&self, voice: &Voice) -> Result<Voice, VoiceError>;

    /// Recovery path: resolve a historical (now-evicted) remote id back to
    /// its voice row via the most recent `allocation_completed` event that
    /// carried it.
    async fn find_by_historical_remote_id(
        &self,
        remote_voice_id: &str,
    ) -> Result<Option<Voice>, VoiceError>;

    async fn save(&self, voice: &Voice) -> Result<(), VoiceError>;

    /// Count voices of the given provider whose `allocation_status` is
    /// `ready` or `allocating` — the capacity accounting the allocator and
    /// worker both consult.
    async fn count_active_slots(
        &self,
        provider: crate::domain::ServiceProvider,
    ) -> Result<u32, VoiceError>;

    /// Ready voices whose slot lock has expired (or was never set) *and*
    /// whose warm hold has lapsed — `last_used_at <= warm_hold_before` —
    /// ordered by `last_used_at` ascending (true LRU), for the idle
    /// reclaimer. `warm_hold_before` is `now - warm_hold_seconds`, computed
    /// by the caller.
    async fn find_reclaim_candidates(
        &self,
        provider: crate::domain::ServiceProvider,
        now: DateTime<Utc>,
        warm_hold_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Voice>, VoiceError>;

    async fn append_event(&self, event: VoiceSlotEvent) -> Result<(), VoiceError>;
    async fn recent_events(&self, voice_id: i64, limit: u32) -> Result<Vec<VoiceSlotEvent>, VoiceError>;

    /// For the admin snapshot endpoint: recent events across all voices.
    async fn recent_events_global(&self, limit: u32) -> Result<Vec<VoiceSlotEvent>, VoiceError>;

    async fn list_active_allocations(
        &self,
        provider: crate::domain::ServiceProvider,
    ) -> Result<Vec<Voice>, VoiceError>;

    /// Deletion cascade (§3): removes the voice row and nulls out
    /// `voice_id` on every event referencing it, so the audit log survives.
    /// Callers are responsible for releasing the upstream slot and
    /// deleting object-store keys before calling this.
    async fn delete(&self, id: i64) -> Result<(), VoiceError>;
}

/// CRUD + query surface over `AudioRequest`.
#[async_trait]
pub trait AudioRequestRepositoryPort: Send + Sync {
    async fn get(&self, id: i64) -> Result<AudioRequest, VoiceError>;
    async fn find_by_voice_and_story(
        &self,
        voice_id: i64,
        story_id: i64,
    ) -> Result<Option<AudioRequest>, VoiceError>;
    async fn create(
        &self,
        voice_id: i64,
        story_id: i64,
        user_id: i64,
    ) -> Result<AudioRequest, VoiceError>;
    async fn set_status(
        &self,
        id: i64,
        status: AudioRequestStatus,
        error_message: Option<String>,
    ) -> Result<(), VoiceError>;
    async fn set_credits_charged(&self, id: i64, credits: i64) -> Result<(), VoiceError>;
    async fn complete(
        &self,
        id: i64,
        object_key: String,
        duration_seconds: f64,
    ) -> Result<(), VoiceError>;

    /// All requests for a voice, for the voice-deletion cascade: the
    /// caller extracts `object_key`s to clean up from object storage.
    async fn list_by_voice(&self, voice_id: i64) -> Result<Vec<AudioRequest>, VoiceError>;
}

/// The credit ledger's persistence surface. Every read-modify-write ledger
/// operation (`grant`/`debit`/`refund_by_audio_request`) must run inside one
/// [`LedgerTransaction`] obtained from `begin_for_user` — see that trait's
/// docs for why.
#[async_trait]
pub trait CreditRepositoryPort: Send + Sync {
    /// Opens one atomic unit of work scoped to `user_id`, creating the
    /// user's row on first touch. The returned handle holds whatever lock
    /// or transaction the backend needs to serialize concurrent ledger
    /// operations for this user until `commit` (or drop, which rolls back).
    async fn begin_for_user(&self, user_id: i64) -> Result<Box<dyn LedgerTransaction>, LedgerError>;

    /// All lots for a user, expired or exhausted included, newest first —
    /// the listing the credits page shows. Read-only, so it does not need
    /// a `LedgerTransaction`.
    async fn list_lots(&self, user_id: i64) -> Result<Vec<CreditLot>, LedgerError>;

    /// Paginated transaction history, newest first, optionally filtered by
    /// type. Returns the page plus the total matching row count so callers
    /// can compute `next_offset`. Read-only.
    async fn list_transactions(
        &self,
        user_id: i64,
        limit: u32,
        offset: u32,
        transaction_type: Option<TransactionType>,
    ) -> Result<(Vec<CreditTransaction>, i64), LedgerError>;

    /// Canonical balance: sum of `amount_remaining` across non-expired
    /// lots. The cached column is an optimization only. Read-only.
    async fn computed_balance(&self, user_id: i64, now: DateTime<Utc>) -> Result<i64, LedgerError>;
}

/// One atomic unit of work against a single user's ledger state, opened by
/// `CreditRepositoryPort::begin_for_user`. Every method here operates on
/// the user the handle was opened for — there is deliberately no `user_id`
/// parameter on any of them, so a caller cannot accidentally mix rows from
/// two users into one transaction.
///
/// On a database with row locks, `begin_for_user` takes `SELECT ... FOR
/// UPDATE` on the user row and every method below runs against that same
/// connection/transaction. On single-writer SQLite there is no row lock,
/// so `begin_for_user` instead opens a `BEGIN IMMEDIATE` transaction, which
/// acquires SQLite's write lock for the whole unit of work — two concurrent
/// ledger operations for the same user, even against different
/// `(voice, story)` pairs, therefore serialize instead of interleaving
/// their reads and writes.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// The user row as of `begin_for_user`, kept up to date by
    /// `set_cached_balance` as the transaction progresses.
    fn user(&self) -> &User;

    async fn active_lots(&mut self, now: DateTime<Utc>) -> Result<Vec<CreditLot>, LedgerError>;

    async fn insert_lot(
        &mut self,
        source: CreditSource,
        amount: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CreditLot, LedgerError>;

    async fn adjust_lot_remaining(&mut self, lot_id: i64, delta: i64) -> Result<(), LedgerError>;

    async fn insert_transaction(
        &mut self,
        amount: i64,
        transaction_type: TransactionType,
        reason: &str,
        audio_request_id: Option<i64>,
        story_id: Option<i64>,
        metadata: serde_json::Value,
    ) -> Result<CreditTransaction, LedgerError>;

    async fn insert_allocations(&mut self, allocations: &[CreditAllocation]) -> Result<(), LedgerError>;

    async fn find_applied_debit(&mut self, audio_request_id: i64) -> Result<Option<CreditTransaction>, LedgerError>;

    async fn allocations_for_transaction(
        &mut self,
        transaction_id: i64,
    ) -> Result<Vec<CreditAllocation>, LedgerError>;

    async fn refunds_since(&mut self, audio_request_id: i64, since: DateTime<Utc>) -> Result<i64, LedgerError>;

    async fn mark_transaction_status(
        &mut self,
        transaction_id: i64,
        status: crate::domain::TransactionStatus,
    ) -> Result<(), LedgerError>;

    async fn set_cached_balance(&mut self, balance: i64) -> Result<(), LedgerError>;

    /// Commits the underlying transaction/lock. Dropping the handle without
    /// calling this rolls back.
    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
