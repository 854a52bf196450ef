//! Schema bootstrap. No migration framework: this service owns one
//! SQLite file and `init` is idempotent (`CREATE TABLE IF NOT EXISTS`),
//! which is enough for a single-writer deployment.

use sqlx::SqlitePool;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    credits_balance_cached INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS voices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_user_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    recording_object_key TEXT NOT NULL,
    sample_filename TEXT NOT NULL,
    service_provider TEXT NOT NULL,
    remote_voice_id TEXT,
    status TEXT NOT NULL,
    allocation_status TEXT NOT NULL,
    allocated_at TEXT,
    last_used_at TEXT,
    slot_lock_expires_at TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_voices_owner ON voices (owner_user_id);
CREATE INDEX IF NOT EXISTS idx_voices_provider_alloc_status ON voices (service_provider, allocation_status);
CREATE INDEX IF NOT EXISTS idx_voices_remote_id ON voices (service_provider, remote_voice_id);

CREATE TABLE IF NOT EXISTS voice_slot_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    voice_id INTEGER,
    user_id INTEGER,
    event_type TEXT NOT NULL,
    reason TEXT,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_voice_slot_events_voice ON voice_slot_events (voice_id, created_at);
CREATE INDEX IF NOT EXISTS idx_voice_slot_events_created ON voice_slot_events (created_at);

CREATE TABLE IF NOT EXISTS audio_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    story_id INTEGER NOT NULL,
    voice_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    object_key TEXT,
    error_message TEXT,
    credits_charged INTEGER,
    duration_seconds REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (voice_id, story_id)
);

CREATE TABLE IF NOT EXISTS credit_lots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    source TEXT NOT NULL,
    amount_granted INTEGER NOT NULL,
    amount_remaining INTEGER NOT NULL,
    expires_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credit_lots_user ON credit_lots (user_id, expires_at);

CREATE TABLE IF NOT EXISTS credit_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    transaction_type TEXT NOT NULL,
    reason TEXT NOT NULL,
    status TEXT NOT NULL,
    audio_request_id INTEGER,
    story_id INTEGER,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credit_transactions_audio_request
    ON credit_transactions (audio_request_id, user_id, status);

-- No composite primary key on (transaction_id, lot_id): a single debit can
-- draw from the same lot twice across separate `draw_lots` calls in the
-- idempotent top-up path (§4.7), which would collide under one.
CREATE TABLE IF NOT EXISTS credit_allocations (
    id INTEGER PRIMARY KEY,
    transaction_id INTEGER NOT NULL,
    lot_id INTEGER NOT NULL,
    amount INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credit_allocations_transaction ON credit_allocations (transaction_id);

-- The story content store itself is out of scope (§1); this table is a
-- thin stand-in so the synthesis worker has something concrete to resolve
-- `StoryContentPort` against in a standalone checkout.
CREATE TABLE IF NOT EXISTS stories (
    id INTEGER PRIMARY KEY,
    text_content TEXT NOT NULL
);
";

/// Creates every table this crate touches if it doesn't already exist.
pub async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
