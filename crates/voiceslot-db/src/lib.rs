//! SQLite-backed implementations of the voice, audio request, and credit
//! ledger repository ports.
//!
//! Durable state lives here and only here: the KV queue adapters hold
//! nothing that survives a crash uninterpreted. A single `SqlitePool`
//! is shared across all three repositories, and `CreditRepository::
//! begin_for_user` opens an explicit `BEGIN IMMEDIATE` transaction that
//! every method on the returned handle runs against, rather than a row
//! lock, since SQLite has no `SELECT ... FOR UPDATE`.

pub mod repositories;
mod schema;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub use repositories::audio_request_repository::SqliteAudioRequestRepository;
pub use repositories::credit_repository::SqliteCreditRepository;
pub use repositories::story_repository::SqliteStoryRepository;
pub use repositories::voice_repository::SqliteVoiceRepository;

/// Opens (creating if absent) the SQLite file at `path` and runs schema
/// bootstrap. A single pool is meant to be shared across all repositories
/// built on top of it.
pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(false);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    schema::init(&pool).await?;
    Ok(pool)
}

/// Same as [`connect`] but entirely in memory, for tests.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    schema::init(&pool).await?;
    Ok(pool)
}

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> String {
    err.to_string()
}
