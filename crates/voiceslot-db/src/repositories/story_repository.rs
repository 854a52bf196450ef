//! SQLite implementation of `StoryContentPort`.
//!
//! The real story content store lives outside this service (§1); this is
//! a minimal stand-in so a standalone checkout of this workspace has
//! somewhere to resolve story text from.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use voiceslot_core::errors::VoiceError;
use voiceslot_core::ports::StoryContentPort;

use crate::map_sqlx_err;

pub struct SqliteStoryRepository {
    pool: SqlitePool,
}

impl SqliteStoryRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Seeds or overwrites a story's text. Exposed for tests and for the
    /// out-of-scope ingestion path this service doesn't own.
    pub async fn put(&self, story_id: i64, text: &str) -> Result<(), VoiceError> {
        sqlx::query("INSERT INTO stories (id, text_content) VALUES (?1, ?2) ON CONFLICT(id) DO UPDATE SET text_content = excluded.text_content")
            .bind(story_id)
            .bind(text)
            .execute(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        Ok(())
    }
}

#[async_trait]
impl StoryContentPort for SqliteStoryRepository {
    async fn get_text(&self, story_id: i64) -> Result<String, VoiceError> {
        let row = sqlx::query("SELECT text_content FROM stories WHERE id = ?1")
            .bind(story_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?
            .ok_or(VoiceError::NotFound { id: story_id })?;
        row.try_get("text_content").map_err(|e| VoiceError::other(map_sqlx_err(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteStoryRepository::new(pool);
        repo.put(1, "Once upon a time.").await.unwrap();
        let text = repo.get_text(1).await.unwrap();
        assert_eq!(text, "Once upon a time.");
    }

    #[tokio::test]
    async fn missing_story_is_not_found() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteStoryRepository::new(pool);
        let err = repo.get_text(99).await.unwrap_err();
        assert!(matches!(err, VoiceError::NotFound { id: 99 }));
    }
}
