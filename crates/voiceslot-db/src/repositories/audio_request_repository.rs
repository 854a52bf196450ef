//! SQLite implementation of `AudioRequestRepositoryPort`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use voiceslot_core::domain::{AudioRequest, AudioRequestStatus};
use voiceslot_core::errors::VoiceError;
use voiceslot_core::ports::AudioRequestRepositoryPort;

use crate::map_sqlx_err;

pub struct SqliteAudioRequestRepository {
    pool: SqlitePool,
}

impl SqliteAudioRequestRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const fn status_as_str(s: AudioRequestStatus) -> &'static str {
    match s {
        AudioRequestStatus::Pending => "pending",
        AudioRequestStatus::Processing => "processing",
        AudioRequestStatus::Ready => "ready",
        AudioRequestStatus::Error => "error",
    }
}

fn status_from_str(s: &str) -> Result<AudioRequestStatus, VoiceError> {
    match s {
        "pending" => Ok(AudioRequestStatus::Pending),
        "processing" => Ok(AudioRequestStatus::Processing),
        "ready" => Ok(AudioRequestStatus::Ready),
        "error" => Ok(AudioRequestStatus::Error),
        other => Err(VoiceError::other(format!("unknown audio request status {other}"))),
    }
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<AudioRequest, VoiceError> {
    Ok(AudioRequest {
        id: row.try_get("id").map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        story_id: row.try_get("story_id").map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        voice_id: row.try_get("voice_id").map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        user_id: row.try_get("user_id").map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        status: status_from_str(
            row.try_get::<String, _>("status")
                .map_err(|e| VoiceError::other(map_sqlx_err(e)))?
                .as_str(),
        )?,
        object_key: row
            .try_get("object_key")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        error_message: row
            .try_get("error_message")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        credits_charged: row
            .try_get("credits_charged")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        duration_seconds: row
            .try_get("duration_seconds")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
    })
}

#[async_trait]
impl AudioRequestRepositoryPort for SqliteAudioRequestRepository {
    async fn get(&self, id: i64) -> Result<AudioRequest, VoiceError> {
        let row = sqlx::query("SELECT * FROM audio_requests WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?
            .ok_or(VoiceError::NotFound { id })?;
        row_to_request(&row)
    }

    async fn find_by_voice_and_story(
        &self,
        voice_id: i64,
        story_id: i64,
    ) -> Result<Option<AudioRequest>, VoiceError> {
        let row = sqlx::query("SELECT * FROM audio_requests WHERE voice_id = ?1 AND story_id = ?2")
            .bind(voice_id)
            .bind(story_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        row.as_ref().map(row_to_request).transpose()
    }

    async fn create(&self, voice_id: i64, story_id: i64, user_id: i64) -> Result<AudioRequest, VoiceError> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO audio_requests (story_id, voice_id, user_id, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
        )
        .bind(story_id)
        .bind(voice_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| VoiceError::other(map_sqlx_err(e)))?
        .last_insert_rowid();

        Ok(AudioRequest {
            id,
            story_id,
            voice_id,
            user_id,
            status: AudioRequestStatus::Pending,
            object_key: None,
            error_message: None,
            credits_charged: None,
            duration_seconds: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn set_status(
        &self,
        id: i64,
        status: AudioRequestStatus,
        error_message: Option<String>,
    ) -> Result<(), VoiceError> {
        sqlx::query("UPDATE audio_requests SET status = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?1")
            .bind(id)
            .bind(status_as_str(status))
            .bind(error_message)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        Ok(())
    }

    async fn set_credits_charged(&self, id: i64, credits: i64) -> Result<(), VoiceError> {
        sqlx::query("UPDATE audio_requests SET credits_charged = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(credits)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        Ok(())
    }

    async fn complete(&self, id: i64, object_key: String, duration_seconds: f64) -> Result<(), VoiceError> {
        sqlx::query(
            "UPDATE audio_requests SET status = 'ready', object_key = ?2, duration_seconds = ?3, \
             error_message = NULL, updated_at = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(object_key)
        .bind(duration_seconds)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        Ok(())
    }

    async fn list_by_voice(&self, voice_id: i64) -> Result<Vec<AudioRequest>, VoiceError> {
        let rows = sqlx::query("SELECT * FROM audio_requests WHERE voice_id = ?1")
            .bind(voice_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        rows.iter().map(row_to_request).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_find_by_voice_and_story() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteAudioRequestRepository::new(pool);
        let created = repo.create(10, 20, 1).await.unwrap();
        assert_eq!(created.status, AudioRequestStatus::Pending);

        let found = repo.find_by_voice_and_story(10, 20).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().id, created.id);
    }

    #[tokio::test]
    async fn complete_clears_error_and_sets_ready() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteAudioRequestRepository::new(pool);
        let created = repo.create(10, 20, 1).await.unwrap();
        repo.set_status(created.id, AudioRequestStatus::Error, Some("boom".into()))
            .await
            .unwrap();
        repo.complete(created.id, "audio/out.mp3".into(), 12.5).await.unwrap();

        let fetched = repo.get(created.id).await.unwrap();
        assert_eq!(fetched.status, AudioRequestStatus::Ready);
        assert!(fetched.error_message.is_none());
        assert_eq!(fetched.object_key.as_deref(), Some("audio/out.mp3"));
    }
}
