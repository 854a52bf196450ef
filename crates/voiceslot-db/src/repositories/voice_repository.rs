//! SQLite implementation of `VoiceRepositoryPort`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use voiceslot_core::domain::{
    AllocationStatus, ServiceProvider, Voice, VoiceSlotEvent, VoiceSlotEventType, VoiceStatus,
};
use voiceslot_core::errors::VoiceError;
use voiceslot_core::ports::VoiceRepositoryPort;

use crate::map_sqlx_err;

pub struct SqliteVoiceRepository {
    pool: SqlitePool,
}

impl SqliteVoiceRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn service_provider_from_str(s: &str) -> Result<ServiceProvider, VoiceError> {
    match s {
        "elevenlabs" => Ok(ServiceProvider::ElevenLabs),
        "cartesia" => Ok(ServiceProvider::Cartesia),
        other => Err(VoiceError::other(format!("unknown service_provider {other}"))),
    }
}

fn voice_status_from_str(s: &str) -> Result<VoiceStatus, VoiceError> {
    match s {
        "pending" => Ok(VoiceStatus::Pending),
        "processing" => Ok(VoiceStatus::Processing),
        "recorded" => Ok(VoiceStatus::Recorded),
        "ready" => Ok(VoiceStatus::Ready),
        "error" => Ok(VoiceStatus::Error),
        "needs_rerecord" => Ok(VoiceStatus::NeedsRerecord),
        other => Err(VoiceError::other(format!("unknown voice status {other}"))),
    }
}

const fn voice_status_as_str(s: VoiceStatus) -> &'static str {
    match s {
        VoiceStatus::Pending => "pending",
        VoiceStatus::Processing => "processing",
        VoiceStatus::Recorded => "recorded",
        VoiceStatus::Ready => "ready",
        VoiceStatus::Error => "error",
        VoiceStatus::NeedsRerecord => "needs_rerecord",
    }
}

fn allocation_status_from_str(s: &str) -> Result<AllocationStatus, VoiceError> {
    match s {
        "recorded" => Ok(AllocationStatus::Recorded),
        "allocating" => Ok(AllocationStatus::Allocating),
        "ready" => Ok(AllocationStatus::Ready),
        other => Err(VoiceError::other(format!("unknown allocation_status {other}"))),
    }
}

const fn allocation_status_as_str(s: AllocationStatus) -> &'static str {
    match s {
        AllocationStatus::Recorded => "recorded",
        AllocationStatus::Allocating => "allocating",
        AllocationStatus::Ready => "ready",
    }
}

fn event_type_from_str(s: &str) -> Result<VoiceSlotEventType, VoiceError> {
    match s {
        "recording_uploaded" => Ok(VoiceSlotEventType::RecordingUploaded),
        "recording_processing_queued" => Ok(VoiceSlotEventType::RecordingProcessingQueued),
        "recording_processed" => Ok(VoiceSlotEventType::RecordingProcessed),
        "recording_processing_failed" => Ok(VoiceSlotEventType::RecordingProcessingFailed),
        "allocation_queued" => Ok(VoiceSlotEventType::AllocationQueued),
        "allocation_started" => Ok(VoiceSlotEventType::AllocationStarted),
        "allocation_completed" => Ok(VoiceSlotEventType::AllocationCompleted),
        "allocation_failed" => Ok(VoiceSlotEventType::AllocationFailed),
        "slot_lock_acquired" => Ok(VoiceSlotEventType::SlotLockAcquired),
        "slot_lock_released" => Ok(VoiceSlotEventType::SlotLockReleased),
        "slot_evicted" => Ok(VoiceSlotEventType::SlotEvicted),
        other => Err(VoiceError::other(format!("unknown event_type {other}"))),
    }
}

fn row_to_voice(row: &sqlx::sqlite::SqliteRow) -> Result<Voice, VoiceError> {
    Ok(Voice {
        id: row.try_get("id").map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        owner_user_id: row
            .try_get("owner_user_id")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        name: row.try_get("name").map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        recording_object_key: row
            .try_get("recording_object_key")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        sample_filename: row
            .try_get("sample_filename")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        service_provider: service_provider_from_str(
            row.try_get::<String, _>("service_provider")
                .map_err(|e| VoiceError::other(map_sqlx_err(e)))?
                .as_str(),
        )?,
        remote_voice_id: row
            .try_get("remote_voice_id")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        status: voice_status_from_str(
            row.try_get::<String, _>("status")
                .map_err(|e| VoiceError::other(map_sqlx_err(e)))?
                .as_str(),
        )?,
        allocation_status: allocation_status_from_str(
            row.try_get::<String, _>("allocation_status")
                .map_err(|e| VoiceError::other(map_sqlx_err(e)))?
                .as_str(),
        )?,
        allocated_at: row
            .try_get("allocated_at")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        last_used_at: row
            .try_get("last_used_at")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        slot_lock_expires_at: row
            .try_get("slot_lock_expires_at")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        error_message: row
            .try_get("error_message")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
    })
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<VoiceSlotEvent, VoiceError> {
    Ok(VoiceSlotEvent {
        id: row.try_get("id").map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        voice_id: row.try_get("voice_id").map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        user_id: row.try_get("user_id").map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        event_type: event_type_from_str(
            row.try_get::<String, _>("event_type")
                .map_err(|e| VoiceError::other(map_sqlx_err(e)))?
                .as_str(),
        )?,
        reason: row.try_get("reason").map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        metadata: serde_json::from_str(
            &row.try_get::<String, _>("metadata")
                .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
        )
        .map_err(|e| VoiceError::other(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?,
    })
}

#[async_trait]
impl VoiceRepositoryPort for SqliteVoiceRepository {
    async fn get(&self, id: i64) -> Result<Voice, VoiceError> {
        let row = sqlx::query("SELECT * FROM voices WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?
            .ok_or(VoiceError::NotFound { id })?;
        row_to_voice(&row)
    }

    async fn get_by_remote_id(
        &self,
        provider: ServiceProvider,
        remote_voice_id: &str,
    ) -> Result<Option<Voice>, VoiceError> {
        let row = sqlx::query("SELECT * FROM voices WHERE service_provider = ?1 AND remote_voice_id = ?2")
            .bind(provider.as_str())
            .bind(remote_voice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        row.as_ref().map(row_to_voice).transpose()
    }

    async fn find_by_historical_remote_id(&self, remote_voice_id: &str) -> Result<Option<Voice>, VoiceError> {
        let row = sqlx::query(
            "SELECT v.* FROM voice_slot_events e \
             JOIN voices v ON v.id = e.voice_id \
             WHERE e.event_type = 'allocation_completed' \
               AND json_extract(e.metadata, '$.external_voice_id') = ?1 \
             ORDER BY e.created_at DESC LIMIT 1",
        )
        .bind(remote_voice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        row.as_ref().map(row_to_voice).transpose()
    }

    async fn create(&self, voice: &Voice) -> Result<Voice, VoiceError> {
        let id = sqlx::query(
            "INSERT INTO voices \
             (owner_user_id, name, recording_object_key, sample_filename, service_provider, \
              remote_voice_id, status, allocation_status, allocated_at, last_used_at, \
              slot_lock_expires_at, error_message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(voice.owner_user_id)
        .bind(&voice.name)
        .bind(&voice.recording_object_key)
        .bind(&voice.sample_filename)
        .bind(voice.service_provider.as_str())
        .bind(&voice.remote_voice_id)
        .bind(voice_status_as_str(voice.status))
        .bind(allocation_status_as_str(voice.allocation_status))
        .bind(voice.allocated_at)
        .bind(voice.last_used_at)
        .bind(voice.slot_lock_expires_at)
        .bind(&voice.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| VoiceError::other(map_sqlx_err(e)))?
        .last_insert_rowid();

        Ok(Voice {
            id,
            ..voice.clone()
        })
    }

    async fn save(&self, voice: &Voice) -> Result<(), VoiceError> {
        if voice.id == 0 {
            sqlx::query(
                "INSERT INTO voices \
                 (owner_user_id, name, recording_object_key, sample_filename, service_provider, \
                  remote_voice_id, status, allocation_status, allocated_at, last_used_at, \
                  slot_lock_expires_at, error_message) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )
            .bind(voice.owner_user_id)
            .bind(&voice.name)
            .bind(&voice.recording_object_key)
            .bind(&voice.sample_filename)
            .bind(voice.service_provider.as_str())
            .bind(&voice.remote_voice_id)
            .bind(voice_status_as_str(voice.status))
            .bind(allocation_status_as_str(voice.allocation_status))
            .bind(voice.allocated_at)
            .bind(voice.last_used_at)
            .bind(voice.slot_lock_expires_at)
            .bind(&voice.error_message)
            .execute(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        } else {
            sqlx::query(
                "UPDATE voices SET owner_user_id = ?2, name = ?3, recording_object_key = ?4, \
                 sample_filename = ?5, service_provider = ?6, remote_voice_id = ?7, status = ?8, \
                 allocation_status = ?9, allocated_at = ?10, last_used_at = ?11, \
                 slot_lock_expires_at = ?12, error_message = ?13 WHERE id = ?1",
            )
            .bind(voice.id)
            .bind(voice.owner_user_id)
            .bind(&voice.name)
            .bind(&voice.recording_object_key)
            .bind(&voice.sample_filename)
            .bind(voice.service_provider.as_str())
            .bind(&voice.remote_voice_id)
            .bind(voice_status_as_str(voice.status))
            .bind(allocation_status_as_str(voice.allocation_status))
            .bind(voice.allocated_at)
            .bind(voice.last_used_at)
            .bind(voice.slot_lock_expires_at)
            .bind(&voice.error_message)
            .execute(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        }
        Ok(())
    }

    async fn count_active_slots(&self, provider: ServiceProvider) -> Result<u32, VoiceError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM voices WHERE service_provider = ?1 \
             AND allocation_status IN ('ready', 'allocating')",
        )
        .bind(provider.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        Ok(u32::try_from(count).unwrap_or(0))
    }

    async fn find_reclaim_candidates(
        &self,
        provider: ServiceProvider,
        now: DateTime<Utc>,
        warm_hold_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Voice>, VoiceError> {
        // All three conditions are required: a voice with no recorded
        // `slot_lock_expires_at`/`last_used_at` has never been used since
        // allocation and has not earned any warm hold to expire, so it is
        // not a reclaim candidate.
        let rows = sqlx::query(
            "SELECT * FROM voices WHERE service_provider = ?1 AND allocation_status = 'ready' \
             AND slot_lock_expires_at <= ?2 AND last_used_at <= ?3 \
             ORDER BY last_used_at ASC LIMIT ?4",
        )
        .bind(provider.as_str())
        .bind(now)
        .bind(warm_hold_before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        rows.iter().map(row_to_voice).collect()
    }

    async fn append_event(&self, event: VoiceSlotEvent) -> Result<(), VoiceError> {
        let metadata = serde_json::to_string(&event.metadata).map_err(|e| VoiceError::other(e.to_string()))?;
        sqlx::query(
            "INSERT INTO voice_slot_events (voice_id, user_id, event_type, reason, metadata, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(event.voice_id)
        .bind(event.user_id)
        .bind(event.event_type.as_str())
        .bind(&event.reason)
        .bind(metadata)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        Ok(())
    }

    async fn recent_events(&self, voice_id: i64, limit: u32) -> Result<Vec<VoiceSlotEvent>, VoiceError> {
        let rows = sqlx::query(
            "SELECT * FROM voice_slot_events WHERE voice_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )
        .bind(voice_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        rows.iter().map(row_to_event).collect()
    }

    async fn recent_events_global(&self, limit: u32) -> Result<Vec<VoiceSlotEvent>, VoiceError> {
        let rows = sqlx::query("SELECT * FROM voice_slot_events ORDER BY created_at DESC LIMIT ?1")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        rows.iter().map(row_to_event).collect()
    }

    async fn list_active_allocations(&self, provider: ServiceProvider) -> Result<Vec<Voice>, VoiceError> {
        let rows = sqlx::query(
            "SELECT * FROM voices WHERE service_provider = ?1 \
             AND allocation_status IN ('ready', 'allocating') ORDER BY last_used_at ASC",
        )
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        rows.iter().map(row_to_voice).collect()
    }

    async fn delete(&self, id: i64) -> Result<(), VoiceError> {
        let mut tx = self.pool.begin().await.map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        sqlx::query("UPDATE voice_slot_events SET voice_id = NULL WHERE voice_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        sqlx::query("DELETE FROM voices WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        tx.commit().await.map_err(|e| VoiceError::other(map_sqlx_err(e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voiceslot_core::domain::Voice;

    fn sample_voice() -> Voice {
        Voice {
            id: 0,
            owner_user_id: 1,
            name: "Narrator".into(),
            recording_object_key: "recordings/1.wav".into(),
            sample_filename: "sample.wav".into(),
            service_provider: ServiceProvider::ElevenLabs,
            remote_voice_id: None,
            status: VoiceStatus::Recorded,
            allocation_status: AllocationStatus::Recorded,
            allocated_at: None,
            last_used_at: None,
            slot_lock_expires_at: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteVoiceRepository::new(pool);
        repo.save(&sample_voice()).await.unwrap();
        let fetched = repo.get(1).await.unwrap();
        assert_eq!(fetched.name, "Narrator");
        assert_eq!(fetched.allocation_status, AllocationStatus::Recorded);
    }

    #[tokio::test]
    async fn count_active_slots_counts_ready_and_allocating_only() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteVoiceRepository::new(pool);
        let mut v1 = sample_voice();
        v1.allocation_status = AllocationStatus::Ready;
        v1.remote_voice_id = Some("r1".into());
        repo.save(&v1).await.unwrap();

        let mut v2 = sample_voice();
        v2.allocation_status = AllocationStatus::Allocating;
        repo.save(&v2).await.unwrap();

        let mut v3 = sample_voice();
        v3.allocation_status = AllocationStatus::Recorded;
        repo.save(&v3).await.unwrap();

        let count = repo.count_active_slots(ServiceProvider::ElevenLabs).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn find_by_historical_remote_id_uses_event_log() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteVoiceRepository::new(pool);
        repo.save(&sample_voice()).await.unwrap();
        repo.append_event(VoiceSlotEvent::new(
            Some(1),
            Some(1),
            VoiceSlotEventType::AllocationCompleted,
            None,
            serde_json::json!({ "external_voice_id": "evl_abc123" }),
        ))
        .await
        .unwrap();

        let found = repo.find_by_historical_remote_id("evl_abc123").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().id, 1);
    }

    #[tokio::test]
    async fn delete_removes_voice_but_nulls_event_references() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteVoiceRepository::new(pool);
        repo.save(&sample_voice()).await.unwrap();
        repo.append_event(VoiceSlotEvent::new(
            Some(1),
            Some(1),
            VoiceSlotEventType::RecordingUploaded,
            None,
            serde_json::json!({}),
        ))
        .await
        .unwrap();

        repo.delete(1).await.unwrap();

        assert!(matches!(repo.get(1).await, Err(VoiceError::NotFound { id: 1 })));
        let events = repo.recent_events_global(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].voice_id, None);
    }

    #[tokio::test]
    async fn find_reclaim_candidates_requires_both_lock_expiry_and_warm_hold() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteVoiceRepository::new(pool);
        let now = Utc::now();
        let warm_hold_before = now - chrono::Duration::seconds(900);

        // Ready, lock expired, but used recently: still within warm hold.
        let mut recently_used = sample_voice();
        recently_used.allocation_status = AllocationStatus::Ready;
        recently_used.remote_voice_id = Some("r1".into());
        recently_used.slot_lock_expires_at = Some(now - chrono::Duration::seconds(1));
        recently_used.last_used_at = Some(now - chrono::Duration::seconds(10));
        repo.save(&recently_used).await.unwrap();

        // Ready, never used at all: no warm hold has been earned or expired.
        let mut never_used = sample_voice();
        never_used.allocation_status = AllocationStatus::Ready;
        never_used.remote_voice_id = Some("r2".into());
        repo.save(&never_used).await.unwrap();

        // Ready, lock expired, and past warm hold: the only true candidate.
        let mut stale = sample_voice();
        stale.allocation_status = AllocationStatus::Ready;
        stale.remote_voice_id = Some("r3".into());
        stale.slot_lock_expires_at = Some(now - chrono::Duration::seconds(1));
        stale.last_used_at = Some(now - chrono::Duration::seconds(1_000));
        repo.save(&stale).await.unwrap();

        let candidates = repo
            .find_reclaim_candidates(ServiceProvider::ElevenLabs, now, warm_hold_before, 10)
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].remote_voice_id.as_deref(), Some("r3"));
    }
}
