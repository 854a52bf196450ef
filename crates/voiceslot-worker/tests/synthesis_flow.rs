//! End-to-end: a synthesis request against a cold voice drives allocation,
//! the background clone, and the synthesis worker through to a completed
//! audio file, wired exactly the way the composition root wires them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use voiceslot_core::config::{LedgerConfig, SlotAllocatorConfig};
use voiceslot_core::domain::{
    AllocationStatus, AudioRequestStatus, CreditSource, ServiceProvider, Voice, VoiceStatus,
};
use voiceslot_core::ports::{
    AudioRequestRepositoryPort, MetricsSink, ObjectStorePort, PutOptions, TracingMetricsSink,
    VoiceRepositoryPort,
};
use voiceslot_core::services::ledger::CreditLedger;
use voiceslot_db::{SqliteAudioRequestRepository, SqliteCreditRepository, SqliteStoryRepository, SqliteVoiceRepository};
use voiceslot_objectstore::FilesystemObjectStore;
use voiceslot_provider::FakeVoiceServiceProvider;
use voiceslot_queue::{InProcessLock, InProcessSlotQueue};
use voiceslot_worker::WorkerServices;

#[tokio::test]
async fn cold_voice_synthesis_completes_end_to_end() {
    let pool = voiceslot_db::connect_in_memory().await.unwrap();
    let voices: Arc<dyn VoiceRepositoryPort> = Arc::new(SqliteVoiceRepository::new(pool.clone()));
    let audio_requests: Arc<dyn AudioRequestRepositoryPort> =
        Arc::new(SqliteAudioRequestRepository::new(pool.clone()));
    let credit_repo = Arc::new(SqliteCreditRepository::new(pool.clone()));
    let stories = Arc::new(SqliteStoryRepository::new(pool.clone()));

    let object_dir = tempfile::tempdir().unwrap();
    let object_store: Arc<dyn ObjectStorePort> =
        Arc::new(FilesystemObjectStore::new(object_dir.path()));
    object_store
        .upload(
            "recordings/narrator.wav",
            Bytes::from_static(b"raw sample bytes"),
            PutOptions::default(),
        )
        .await
        .unwrap();

    stories.put(1, "Once upon a time, in a quiet village.").await.unwrap();

    let provider = Arc::new(FakeVoiceServiceProvider::new());
    let queue = Arc::new(InProcessSlotQueue::new());
    let lock = Arc::new(InProcessLock::new());
    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetricsSink);

    let seed_ledger = CreditLedger::new(credit_repo.clone(), LedgerConfig::default());
    seed_ledger
        .grant(1, 100, "test seed", CreditSource::Free, None)
        .await
        .unwrap();

    let voice = Voice {
        id: 0,
        owner_user_id: 1,
        name: "Narrator".into(),
        recording_object_key: "recordings/narrator.wav".into(),
        sample_filename: "narrator.wav".into(),
        service_provider: ServiceProvider::ElevenLabs,
        remote_voice_id: None,
        status: VoiceStatus::Recorded,
        allocation_status: AllocationStatus::Recorded,
        allocated_at: None,
        last_used_at: None,
        slot_lock_expires_at: None,
        error_message: None,
    };
    let voice = voices.create(&voice).await.unwrap();

    let mut allocator_config = SlotAllocatorConfig::default();
    allocator_config.queue_poll_interval_seconds = 1;

    let (orchestrator, runner) = WorkerServices::build(
        voices.clone(),
        audio_requests.clone(),
        queue,
        lock,
        object_store.clone(),
        provider,
        stories,
        metrics,
        credit_repo,
        ServiceProvider::ElevenLabs,
        allocator_config,
        LedgerConfig::default(),
        10,
        10,
    );

    let response = orchestrator.synthesize(&voice, 1, "Once upon a time, in a quiet village.").await.unwrap();
    let request_id = response.request.id;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = audio_requests.get(request_id).await.unwrap().status;
        if status == AudioRequestStatus::Ready {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "synthesis did not complete in time, last status was {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let request = audio_requests.get(request_id).await.unwrap();
    assert_eq!(request.status, AudioRequestStatus::Ready);
    let object_key = request.object_key.expect("completed request carries an object key");
    let stored = object_store.download(&object_key).await.unwrap();
    assert!(!stored.is_empty());

    let balance = seed_ledger.balance(1).await.unwrap();
    assert_eq!(balance.balance_computed, 99);

    runner.shutdown().await;
}
