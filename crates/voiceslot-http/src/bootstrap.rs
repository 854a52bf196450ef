//! Composition root — the only place where infrastructure adapters are
//! instantiated and wired into the core's ports. This module directly
//! imports concrete adapter crates (`voiceslot-db`, `voiceslot-queue`,
//! `voiceslot-objectstore`, `voiceslot-provider`) so that nothing
//! downstream of it needs to know which database, queue backend, or
//! upstream vendor is in play.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use voiceslot_core::config::{LedgerConfig, SlotAllocatorConfig};
use voiceslot_core::domain::{CreditSource, ServiceProvider};
use voiceslot_core::ports::{
    AudioRequestRepositoryPort, CreditRepositoryPort, LockPort, MetricsSink, ObjectStorePort, SlotQueuePort,
    StoryContentPort, TracingMetricsSink, VoiceRepositoryPort, VoiceServiceProviderPort,
};
use voiceslot_core::services::CreditLedger;
use voiceslot_core::services::SynthesisOrchestrator;
use voiceslot_db::{SqliteAudioRequestRepository, SqliteCreditRepository, SqliteStoryRepository, SqliteVoiceRepository};
use voiceslot_objectstore::{FilesystemObjectStore, S3ObjectStore};
use voiceslot_provider::{CartesiaProvider, ElevenLabsProvider};
use voiceslot_queue::{InProcessLock, InProcessSlotQueue, RedisLock, RedisSlotQueue};
use voiceslot_worker::{BackgroundRunner, WorkerServices};

/// CORS policy for the HTTP server.
#[derive(Debug, Clone, Default)]
pub enum CorsConfig {
    /// Allow all origins (development default).
    #[default]
    AllowAll,
    AllowOrigins(Vec<String>),
}

/// Where synthesized audio and recording samples live.
#[derive(Debug, Clone)]
pub enum ObjectStoreConfig {
    Filesystem(PathBuf),
    S3 { bucket: String },
}

/// Backend for the KV queue and concurrency lock.
#[derive(Debug, Clone)]
pub enum QueueBackend {
    InProcess,
    Redis { url: String, namespace: String },
}

/// Top-level server configuration, assembled from the environment
/// variables §6 names (`slot_limit`, `warm_hold_seconds`, ..., provider
/// API keys) with a typed-default-plus-builder shape.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_path: PathBuf,
    pub object_store: ObjectStoreConfig,
    pub queue_backend: QueueBackend,
    pub preferred_voice_service: ServiceProvider,
    pub elevenlabs_api_key: Option<String>,
    pub cartesia_api_key: Option<String>,
    pub allocator: SlotAllocatorConfig,
    pub ledger: LedgerConfig,
    pub dedup_lock_seconds: u64,
    pub max_synthesis_attempts: u32,
    pub cors: CorsConfig,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_source_priority(raw: &str) -> Vec<CreditSource> {
    raw.split(',')
        .filter_map(|s| match s.trim() {
            "monthly" => Some(CreditSource::Monthly),
            "add_on" => Some(CreditSource::AddOn),
            "free" => Some(CreditSource::Free),
            "event" => Some(CreditSource::Event),
            "referral" => Some(CreditSource::Referral),
            "" => None,
            other => {
                tracing::warn!(source = other, "unknown credit source in priority list, ignoring");
                None
            }
        })
        .collect()
}

impl ServerConfig {
    /// Reads the environment table §6 specifies, with defaults that let a
    /// bare checkout run against a throwaway SQLite file and an
    /// in-process queue with no configuration at all.
    pub fn from_env() -> Result<Self> {
        let object_store = match std::env::var("OBJECT_STORE_BUCKET") {
            Ok(bucket) => ObjectStoreConfig::S3 { bucket },
            Err(_) => ObjectStoreConfig::Filesystem(PathBuf::from(env_or("OBJECT_STORE_DIR", "./object_store"))),
        };

        let queue_backend = match std::env::var("REDIS_URL") {
            Ok(url) => QueueBackend::Redis {
                url,
                namespace: env_or("REDIS_NAMESPACE", "voiceslot"),
            },
            Err(_) => QueueBackend::InProcess,
        };

        let preferred_voice_service = match env_or("PREFERRED_VOICE_SERVICE", "elevenlabs").as_str() {
            "cartesia" => ServiceProvider::Cartesia,
            _ => ServiceProvider::ElevenLabs,
        };

        let allocator = SlotAllocatorConfig {
            slot_limit: env_parse("SLOT_LIMIT", 30),
            warm_hold_seconds: env_parse("WARM_HOLD_SECONDS", 900),
            slot_lock_seconds: env_parse("SLOT_LOCK_SECONDS", 300),
            queue_poll_interval_seconds: env_parse("QUEUE_POLL_INTERVAL", 60),
            max_consecutive_requeues: env_parse("MAX_CONSECUTIVE_REQUEUES", 10),
            max_reclaim_per_cycle: env_parse("MAX_RECLAIM_PER_CYCLE", 10),
        };

        let ledger = LedgerConfig {
            unit_size: env_parse("CREDITS_UNIT_SIZE", 1000),
            initial_credits: env_parse("INITIAL_CREDITS", 0),
            monthly_credits_default: env_parse("MONTHLY_CREDITS_DEFAULT", 0),
            source_priority: {
                let raw = env_or(
                    "CREDIT_SOURCES_PRIORITY",
                    "event,monthly,referral,add_on,free",
                );
                let parsed = parse_source_priority(&raw);
                if parsed.is_empty() {
                    LedgerConfig::default().source_priority
                } else {
                    parsed
                }
            },
        };

        Ok(Self {
            port: env_parse("PORT", 8080),
            database_path: PathBuf::from(env_or("DATABASE_URL", "voiceslot.db")),
            object_store,
            queue_backend,
            preferred_voice_service,
            elevenlabs_api_key: std::env::var("ELEVENLABS_API_KEY").ok(),
            cartesia_api_key: std::env::var("CARTESIA_API_KEY").ok(),
            allocator,
            ledger,
            dedup_lock_seconds: env_parse("DEDUP_LOCK_SECONDS", 10),
            max_synthesis_attempts: env_parse("MAX_SYNTHESIS_ATTEMPTS", 5),
            cors: CorsConfig::default(),
        })
    }

    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.cors = CorsConfig::AllowOrigins(origins);
        self
    }
}

/// Everything a handler needs, wired once at startup.
pub struct AppContext {
    pub orchestrator: Arc<SynthesisOrchestrator>,
    pub voices: Arc<dyn VoiceRepositoryPort>,
    pub audio_requests: Arc<dyn AudioRequestRepositoryPort>,
    pub object_store: Arc<dyn ObjectStorePort>,
    pub queue: Arc<dyn SlotQueuePort>,
    pub ledger: Arc<CreditLedger>,
    pub stories: Arc<dyn StoryContentPort>,
    pub allocator_config: SlotAllocatorConfig,
    pub preferred_provider: ServiceProvider,
    pub provider: Arc<dyn VoiceServiceProviderPort>,
}

/// Wires every adapter crate against the core's ports and starts the
/// background allocation/reclaim/synthesis loops. Returns the shared
/// context plus the runner handle so the caller can shut the loops down
/// cleanly.
pub async fn bootstrap(config: &ServerConfig) -> Result<(AppContext, BackgroundRunner)> {
    info!(
        database_path = %config.database_path.display(),
        preferred_voice_service = %config.preferred_voice_service,
        "bootstrapping voiceslot server"
    );

    let pool = voiceslot_db::connect(&config.database_path)
        .await
        .context("opening sqlite database")?;

    let voices: Arc<dyn VoiceRepositoryPort> = Arc::new(SqliteVoiceRepository::new(pool.clone()));
    let audio_requests: Arc<dyn AudioRequestRepositoryPort> =
        Arc::new(SqliteAudioRequestRepository::new(pool.clone()));
    let credit_repo: Arc<dyn CreditRepositoryPort> = Arc::new(SqliteCreditRepository::new(pool.clone()));
    let stories: Arc<dyn StoryContentPort> = Arc::new(SqliteStoryRepository::new(pool.clone()));

    let object_store: Arc<dyn ObjectStorePort> = match &config.object_store {
        ObjectStoreConfig::Filesystem(root) => Arc::new(FilesystemObjectStore::new(root.clone())),
        ObjectStoreConfig::S3 { bucket } => Arc::new(S3ObjectStore::from_env(bucket.clone()).await),
    };

    let (queue, lock): (Arc<dyn SlotQueuePort>, Arc<dyn LockPort>) = match &config.queue_backend {
        QueueBackend::InProcess => (Arc::new(InProcessSlotQueue::new()), Arc::new(InProcessLock::new())),
        QueueBackend::Redis { url, namespace } => {
            let queue = RedisSlotQueue::connect(url, namespace)
                .await
                .context("connecting redis-backed slot queue")?;
            let lock = RedisLock::connect(url, namespace)
                .await
                .context("connecting redis-backed lock")?;
            (Arc::new(queue), Arc::new(lock))
        }
    };

    let provider: Arc<dyn VoiceServiceProviderPort> = match config.preferred_voice_service {
        ServiceProvider::ElevenLabs => {
            let key = config
                .elevenlabs_api_key
                .clone()
                .context("ELEVENLABS_API_KEY not set for preferred_voice_service=elevenlabs")?;
            Arc::new(ElevenLabsProvider::new(key))
        }
        ServiceProvider::Cartesia => {
            let key = config
                .cartesia_api_key
                .clone()
                .context("CARTESIA_API_KEY not set for preferred_voice_service=cartesia")?;
            Arc::new(CartesiaProvider::new(key))
        }
    };

    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetricsSink);

    // Kept separate from the `WorkerServices::build` wiring below so
    // handlers (credits, admin snapshot) can query the ledger and
    // repositories directly without going through the orchestrator.
    let ledger = Arc::new(CreditLedger::new(credit_repo.clone(), config.ledger.clone()));

    let (orchestrator, runner) = WorkerServices::build(
        voices.clone(),
        audio_requests.clone(),
        queue.clone(),
        lock,
        object_store.clone(),
        provider.clone(),
        stories.clone(),
        metrics,
        credit_repo,
        config.preferred_voice_service,
        config.allocator.clone(),
        config.ledger.clone(),
        config.dedup_lock_seconds,
        config.max_synthesis_attempts,
    );

    Ok((
        AppContext {
            orchestrator,
            voices,
            audio_requests,
            object_store,
            queue,
            ledger,
            stories,
            allocator_config: config.allocator.clone(),
            preferred_provider: config.preferred_voice_service,
            provider,
        },
        runner,
    ))
}

/// Binds and serves the HTTP API. Runs until the process is killed; the
/// background runner is shut down on a clean return (which `axum::serve`
/// only produces on a graceful-shutdown signal this function doesn't wire
/// up, since the binary crate owns process lifecycle).
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let (ctx, runner) = bootstrap(&config).await?;
    let app = crate::routes::create_router(Arc::new(ctx), &config.cors);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("voiceslot server listening on http://{addr}");

    axum::serve(listener, app).await?;
    runner.shutdown().await;
    Ok(())
}
