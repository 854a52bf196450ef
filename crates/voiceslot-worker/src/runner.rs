//! Wires the core services together with this crate's dispatchers and
//! owns the two periodic background loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use voiceslot_core::config::{LedgerConfig, SlotAllocatorConfig};
use voiceslot_core::domain::ServiceProvider;
use voiceslot_core::ports::{
    AudioRequestRepositoryPort, LockPort, MetricsSink, ObjectStorePort, SlotQueuePort,
    StoryContentPort, VoiceRepositoryPort, VoiceServiceProviderPort,
};
use voiceslot_core::services::allocation_worker::AllocationWorker;
use voiceslot_core::services::allocator::SlotAllocator;
use voiceslot_core::services::ledger::CreditLedger;
use voiceslot_core::services::orchestrator::SynthesisOrchestrator;
use voiceslot_core::services::reclaimer::IdleReclaimer;

use crate::dispatch::{AllocationTaskDispatcher, SynthesisTaskDispatcher, SynthesisWorkerConfig};
use crate::tasks::{idle_reclaim, queue_drain};

/// Holds the cancellation handle and join handles for the background
/// loops started by [`WorkerServices::build`]. Dropping this without
/// calling [`shutdown`](Self::shutdown) leaves the loops running
/// detached — fine for a process that's about to exit anyway, but
/// `shutdown` is the clean path.
pub struct BackgroundRunner {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundRunner {
    fn spawn(
        allocation_worker: Arc<AllocationWorker>,
        reclaimer: Arc<IdleReclaimer>,
        service_provider: ServiceProvider,
        poll_interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();

        let drain_handle = tokio::spawn(queue_drain::run(
            allocation_worker.clone(),
            poll_interval,
            cancel.clone(),
        ));
        let reclaim_handle = tokio::spawn(idle_reclaim::run(
            reclaimer,
            allocation_worker,
            service_provider,
            poll_interval,
            cancel.clone(),
        ));

        Self {
            cancel,
            handles: vec![drain_handle, reclaim_handle],
        }
    }

    /// Cancels both loops and waits for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("background runner shut down");
    }
}

/// Everything the composition root needs to build the synthesis
/// orchestrator and its background runner from a fixed set of adapters.
/// Single-provider by construction: the allocation worker and idle
/// reclaimer each hold one concrete `VoiceServiceProviderPort`, so a
/// deployment serving more than one vendor at once builds one
/// `WorkerServices` per vendor rather than teaching either service to
/// branch on a voice's tag (see DESIGN.md).
pub struct WorkerServices;

impl WorkerServices {
    /// Wires ports into services and dispatchers, and starts the
    /// background loops. Returns the orchestrator the HTTP layer calls
    /// into, plus the runner handle for graceful shutdown.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn build(
        voices: Arc<dyn VoiceRepositoryPort>,
        audio_requests: Arc<dyn AudioRequestRepositoryPort>,
        queue: Arc<dyn SlotQueuePort>,
        lock: Arc<dyn LockPort>,
        object_store: Arc<dyn ObjectStorePort>,
        provider: Arc<dyn VoiceServiceProviderPort>,
        stories: Arc<dyn StoryContentPort>,
        metrics: Arc<dyn MetricsSink>,
        ledger_repo: Arc<dyn voiceslot_core::ports::CreditRepositoryPort>,
        service_provider: ServiceProvider,
        allocator_config: SlotAllocatorConfig,
        ledger_config: LedgerConfig,
        dedup_ttl_seconds: u64,
        max_synthesis_attempts: u32,
    ) -> (Arc<SynthesisOrchestrator>, BackgroundRunner) {
        let allocation_worker = Arc::new(AllocationWorker::new(
            voices.clone(),
            queue.clone(),
            object_store.clone(),
            provider.clone(),
            metrics.clone(),
            allocator_config.clone(),
        ));

        let allocation_dispatcher = Arc::new(AllocationTaskDispatcher::new(
            allocation_worker.clone(),
            voices.clone(),
        ));

        let allocator = Arc::new(SlotAllocator::new(
            voices.clone(),
            queue.clone(),
            lock.clone(),
            allocation_dispatcher,
            allocator_config.clone(),
        ));

        let reclaimer = Arc::new(IdleReclaimer::new(
            voices.clone(),
            queue.clone(),
            provider.clone(),
            allocator_config.clone(),
        ));

        let ledger = Arc::new(CreditLedger::new(ledger_repo, ledger_config));

        let synthesis_dispatcher = Arc::new(SynthesisTaskDispatcher::new(
            voices.clone(),
            audio_requests.clone(),
            provider,
            object_store,
            stories,
            ledger.clone(),
            metrics,
            SynthesisWorkerConfig {
                max_attempts: max_synthesis_attempts,
                retry_poll_interval_seconds: allocator_config.queue_poll_interval_seconds,
                warm_hold_seconds: allocator_config.warm_hold_seconds,
            },
        ));

        let orchestrator = Arc::new(SynthesisOrchestrator::new(
            allocator,
            ledger,
            lock,
            voices,
            audio_requests,
            synthesis_dispatcher,
            dedup_ttl_seconds,
        ));

        let runner = BackgroundRunner::spawn(
            allocation_worker,
            reclaimer,
            service_provider,
            allocator_config.queue_poll_interval(),
        );

        (orchestrator, runner)
    }
}
