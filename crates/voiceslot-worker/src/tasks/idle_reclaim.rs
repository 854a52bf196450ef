//! Periodic idle-reclaim loop (§4.6). Runs right after a reclaim pass
//! evicts anything, a drain pass is triggered immediately rather than
//! waiting for the next drain tick, since the whole point of reclaiming
//! is to free a slot for whoever is waiting.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use voiceslot_core::domain::ServiceProvider;
use voiceslot_core::services::allocation_worker::AllocationWorker;
use voiceslot_core::services::reclaimer::IdleReclaimer;

pub async fn run(
    reclaimer: Arc<IdleReclaimer>,
    drain_worker: Arc<AllocationWorker>,
    service_provider: ServiceProvider,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                info!("idle reclaim loop stopping");
                break;
            }

            _ = tick.tick() => {
                match reclaimer.run_once(service_provider).await {
                    Ok(0) => {}
                    Ok(evicted) => {
                        info!(evicted, "idle reclaim pass evicted voices");
                        if let Err(err) = drain_worker.drain_queue(evicted).await {
                            error!(error = %err, "post-reclaim drain failed");
                        }
                    }
                    Err(err) => error!(error = %err, "idle reclaim pass failed"),
                }
            }
        }
    }
}
