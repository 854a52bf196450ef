//! Periodic queue-drain loop (§4.5).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use voiceslot_core::services::allocation_worker::AllocationWorker;

/// How many entries one drain pass pulls off the queue per tick.
const DRAIN_BATCH_SIZE: u32 = 20;

/// Runs `AllocationWorker::drain_queue` on every tick of
/// `poll_interval` until `cancel` fires.
pub async fn run(worker: Arc<AllocationWorker>, poll_interval: Duration, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                info!("queue drain loop stopping");
                break;
            }

            _ = tick.tick() => {
                match worker.drain_queue(DRAIN_BATCH_SIZE).await {
                    Ok(allocated) if allocated > 0 => {
                        info!(allocated, "queue drain pass allocated voices");
                    }
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "queue drain pass failed"),
                }
            }
        }
    }
}
