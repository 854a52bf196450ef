//! Background runner for slot allocation, idle reclaim, and synthesis
//! dispatch.
//!
//! This crate is the task-scheduling mechanism the core's
//! `AllocationDispatcher` / `SynthesisDispatcher` ports abstract away: it
//! owns the periodic queue-drain and idle-reclaim loops (§4.5, §4.6) and
//! the per-request synthesis worker (§4.8's "Synthesis worker"). None of
//! the orchestration algorithms live here — they live in
//! `voiceslot-core::services` — this crate only decides *when* to call
//! them and how to keep retrying in the background.

pub mod dispatch;
pub mod runner;
pub mod tasks;

pub use dispatch::{AllocationTaskDispatcher, SynthesisTaskDispatcher, SynthesisWorkerConfig};
pub use runner::{BackgroundRunner, WorkerServices};
