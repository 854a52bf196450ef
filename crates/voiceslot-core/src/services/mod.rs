//! Orchestration services. These wire ports together into the algorithms
//! the component design calls for; none of them touch SQL, Redis, or HTTP
//! directly.

pub mod allocation_worker;
pub mod allocator;
pub mod ledger;
pub mod orchestrator;
pub mod reclaimer;

pub use allocation_worker::{AllocationOutcome, AllocationWorker};
pub use allocator::{AllocationDispatcher, SlotAllocator};
pub use ledger::{CreditHistoryPage, CreditLedger};
pub use orchestrator::{SynthesisDispatcher, SynthesisOrchestrator, SynthesizeOutcome, SynthesizeResponse};
pub use reclaimer::IdleReclaimer;
