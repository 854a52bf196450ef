//! Ports: the traits adapter crates implement. Only core domain types
//! appear in these signatures — no SQL, Redis, or HTTP types leak through.

pub mod metrics;
pub mod object_store;
pub mod provider;
pub mod repository;
pub mod slot_queue;
pub mod story;

pub use metrics::{MetricsSink, TracingMetricsSink};
pub use object_store::{HeadResult, ObjectStorePort, PutOptions};
pub use provider::{VoiceServiceProviderPort, VoiceSettings};
pub use repository::{AudioRequestRepositoryPort, CreditRepositoryPort, LedgerTransaction, VoiceRepositoryPort};
pub use slot_queue::{LockGuard, LockPort, SlotQueuePort};
pub use story::StoryContentPort;
