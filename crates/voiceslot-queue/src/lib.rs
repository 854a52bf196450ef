//! Adapters for the KV queue and concurrency lock ports: an in-process
//! implementation for single-node deployments and tests, and a
//! Redis-backed one for anything running more than one allocation worker.

pub mod in_process;
pub mod redis_backed;

pub use in_process::{InProcessLock, InProcessSlotQueue};
pub use redis_backed::{RedisLock, RedisSlotQueue};
