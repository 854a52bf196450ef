//! The two periodic passes the background runner drives: queue-drain
//! (§4.5) and idle-reclaim (§4.6). Both are simple interval loops — all
//! the actual decision logic lives in `voiceslot_core::services`.

pub mod idle_reclaim;
pub mod queue_drain;
