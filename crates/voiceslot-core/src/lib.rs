//! Core domain types, ports, and orchestration services for the voice
//! slot allocator and credit ledger.
//!
//! This crate has no I/O of its own: adapter crates (`voiceslot-db`,
//! `voiceslot-queue`, `voiceslot-objectstore`, `voiceslot-provider`,
//! `voiceslot-http`) implement the ports defined here against SQLite,
//! Redis-or-in-process KV stores, object storage, upstream TTS vendors,
//! and axum respectively.

pub mod config;
pub mod domain;
pub mod errors;
pub mod ports;
pub mod services;

pub use config::{Config, LedgerConfig, SlotAllocatorConfig};
