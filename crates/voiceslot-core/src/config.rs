//! Runtime configuration (§6's configuration table), assembled from
//! environment variables with typed defaults so a bare checkout can run
//! against throwaway local adapters without any configuration at all.

use std::time::Duration;

use crate::domain::CreditSource;

#[derive(Debug, Clone)]
pub struct SlotAllocatorConfig {
    /// Hard cap of concurrent live clones per provider.
    pub slot_limit: u32,
    /// How long a just-used voice is protected from eviction.
    pub warm_hold_seconds: u64,
    /// TTL on the per-voice allocation lock.
    pub slot_lock_seconds: u64,
    /// Period of the drain + reclaim timers.
    pub queue_poll_interval_seconds: u64,
    /// Circuit breaker on the queue-drain cycle (§4.5): stop re-deferring
    /// after this many consecutive entries in one pass.
    pub max_consecutive_requeues: u32,
    /// Cap on how many voices the idle reclaimer evicts in one pass.
    pub max_reclaim_per_cycle: u32,
}

impl Default for SlotAllocatorConfig {
    fn default() -> Self {
        Self {
            slot_limit: 30,
            warm_hold_seconds: 900,
            slot_lock_seconds: 300,
            queue_poll_interval_seconds: 60,
            max_consecutive_requeues: 10,
            max_reclaim_per_cycle: 10,
        }
    }
}

impl SlotAllocatorConfig {
    #[must_use]
    pub const fn warm_hold(&self) -> Duration {
        Duration::from_secs(self.warm_hold_seconds)
    }

    #[must_use]
    pub const fn slot_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.slot_lock_seconds)
    }

    #[must_use]
    pub const fn queue_poll_interval(&self) -> Duration {
        Duration::from_secs(self.queue_poll_interval_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Characters of story text that cost one credit.
    pub unit_size: u64,
    pub initial_credits: i64,
    pub monthly_credits_default: i64,
    /// Source priority order for debit draining; any source not listed is
    /// consumed after these, in insertion order.
    pub source_priority: Vec<CreditSource>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            unit_size: 1000,
            initial_credits: 0,
            monthly_credits_default: 0,
            source_priority: vec![
                CreditSource::Event,
                CreditSource::Monthly,
                CreditSource::Referral,
                CreditSource::AddOn,
                CreditSource::Free,
            ],
        }
    }
}

impl LedgerConfig {
    /// `ceil(len / unit_size)`, minimum 1.
    #[must_use]
    pub fn credits_for_text(&self, char_len: u64) -> i64 {
        let unit = self.unit_size.max(1);
        let units = char_len.div_ceil(unit).max(1);
        units as i64
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub allocator: SlotAllocatorConfig,
    pub ledger: LedgerConfig,
    /// Dedup lock TTL for the Deduplicator (§4.9).
    pub dedup_lock_seconds: u64,
}

impl Config {
    #[must_use]
    pub fn dedup_lock_ttl(&self) -> Duration {
        Duration::from_secs(if self.dedup_lock_seconds == 0 {
            10
        } else {
            self.dedup_lock_seconds
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_to_credits_rounding() {
        let cfg = LedgerConfig::default();
        assert_eq!(cfg.credits_for_text(0), 1);
        assert_eq!(cfg.credits_for_text(1000), 1);
        assert_eq!(cfg.credits_for_text(1001), 2);
        assert_eq!(cfg.credits_for_text(2500), 3);
    }
}
