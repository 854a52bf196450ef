//! The credit ledger's entities: users, lots, transactions and the
//! bipartite allocation edges between them.
//!
//! Lot consumption is never represented as a bare counter decrement.
//! Every debit records which lots it drained and by how much, as
//! `CreditAllocation` rows, so a refund has obvious semantics: reverse the
//! exact edges instead of guessing which lots to restore.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Denormalized cache. Authoritative value is the sum of unexpired
    /// `CreditLot.amount_remaining` for this user — see `CreditLedgerPort::
    /// computed_balance`.
    pub credits_balance_cached: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    Monthly,
    AddOn,
    Free,
    Event,
    Referral,
}

impl CreditSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::AddOn => "add_on",
            Self::Free => "free",
            Self::Event => "event",
            Self::Referral => "referral",
        }
    }
}

/// A single grant of points with one source, a remaining balance, and an
/// optional expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditLot {
    pub id: i64,
    pub user_id: i64,
    pub source: CreditSource,
    pub amount_granted: i64,
    pub amount_remaining: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CreditLot {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.amount_remaining > 0 && self.expires_at.is_none_or(|exp| exp > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
    Refund,
    Expire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Applied,
    Refunded,
}

/// A ledger entry. Debits are negative, credits/refunds are positive.
/// At most one debit with status `Applied` per `(audio_request_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub reason: String,
    pub status: TransactionStatus,
    pub audio_request_id: Option<i64>,
    pub story_id: Option<i64>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Many-to-many edge between a transaction and the lots it touched. For a
/// debit each allocation is negative; a refund counter-allocates to the
/// *same* lots with positive amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAllocation {
    pub transaction_id: i64,
    pub lot_id: i64,
    pub amount: i64,
}

/// Computed vs. cached balance, returned by summary APIs so operators can
/// spot drift between them. The cache is never trusted as the sole source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    pub balance_cached: i64,
    pub balance_computed: i64,
}
