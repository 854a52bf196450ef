//! Credit Ledger (§4.7) — atomic debit/refund/grant across
//! priority-sourced lots, represented as a bipartite graph of
//! `(transaction, lot, amount)` edges rather than bare counters.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::config::LedgerConfig;
use crate::domain::{BalanceView, CreditAllocation, CreditLot, CreditSource, CreditTransaction, TransactionStatus, TransactionType};
use crate::errors::{LedgerError, LedgerResult};
use crate::ports::{CreditRepositoryPort, LedgerTransaction};

pub struct CreditLedger {
    repo: Arc<dyn CreditRepositoryPort>,
    config: LedgerConfig,
}

/// A page of transaction history, as returned to the credits endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CreditHistoryPage {
    pub items: Vec<CreditTransaction>,
    pub limit: u32,
    pub offset: u32,
    pub total: i64,
    pub next_offset: Option<u32>,
}

/// A lot drained by an amount, recorded so the caller can build
/// allocation edges.
struct Draw {
    lot_id: i64,
    amount: i64,
}

impl CreditLedger {
    #[must_use]
    pub fn new(repo: Arc<dyn CreditRepositoryPort>, config: LedgerConfig) -> Self {
        Self { repo, config }
    }

    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// `grant(user_id, amount, reason, source, expires_at?)`.
    #[instrument(skip(self))]
    pub async fn grant(
        &self,
        user_id: i64,
        amount: i64,
        reason: &str,
        source: CreditSource,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> LedgerResult<CreditTransaction> {
        let mut tx = self.repo.begin_for_user(user_id).await?;
        let lot = tx.insert_lot(source, amount, expires_at).await?;
        let new_balance = tx.user().credits_balance_cached + amount;
        let transaction = tx
            .insert_transaction(
                amount,
                TransactionType::Credit,
                reason,
                None,
                None,
                serde_json::json!({ "lot_id": lot.id }),
            )
            .await?;
        tx.set_cached_balance(new_balance).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    /// `debit(user_id, amount, reason, audio_request_id?, story_id?)`.
    /// Idempotent on `audio_request_id` — see §4.7 steps 1-4.
    #[instrument(skip(self))]
    pub async fn debit(
        &self,
        user_id: i64,
        amount: i64,
        reason: &str,
        audio_request_id: Option<i64>,
        story_id: Option<i64>,
    ) -> LedgerResult<CreditTransaction> {
        let mut tx = self.repo.begin_for_user(user_id).await?;
        let now = Utc::now();

        if let Some(request_id) = audio_request_id {
            if let Some(existing) = tx.find_applied_debit(request_id).await? {
                let refunded = tx.refunds_since(request_id, existing.created_at).await?;
                let outstanding = existing.amount.unsigned_abs() as i64 - refunded;
                if outstanding >= amount {
                    // Step 1: already covers this amount, return unchanged.
                    tx.commit().await?;
                    return Ok(existing);
                }
                // Step 2: top up the existing debit with the shortfall.
                let extra = amount - outstanding;
                let draws = Self::draw_lots(tx.as_mut(), &self.config.source_priority, extra, now).await?;
                let allocations: Vec<CreditAllocation> = draws
                    .iter()
                    .map(|d| CreditAllocation {
                        transaction_id: existing.id,
                        lot_id: d.lot_id,
                        amount: -d.amount,
                    })
                    .collect();
                tx.insert_allocations(&allocations).await?;
                let new_balance = tx.user().credits_balance_cached - extra;
                tx.set_cached_balance(new_balance).await?;
                tx.commit().await?;
                return Ok(existing);
            }
        }

        // Step 3-4: fresh debit.
        let draws = Self::draw_lots(tx.as_mut(), &self.config.source_priority, amount, now).await?;
        let transaction = tx
            .insert_transaction(
                -amount,
                TransactionType::Debit,
                reason,
                audio_request_id,
                story_id,
                serde_json::json!({}),
            )
            .await?;
        let allocations: Vec<CreditAllocation> = draws
            .iter()
            .map(|d| CreditAllocation {
                transaction_id: transaction.id,
                lot_id: d.lot_id,
                amount: -d.amount,
            })
            .collect();
        tx.insert_allocations(&allocations).await?;
        let new_balance = tx.user().credits_balance_cached - amount;
        tx.set_cached_balance(new_balance).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    /// Greedily drains lots across sources in priority order, soonest-to-
    /// expire first within a source. Returns `InsufficientCredits` without
    /// mutating anything if the total available falls short.
    async fn draw_lots(
        tx: &mut dyn LedgerTransaction,
        priority: &[CreditSource],
        amount: i64,
        now: chrono::DateTime<Utc>,
    ) -> LedgerResult<Vec<Draw>> {
        let mut lots = tx.active_lots(now).await?;
        // Soonest-to-expire first; lots with no expiry sort last.
        lots.sort_by_key(|l| (l.expires_at.map_or(i64::MAX, |e| e.timestamp()), l.created_at));

        let ordered = order_by_priority(lots, priority);

        let available: i64 = ordered.iter().map(|l| l.amount_remaining).sum();
        if available < amount {
            return Err(LedgerError::InsufficientCredits {
                needed: amount,
                available,
            });
        }

        let mut remaining = amount;
        let mut draws = Vec::new();
        for lot in ordered {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(lot.amount_remaining);
            if take == 0 {
                continue;
            }
            tx.adjust_lot_remaining(lot.id, -take).await?;
            draws.push(Draw {
                lot_id: lot.id,
                amount: take,
            });
            remaining -= take;
        }
        Ok(draws)
    }

    /// `refund_by_audio_request(audio_request_id, reason)`.
    #[instrument(skip(self))]
    pub async fn refund_by_audio_request(
        &self,
        audio_request_id: i64,
        user_id: i64,
        reason: &str,
    ) -> LedgerResult<Option<CreditTransaction>> {
        let mut tx = self.repo.begin_for_user(user_id).await?;
        let Some(debit) = tx.find_applied_debit(audio_request_id).await? else {
            tx.commit().await?;
            return Ok(None);
        };

        let refunded_already = tx.refunds_since(audio_request_id, debit.created_at).await?;
        let debit_amount = debit.amount.unsigned_abs() as i64;
        let outstanding = debit_amount - refunded_already;
        if outstanding <= 0 {
            tx.commit().await?;
            return Ok(None);
        }

        let refund_tx = tx
            .insert_transaction(
                outstanding,
                TransactionType::Refund,
                reason,
                Some(audio_request_id),
                debit.story_id,
                serde_json::json!({ "original_transaction_id": debit.id }),
            )
            .await?;

        // Counter-allocate to the same lots, in proportion, up to `outstanding`.
        let original_allocations = tx.allocations_for_transaction(debit.id).await?;
        let mut remaining = outstanding;
        let mut reverse_allocations = Vec::new();
        for alloc in &original_allocations {
            if remaining == 0 {
                break;
            }
            let drawn = alloc.amount.unsigned_abs() as i64;
            let give_back = remaining.min(drawn);
            if give_back == 0 {
                continue;
            }
            tx.adjust_lot_remaining(alloc.lot_id, give_back).await?;
            reverse_allocations.push(CreditAllocation {
                transaction_id: refund_tx.id,
                lot_id: alloc.lot_id,
                amount: give_back,
            });
            remaining -= give_back;
        }
        tx.insert_allocations(&reverse_allocations).await?;

        if refunded_already + outstanding >= debit_amount {
            tx.mark_transaction_status(debit.id, TransactionStatus::Refunded).await?;
        }

        let new_balance = tx.user().credits_balance_cached + outstanding;
        tx.set_cached_balance(new_balance).await?;
        tx.commit().await?;

        Ok(Some(refund_tx))
    }

    /// Text length -> credit cost (`ceil(L / unit_size)`, minimum 1).
    #[must_use]
    pub fn credits_for_text(&self, char_len: u64) -> i64 {
        self.config.credits_for_text(char_len)
    }

    pub async fn balance(&self, user_id: i64) -> LedgerResult<BalanceView> {
        let tx = self.repo.begin_for_user(user_id).await?;
        let balance_cached = tx.user().credits_balance_cached;
        tx.commit().await?;
        let computed = self.repo.computed_balance(user_id, Utc::now()).await?;
        Ok(BalanceView {
            balance_cached,
            balance_computed: computed,
        })
    }

    /// All lots for a user (active, exhausted, or expired), newest first.
    pub async fn list_lots(&self, user_id: i64) -> LedgerResult<Vec<CreditLot>> {
        self.repo.list_lots(user_id).await
    }

    /// Paginated transaction history for the credits page.
    pub async fn history(
        &self,
        user_id: i64,
        limit: u32,
        offset: u32,
        transaction_type: Option<TransactionType>,
    ) -> LedgerResult<CreditHistoryPage> {
        let (items, total) = self.repo.list_transactions(user_id, limit, offset, transaction_type).await?;
        let next_offset = if i64::from(offset) + items.len() as i64 >= total {
            None
        } else {
            Some(offset + u32::try_from(items.len()).unwrap_or(0))
        };
        Ok(CreditHistoryPage {
            items,
            limit,
            offset,
            total,
            next_offset,
        })
    }
}

/// Orders lots into priority-bucketed, soonest-to-expire-first order.
/// Sources named in `priority` come first in that order; any remaining
/// source not in the list follows in first-seen order.
fn order_by_priority(lots: Vec<CreditLot>, priority: &[CreditSource]) -> Vec<CreditLot> {
    let mut buckets: Vec<(CreditSource, Vec<CreditLot>)> = Vec::new();
    for lot in lots {
        if let Some((_, bucket)) = buckets.iter_mut().find(|(s, _)| *s == lot.source) {
            bucket.push(lot);
        } else {
            buckets.push((lot.source, vec![lot]));
        }
    }

    let mut ordered = Vec::new();
    for source in priority {
        if let Some(pos) = buckets.iter().position(|(s, _)| s == source) {
            ordered.extend(buckets.remove(pos).1);
        }
    }
    for (_, bucket) in buckets {
        ordered.extend(bucket);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::User;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct FakeLedger {
        user: Arc<StdMutex<User>>,
        lots: Arc<StdMutex<HashMap<i64, CreditLot>>>,
        next_lot_id: Arc<StdMutex<i64>>,
        transactions: Arc<StdMutex<HashMap<i64, CreditTransaction>>>,
        next_tx_id: Arc<StdMutex<i64>>,
        allocations: Arc<StdMutex<Vec<CreditAllocation>>>,
    }

    impl FakeLedger {
        fn new(initial_balance: i64) -> Self {
            Self {
                user: Arc::new(StdMutex::new(User {
                    id: 1,
                    credits_balance_cached: initial_balance,
                })),
                lots: Arc::new(StdMutex::new(HashMap::new())),
                next_lot_id: Arc::new(StdMutex::new(1)),
                transactions: Arc::new(StdMutex::new(HashMap::new())),
                next_tx_id: Arc::new(StdMutex::new(1)),
                allocations: Arc::new(StdMutex::new(vec![])),
            }
        }

        fn seed_lot(&self, source: CreditSource, amount: i64) {
            let mut id_guard = self.next_lot_id.lock().unwrap();
            let id = *id_guard;
            *id_guard += 1;
            self.lots.lock().unwrap().insert(
                id,
                CreditLot {
                    id,
                    user_id: 1,
                    source,
                    amount_granted: amount,
                    amount_remaining: amount,
                    expires_at: None,
                    created_at: Utc::now(),
                },
            );
        }
    }

    /// Shares its parent `FakeLedger`'s maps via `Arc`, so mutations are
    /// visible immediately rather than buffered until `commit` — good
    /// enough for a fake that never needs to model rollback.
    struct FakeLedgerTransaction {
        user_snapshot: User,
        user: Arc<StdMutex<User>>,
        lots: Arc<StdMutex<HashMap<i64, CreditLot>>>,
        next_lot_id: Arc<StdMutex<i64>>,
        transactions: Arc<StdMutex<HashMap<i64, CreditTransaction>>>,
        next_tx_id: Arc<StdMutex<i64>>,
        allocations: Arc<StdMutex<Vec<CreditAllocation>>>,
    }

    #[async_trait]
    impl LedgerTransaction for FakeLedgerTransaction {
        fn user(&self) -> &User {
            &self.user_snapshot
        }

        async fn active_lots(&mut self, now: DateTime<Utc>) -> LedgerResult<Vec<CreditLot>> {
            Ok(self
                .lots
                .lock()
                .unwrap()
                .values()
                .filter(|l| l.is_active(now))
                .cloned()
                .collect())
        }

        async fn insert_lot(
            &mut self,
            source: CreditSource,
            amount: i64,
            expires_at: Option<DateTime<Utc>>,
        ) -> LedgerResult<CreditLot> {
            let mut id_guard = self.next_lot_id.lock().unwrap();
            let id = *id_guard;
            *id_guard += 1;
            let lot = CreditLot {
                id,
                user_id: self.user_snapshot.id,
                source,
                amount_granted: amount,
                amount_remaining: amount,
                expires_at,
                created_at: Utc::now(),
            };
            self.lots.lock().unwrap().insert(id, lot.clone());
            Ok(lot)
        }

        async fn adjust_lot_remaining(&mut self, lot_id: i64, delta: i64) -> LedgerResult<()> {
            let mut lots = self.lots.lock().unwrap();
            let lot = lots.get_mut(&lot_id).expect("lot exists");
            lot.amount_remaining += delta;
            Ok(())
        }

        async fn insert_transaction(
            &mut self,
            amount: i64,
            transaction_type: TransactionType,
            reason: &str,
            audio_request_id: Option<i64>,
            story_id: Option<i64>,
            metadata: serde_json::Value,
        ) -> LedgerResult<CreditTransaction> {
            let mut id_guard = self.next_tx_id.lock().unwrap();
            let id = *id_guard;
            *id_guard += 1;
            let tx = CreditTransaction {
                id,
                user_id: self.user_snapshot.id,
                amount,
                transaction_type,
                reason: reason.to_string(),
                status: TransactionStatus::Applied,
                audio_request_id,
                story_id,
                metadata,
                created_at: Utc::now(),
            };
            self.transactions.lock().unwrap().insert(id, tx.clone());
            Ok(tx)
        }

        async fn insert_allocations(&mut self, allocations: &[CreditAllocation]) -> LedgerResult<()> {
            self.allocations.lock().unwrap().extend_from_slice(allocations);
            Ok(())
        }

        async fn find_applied_debit(&mut self, audio_request_id: i64) -> LedgerResult<Option<CreditTransaction>> {
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .values()
                .find(|t| {
                    t.audio_request_id == Some(audio_request_id)
                        && t.user_id == self.user_snapshot.id
                        && t.transaction_type == TransactionType::Debit
                        && t.status == TransactionStatus::Applied
                })
                .cloned())
        }

        async fn allocations_for_transaction(&mut self, transaction_id: i64) -> LedgerResult<Vec<CreditAllocation>> {
            Ok(self
                .allocations
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.transaction_id == transaction_id)
                .cloned()
                .collect())
        }

        async fn refunds_since(&mut self, audio_request_id: i64, since: DateTime<Utc>) -> LedgerResult<i64> {
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .values()
                .filter(|t| {
                    t.audio_request_id == Some(audio_request_id)
                        && t.user_id == self.user_snapshot.id
                        && t.transaction_type == TransactionType::Refund
                        && t.created_at >= since
                })
                .map(|t| t.amount)
                .sum())
        }

        async fn mark_transaction_status(&mut self, transaction_id: i64, status: TransactionStatus) -> LedgerResult<()> {
            if let Some(tx) = self.transactions.lock().unwrap().get_mut(&transaction_id) {
                tx.status = status;
            }
            Ok(())
        }

        async fn set_cached_balance(&mut self, balance: i64) -> LedgerResult<()> {
            self.user.lock().unwrap().credits_balance_cached = balance;
            self.user_snapshot.credits_balance_cached = balance;
            Ok(())
        }

        async fn commit(self: Box<Self>) -> LedgerResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl CreditRepositoryPort for FakeLedger {
        async fn begin_for_user(&self, _user_id: i64) -> LedgerResult<Box<dyn LedgerTransaction>> {
            let user_snapshot = self.user.lock().unwrap().clone();
            Ok(Box::new(FakeLedgerTransaction {
                user_snapshot,
                user: self.user.clone(),
                lots: self.lots.clone(),
                next_lot_id: self.next_lot_id.clone(),
                transactions: self.transactions.clone(),
                next_tx_id: self.next_tx_id.clone(),
                allocations: self.allocations.clone(),
            }))
        }

        async fn list_lots(&self, _user_id: i64) -> LedgerResult<Vec<CreditLot>> {
            let mut lots: Vec<CreditLot> = self.lots.lock().unwrap().values().cloned().collect();
            lots.sort_by_key(|l| std::cmp::Reverse(l.created_at));
            Ok(lots)
        }

        async fn list_transactions(
            &self,
            user_id: i64,
            limit: u32,
            offset: u32,
            transaction_type: Option<TransactionType>,
        ) -> LedgerResult<(Vec<CreditTransaction>, i64)> {
            let mut all: Vec<CreditTransaction> = self
                .transactions
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.user_id == user_id)
                .filter(|t| transaction_type.is_none_or(|ty| t.transaction_type == ty))
                .cloned()
                .collect();
            all.sort_by_key(|t| std::cmp::Reverse(t.created_at));
            let total = all.len() as i64;
            let page = all
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect();
            Ok((page, total))
        }

        async fn computed_balance(&self, _user_id: i64, now: DateTime<Utc>) -> LedgerResult<i64> {
            Ok(self
                .lots
                .lock()
                .unwrap()
                .values()
                .filter(|l| l.is_active(now))
                .map(|l| l.amount_remaining)
                .sum())
        }
    }

    fn ledger_with(repo: Arc<FakeLedger>) -> CreditLedger {
        CreditLedger::new(repo, LedgerConfig::default())
    }

    #[tokio::test]
    async fn debit_priority_drains_event_before_free() {
        let repo = Arc::new(FakeLedger::new(110));
        repo.seed_lot(CreditSource::Free, 100);
        repo.seed_lot(CreditSource::Event, 10);
        let ledger = ledger_with(repo.clone());

        ledger.debit(1, 15, "synth", None, None).await.unwrap();

        let lots = repo.lots.lock().unwrap();
        let event_lot = lots.values().find(|l| l.source == CreditSource::Event).unwrap();
        let free_lot = lots.values().find(|l| l.source == CreditSource::Free).unwrap();
        assert_eq!(event_lot.amount_remaining, 0);
        assert_eq!(free_lot.amount_remaining, 95);
    }

    #[tokio::test]
    async fn insufficient_credits_creates_no_transaction() {
        let repo = Arc::new(FakeLedger::new(5));
        repo.seed_lot(CreditSource::Free, 5);
        let ledger = ledger_with(repo.clone());

        let err = ledger.debit(1, 10, "synth", None, None).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientCredits {
                needed: 10,
                available: 5
            }
        ));
        assert!(repo.transactions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refund_round_trip_restores_balance_and_marks_refunded() {
        let repo = Arc::new(FakeLedger::new(100));
        repo.seed_lot(CreditSource::Free, 100);
        let ledger = ledger_with(repo.clone());

        let debit = ledger.debit(1, 40, "synth", Some(7), None).await.unwrap();
        assert_eq!(repo.user.lock().unwrap().credits_balance_cached, 60);

        let refund = ledger
            .refund_by_audio_request(7, 1, "pipeline_failed")
            .await
            .unwrap()
            .expect("refund produced");
        assert_eq!(refund.amount, 40);
        assert_eq!(repo.user.lock().unwrap().credits_balance_cached, 100);

        let tx = repo.transactions.lock().unwrap().get(&debit.id).unwrap().clone();
        assert_eq!(tx.status, TransactionStatus::Refunded);
    }

    #[tokio::test]
    async fn debit_is_idempotent_on_audio_request_id() {
        let repo = Arc::new(FakeLedger::new(100));
        repo.seed_lot(CreditSource::Free, 100);
        let ledger = ledger_with(repo.clone());

        let first = ledger.debit(1, 10, "synth", Some(42), None).await.unwrap();
        let second = ledger.debit(1, 10, "synth", Some(42), None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(repo.user.lock().unwrap().credits_balance_cached, 90);
    }
}
