//! SQLite implementation of `CreditRepositoryPort`.
//!
//! `begin_for_user` is the only way to mutate ledger state: it opens a
//! `BEGIN IMMEDIATE` transaction (SQLite has no `SELECT ... FOR UPDATE`,
//! so this is the closest equivalent — it takes SQLite's write lock up
//! front rather than on first write) and returns a `LedgerTransaction`
//! handle scoped to one user. Every read-modify-write in `credit_lots`,
//! `credit_transactions`, `credit_allocations`, and `users.
//! credits_balance_cached` for that user happens against that single
//! transaction, so two concurrent ledger operations for the same user
//! serialize instead of interleaving their reads and writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use voiceslot_core::domain::{
    CreditAllocation, CreditLot, CreditSource, CreditTransaction, TransactionStatus, TransactionType, User,
};
use voiceslot_core::errors::LedgerError;
use voiceslot_core::ports::{CreditRepositoryPort, LedgerTransaction};

use crate::map_sqlx_err;

pub struct SqliteCreditRepository {
    pool: SqlitePool,
}

impl SqliteCreditRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const fn source_as_str(s: CreditSource) -> &'static str {
    match s {
        CreditSource::Monthly => "monthly",
        CreditSource::AddOn => "add_on",
        CreditSource::Free => "free",
        CreditSource::Event => "event",
        CreditSource::Referral => "referral",
    }
}

fn source_from_str(s: &str) -> Result<CreditSource, LedgerError> {
    match s {
        "monthly" => Ok(CreditSource::Monthly),
        "add_on" => Ok(CreditSource::AddOn),
        "free" => Ok(CreditSource::Free),
        "event" => Ok(CreditSource::Event),
        "referral" => Ok(CreditSource::Referral),
        other => Err(LedgerError::other(format!("unknown credit source {other}"))),
    }
}

const fn transaction_type_as_str(t: TransactionType) -> &'static str {
    match t {
        TransactionType::Credit => "credit",
        TransactionType::Debit => "debit",
        TransactionType::Refund => "refund",
        TransactionType::Expire => "expire",
    }
}

fn transaction_type_from_str(s: &str) -> Result<TransactionType, LedgerError> {
    match s {
        "credit" => Ok(TransactionType::Credit),
        "debit" => Ok(TransactionType::Debit),
        "refund" => Ok(TransactionType::Refund),
        "expire" => Ok(TransactionType::Expire),
        other => Err(LedgerError::other(format!("unknown transaction type {other}"))),
    }
}

const fn transaction_status_as_str(s: TransactionStatus) -> &'static str {
    match s {
        TransactionStatus::Applied => "applied",
        TransactionStatus::Refunded => "refunded",
    }
}

fn transaction_status_from_str(s: &str) -> Result<TransactionStatus, LedgerError> {
    match s {
        "applied" => Ok(TransactionStatus::Applied),
        "refunded" => Ok(TransactionStatus::Refunded),
        other => Err(LedgerError::other(format!("unknown transaction status {other}"))),
    }
}

fn row_to_lot(row: &sqlx::sqlite::SqliteRow) -> Result<CreditLot, LedgerError> {
    Ok(CreditLot {
        id: row.try_get("id").map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        source: source_from_str(
            row.try_get::<String, _>("source")
                .map_err(|e| LedgerError::other(map_sqlx_err(e)))?
                .as_str(),
        )?,
        amount_granted: row
            .try_get("amount_granted")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        amount_remaining: row
            .try_get("amount_remaining")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        expires_at: row
            .try_get("expires_at")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
    })
}

fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<CreditTransaction, LedgerError> {
    Ok(CreditTransaction {
        id: row.try_get("id").map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        amount: row
            .try_get("amount")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        transaction_type: transaction_type_from_str(
            row.try_get::<String, _>("transaction_type")
                .map_err(|e| LedgerError::other(map_sqlx_err(e)))?
                .as_str(),
        )?,
        reason: row
            .try_get("reason")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        status: transaction_status_from_str(
            row.try_get::<String, _>("status")
                .map_err(|e| LedgerError::other(map_sqlx_err(e)))?
                .as_str(),
        )?,
        audio_request_id: row
            .try_get("audio_request_id")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        story_id: row
            .try_get("story_id")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        metadata: serde_json::from_str(
            &row.try_get::<String, _>("metadata")
                .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        )
        .map_err(|e| LedgerError::other(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
    })
}

fn row_to_allocation(row: &sqlx::sqlite::SqliteRow) -> Result<CreditAllocation, LedgerError> {
    Ok(CreditAllocation {
        transaction_id: row
            .try_get("transaction_id")
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        lot_id: row.try_get("lot_id").map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        amount: row.try_get("amount").map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
    })
}

/// One `BEGIN IMMEDIATE` transaction scoped to a single user, returned by
/// `SqliteCreditRepository::begin_for_user`. See the module docs for why
/// this is the unit of atomicity for every ledger mutation.
pub struct SqliteLedgerTransaction {
    tx: Transaction<'static, Sqlite>,
    user: User,
}

#[async_trait]
impl LedgerTransaction for SqliteLedgerTransaction {
    fn user(&self) -> &User {
        &self.user
    }

    async fn active_lots(&mut self, now: DateTime<Utc>) -> Result<Vec<CreditLot>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM credit_lots WHERE user_id = ?1 AND amount_remaining > 0 \
             AND (expires_at IS NULL OR expires_at > ?2)",
        )
        .bind(self.user.id)
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;
        rows.iter().map(row_to_lot).collect()
    }

    async fn insert_lot(
        &mut self,
        source: CreditSource,
        amount: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CreditLot, LedgerError> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO credit_lots (user_id, source, amount_granted, amount_remaining, expires_at, created_at) \
             VALUES (?1, ?2, ?3, ?3, ?4, ?5)",
        )
        .bind(self.user.id)
        .bind(source_as_str(source))
        .bind(amount)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::other(map_sqlx_err(e)))?
        .last_insert_rowid();

        Ok(CreditLot {
            id,
            user_id: self.user.id,
            source,
            amount_granted: amount,
            amount_remaining: amount,
            expires_at,
            created_at: now,
        })
    }

    async fn adjust_lot_remaining(&mut self, lot_id: i64, delta: i64) -> Result<(), LedgerError> {
        sqlx::query("UPDATE credit_lots SET amount_remaining = amount_remaining + ?2 WHERE id = ?1")
            .bind(lot_id)
            .bind(delta)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;
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
    ) -> Result<CreditTransaction, LedgerError> {
        let now = Utc::now();
        let metadata_str = serde_json::to_string(&metadata).map_err(|e| LedgerError::other(e.to_string()))?;
        let id = sqlx::query(
            "INSERT INTO credit_transactions \
             (user_id, amount, transaction_type, reason, status, audio_request_id, story_id, metadata, created_at) \
             VALUES (?1, ?2, ?3, ?4, 'applied', ?5, ?6, ?7, ?8)",
        )
        .bind(self.user.id)
        .bind(amount)
        .bind(transaction_type_as_str(transaction_type))
        .bind(reason)
        .bind(audio_request_id)
        .bind(story_id)
        .bind(&metadata_str)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::other(map_sqlx_err(e)))?
        .last_insert_rowid();

        Ok(CreditTransaction {
            id,
            user_id: self.user.id,
            amount,
            transaction_type,
            reason: reason.to_string(),
            status: TransactionStatus::Applied,
            audio_request_id,
            story_id,
            metadata,
            created_at: now,
        })
    }

    async fn insert_allocations(&mut self, allocations: &[CreditAllocation]) -> Result<(), LedgerError> {
        for allocation in allocations {
            sqlx::query("INSERT INTO credit_allocations (transaction_id, lot_id, amount) VALUES (?1, ?2, ?3)")
                .bind(allocation.transaction_id)
                .bind(allocation.lot_id)
                .bind(allocation.amount)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;
        }
        Ok(())
    }

    async fn find_applied_debit(&mut self, audio_request_id: i64) -> Result<Option<CreditTransaction>, LedgerError> {
        let row = sqlx::query(
            "SELECT * FROM credit_transactions WHERE audio_request_id = ?1 AND user_id = ?2 \
             AND transaction_type = 'debit' AND status = 'applied' LIMIT 1",
        )
        .bind(audio_request_id)
        .bind(self.user.id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn allocations_for_transaction(&mut self, transaction_id: i64) -> Result<Vec<CreditAllocation>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM credit_allocations WHERE transaction_id = ?1")
            .bind(transaction_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;
        rows.iter().map(row_to_allocation).collect()
    }

    async fn refunds_since(&mut self, audio_request_id: i64, since: DateTime<Utc>) -> Result<i64, LedgerError> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM credit_transactions WHERE audio_request_id = ?1 AND user_id = ?2 \
             AND transaction_type = 'refund' AND created_at >= ?3",
        )
        .bind(audio_request_id)
        .bind(self.user.id)
        .bind(since)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;
        Ok(total.unwrap_or(0))
    }

    async fn mark_transaction_status(&mut self, transaction_id: i64, status: TransactionStatus) -> Result<(), LedgerError> {
        sqlx::query("UPDATE credit_transactions SET status = ?2 WHERE id = ?1")
            .bind(transaction_id)
            .bind(transaction_status_as_str(status))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;
        Ok(())
    }

    async fn set_cached_balance(&mut self, balance: i64) -> Result<(), LedgerError> {
        sqlx::query("UPDATE users SET credits_balance_cached = ?2 WHERE id = ?1")
            .bind(self.user.id)
            .bind(balance)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;
        self.user.credits_balance_cached = balance;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await.map_err(|e| LedgerError::other(map_sqlx_err(e)))
    }
}

#[async_trait]
impl CreditRepositoryPort for SqliteCreditRepository {
    async fn begin_for_user(&self, user_id: i64) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;

        sqlx::query("INSERT OR IGNORE INTO users (id, credits_balance_cached) VALUES (?1, 0)")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;

        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?
            .ok_or(LedgerError::UserNotFound { id: user_id })?;

        let user = User {
            id: row.try_get("id").map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
            credits_balance_cached: row
                .try_get("credits_balance_cached")
                .map_err(|e| LedgerError::other(map_sqlx_err(e)))?,
        };

        Ok(Box::new(SqliteLedgerTransaction { tx, user }))
    }

    async fn list_lots(&self, user_id: i64) -> Result<Vec<CreditLot>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM credit_lots WHERE user_id = ?1 ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;
        rows.iter().map(row_to_lot).collect()
    }

    async fn list_transactions(
        &self,
        user_id: i64,
        limit: u32,
        offset: u32,
        transaction_type: Option<TransactionType>,
    ) -> Result<(Vec<CreditTransaction>, i64), LedgerError> {
        let (rows, total) = if let Some(t) = transaction_type {
            let type_str = transaction_type_as_str(t);
            let rows = sqlx::query(
                "SELECT * FROM credit_transactions WHERE user_id = ?1 AND transaction_type = ?2 \
                 ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4",
            )
            .bind(user_id)
            .bind(type_str)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;

            let total: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM credit_transactions WHERE user_id = ?1 AND transaction_type = ?2",
            )
            .bind(user_id)
            .bind(type_str)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;

            (rows, total)
        } else {
            let rows = sqlx::query(
                "SELECT * FROM credit_transactions WHERE user_id = ?1 \
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            )
            .bind(user_id)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;

            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credit_transactions WHERE user_id = ?1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;

            (rows, total)
        };

        let transactions = rows.iter().map(row_to_transaction).collect::<Result<Vec<_>, _>>()?;
        Ok((transactions, total))
    }

    async fn computed_balance(&self, user_id: i64, now: DateTime<Utc>) -> Result<i64, LedgerError> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount_remaining) FROM credit_lots WHERE user_id = ?1 \
             AND amount_remaining > 0 AND (expires_at IS NULL OR expires_at > ?2)",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::other(map_sqlx_err(e)))?;
        Ok(total.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_for_user_creates_row_on_first_touch() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteCreditRepository::new(pool);
        let tx = repo.begin_for_user(42).await.unwrap();
        assert_eq!(tx.user().id, 42);
        assert_eq!(tx.user().credits_balance_cached, 0);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn insert_lot_and_computed_balance_agree() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteCreditRepository::new(pool);
        let mut tx = repo.begin_for_user(1).await.unwrap();
        tx.insert_lot(CreditSource::Monthly, 500, None).await.unwrap();
        tx.commit().await.unwrap();
        let balance = repo.computed_balance(1, Utc::now()).await.unwrap();
        assert_eq!(balance, 500);
    }

    #[tokio::test]
    async fn expired_lot_excluded_from_active_lots() {
        let pool = crate::connect_in_memory().await.unwrap();
        let repo = SqliteCreditRepository::new(pool);
        let mut tx = repo.begin_for_user(1).await.unwrap();
        let past = Utc::now() - chrono::Duration::days(1);
        tx.insert_lot(CreditSource::Event, 100, Some(past)).await.unwrap();
        let lots = tx.active_lots(Utc::now()).await.unwrap();
        assert!(lots.is_empty());
        tx.commit().await.unwrap();
    }
}
