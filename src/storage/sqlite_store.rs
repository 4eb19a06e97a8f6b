//! SQLite-backed transaction store.
//!
//! Owns the schema the ingestion pipeline writes into and the analytics
//! queries read from. Amounts are stored as scaled integers (see
//! [`Monetary`](crate::types::Monetary)) and timestamps as unix seconds, so
//! sums stay exact and hour bucketing can be done by SQLite.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::error::ErrorKind;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::models::{Merchant, RejectReason, Transaction};
use crate::storage::{BulkInsertResult, StoreError, TransactionSink};

const SCHEMA: [&str; 9] = [
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY,
        transaction_id TEXT NOT NULL UNIQUE,
        merchant_id TEXT NOT NULL CHECK (merchant_id <> ''),
        zone TEXT NOT NULL CHECK (zone <> ''),
        category TEXT NOT NULL,
        amount INTEGER NOT NULL CHECK (amount >= 0),
        timestamp INTEGER NOT NULL,
        customer_id TEXT,
        created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_zone_amount ON transactions(zone, amount)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_merchant ON transactions(merchant_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_customer ON transactions(customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_amount ON transactions(amount)",
    r#"
    CREATE TABLE IF NOT EXISTS merchants (
        merchant_id TEXT PRIMARY KEY,
        name TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_merchants_name ON merchants(name)"
];

const INSERT_TRANSACTION: &str = r#"
    INSERT INTO transactions (transaction_id, merchant_id, zone, category, amount, timestamp, customer_id)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(transaction_id) DO NOTHING
"#;

const UPSERT_MERCHANT: &str = r#"
    INSERT INTO merchants (merchant_id, name)
    VALUES (?, ?)
    ON CONFLICT(merchant_id) DO UPDATE SET name = COALESCE(excluded.name, merchants.name)
"#;

pub struct SqliteStore {
    pool: SqlitePool
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) a database file in WAL mode and ensures the schema exists.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("Opened transaction store at {}", path.display());

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    #[cfg(test)]
    /// A private in-memory database. The pool holds exactly one connection that
    /// never expires, because every connection to `:memory:` is a separate database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Upserts the merchant reference set used by the dormancy query.
    pub async fn load_merchants(&self, merchants: &[Merchant]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        for merchant in merchants {
            sqlx::query(UPSERT_MERCHANT)
                .bind(&merchant.merchant_id)
                .bind(merchant.name.as_deref())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!("Loaded {} reference merchants", merchants.len());

        Ok(merchants.len() as u64)
    }

    pub async fn transaction_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl TransactionSink for SqliteStore {
    async fn bulk_insert(&self, batch: &[Transaction]) -> Result<BulkInsertResult, StoreError> {
        let mut result = BulkInsertResult::default();

        if batch.is_empty() {
            return Ok(result);
        }

        let mut tx = self.pool.begin().await.map_err(|error| match error {
            sqlx::Error::PoolTimedOut => StoreError::Unavailable("timed out waiting for a pooled connection".to_string()),
            error => error.into()
        })?;

        for (index, transaction) in batch.iter().enumerate() {
            let outcome = sqlx::query(INSERT_TRANSACTION)
                .bind(&transaction.transaction_id)
                .bind(&transaction.merchant_id)
                .bind(&transaction.zone)
                .bind(&transaction.category)
                .bind(transaction.amount.units())
                .bind(transaction.timestamp.timestamp())
                .bind(transaction.customer_id.as_deref())
                .execute(&mut *tx)
                .await;

            match outcome {
                Ok(done) if done.rows_affected() > 0 => result.inserted += 1,
                Ok(_) => result.rejected.push((index, RejectReason::DuplicateTransaction(transaction.transaction_id.clone()))),
                Err(sqlx::Error::Database(error)) if is_constraint_violation(error.kind()) => {
                    result.rejected.push((index, RejectReason::Constraint(error.message().to_string())))
                }
                Err(error) => return Err(error.into())
            }
        }

        tx.commit().await?;

        debug!("Bulk insert of {} rows: {} inserted, {} rejected", batch.len(), result.inserted, result.rejected.len());

        Ok(result)
    }
}

fn is_constraint_violation(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UniqueViolation | ErrorKind::CheckViolation | ErrorKind::NotNullViolation | ErrorKind::ForeignKeyViolation
    )
}
