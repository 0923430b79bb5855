//! Durable, versioned, per-agent SQL storage.
//!
//! Each Agent owns exactly one [`Store`], backed by one SQLite file named
//! after its `OwnerKey`. The split between pure SQL/mapping helpers and the
//! I/O-performing [`Store`] methods follows `database.rs`'s functional-core
//! / imperative-shell layering: submodules hold the query strings and
//! row<->domain conversions, the imperative shell runs them against the
//! pool.

pub mod analysis;
pub mod chat_stats;
pub mod fleet_state;
pub mod inventory;
pub mod messages;

use nutype::nutype;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{ConnectOptions, Pool, Sqlite, migrate::Migrator};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Static migrator for the embedded schema under `migrations/`.
static MIGRATOR: Migrator = sqlx::migrate!();

/// Failures from the storage layer.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// A query or transaction failed.
    #[error("database error: {0}")]
    Database(String),
    /// The data directory could not be created.
    #[error("file system error: {0}")]
    FileSystem(String),
    /// Embedded migrations failed to apply.
    #[error("migration failed: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Bounded SQLite connection pool size for a single agent's store. A single
/// writer never needs a large pool; this exists mainly to allow concurrent
/// reads while a write is in flight.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 16),
    derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize),
    default = 4
)]
pub struct StorePoolSize(u32);

/// A durable, versioned, per-`OwnerKey` SQL store.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Open (creating if absent) the SQLite file for `owner_canonical` under
    /// `data_dir` with a pool sized by `pool_size`, apply pending migrations,
    /// and return a ready [`Store`].
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the data directory cannot be created, the
    /// connection cannot be established, or migrations fail.
    pub async fn open(
        data_dir: &Path,
        owner_canonical: &str,
        pool_size: StorePoolSize,
    ) -> StoreResult<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| StoreError::FileSystem(e.to_string()))?;

        let file_name = owner_canonical.replace([':', '/'], "_");
        let path: PathBuf = data_dir.join(format!("{file_name}.db"));

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .pragma("journal_mode", "WAL")
            .pragma("foreign_keys", "ON")
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.into_inner())
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Open an in-memory store, used by tests that don't need file
    /// persistence across process restarts.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the connection or migrations fail.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .disable_statement_logging();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Delete every persisted row belonging to this Agent's store: inventory
    /// items and transactions, stored messages, AI analyses/decisions/
    /// forecasts, and chat statistics. `fleet_state` is left to the caller
    /// (`delete_subtree` persists its own zeroed row afterward); each
    /// store file is scoped to exactly one `OwnerKey`, so every other table
    /// is cleared unconditionally rather than filtered by `location`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if any delete fails; all deletes run in one
    /// transaction so a failure leaves no table partially cleared.
    pub async fn clear_all(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "inventory_items",
            "inventory_transactions",
            "stored_messages",
            "inventory_analysis",
            "inventory_decisions",
            "demand_forecasts",
            "chat_statistics",
        ] {
            sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_runs_migrations_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let pool_size = StorePoolSize::default();
        let store = Store::open(dir.path(), "demo:/wh", pool_size).await.unwrap();
        // Re-opening the same file must not fail (CREATE IF NOT EXISTS).
        let store2 = Store::open(dir.path(), "demo:/wh", pool_size).await.unwrap();
        drop(store);
        drop(store2);
    }

    #[tokio::test]
    async fn clear_all_empties_every_table_but_fleet_state() {
        use crate::domain_types::{MessageKind, MessageId};
        use crate::store::inventory::{InventoryItemRow, TransactionRow};
        use crate::store::messages::StoredMessageRow;
        use crate::domain_types::{Sku, StockOperation};

        let store = Store::open_in_memory().await.unwrap();
        let sku = Sku::try_new("SKU-1").unwrap();
        store
            .save_inventory_item_and_transaction(
                &InventoryItemRow {
                    sku: sku.clone(),
                    name: "Widget".to_string(),
                    current_stock: 5,
                    low_stock_threshold: 1,
                    location: "demo:/wh".to_string(),
                    last_updated: chrono::Utc::now(),
                },
                &TransactionRow {
                    sku: sku.clone(),
                    operation: StockOperation::Set,
                    quantity: 5,
                    location: "demo:/wh".to_string(),
                    timestamp: chrono::Utc::now(),
                },
            )
            .await
            .unwrap();
        store
            .insert_message(&StoredMessageRow {
                id: MessageId::generate(),
                timestamp: chrono::Utc::now(),
                from_agent: "demo:/wh".to_string(),
                to_agent: None,
                content: "hi".to_string(),
                message_type: MessageKind::Broadcast,
                location: "demo:/wh".to_string(),
            })
            .await
            .unwrap();

        store.clear_all().await.unwrap();

        assert!(store.get_inventory_item(&sku).await.unwrap().is_none());
        assert_eq!(store.count_transactions(&sku).await.unwrap(), 0);
        let (messages, total) = store.list_messages("demo:/wh", 10, 0).await.unwrap();
        assert!(messages.is_empty());
        assert_eq!(total, 0);
    }
}
