//! `inventory_items` and `inventory_transactions` tables.
//!
//! Items are keyed by SKU within one Agent's store; every applied update is
//! also appended to `inventory_transactions` as an audit trail, independent
//! of whether the item row already existed.

use chrono::{DateTime, Utc};

use crate::domain_types::{Sku, StockOperation};

use super::{Store, StoreResult};

/// A persisted inventory item row.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryItemRow {
    /// Stock-keeping unit.
    pub sku: Sku,
    /// Human-readable name.
    pub name: String,
    /// Current on-hand quantity.
    pub current_stock: u32,
    /// Threshold at or below which a low-stock alert fires.
    pub low_stock_threshold: u32,
    /// The path this item belongs to, in canonical string form.
    pub location: String,
    /// Last time this row changed.
    pub last_updated: DateTime<Utc>,
}

/// One applied mutation, recorded for audit regardless of whether the item
/// existed before the operation.
#[derive(Debug, Clone)]
pub struct TransactionRow {
    /// Stock-keeping unit affected.
    pub sku: Sku,
    /// The operation applied.
    pub operation: StockOperation,
    /// The quantity argument of the operation (not the resulting stock).
    pub quantity: u32,
    /// The path this transaction was recorded against.
    pub location: String,
    /// When the transaction was recorded.
    pub timestamp: DateTime<Utc>,
}

mod sql {
    pub const SELECT_ONE: &str = "SELECT sku, name, current_stock, low_stock_threshold, location, updated_at \
         FROM inventory_items WHERE sku = ?1";
    pub const SELECT_ALL: &str = "SELECT sku, name, current_stock, low_stock_threshold, location, updated_at \
         FROM inventory_items ORDER BY sku";
    pub const UPSERT: &str = "INSERT INTO inventory_items \
         (sku, name, current_stock, low_stock_threshold, location, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
         ON CONFLICT(sku) DO UPDATE SET name = excluded.name, current_stock = excluded.current_stock, \
         low_stock_threshold = excluded.low_stock_threshold, location = excluded.location, \
         updated_at = excluded.updated_at";
    pub const INSERT_TRANSACTION: &str = "INSERT INTO inventory_transactions \
         (sku, operation, quantity, location, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)";
}

impl Store {
    /// Fetch one inventory item by SKU.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn get_inventory_item(&self, sku: &Sku) -> StoreResult<Option<InventoryItemRow>> {
        let row: Option<(String, String, i64, i64, String, String)> =
            sqlx::query_as(sql::SELECT_ONE)
                .bind(sku.as_ref())
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(row_to_item))
    }

    /// Fetch every inventory item for this Agent.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn list_inventory_items(&self) -> StoreResult<Vec<InventoryItemRow>> {
        let rows: Vec<(String, String, i64, i64, String, String)> =
            sqlx::query_as(sql::SELECT_ALL).fetch_all(self.pool()).await?;
        Ok(rows.into_iter().map(row_to_item).collect())
    }

    /// Insert or replace an inventory item, then record one transaction row.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] if either write fails; both
    /// writes happen in a single transaction so they become visible atomically.
    pub async fn save_inventory_item_and_transaction(
        &self,
        item: &InventoryItemRow,
        transaction: &TransactionRow,
    ) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(sql::UPSERT)
            .bind(item.sku.as_ref())
            .bind(&item.name)
            .bind(i64::from(item.current_stock))
            .bind(i64::from(item.low_stock_threshold))
            .bind(&item.location)
            .bind(item.last_updated.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        sqlx::query(sql::INSERT_TRANSACTION)
            .bind(transaction.sku.as_ref())
            .bind(transaction.operation.to_string())
            .bind(i64::from(transaction.quantity))
            .bind(&transaction.location)
            .bind(transaction.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Count transaction rows recorded for `sku`, used by tests asserting
    /// one row is appended per applied update.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn count_transactions(&self, sku: &Sku) -> StoreResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM inventory_transactions WHERE sku = ?1")
                .bind(sku.as_ref())
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }
}

fn row_to_item(row: (String, String, i64, i64, String, String)) -> InventoryItemRow {
    let (sku, name, current_stock, low_stock_threshold, location, updated_at) = row;
    InventoryItemRow {
        sku: Sku::try_new(sku).expect("SKU read back from storage was valid at write time"),
        name,
        current_stock: u32::try_from(current_stock).unwrap_or(0),
        low_stock_threshold: u32::try_from(low_stock_threshold).unwrap_or(0),
        location,
        last_updated: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn sample(sku: &str, stock: u32) -> InventoryItemRow {
        InventoryItemRow {
            sku: Sku::try_new(sku).unwrap(),
            name: "Widget".to_string(),
            current_stock: stock,
            low_stock_threshold: 10,
            location: "demo:/wh".to_string(),
            last_updated: Utc::now(),
        }
    }

    fn sample_txn(sku: &str, op: StockOperation, qty: u32) -> TransactionRow {
        TransactionRow {
            sku: Sku::try_new(sku).unwrap(),
            operation: op,
            quantity: qty,
            location: "demo:/wh".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn round_trips_inventory_item() {
        let store = Store::open_in_memory().await.unwrap();
        let item = sample("SKU-1", 42);
        store
            .save_inventory_item_and_transaction(&item, &sample_txn("SKU-1", StockOperation::Set, 42))
            .await
            .unwrap();
        let loaded = store
            .get_inventory_item(&Sku::try_new("SKU-1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.current_stock, 42);
    }

    #[tokio::test]
    async fn two_updates_record_two_transactions() {
        let store = Store::open_in_memory().await.unwrap();
        let sku = Sku::try_new("SKU-1").unwrap();
        store
            .save_inventory_item_and_transaction(
                &sample("SKU-1", 100),
                &sample_txn("SKU-1", StockOperation::Set, 100),
            )
            .await
            .unwrap();
        store
            .save_inventory_item_and_transaction(
                &sample("SKU-1", 0),
                &sample_txn("SKU-1", StockOperation::Decrement, 150),
            )
            .await
            .unwrap();
        assert_eq!(store.count_transactions(&sku).await.unwrap(), 2);
    }
}
