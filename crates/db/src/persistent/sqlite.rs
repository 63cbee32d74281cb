//! SQLite implementation of the outbound store.
//!
//! Each item is stored as an opaque bincode blob next to the columns needed to address and order
//! it, so the schema does not change when the item gains fields.

use async_trait::async_trait;
use bifrost_primitives::outbound::{ItemKey, OutboundItem, TxStatus};
use sqlx::{
    sqlite::{SqliteQueryResult, SqliteRow},
    Row, SqlitePool,
};
use tracing::{debug, info};

use super::errors::StorageError;
use crate::{
    errors::{DbError, DbResult},
    outbound::{sort_by_priority, OutboundStore},
};

const fn status_code(status: TxStatus) -> i64 {
    match status {
        TxStatus::Unsigned => 0,
        TxStatus::Signed => 1,
        TxStatus::Spent => 2,
    }
}

/// Outbound store persisted in an SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteOutboundStore {
    pool: SqlitePool,
}

impl SqliteOutboundStore {
    /// Opens the store on `pool`, creating its table if needed.
    pub async fn new(pool: SqlitePool) -> DbResult<Self> {
        let _: SqliteQueryResult = sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbound_items (
                item_key TEXT PRIMARY KEY,
                height INTEGER NOT NULL,
                seq_index INTEGER NOT NULL,
                chain TEXT NOT NULL,
                vault_pub_key TEXT NOT NULL,
                status INTEGER NOT NULL,
                item BLOB NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(StorageError::from)?;

        info!("opened sqlite outbound store");
        Ok(Self { pool })
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.pool.is_closed() {
            return Err(DbError::Closed);
        }

        Ok(())
    }

    fn decode(row: &SqliteRow) -> DbResult<OutboundItem> {
        let blob: Vec<u8> = row.try_get("item").map_err(StorageError::from)?;
        Ok(bincode::deserialize(&blob).map_err(StorageError::from)?)
    }
}

#[async_trait]
impl OutboundStore for SqliteOutboundStore {
    async fn set(&self, item: &OutboundItem) -> DbResult<()> {
        if item.status == TxStatus::Spent {
            return self.remove(item).await;
        }

        self.ensure_open()?;

        let seq_index = i64::try_from(item.sequence_index).map_err(|_| {
            StorageError::InvalidData(format!(
                "sequence index {} does not fit in a column",
                item.sequence_index
            ))
        })?;
        let blob = bincode::serialize(item).map_err(StorageError::from)?;

        let _: SqliteQueryResult = sqlx::query(
            r#"
            INSERT INTO outbound_items (
                item_key,
                height,
                seq_index,
                chain,
                vault_pub_key,
                status,
                item
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_key) DO UPDATE SET
                status = excluded.status,
                item = excluded.item
            "#,
        )
        .bind(item.key().as_str())
        .bind(item.height)
        .bind(seq_index)
        .bind(item.chain().ticker())
        .bind(item.vault_pub_key().as_str())
        .bind(status_code(item.status))
        .bind(blob)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        debug!(key = %item.key(), status = ?item.status, "stored outbound item");
        Ok(())
    }

    async fn get(&self, key: &ItemKey) -> DbResult<Option<OutboundItem>> {
        self.ensure_open()?;

        let row: Option<SqliteRow> =
            sqlx::query("SELECT item FROM outbound_items WHERE item_key = ?")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from)?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn remove(&self, item: &OutboundItem) -> DbResult<()> {
        self.ensure_open()?;

        let _: SqliteQueryResult = sqlx::query("DELETE FROM outbound_items WHERE item_key = ?")
            .bind(item.key().as_str())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        debug!(key = %item.key(), "removed outbound item");
        Ok(())
    }

    async fn list(&self) -> DbResult<Vec<OutboundItem>> {
        self.ensure_open()?;

        let rows: Vec<SqliteRow> = sqlx::query(
            r#"
            SELECT item FROM outbound_items
            WHERE status != ?
            ORDER BY height ASC, seq_index ASC
            "#,
        )
        .bind(status_code(TxStatus::Spent))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        let mut items = rows.iter().map(Self::decode).collect::<DbResult<Vec<_>>>()?;
        sort_by_priority(&mut items);

        Ok(items)
    }

    async fn close(&self) -> DbResult<()> {
        self.pool.close().await;
        info!("closed sqlite outbound store");

        Ok(())
    }
}
