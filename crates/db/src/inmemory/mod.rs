//! In-memory implementation of the outbound store.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bifrost_primitives::outbound::{ItemKey, OutboundItem, TxStatus};
use tokio::sync::RwLock;

use crate::{
    errors::{DbError, DbResult},
    outbound::{sort_by_priority, OutboundStore},
};

/// In-memory outbound store. Contents are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboundStore {
    /// Items by key.
    items: Arc<RwLock<BTreeMap<ItemKey, OutboundItem>>>,

    /// Whether [`OutboundStore::close`] has been called.
    closed: Arc<AtomicBool>,
}

impl InMemoryOutboundStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }

        Ok(())
    }
}

#[async_trait]
impl OutboundStore for InMemoryOutboundStore {
    async fn set(&self, item: &OutboundItem) -> DbResult<()> {
        if item.status == TxStatus::Spent {
            return self.remove(item).await;
        }

        self.ensure_open()?;
        self.items.write().await.insert(item.key(), item.clone());

        Ok(())
    }

    async fn get(&self, key: &ItemKey) -> DbResult<Option<OutboundItem>> {
        self.ensure_open()?;

        Ok(self.items.read().await.get(key).cloned())
    }

    async fn remove(&self, item: &OutboundItem) -> DbResult<()> {
        self.ensure_open()?;
        self.items.write().await.remove(&item.key());

        Ok(())
    }

    async fn list(&self) -> DbResult<Vec<OutboundItem>> {
        self.ensure_open()?;

        let mut items: Vec<OutboundItem> = self
            .items
            .read()
            .await
            .values()
            .filter(|item| item.status != TxStatus::Spent)
            .cloned()
            .collect();
        sort_by_priority(&mut items);

        Ok(items)
    }

    async fn close(&self) -> DbResult<()> {
        self.closed.store(true, Ordering::Release);

        Ok(())
    }
}
