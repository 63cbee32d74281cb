//! Response caching for consensus chain queries.
//!
//! Several workers ask for the same mimirs, constants, vaults and keysign lists within one block.
//! [`CachedBridge`] answers repeated queries from a [`ResponseCache`] whose entries stay fresh for
//! one block period. Height, sync status, node accounts and submissions always reach the node.

use std::{collections::HashMap, hash::Hash, time::Duration};

use async_trait::async_trait;
use bifrost_primitives::{
    errors::Blame,
    keys::{PubKey, TxId},
    messages::ConsensusMsg,
    node::NodeAccount,
    outbound::{Coin, TxOut},
    vault::Vault,
    BlockHeight,
};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::traits::{Bridge, BridgeError};

/// Cache of query responses that expire after a freshness window.
#[derive(Debug)]
pub struct ResponseCache<K, V> {
    /// How long an entry is served after it was stored.
    window: Duration,

    /// Responses and the time they were stored.
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> ResponseCache<K, V> {
    /// Creates an empty cache serving entries for `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The cached response for `key` if it is still fresh.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock();
        let (stored_at, value) = entries.get(key)?;
        (stored_at.elapsed() < self.window).then(|| value.clone())
    }

    /// Stores a response, evicting expired ones.
    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.window);
        entries.insert(key, (Instant::now(), value));
    }
}

/// A [`Bridge`] that serves repeated queries from a cache for one block period.
#[derive(Debug)]
pub struct CachedBridge<B> {
    inner: B,
    mimirs: ResponseCache<String, i64>,
    constants: ResponseCache<(), HashMap<String, i64>>,
    vaults: ResponseCache<PubKey, Vault>,
    keysigns: ResponseCache<(BlockHeight, PubKey), TxOut>,
}

impl<B: Bridge> CachedBridge<B> {
    /// Wraps `inner`, keeping responses for `window`.
    pub fn new(inner: B, window: Duration) -> Self {
        Self {
            inner,
            mimirs: ResponseCache::new(window),
            constants: ResponseCache::new(window),
            vaults: ResponseCache::new(window),
            keysigns: ResponseCache::new(window),
        }
    }

    /// The wrapped bridge.
    pub const fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: Bridge> Bridge for CachedBridge<B> {
    async fn get_block_height(&self) -> Result<BlockHeight, BridgeError> {
        self.inner.get_block_height().await
    }

    async fn is_catching_up(&self) -> Result<bool, BridgeError> {
        self.inner.is_catching_up().await
    }

    async fn get_mimir(&self, key: &str) -> Result<i64, BridgeError> {
        if let Some(value) = self.mimirs.get(&key.to_string()) {
            return Ok(value);
        }

        let value = self.inner.get_mimir(key).await?;
        self.mimirs.insert(key.to_string(), value);
        Ok(value)
    }

    async fn get_constants(&self) -> Result<HashMap<String, i64>, BridgeError> {
        if let Some(values) = self.constants.get(&()) {
            return Ok(values);
        }

        let values = self.inner.get_constants().await?;
        self.constants.insert((), values.clone());
        Ok(values)
    }

    async fn get_keysign(&self, height: BlockHeight, vault: &PubKey) -> Result<TxOut, BridgeError> {
        let key = (height, vault.clone());
        if let Some(tx_out) = self.keysigns.get(&key) {
            return Ok(tx_out);
        }

        let tx_out = self.inner.get_keysign(height, vault).await?;
        self.keysigns.insert(key, tx_out.clone());
        Ok(tx_out)
    }

    async fn get_vault(&self, vault: &PubKey) -> Result<Vault, BridgeError> {
        if let Some(found) = self.vaults.get(vault) {
            return Ok(found);
        }

        let found = self.inner.get_vault(vault).await?;
        self.vaults.insert(vault.clone(), found.clone());
        Ok(found)
    }

    async fn get_node_account(&self, address: &str) -> Result<NodeAccount, BridgeError> {
        self.inner.get_node_account(address).await
    }

    async fn broadcast(&self, msgs: Vec<ConsensusMsg>) -> Result<TxId, BridgeError> {
        self.inner.broadcast(msgs).await
    }

    async fn post_keysign_failure(
        &self,
        blame: &Blame,
        height: BlockHeight,
        memo: &str,
        coins: &[Coin],
        vault: &PubKey,
    ) -> Result<TxId, BridgeError> {
        self.inner
            .post_keysign_failure(blame, height, memo, coins, vault)
            .await
    }
}

#[cfg(test)]
mod tests {
    use bifrost_primitives::constants::SIGNER_CONCURRENCY;

    use super::*;
    use crate::testing::MockBridge;

    #[tokio::test(start_paused = true)]
    async fn mimirs_are_cached_for_one_window() {
        let bridge = CachedBridge::new(MockBridge::default(), Duration::from_secs(5));
        bridge.inner().set_mimir(SIGNER_CONCURRENCY, 4);

        assert_eq!(bridge.get_mimir(SIGNER_CONCURRENCY).await, Ok(4));
        bridge.inner().set_mimir(SIGNER_CONCURRENCY, 8);
        assert_eq!(
            bridge.get_mimir(SIGNER_CONCURRENCY).await,
            Ok(4),
            "response must be served from cache within the window"
        );
        assert_eq!(bridge.inner().mimir_calls(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            bridge.get_mimir(SIGNER_CONCURRENCY).await,
            Ok(8),
            "response must be refetched once the window elapsed"
        );
        assert_eq!(bridge.inner().mimir_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let bridge = CachedBridge::new(MockBridge::default(), Duration::from_secs(5));
        bridge.inner().fail_constants(true);
        assert!(bridge.get_constants().await.is_err());

        bridge.inner().fail_constants(false);
        assert!(
            bridge.get_constants().await.is_ok(),
            "a failed query must not poison the cache"
        );
        assert_eq!(bridge.inner().constants_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn height_is_never_cached() {
        let bridge = CachedBridge::new(MockBridge::default(), Duration::from_secs(5));
        bridge.inner().set_height(10);
        assert_eq!(bridge.get_block_height().await, Ok(10));

        bridge.inner().set_height(11);
        assert_eq!(bridge.get_block_height().await, Ok(11));
    }
}
