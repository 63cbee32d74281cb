//! Cache of the protocol constants.
//!
//! Constants can only change across a churn, so the cache is refreshed once the consensus chain
//! has advanced by a churn interval since the last fetch.

use std::{collections::HashMap, sync::Arc};

use bifrost_primitives::{
    constants::{CHURN_INTERVAL, DEFAULT_CHURN_INTERVAL},
    BlockHeight,
};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::traits::{Bridge, BridgeError};

/// Errors returned when reading a constant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstantsError {
    /// The constants could not be fetched.
    #[error("failed to fetch constants: {0}")]
    Fetch(#[from] BridgeError),

    /// The consensus chain does not define the constant.
    #[error("constant {0} is not defined")]
    Missing(String),
}

/// Constants as fetched at a given height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantsSnapshot {
    /// Constant values by name.
    pub values: HashMap<String, i64>,

    /// Consensus height at which they were fetched.
    pub fetched_at_height: BlockHeight,
}

impl ConstantsSnapshot {
    fn churn_interval(&self) -> i64 {
        self.values
            .get(CHURN_INTERVAL)
            .copied()
            .filter(|interval| *interval > 0)
            .unwrap_or(DEFAULT_CHURN_INTERVAL)
    }

    fn is_stale(&self, height: BlockHeight) -> bool {
        height - self.fetched_at_height >= self.churn_interval()
    }
}

/// Read-mostly cache of the protocol constants.
///
/// Readers clone the current snapshot and never wait for each other. Refreshes are serialized
/// and swap the snapshot wholesale.
pub struct ConstantsCache {
    bridge: Arc<dyn Bridge>,
    snapshot: RwLock<Option<Arc<ConstantsSnapshot>>>,
    refresh: Mutex<()>,
}

impl std::fmt::Debug for ConstantsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantsCache")
            .field("snapshot", &self.snapshot.read())
            .finish_non_exhaustive()
    }
}

impl ConstantsCache {
    /// Creates an empty cache. Nothing is fetched until the first read.
    pub fn new(bridge: Arc<dyn Bridge>) -> Self {
        Self {
            bridge,
            snapshot: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// The cached snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<ConstantsSnapshot>> {
        self.snapshot.read().clone()
    }

    /// Returns a snapshot usable at `height`, fetching one if none was fetched yet or if a churn
    /// interval elapsed since the last fetch.
    ///
    /// On fetch failure the previous snapshot is kept for later reads and the error is returned.
    pub async fn ensure_fresh(
        &self,
        height: BlockHeight,
    ) -> Result<Arc<ConstantsSnapshot>, BridgeError> {
        if let Some(snapshot) = self.fresh_snapshot(height) {
            return Ok(snapshot);
        }

        let _refresh = self.refresh.lock().await;

        // another reader may have refreshed while we waited
        if let Some(snapshot) = self.fresh_snapshot(height) {
            return Ok(snapshot);
        }

        let values = self.bridge.get_constants().await?;
        let snapshot = Arc::new(ConstantsSnapshot {
            values,
            fetched_at_height: height,
        });
        info!(height, count = snapshot.values.len(), "refreshed constants");

        *self.snapshot.write() = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Value of the constant `name` at `height`.
    pub async fn get_int64(&self, height: BlockHeight, name: &str) -> Result<i64, ConstantsError> {
        let snapshot = self.ensure_fresh(height).await?;
        let value = snapshot
            .values
            .get(name)
            .copied()
            .ok_or_else(|| ConstantsError::Missing(name.to_string()))?;

        debug!(name, value, "read constant");
        Ok(value)
    }

    fn fresh_snapshot(&self, height: BlockHeight) -> Option<Arc<ConstantsSnapshot>> {
        self.snapshot
            .read()
            .as_ref()
            .filter(|snapshot| !snapshot.is_stale(height))
            .cloned()
    }
}
