//! Per-vault mutual exclusion.
//!
//! Two transactions spending from the same unspent-output vault must not be built concurrently,
//! or they could select the same outputs.

use std::{collections::HashMap, sync::Arc};

use bifrost_primitives::keys::PubKey;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lazily created lock per vault key.
#[derive(Debug, Default)]
pub struct VaultLockRegistry {
    locks: Mutex<HashMap<PubKey, Arc<AsyncMutex<()>>>>,
}

impl VaultLockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock of `vault`, created on first use.
    pub fn get(&self, vault: &PubKey) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(vault.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Waits for exclusive access to `vault`. Access is released when the guard drops.
    pub async fn lock(&self, vault: &PubKey) -> OwnedMutexGuard<()> {
        self.get(vault).lock_owned().await
    }

    /// Number of vaults a lock was created for.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether no lock was created yet.
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
