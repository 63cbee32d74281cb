//! Vault records as reported by the consensus chain.

use serde::{Deserialize, Serialize};

use crate::keys::PubKey;

/// Lifecycle stage of a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultStatus {
    /// Receiving and sending funds.
    Active,

    /// Being migrated out of after a churn.
    Retiring,

    /// No longer used.
    Inactive,
}

/// A vault known to the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Group key of the vault.
    pub pub_key: PubKey,

    /// Lifecycle stage.
    pub status: VaultStatus,

    /// Node keys holding shares of the vault key.
    pub members: Vec<PubKey>,
}

impl Vault {
    /// Whether the vault has been retired for good.
    pub fn is_inactive(&self) -> bool {
        self.status == VaultStatus::Inactive
    }
}
