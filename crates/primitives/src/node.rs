//! Node accounts registered on the consensus chain.

use serde::{Deserialize, Serialize};

use crate::keys::PubKey;

/// Keys a node registered with its account. Unregistered keys are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeySet {
    /// Key the node signs consensus messages and threshold ceremonies with.
    pub secp256k1: PubKey,

    /// Key used on ed25519 chains.
    pub ed25519: PubKey,
}

/// A validator's account on the consensus chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAccount {
    /// Account address of the node.
    pub node_address: String,

    /// Keys set by the operator.
    pub pub_key_set: PubKeySet,
}

impl NodeAccount {
    /// The node's signing key, once the operator has registered it.
    pub fn signer_pub_key(&self) -> Option<&PubKey> {
        Some(&self.pub_key_set.secp256k1).filter(|key| !key.is_empty())
    }
}
