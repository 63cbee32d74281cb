//! Messages the signer submits to the consensus chain.

use serde::{Deserialize, Serialize};

use crate::{
    chain::Chain,
    errors::Blame,
    keygen::KeygenType,
    keys::PubKey,
    BlockHeight,
};

/// Result of a key generation ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TssPoolMsg {
    /// Generated key. Empty when the ceremony failed.
    pub pool_pub_key: PubKey,

    /// Signature of the key's own encoding made with the new key, if this node took part.
    pub verification_signature: Option<Vec<u8>>,

    /// Blame of a failed ceremony.
    pub blame: Blame,

    /// Node keys that took part.
    pub members: Vec<PubKey>,

    /// Kind of key.
    pub keygen_type: KeygenType,

    /// Chains this node can serve with the new key.
    pub chains: Vec<Chain>,

    /// Height of the keygen request.
    pub height: BlockHeight,

    /// Duration of the ceremony.
    pub keygen_time_ms: i64,
}

/// A message broadcast to the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConsensusMsg {
    /// Key generation outcome.
    TssPool(TssPoolMsg),
}
