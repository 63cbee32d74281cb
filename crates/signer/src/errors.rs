//! Error types for the signer.

use std::time::Duration;

use bifrost_db::errors::DbError;
use bifrost_primitives::{chain::Chain, errors::Blame};
use thiserror::Error;

use crate::{
    constants_cache::ConstantsError,
    traits::{BridgeError, ChainClientError, SignTxFailure},
};

/// Errors that leave an outbound item queued for a later attempt.
#[derive(Debug, Error)]
pub enum SignerError {
    /// A consensus chain query failed.
    #[error("consensus query failed: {0}")]
    Bridge(#[from] BridgeError),

    /// The protocol constants could not be read.
    #[error("failed to read constants: {0}")]
    Constants(#[from] ConstantsError),

    /// The outbound store failed.
    #[error("outbound store failed: {0}")]
    Db(#[from] DbError),

    /// No client is configured for the item's chain.
    #[error("chain {0} is not supported")]
    UnsupportedChain(Chain),

    /// The chain's block scanner is behind, so a broadcast could go unnoticed and be
    /// rescheduled to another vault.
    #[error("block scanner for chain {0} is unhealthy, not signing")]
    UnhealthyScanner(Chain),

    /// Signing failed.
    #[error("failed to sign: {0}")]
    Sign(#[from] SignTxFailure),

    /// The signed transaction could not be broadcast. It has been kept for the next attempt.
    #[error("failed to broadcast: {0}")]
    Broadcast(#[source] ChainClientError),

    /// The attempt ran out of time before broadcasting.
    #[error("sign and broadcast did not complete within {0:?}")]
    Timeout(Duration),

    /// The node account never carried a signing key, so this node cannot take part in signing.
    #[error("node account {address} has no signing key after {waited:?}")]
    NodeKeyNotRegistered {
        /// Address of the node account.
        address: String,

        /// Time spent waiting for the key.
        waited: Duration,
    },

    /// The signer was stopped before it finished starting.
    #[error("signer stopped")]
    Stopped,
}

impl SignerError {
    /// Whether signing failed at the final round and the checkpoint must be reused.
    pub fn is_round7(&self) -> bool {
        matches!(self, SignerError::Sign(failure) if failure.source.is_round7())
    }

    /// Inputs recorded by a failed signing attempt.
    pub fn checkpoint(&self) -> Option<&[u8]> {
        match self {
            SignerError::Sign(failure) => failure.checkpoint.as_deref(),
            _ => None,
        }
    }

    /// Blame reported by a failed keysign.
    pub fn keysign_blame(&self) -> Option<&Blame> {
        match self {
            SignerError::Sign(failure) => failure.source.blame(),
            _ => None,
        }
    }

    /// Whether the error calls for operator attention rather than a plain retry.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, SignerError::UnhealthyScanner(_))
    }
}
