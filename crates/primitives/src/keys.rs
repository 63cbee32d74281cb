//! Public key and transaction identifier newtypes.

use std::fmt;

use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A hex-encoded compressed secp256k1 public key identifying a vault or a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PubKey(String);

/// Errors raised while decoding a [`PubKey`].
#[derive(Debug, Error)]
pub enum PubKeyError {
    /// The key is not valid hex.
    #[error("invalid hex in pubkey: {0}")]
    Hex(#[from] hex::FromHexError),

    /// The bytes do not encode a point on the curve.
    #[error("invalid secp256k1 pubkey: {0}")]
    Secp(#[from] secp256k1::Error),
}

impl PubKey {
    /// Wraps an already-encoded key.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Whether the key is unset.
    ///
    /// Keygen reports an empty key when the ceremony fails.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The encoded key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the key as a secp256k1 public key.
    pub fn to_secp256k1(&self) -> Result<PublicKey, PubKeyError> {
        let bytes = hex::decode(&self.0)?;
        Ok(PublicKey::from_slice(&bytes)?)
    }
}

impl From<PublicKey> for PubKey {
    fn from(value: PublicKey) -> Self {
        Self(hex::encode(value.serialize()))
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A transaction hash on any chain. Empty when the transaction has not been sent yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(String);

impl TxId {
    /// Wraps a transaction hash.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Whether no hash has been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The hash as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
