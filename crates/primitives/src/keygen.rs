//! Key generation requests issued by consensus.

use serde::{Deserialize, Serialize};

use crate::{keys::PubKey, BlockHeight};

/// Kind of key being generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeygenType {
    /// Unspecified.
    #[default]
    Unknown,

    /// A new network vault.
    Asgard,
}

/// One key generation among a member set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keygen {
    /// Kind of key.
    pub keygen_type: KeygenType,

    /// Node keys taking part.
    pub members: Vec<PubKey>,
}

/// Key generations requested at one consensus height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygenBlock {
    /// Height of the request.
    pub height: BlockHeight,

    /// Requested keygens. There is one in practice.
    pub keygens: Vec<Keygen>,
}
