//! Errors surfaced by the threshold signing protocol.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{constants::KEYSIGN_ROUND_7, keys::PubKey};

/// Nodes held responsible for a failed threshold ceremony.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blame {
    /// Why the ceremony failed.
    pub fail_reason: String,

    /// Protocol round at which the ceremony failed.
    pub round: String,

    /// Whether the failure happened on a unicast message.
    pub is_unicast: bool,

    /// Nodes that misbehaved or did not answer.
    pub blame_nodes: Vec<PubKey>,
}

impl Blame {
    /// Whether no node was blamed and no reason was given.
    pub fn is_empty(&self) -> bool {
        self.fail_reason.is_empty() && self.blame_nodes.is_empty()
    }
}

/// A threshold signing ceremony that did not produce a signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("keysign failed at round {:?}: {}", .blame.round, .blame.fail_reason)]
pub struct KeysignError {
    /// Blame reported by the ceremony.
    pub blame: Blame,
}

impl KeysignError {
    /// Creates a new error from the ceremony's blame.
    pub const fn new(blame: Blame) -> Self {
        Self { blame }
    }

    /// Whether the ceremony failed at its final round.
    ///
    /// Partial signatures have been exchanged at that point, so the inputs of the signed
    /// transaction must be reused on the next attempt.
    pub fn is_round7(&self) -> bool {
        self.blame.round == KEYSIGN_ROUND_7
    }
}
