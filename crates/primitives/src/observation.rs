//! Observations of transactions reported back to the consensus chain.

use serde::{Deserialize, Serialize};

use crate::{
    chain::Chain,
    keys::{PubKey, TxId},
    outbound::Coin,
    BlockHeight,
};

/// One observed transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInItem {
    /// Height of the external block carrying the transaction.
    pub block_height: BlockHeight,

    /// Hash of the transaction.
    pub tx: TxId,

    /// Memo attached to the transaction.
    pub memo: String,

    /// Sending address.
    pub sender: String,

    /// Receiving address.
    pub to: String,

    /// Coins moved.
    pub coins: Vec<Coin>,

    /// Fee paid.
    pub gas: Vec<Coin>,

    /// Vault that observed, i.e. sent or received, the transaction.
    pub observed_vault_pub_key: PubKey,
}

/// A batch of observations on one chain, as submitted to the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Chain the transactions were observed on.
    pub chain: Chain,

    /// Observed transactions.
    pub tx_array: Vec<TxInItem>,

    /// Whether the transactions were seen in the mempool rather than in a block.
    pub mem_pool: bool,

    /// Whether the transactions already passed the observer's filters.
    pub filtered: bool,

    /// Number of confirmations required before the observation is final.
    pub confirmation_required: i64,

    /// Whether a later observation of the same transactions may amend this one.
    pub allow_future_observation: bool,
}

impl TxIn {
    /// Wraps the observation of an outbound this node just broadcast.
    ///
    /// Instant EVM observations carry an estimated gas, so a corrected future observation is
    /// allowed on those chains.
    pub fn instant(chain: Chain, observation: TxInItem) -> Self {
        Self {
            chain,
            tx_array: vec![observation],
            mem_pool: true,
            filtered: true,
            confirmation_required: 0,
            allow_future_observation: chain.is_evm(),
        }
    }
}
