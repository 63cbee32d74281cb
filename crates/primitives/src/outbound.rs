//! Outbound transfer instructions issued by consensus and the items the signer queues for them.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    chain::Chain,
    keys::{PubKey, TxId},
    observation::TxInItem,
    BlockHeight,
};

/// An amount of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    /// Asset identifier, e.g. `BTC.BTC`.
    pub asset: String,

    /// Amount in the asset's base unit.
    pub amount: u64,
}

impl Coin {
    /// Creates a new coin.
    pub fn new(asset: impl Into<String>, amount: u64) -> Self {
        Self {
            asset: asset.into(),
            amount,
        }
    }
}

/// A consensus-issued instruction to send funds out of a vault.
///
/// The signer treats the destination-chain specifics as opaque and only hands them to the
/// chain client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInstruction {
    /// Destination chain.
    pub chain: Chain,

    /// Destination address.
    pub to_address: String,

    /// Vault the funds are sent from.
    pub vault_pub_key: PubKey,

    /// Coins to send.
    pub coins: Vec<Coin>,

    /// Memo to attach.
    pub memo: String,

    /// Maximum fee the vault may spend.
    pub max_gas: Vec<Coin>,

    /// Fee rate to use.
    pub gas_rate: i64,

    /// Hash of the inbound that triggered this outbound.
    pub in_hash: TxId,

    /// Hash of the outbound once it has been sent.
    pub out_hash: TxId,
}

impl TransferInstruction {
    /// Whether both instructions describe the same transfer.
    ///
    /// The recorded output hash is ignored so that a pending instruction matches its already
    /// sent counterpart. Memos compare case-insensitively.
    pub fn same_transfer(&self, other: &Self) -> bool {
        self.chain == other.chain
            && self.vault_pub_key == other.vault_pub_key
            && self.to_address == other.to_address
            && self.coins == other.coins
            && self.in_hash == other.in_hash
            && self.memo.eq_ignore_ascii_case(&other.memo)
            && self.gas_rate == other.gas_rate
    }
}

/// A batch of outbound instructions scheduled at one consensus height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Height at which the instructions were scheduled.
    pub height: BlockHeight,

    /// Instructions, in consensus order.
    pub tx_array: Vec<TransferInstruction>,
}

/// Progress of an outbound item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Not signed yet.
    #[default]
    Unsigned,

    /// Signed, possibly not broadcast yet.
    Signed,

    /// Broadcast and acknowledged. Spent items are never kept.
    Spent,
}

/// Stable identity of an outbound item across all its status changes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey(String);

impl ItemKey {
    /// Derives the key of the item scheduled at `height` for `chain` and `vault` at position
    /// `sequence_index` of its batch.
    pub fn new(height: BlockHeight, chain: Chain, vault: &PubKey, sequence_index: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(height.to_be_bytes());
        hasher.update(chain.ticker().as_bytes());
        hasher.update([0u8]);
        hasher.update(vault.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(sequence_index.to_be_bytes());

        Self(hex::encode(hasher.finalize()))
    }

    /// The key as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Items of the same group spend from the same vault on the same chain and must be processed in
/// order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VaultGroup {
    /// Destination chain.
    pub chain: Chain,

    /// Vault spending the funds.
    pub vault_pub_key: PubKey,
}

impl fmt::Display for VaultGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.chain, self.vault_pub_key)
    }
}

/// One outbound instruction queued for signing, along with the progress made so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundItem {
    /// Consensus height at which the instruction was scheduled.
    pub height: BlockHeight,

    /// Position of the instruction in its scheduling batch.
    pub sequence_index: u64,

    /// The instruction itself.
    pub payload: TransferInstruction,

    /// Progress of the item.
    pub status: TxStatus,

    /// Signing-session resumption bytes. Only set on a round-7 retry.
    pub checkpoint: Option<Vec<u8>>,

    /// The signed transaction, kept when the broadcast failed.
    pub signed_tx: Option<Vec<u8>>,

    /// Observation to report once the signed transaction is broadcast.
    pub pending_observation: Option<TxInItem>,

    /// Whether the last attempt failed at the final signing round.
    pub round7_retry: bool,
}

impl OutboundItem {
    /// Queues an instruction scheduled at `height` at position `sequence_index` of its batch.
    pub const fn new(height: BlockHeight, payload: TransferInstruction, sequence_index: u64) -> Self {
        Self {
            height,
            sequence_index,
            payload,
            status: TxStatus::Unsigned,
            checkpoint: None,
            signed_tx: None,
            pending_observation: None,
            round7_retry: false,
        }
    }

    /// Destination chain.
    pub const fn chain(&self) -> Chain {
        self.payload.chain
    }

    /// Vault spending the funds.
    pub const fn vault_pub_key(&self) -> &PubKey {
        &self.payload.vault_pub_key
    }

    /// Stable key of the item.
    pub fn key(&self) -> ItemKey {
        ItemKey::new(
            self.height,
            self.chain(),
            self.vault_pub_key(),
            self.sequence_index,
        )
    }

    /// Ordering group of the item.
    pub fn group(&self) -> VaultGroup {
        VaultGroup {
            chain: self.chain(),
            vault_pub_key: self.vault_pub_key().clone(),
        }
    }

    /// Position of the item within its group.
    pub const fn priority(&self) -> (BlockHeight, u64) {
        (self.height, self.sequence_index)
    }

    /// Records a failure at the final signing round along with the signer's checkpoint.
    pub fn mark_round7(&mut self, checkpoint: Option<Vec<u8>>) {
        self.round7_retry = true;
        self.checkpoint = checkpoint;
    }
}
