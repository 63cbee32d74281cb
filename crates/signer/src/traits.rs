//! Contracts of the collaborators the signer drives: the consensus chain client, the per-chain
//! clients, the threshold signing service, the pubkey tracker and the observer.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use bifrost_primitives::{
    chain::Chain,
    constants::mimir_with_ref,
    errors::{Blame, KeysignError},
    keys::{PubKey, TxId},
    messages::ConsensusMsg,
    node::NodeAccount,
    observation::{TxIn, TxInItem},
    outbound::{Coin, TransferInstruction, TxOut},
    vault::Vault,
    BlockHeight,
};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::vault_lock::VaultLockRegistry;

/// Errors returned by the consensus chain client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The node could not be reached or answered with a transport error.
    #[error("consensus rpc failed: {0}")]
    Rpc(String),

    /// The queried object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A submitted message was rejected.
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl BridgeError {
    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Rpc(_))
    }
}

/// Client of the consensus chain.
///
/// Every call may fail transiently. Queries are retried on the next pass, submissions with a
/// bounded backoff.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Latest consensus height.
    async fn get_block_height(&self) -> Result<BlockHeight, BridgeError>;

    /// Whether the consensus node is still syncing and may serve stale data.
    async fn is_catching_up(&self) -> Result<bool, BridgeError>;

    /// Current value of a mimir. Unset mimirs read as zero or a negative value.
    async fn get_mimir(&self, key: &str) -> Result<i64, BridgeError>;

    /// Current value of a mimir whose key is `template` expanded with `reference`.
    async fn get_mimir_with_ref(&self, template: &str, reference: &str) -> Result<i64, BridgeError> {
        self.get_mimir(&mimir_with_ref(template, reference)).await
    }

    /// All protocol constants.
    async fn get_constants(&self) -> Result<HashMap<String, i64>, BridgeError>;

    /// Outbound instructions scheduled at `height` for `vault`, with their recorded output
    /// hashes.
    async fn get_keysign(&self, height: BlockHeight, vault: &PubKey) -> Result<TxOut, BridgeError>;

    /// The vault with the given key.
    async fn get_vault(&self, vault: &PubKey) -> Result<Vault, BridgeError>;

    /// The account of the node with address `address`.
    async fn get_node_account(&self, address: &str) -> Result<NodeAccount, BridgeError>;

    /// Submits messages in one transaction.
    async fn broadcast(&self, msgs: Vec<ConsensusMsg>) -> Result<TxId, BridgeError>;

    /// Reports the nodes blamed for a failed keysign of an outbound.
    async fn post_keysign_failure(
        &self,
        blame: &Blame,
        height: BlockHeight,
        memo: &str,
        coins: &[Coin],
        vault: &PubKey,
    ) -> Result<TxId, BridgeError>;
}

#[async_trait]
impl<T: Bridge + ?Sized> Bridge for Arc<T> {
    async fn get_block_height(&self) -> Result<BlockHeight, BridgeError> {
        (**self).get_block_height().await
    }

    async fn is_catching_up(&self) -> Result<bool, BridgeError> {
        (**self).is_catching_up().await
    }

    async fn get_mimir(&self, key: &str) -> Result<i64, BridgeError> {
        (**self).get_mimir(key).await
    }

    async fn get_mimir_with_ref(&self, template: &str, reference: &str) -> Result<i64, BridgeError> {
        (**self).get_mimir_with_ref(template, reference).await
    }

    async fn get_constants(&self) -> Result<HashMap<String, i64>, BridgeError> {
        (**self).get_constants().await
    }

    async fn get_keysign(&self, height: BlockHeight, vault: &PubKey) -> Result<TxOut, BridgeError> {
        (**self).get_keysign(height, vault).await
    }

    async fn get_vault(&self, vault: &PubKey) -> Result<Vault, BridgeError> {
        (**self).get_vault(vault).await
    }

    async fn get_node_account(&self, address: &str) -> Result<NodeAccount, BridgeError> {
        (**self).get_node_account(address).await
    }

    async fn broadcast(&self, msgs: Vec<ConsensusMsg>) -> Result<TxId, BridgeError> {
        (**self).broadcast(msgs).await
    }

    async fn post_keysign_failure(
        &self,
        blame: &Blame,
        height: BlockHeight,
        memo: &str,
        coins: &[Coin],
        vault: &PubKey,
    ) -> Result<TxId, BridgeError> {
        (**self)
            .post_keysign_failure(blame, height, memo, coins, vault)
            .await
    }
}

/// Errors returned by a destination chain client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainClientError {
    /// The threshold signing ceremony failed.
    #[error(transparent)]
    Keysign(#[from] KeysignError),

    /// The destination chain node failed.
    #[error("chain rpc failed: {0}")]
    Rpc(String),

    /// The transaction could not be built.
    #[error("invalid transaction: {0}")]
    InvalidTx(String),
}

impl ChainClientError {
    /// Whether the error is a keysign failure at the final signing round.
    pub fn is_round7(&self) -> bool {
        matches!(self, ChainClientError::Keysign(err) if err.is_round7())
    }

    /// Blame carried by a failed keysign.
    pub fn blame(&self) -> Option<&Blame> {
        match self {
            ChainClientError::Keysign(err) if !err.blame.is_empty() => Some(&err.blame),
            _ => None,
        }
    }
}

/// A signed transaction ready to broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedTx {
    /// Raw transaction. Empty when there was nothing to sign.
    pub raw: Vec<u8>,

    /// Observation to report once broadcast.
    pub observation: Option<TxInItem>,
}

/// A failed signing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source}")]
pub struct SignTxFailure {
    /// Inputs selected for the transaction, to reuse on the next attempt.
    pub checkpoint: Option<Vec<u8>>,

    /// Cause of the failure.
    #[source]
    pub source: ChainClientError,
}

impl From<ChainClientError> for SignTxFailure {
    fn from(source: ChainClientError) -> Self {
        Self {
            checkpoint: None,
            source,
        }
    }
}

/// Client of a destination chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The chain served.
    fn chain(&self) -> Chain;

    /// Address of `vault` on the chain.
    fn get_address(&self, vault: &PubKey) -> Result<String, ChainClientError>;

    /// Signs `tx`, resuming from `checkpoint` when a previous attempt recorded one.
    async fn sign_tx(
        &self,
        tx: &TransferInstruction,
        checkpoint: Option<&[u8]>,
        height: BlockHeight,
    ) -> Result<SignedTx, SignTxFailure>;

    /// Broadcasts a signed transaction and returns its hash.
    async fn broadcast_tx(
        &self,
        tx: &TransferInstruction,
        signed_tx: &[u8],
    ) -> Result<TxId, ChainClientError>;

    /// Whether the chain's block scanner keeps up with the chain.
    fn is_block_scanner_healthy(&self) -> bool;

    /// Per-vault locking, for chains whose transactions select unspent outputs.
    fn as_vault_lockable(&self) -> Option<&dyn VaultLockable> {
        None
    }
}

/// A chain client that serializes the signing of transactions spending from the same vault.
pub trait VaultLockable: Send + Sync {
    /// The lock guarding spends from `vault`.
    fn vault_lock(&self, vault: &PubKey) -> Arc<Mutex<()>>;
}

impl VaultLockable for VaultLockRegistry {
    fn vault_lock(&self, vault: &PubKey) -> Arc<Mutex<()>> {
        self.get(vault)
    }
}

/// Chain clients by chain.
pub type ChainRegistry = BTreeMap<Chain, Arc<dyn ChainClient>>;

/// A keygen ceremony that did not produce a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("keygen failed: {reason}")]
pub struct KeygenError {
    /// Why the ceremony failed.
    pub reason: String,

    /// Nodes held responsible.
    pub blame: Blame,
}

/// Threshold key generation.
#[async_trait]
pub trait ThresholdKeygen: Send + Sync {
    /// Runs a keygen ceremony among `members` for the request at `height`.
    async fn generate_new_key(
        &self,
        height: BlockHeight,
        members: &[PubKey],
    ) -> Result<PubKey, KeygenError>;
}

/// Threshold signing of arbitrary messages.
#[async_trait]
pub trait ThresholdSigner: Send + Sync {
    /// Signs the SHA-256 digest of `msg` with the key `pub_key`, returning the 64-byte compact
    /// ECDSA signature.
    ///
    /// Returns `None` when this node was not selected in the signing party.
    async fn remote_sign(
        &self,
        msg: &[u8],
        pub_key: &PubKey,
    ) -> Result<Option<Vec<u8>>, KeysignError>;
}

/// Tracker of the keys this node holds shares of or watches.
pub trait PubKeyValidator: Send + Sync {
    /// Whether this node holds a share of `pub_key`.
    fn has_pub_key(&self, pub_key: &PubKey) -> bool;

    /// Starts tracking `pub_key`. `signer` is set for keys this node holds a share of.
    fn add_pub_key(&self, pub_key: PubKey, signer: bool);

    /// Records the key this node signs with.
    fn add_node_pub_key(&self, pub_key: PubKey);
}

/// Sink of observations reported to the consensus chain.
pub trait Observer: Send + Sync {
    /// Queues the observation of a transaction this node signed.
    fn observe_signed(&self, tx_in: TxIn);
}
