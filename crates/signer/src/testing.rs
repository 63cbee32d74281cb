//! In-process fakes of the signer's collaborators.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Once,
    },
    time::Duration,
};

use async_trait::async_trait;
use bifrost_common::logging::{self, LoggerConfig};
use bifrost_db::{
    errors::{DbError, DbResult},
    inmemory::InMemoryOutboundStore,
    outbound::OutboundStore,
};
use bifrost_primitives::{
    chain::Chain,
    constants::{
        CHURN_INTERVAL, DEFAULT_CHURN_INTERVAL, DEFAULT_SIGNING_TRANSACTION_PERIOD,
        SIGNING_TRANSACTION_PERIOD,
    },
    errors::{Blame, KeysignError},
    keys::{PubKey, TxId},
    messages::ConsensusMsg,
    node::{NodeAccount, PubKeySet},
    observation::{TxIn, TxInItem},
    outbound::{Coin, ItemKey, OutboundItem, TransferInstruction, TxOut},
    vault::{Vault, VaultStatus},
    BlockHeight,
};
use bifrost_test_utils::generate_pubkey;
use parking_lot::Mutex;
use secp256k1::{Message, SecretKey, SECP256K1};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::{
    config::SignerConfig,
    constants_cache::ConstantsCache,
    sign::SignerCore,
    traits::{
        Bridge, BridgeError, ChainClient, ChainClientError, ChainRegistry, KeygenError, Observer,
        PubKeyValidator, SignTxFailure, SignedTx, ThresholdKeygen, ThresholdSigner, VaultLockable,
    },
    vault_lock::VaultLockRegistry,
};

static INIT_LOGGING: Once = Once::new();

/// Sends the logs of the test suite to stdout.
pub(crate) fn init_test_logging() {
    INIT_LOGGING.call_once(|| logging::init(LoggerConfig::with_base_name("bifrost-signer-test")));
}

/// A post of blame for a failed keysign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeysignFailure {
    pub(crate) blame: Blame,
    pub(crate) height: BlockHeight,
    pub(crate) memo: String,
    pub(crate) coins: Vec<Coin>,
    pub(crate) vault: PubKey,
}

#[derive(Debug)]
struct BridgeState {
    height: BlockHeight,
    catching_up: bool,
    fail_catching_up: bool,
    mimirs: HashMap<String, i64>,
    mimir_calls: usize,
    constants: HashMap<String, i64>,
    constants_calls: usize,
    fail_constants: bool,
    keysigns: HashMap<(BlockHeight, PubKey), TxOut>,
    vaults: HashMap<PubKey, Vault>,
    broadcasts: Vec<Vec<ConsensusMsg>>,
    failing_broadcasts: usize,
    keysign_failures: Vec<KeysignFailure>,
    node_account: NodeAccount,
    unregistered_node_calls: usize,
    node_account_calls: usize,
    fail_node_account: bool,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self {
            height: 0,
            catching_up: false,
            fail_catching_up: false,
            mimirs: HashMap::new(),
            mimir_calls: 0,
            constants: HashMap::from([
                (
                    SIGNING_TRANSACTION_PERIOD.to_string(),
                    DEFAULT_SIGNING_TRANSACTION_PERIOD,
                ),
                (CHURN_INTERVAL.to_string(), DEFAULT_CHURN_INTERVAL),
            ]),
            constants_calls: 0,
            fail_constants: false,
            keysigns: HashMap::new(),
            vaults: HashMap::new(),
            broadcasts: Vec::new(),
            failing_broadcasts: 0,
            keysign_failures: Vec::new(),
            node_account: NodeAccount {
                node_address: String::new(),
                pub_key_set: PubKeySet {
                    secp256k1: generate_pubkey(),
                    ed25519: PubKey::default(),
                },
            },
            unregistered_node_calls: 0,
            node_account_calls: 0,
            fail_node_account: false,
        }
    }
}

/// A consensus chain held in memory. Unset mimirs read as zero and unknown vaults as active.
#[derive(Debug, Default)]
pub(crate) struct MockBridge {
    state: Mutex<BridgeState>,
}

impl MockBridge {
    pub(crate) fn set_height(&self, height: BlockHeight) {
        self.state.lock().height = height;
    }

    pub(crate) fn set_catching_up(&self, catching_up: bool) {
        self.state.lock().catching_up = catching_up;
    }

    pub(crate) fn fail_catching_up(&self, fail: bool) {
        self.state.lock().fail_catching_up = fail;
    }

    pub(crate) fn set_mimir(&self, key: &str, value: i64) {
        self.state.lock().mimirs.insert(key.to_string(), value);
    }

    pub(crate) fn mimir_calls(&self) -> usize {
        self.state.lock().mimir_calls
    }

    pub(crate) fn set_constants(&self, constants: HashMap<String, i64>) {
        self.state.lock().constants = constants;
    }

    pub(crate) fn constants_calls(&self) -> usize {
        self.state.lock().constants_calls
    }

    pub(crate) fn fail_constants(&self, fail: bool) {
        self.state.lock().fail_constants = fail;
    }

    pub(crate) fn set_keysign(&self, vault: &PubKey, tx_out: TxOut) {
        self.state
            .lock()
            .keysigns
            .insert((tx_out.height, vault.clone()), tx_out);
    }

    pub(crate) fn set_vault_status(&self, vault: &PubKey, status: VaultStatus) {
        self.state.lock().vaults.insert(
            vault.clone(),
            Vault {
                pub_key: vault.clone(),
                status,
                members: Vec::new(),
            },
        );
    }

    /// Makes the next `count` broadcasts fail.
    pub(crate) fn fail_broadcasts(&self, count: usize) {
        self.state.lock().failing_broadcasts = count;
    }

    pub(crate) fn broadcasts(&self) -> Vec<Vec<ConsensusMsg>> {
        self.state.lock().broadcasts.clone()
    }

    pub(crate) fn keysign_failures(&self) -> Vec<KeysignFailure> {
        self.state.lock().keysign_failures.clone()
    }

    /// Signing key of this node's account.
    pub(crate) fn node_pub_key(&self) -> PubKey {
        self.state.lock().node_account.pub_key_set.secp256k1.clone()
    }

    /// Reports the node's key as unset for the next `calls` lookups.
    pub(crate) fn register_node_after(&self, calls: usize) {
        self.state.lock().unregistered_node_calls = calls;
    }

    pub(crate) fn fail_node_account(&self, fail: bool) {
        self.state.lock().fail_node_account = fail;
    }

    pub(crate) fn node_account_calls(&self) -> usize {
        self.state.lock().node_account_calls
    }
}

#[async_trait]
impl Bridge for MockBridge {
    async fn get_block_height(&self) -> Result<BlockHeight, BridgeError> {
        Ok(self.state.lock().height)
    }

    async fn is_catching_up(&self) -> Result<bool, BridgeError> {
        let state = self.state.lock();
        if state.fail_catching_up {
            return Err(BridgeError::Rpc("node unreachable".to_string()));
        }
        Ok(state.catching_up)
    }

    async fn get_mimir(&self, key: &str) -> Result<i64, BridgeError> {
        let mut state = self.state.lock();
        state.mimir_calls += 1;
        Ok(state.mimirs.get(key).copied().unwrap_or_default())
    }

    async fn get_constants(&self) -> Result<HashMap<String, i64>, BridgeError> {
        let mut state = self.state.lock();
        state.constants_calls += 1;
        if state.fail_constants {
            return Err(BridgeError::Rpc("node unreachable".to_string()));
        }
        Ok(state.constants.clone())
    }

    async fn get_keysign(&self, height: BlockHeight, vault: &PubKey) -> Result<TxOut, BridgeError> {
        Ok(self
            .state
            .lock()
            .keysigns
            .get(&(height, vault.clone()))
            .cloned()
            .unwrap_or(TxOut {
                height,
                tx_array: Vec::new(),
            }))
    }

    async fn get_vault(&self, vault: &PubKey) -> Result<Vault, BridgeError> {
        Ok(self
            .state
            .lock()
            .vaults
            .get(vault)
            .cloned()
            .unwrap_or_else(|| Vault {
                pub_key: vault.clone(),
                status: VaultStatus::Active,
                members: Vec::new(),
            }))
    }

    async fn get_node_account(&self, address: &str) -> Result<NodeAccount, BridgeError> {
        let mut state = self.state.lock();
        state.node_account_calls += 1;
        if state.fail_node_account {
            return Err(BridgeError::NotFound(format!("node account {address}")));
        }

        let mut account = NodeAccount {
            node_address: address.to_string(),
            ..state.node_account.clone()
        };
        if state.unregistered_node_calls > 0 {
            state.unregistered_node_calls -= 1;
            account.pub_key_set = PubKeySet::default();
        }
        Ok(account)
    }

    async fn broadcast(&self, msgs: Vec<ConsensusMsg>) -> Result<TxId, BridgeError> {
        let mut state = self.state.lock();
        if state.failing_broadcasts > 0 {
            state.failing_broadcasts -= 1;
            return Err(BridgeError::Rpc("mempool full".to_string()));
        }
        state.broadcasts.push(msgs);
        Ok(TxId::new(format!("CONSENSUS-{}", state.broadcasts.len())))
    }

    async fn post_keysign_failure(
        &self,
        blame: &Blame,
        height: BlockHeight,
        memo: &str,
        coins: &[Coin],
        vault: &PubKey,
    ) -> Result<TxId, BridgeError> {
        let mut state = self.state.lock();
        if state.failing_broadcasts > 0 {
            state.failing_broadcasts -= 1;
            return Err(BridgeError::Rpc("mempool full".to_string()));
        }
        state.keysign_failures.push(KeysignFailure {
            blame: blame.clone(),
            height,
            memo: memo.to_string(),
            coins: coins.to_vec(),
            vault: vault.clone(),
        });
        Ok(TxId::new(format!("FAILURE-{}", state.keysign_failures.len())))
    }
}

/// A call to [`ChainClient::sign_tx`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignCall {
    pub(crate) tx: TransferInstruction,
    pub(crate) checkpoint: Option<Vec<u8>>,
    pub(crate) height: BlockHeight,
}

/// A destination chain client that signs by tagging the memo.
///
/// Queued sign results are returned first. Once the queue is empty every transaction signs.
#[derive(Debug)]
pub(crate) struct MockChainClient {
    chain: Chain,
    healthy: AtomicBool,
    sign_results: Mutex<VecDeque<Result<SignedTx, SignTxFailure>>>,
    sign_calls: Mutex<Vec<SignCall>>,
    sign_delay: Duration,
    signing: AtomicUsize,
    max_signing: AtomicUsize,
    failing_broadcasts: AtomicUsize,
    broadcasts: Mutex<Vec<Vec<u8>>>,
    vault_locks: Option<VaultLockRegistry>,
}

impl MockChainClient {
    pub(crate) fn new(chain: Chain) -> Self {
        Self {
            chain,
            healthy: AtomicBool::new(true),
            sign_results: Mutex::new(VecDeque::new()),
            sign_calls: Mutex::new(Vec::new()),
            sign_delay: Duration::ZERO,
            signing: AtomicUsize::new(0),
            max_signing: AtomicUsize::new(0),
            failing_broadcasts: AtomicUsize::new(0),
            broadcasts: Mutex::new(Vec::new()),
            vault_locks: None,
        }
    }

    /// Serializes signing per vault, as unspent-output chains do.
    pub(crate) fn with_vault_locks(mut self) -> Self {
        self.vault_locks = Some(VaultLockRegistry::new());
        self
    }

    pub(crate) fn with_sign_delay(mut self, delay: Duration) -> Self {
        self.sign_delay = delay;
        self
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub(crate) fn push_sign_result(&self, result: Result<SignedTx, SignTxFailure>) {
        self.sign_results.lock().push_back(result);
    }

    /// Queues a keysign failure at `round` with `blame_nodes` blamed.
    pub(crate) fn push_keysign_failure(
        &self,
        round: &str,
        blame_nodes: Vec<PubKey>,
        checkpoint: Option<Vec<u8>>,
    ) {
        let blame = Blame {
            fail_reason: "signers did not answer".to_string(),
            round: round.to_string(),
            is_unicast: false,
            blame_nodes,
        };
        self.push_sign_result(Err(SignTxFailure {
            checkpoint,
            source: ChainClientError::Keysign(KeysignError::new(blame)),
        }));
    }

    pub(crate) fn fail_broadcasts(&self, count: usize) {
        self.failing_broadcasts.store(count, Ordering::SeqCst);
    }

    pub(crate) fn sign_calls(&self) -> Vec<SignCall> {
        self.sign_calls.lock().clone()
    }

    pub(crate) fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.broadcasts.lock().clone()
    }

    /// Largest number of transactions signed at the same time.
    pub(crate) fn max_concurrent_signing(&self) -> usize {
        self.max_signing.load(Ordering::SeqCst)
    }

    fn default_signed(&self, tx: &TransferInstruction) -> SignedTx {
        let raw = format!("signed:{}", tx.memo).into_bytes();
        SignedTx {
            observation: Some(TxInItem {
                tx: TxId::new(hex_digest(&raw)),
                memo: tx.memo.clone(),
                to: tx.to_address.clone(),
                coins: tx.coins.clone(),
                gas: tx.max_gas.clone(),
                observed_vault_pub_key: tx.vault_pub_key.clone(),
                ..Default::default()
            }),
            raw,
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain(&self) -> Chain {
        self.chain
    }

    fn get_address(&self, vault: &PubKey) -> Result<String, ChainClientError> {
        Ok(format!("{}-{}", self.chain.ticker().to_lowercase(), vault))
    }

    async fn sign_tx(
        &self,
        tx: &TransferInstruction,
        checkpoint: Option<&[u8]>,
        height: BlockHeight,
    ) -> Result<SignedTx, SignTxFailure> {
        self.sign_calls.lock().push(SignCall {
            tx: tx.clone(),
            checkpoint: checkpoint.map(<[u8]>::to_vec),
            height,
        });

        let signing = self.signing.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_signing.fetch_max(signing, Ordering::SeqCst);
        if !self.sign_delay.is_zero() {
            tokio::time::sleep(self.sign_delay).await;
        }
        self.signing.fetch_sub(1, Ordering::SeqCst);

        let queued = self.sign_results.lock().pop_front();
        queued.unwrap_or_else(|| Ok(self.default_signed(tx)))
    }

    async fn broadcast_tx(
        &self,
        _tx: &TransferInstruction,
        signed_tx: &[u8],
    ) -> Result<TxId, ChainClientError> {
        let failing = self.failing_broadcasts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_broadcasts.store(failing - 1, Ordering::SeqCst);
            return Err(ChainClientError::Rpc("connection reset".to_string()));
        }

        self.broadcasts.lock().push(signed_tx.to_vec());
        Ok(TxId::new(hex_digest(signed_tx)))
    }

    fn is_block_scanner_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn as_vault_lockable(&self) -> Option<&dyn VaultLockable> {
        self.vault_locks
            .as_ref()
            .map(|locks| locks as &dyn VaultLockable)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect()
}

/// Keygen ceremonies with scripted outcomes.
#[derive(Debug, Default)]
pub(crate) struct MockKeygen {
    results: Mutex<VecDeque<Result<PubKey, KeygenError>>>,
    calls: AtomicUsize,
}

impl MockKeygen {
    pub(crate) fn push_result(&self, result: Result<PubKey, KeygenError>) {
        self.results.lock().push_back(result);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThresholdKeygen for MockKeygen {
    async fn generate_new_key(
        &self,
        _height: BlockHeight,
        _members: &[PubKey],
    ) -> Result<PubKey, KeygenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results.lock().pop_front().unwrap_or_else(|| {
            Err(KeygenError {
                reason: "no keygen result queued".to_string(),
                blame: Blame::default(),
            })
        })
    }
}

/// A signing party holding the whole secret key, or one this node is not part of.
#[derive(Debug, Default)]
pub(crate) struct MockTssSigner {
    secret_key: Option<SecretKey>,
}

impl MockTssSigner {
    pub(crate) const fn with_secret_key(secret_key: SecretKey) -> Self {
        Self {
            secret_key: Some(secret_key),
        }
    }

    pub(crate) const fn not_in_party() -> Self {
        Self { secret_key: None }
    }

    /// Compact signature of the SHA-256 digest of `msg`.
    ///
    /// # Panics
    ///
    /// If the signer holds no key.
    pub(crate) fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let secret_key = self.secret_key.expect("signer must hold a key");
        let digest: [u8; 32] = Sha256::digest(msg).into();
        SECP256K1
            .sign_ecdsa(&Message::from_digest(digest), &secret_key)
            .serialize_compact()
            .to_vec()
    }
}

#[async_trait]
impl ThresholdSigner for MockTssSigner {
    async fn remote_sign(
        &self,
        msg: &[u8],
        _pub_key: &PubKey,
    ) -> Result<Option<Vec<u8>>, KeysignError> {
        Ok(self.secret_key.map(|_| self.sign(msg)))
    }
}

/// Keys this node holds shares of, and every key registered since.
#[derive(Debug, Default)]
pub(crate) struct MockPubKeys {
    signer_keys: Mutex<HashSet<PubKey>>,
    added: Mutex<Vec<(PubKey, bool)>>,
    node_pub_key: Mutex<Option<PubKey>>,
}

impl MockPubKeys {
    pub(crate) fn with_keys(keys: impl IntoIterator<Item = PubKey>) -> Self {
        Self {
            signer_keys: Mutex::new(keys.into_iter().collect()),
            added: Mutex::new(Vec::new()),
            node_pub_key: Mutex::new(None),
        }
    }

    pub(crate) fn added(&self) -> Vec<(PubKey, bool)> {
        self.added.lock().clone()
    }

    pub(crate) fn node_pub_key(&self) -> Option<PubKey> {
        self.node_pub_key.lock().clone()
    }
}

impl PubKeyValidator for MockPubKeys {
    fn has_pub_key(&self, pub_key: &PubKey) -> bool {
        self.signer_keys.lock().contains(pub_key)
    }

    fn add_pub_key(&self, pub_key: PubKey, signer: bool) {
        if signer {
            self.signer_keys.lock().insert(pub_key.clone());
        }
        self.added.lock().push((pub_key, signer));
    }

    fn add_node_pub_key(&self, pub_key: PubKey) {
        *self.node_pub_key.lock() = Some(pub_key);
    }
}

/// Collects reported observations.
#[derive(Debug, Default)]
pub(crate) struct MockObserver {
    observed: Mutex<Vec<TxIn>>,
}

impl MockObserver {
    pub(crate) fn observed(&self) -> Vec<TxIn> {
        self.observed.lock().clone()
    }
}

impl Observer for MockObserver {
    fn observe_signed(&self, tx_in: TxIn) {
        self.observed.lock().push(tx_in);
    }
}

/// A [`SignerCore`] wired to in-memory collaborators.
/// An in-memory store whose removals can be made to fail.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: InMemoryOutboundStore,
    fail_removes: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutboundStore for FlakyStore {
    async fn set(&self, item: &OutboundItem) -> DbResult<()> {
        self.inner.set(item).await
    }

    async fn get(&self, key: &ItemKey) -> DbResult<Option<OutboundItem>> {
        self.inner.get(key).await
    }

    async fn remove(&self, item: &OutboundItem) -> DbResult<()> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        self.inner.remove(item).await
    }

    async fn list(&self) -> DbResult<Vec<OutboundItem>> {
        self.inner.list().await
    }

    async fn close(&self) -> DbResult<()> {
        self.inner.close().await
    }
}

pub(crate) struct CoreHarness {
    pub(crate) core: Arc<SignerCore>,
    pub(crate) bridge: Arc<MockBridge>,
    pub(crate) store: Arc<FlakyStore>,
    pub(crate) observer: Arc<MockObserver>,
    pub(crate) clients: HashMap<Chain, Arc<MockChainClient>>,
}

impl CoreHarness {
    /// Builds a core whose node holds shares of `vaults`, with one client per chain in `clients`.
    pub(crate) fn new(
        config: SignerConfig,
        vaults: impl IntoIterator<Item = PubKey>,
        clients: Vec<MockChainClient>,
    ) -> Self {
        init_test_logging();

        let bridge = Arc::new(MockBridge::default());
        let store = Arc::new(FlakyStore::default());
        let pubkeys = Arc::new(MockPubKeys::with_keys(vaults));
        let observer = Arc::new(MockObserver::default());

        let clients: HashMap<_, _> = clients
            .into_iter()
            .map(|client| (client.chain(), Arc::new(client)))
            .collect();
        let chains: ChainRegistry = clients
            .iter()
            .map(|(chain, client)| (*chain, client.clone() as Arc<dyn ChainClient>))
            .collect();

        let core = Arc::new(SignerCore {
            config,
            bridge: bridge.clone(),
            store: store.clone() as Arc<dyn OutboundStore>,
            chains,
            pubkeys,
            observer: observer.clone(),
            constants: ConstantsCache::new(bridge.clone()),
            cancel: CancellationToken::new(),
        });

        Self {
            core,
            bridge,
            store,
            observer,
            clients,
        }
    }

    pub(crate) fn client(&self, chain: Chain) -> &MockChainClient {
        &self.clients[&chain]
    }
}
