//! The signer: control loops tying the scanner's events to the signing pipeline and the keygen
//! coordinator.
//!
//! [`Signer::start`] waits for the node account to carry this node's signing key, then spawns
//! three loops on a shared [`TaskTracker`]:
//!
//! - outbound ingestion, queueing every scheduled batch in the store,
//! - keygen processing, running requested ceremonies and their retries,
//! - signing, running one pipeline pass per tick while consensus is in sync.
//!
//! [`Signer::stop`] cancels the loops and the keygen retry pollers, waits for in-flight signings
//! to complete and closes the store.

use std::{fmt, sync::Arc, time::Duration};

use bifrost_db::outbound::OutboundStore;
use bifrost_primitives::{constants::SIGNER_CONCURRENCY, keygen::KeygenBlock, outbound::TxOut};
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex},
    time::{sleep, Instant},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

use crate::{
    bridge_cache::CachedBridge,
    config::{ConfigError, SignerConfig},
    constants_cache::ConstantsCache,
    errors::SignerError,
    keygen::KeygenCoordinator,
    pipeline::{effective_concurrency, PipelineManager},
    sign::SignerCore,
    traits::{
        Bridge, ChainRegistry, Observer, PubKeyValidator, ThresholdKeygen, ThresholdSigner,
    },
};

/// Event streams delivered by the consensus block scanner.
#[derive(Debug)]
pub struct ScannerEvents {
    /// Outbound batches scheduled by consensus.
    pub tx_outs: mpsc::Receiver<TxOut>,

    /// Key generation requests.
    pub keygens: mpsc::Receiver<KeygenBlock>,
}

/// Services the signer drives.
pub struct Collaborators {
    /// Consensus account address of this node.
    pub node_address: String,

    /// Consensus chain client. Queries are cached for one block period.
    pub bridge: Arc<dyn Bridge>,

    /// Durable queue of outbound items.
    pub store: Arc<dyn OutboundStore>,

    /// Destination chain clients.
    pub chains: ChainRegistry,

    /// Tracker of the keys this node holds shares of.
    pub pubkeys: Arc<dyn PubKeyValidator>,

    /// Threshold key generation.
    pub keygen: Arc<dyn ThresholdKeygen>,

    /// Threshold signing of keygen verification messages.
    pub tss_signer: Arc<dyn ThresholdSigner>,

    /// Sink of instant observations.
    pub observer: Arc<dyn Observer>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("node_address", &self.node_address)
            .field("chains", &self.chains.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Signs and broadcasts outbound transactions and runs key generation.
pub struct Signer {
    node_address: String,
    core: Arc<SignerCore>,
    keygen: Arc<KeygenCoordinator>,

    /// Taken by the keygen loop on start.
    retry_rx: Mutex<Option<mpsc::UnboundedReceiver<KeygenBlock>>>,

    pipeline: Arc<AsyncMutex<PipelineManager>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("node_address", &self.node_address)
            .field("core", &self.core)
            .field("keygen", &self.keygen)
            .field("tasks", &self.tasks.len())
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Creates a signer. Nothing runs until [`Self::start`].
    pub fn new(config: SignerConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;

        let Collaborators {
            node_address,
            bridge,
            store,
            chains,
            pubkeys,
            keygen,
            tss_signer,
            observer,
        } = collaborators;
        check_chain_registry(&chains)?;

        let cancel = CancellationToken::new();
        let bridge: Arc<dyn Bridge> = Arc::new(CachedBridge::new(bridge, config.block_time));

        let (keygen, retry_rx) = KeygenCoordinator::new(
            config.clone(),
            bridge.clone(),
            keygen,
            tss_signer,
            pubkeys.clone(),
            &chains,
            cancel.clone(),
        );

        let core = SignerCore {
            constants: ConstantsCache::new(bridge.clone()),
            config,
            bridge,
            store,
            chains,
            pubkeys,
            observer,
            cancel: cancel.clone(),
        };

        Ok(Self {
            node_address,
            core: Arc::new(core),
            keygen: Arc::new(keygen),
            retry_rx: Mutex::new(Some(retry_rx)),
            pipeline: Arc::new(AsyncMutex::new(PipelineManager::new())),
            tasks: TaskTracker::new(),
            cancel,
        })
    }

    /// State shared by the signing tasks.
    pub const fn core(&self) -> &Arc<SignerCore> {
        &self.core
    }

    /// The keygen coordinator.
    pub const fn keygen(&self) -> &Arc<KeygenCoordinator> {
        &self.keygen
    }

    /// Registers this node's signing key, then spawns the control loops consuming `events`.
    ///
    /// Fails if the node account carries no signing key within the configured timeout, in which
    /// case nothing is started. Keygen retries are only processed by the first call.
    pub async fn start(&self, events: ScannerEvents) -> Result<(), SignerError> {
        self.register_node_key().await?;

        let ScannerEvents { tx_outs, keygens } = events;

        self.tasks.spawn(process_tx_outs(
            self.core.clone(),
            tx_outs,
            self.cancel.clone(),
        ));

        match self.retry_rx.lock().take() {
            Some(retries) => {
                self.tasks.spawn(process_keygens(
                    self.keygen.clone(),
                    keygens,
                    retries,
                    self.cancel.clone(),
                ));
            }
            None => warn!("signer already started, ignoring keygen events"),
        }

        self.tasks.spawn(sign_transactions(
            self.core.clone(),
            self.pipeline.clone(),
            self.cancel.clone(),
        ));

        Ok(())
    }

    /// Waits until the node account carries a signing key and hands it to the key tracker.
    async fn register_node_key(&self) -> Result<(), SignerError> {
        let started = Instant::now();
        let timeout = self.core.config.node_account_timeout;

        loop {
            let account = self.core.bridge.get_node_account(&self.node_address).await?;
            if let Some(pub_key) = account.signer_pub_key() {
                info!(address = %self.node_address, %pub_key, "found node signing key");
                self.core.pubkeys.add_node_pub_key(pub_key.clone());
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= timeout {
                error!(address = %self.node_address, ?waited, "node account has no signing key");
                return Err(SignerError::NodeKeyNotRegistered {
                    address: self.node_address.clone(),
                    waited,
                });
            }

            info!(address = %self.node_address, "waiting for node account to be registered");
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SignerError::Stopped),
                _ = sleep(self.core.config.block_time) => {}
            }
        }
    }

    /// Stops the control loops and pending keygen retries, waits for in-flight signings and
    /// closes the store.
    pub async fn stop(&self) -> Result<(), SignerError> {
        info!("received request to stop signer");

        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.keygen.wait().await;
        self.pipeline.lock().await.drain().await;

        self.core.store.close().await?;

        info!("signer stopped");
        Ok(())
    }
}

async fn process_tx_outs(
    core: Arc<SignerCore>,
    mut tx_outs: mpsc::Receiver<TxOut>,
    cancel: CancellationToken,
) {
    info!("start to process outbound batches");

    loop {
        let tx_out = tokio::select! {
            _ = cancel.cancelled() => break,
            tx_out = tx_outs.recv() => tx_out,
        };
        let Some(tx_out) = tx_out else {
            break;
        };

        let height = tx_out.height;
        if let Err(err) = core.ingest_tx_out(tx_out).await {
            error!(height, %err, "failed to queue outbound batch");
        }
    }

    info!("stop to process outbound batches");
}

async fn process_keygens(
    keygen: Arc<KeygenCoordinator>,
    mut keygens: mpsc::Receiver<KeygenBlock>,
    mut retries: mpsc::UnboundedReceiver<KeygenBlock>,
    cancel: CancellationToken,
) {
    info!("start to process keygens");

    // the retry queue outlives a closed scanner stream, so only cancellation ends the loop
    loop {
        let block = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(block) = keygens.recv() => block,
            Some(block) = retries.recv() => block,
        };

        // a block being processed is always reported, even when stopping
        info!(height = block.height, "received keygen block");
        keygen.process_keygen_block(&block).await;
    }

    info!("stop to process keygens");
}

async fn sign_transactions(
    core: Arc<SignerCore>,
    pipeline: Arc<AsyncMutex<PipelineManager>>,
    cancel: CancellationToken,
) {
    info!("start to sign transactions");

    while !cancel.is_cancelled() {
        let pause = match core.bridge.is_catching_up().await {
            Ok(true) => {
                info!("consensus is catching up, not signing");
                core.config.sign_interval
            }
            Ok(false) => {
                process_transactions(&core, &pipeline).await;
                core.config.sign_interval
            }
            Err(err) => {
                error!(%err, "failed to get consensus sync status");
                core.config.block_time
            }
        };

        pause_unless_cancelled(&cancel, pause).await;
    }

    pipeline.lock().await.drain().await;
    info!("stop to sign transactions");
}

async fn process_transactions(core: &Arc<SignerCore>, pipeline: &AsyncMutex<PipelineManager>) {
    let concurrency = match core.bridge.get_mimir(SIGNER_CONCURRENCY).await {
        Ok(value) => effective_concurrency(value),
        Err(err) => {
            error!(%err, "failed to get signer concurrency");
            return;
        }
    };

    pipeline
        .lock()
        .await
        .process_transactions(core.clone(), concurrency)
        .await;
}

/// Rejects clients registered under a chain they do not serve.
fn check_chain_registry(chains: &ChainRegistry) -> Result<(), ConfigError> {
    for (chain, client) in chains {
        let served = client.chain();
        if served != *chain {
            return Err(ConfigError::MisregisteredChain {
                registered: *chain,
                served,
            });
        }

        if chain.is_utxo() && client.as_vault_lockable().is_none() {
            warn!(%chain, "client of an unspent-output chain does not lock vaults");
        }
    }

    Ok(())
}

async fn pause_unless_cancelled(cancel: &CancellationToken, pause: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(pause) => {}
    }
}
