//! The sign and broadcast state machine run for every outbound item.
//!
//! An attempt first runs a series of checks that may drop the item for good, then signs it
//! (or reuses a previously signed transaction) and broadcasts it. Everything up to the broadcast
//! runs under the keysign timeout. The broadcast itself is never interrupted, so that a
//! transaction cannot leave this node without the outcome being recorded.

use std::sync::Arc;

use async_trait::async_trait;
use bifrost_db::{
    errors::DbError,
    outbound::{OrderedLists, OutboundStore},
};
use bifrost_primitives::{
    constants::{
        HALT_SIGNING, HALT_SIGNING_CHAIN, MAX_OUTBOUND_ATTEMPTS, SIGNING_TRANSACTION_PERIOD,
    },
    errors::Blame,
    keys::TxId,
    observation::{TxIn, TxInItem},
    outbound::{OutboundItem, TxOut, TxStatus},
    BlockHeight,
};
use tokio::{
    sync::OwnedMutexGuard,
    time::{timeout_at, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::SignerConfig,
    constants_cache::ConstantsCache,
    errors::SignerError,
    pipeline::PipelineSigner,
    retry::{retry_with, submission_backoff},
    traits::{Bridge, ChainClient, ChainRegistry, Observer, PubKeyValidator, SignedTx},
};

/// Why an item was given up without signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// A round-7 retry spanned more signing periods than allowed.
    MaxOutboundAttempts {
        /// Signing periods elapsed since the item was scheduled.
        attempt: i64,
    },

    /// Consensus is about to reschedule the item to another vault.
    Stale,

    /// Signing is halted on every chain.
    HaltedGlobally,

    /// Signing is halted on the item's chain.
    HaltedChain,

    /// This node holds no share of the item's vault.
    NotSigner,

    /// The item has no destination.
    EmptyToAddress,

    /// The item already records an output hash.
    AlreadySent(TxId),

    /// Consensus already recorded an output hash for the item.
    SignedByPeers(TxId),

    /// The chain client had nothing to sign.
    NothingToSign,
}

/// Outcome of an attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    /// The item is given up.
    Dropped(DropReason),

    /// The signed transaction was broadcast.
    Broadcast {
        /// Hash of the broadcast transaction.
        hash: TxId,

        /// Observation to report for it.
        observation: Option<TxInItem>,
    },
}

/// Result of the interruptible part of an attempt.
enum Prepared {
    Drop(DropReason),
    Ready {
        client: Arc<dyn ChainClient>,
        signed: SignedTx,
        // held until the broadcast completes
        _vault_guard: Option<OwnedMutexGuard<()>>,
    },
}

/// Whether a halt mimir set to `halt_height` is in effect at `height`.
pub const fn is_halted(halt_height: i64, height: BlockHeight) -> bool {
    halt_height > 0 && halt_height <= height
}

/// State shared by every task of the signer.
pub struct SignerCore {
    pub(crate) config: SignerConfig,
    pub(crate) bridge: Arc<dyn Bridge>,
    pub(crate) store: Arc<dyn OutboundStore>,
    pub(crate) chains: ChainRegistry,
    pub(crate) pubkeys: Arc<dyn PubKeyValidator>,
    pub(crate) observer: Arc<dyn Observer>,
    pub(crate) constants: ConstantsCache,
    pub(crate) cancel: CancellationToken,
}

impl std::fmt::Debug for SignerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerCore")
            .field("config", &self.config)
            .field("chains", &self.chains.keys().collect::<Vec<_>>())
            .field("constants", &self.constants)
            .finish_non_exhaustive()
    }
}

impl SignerCore {
    /// Queues the instructions of a scheduling batch, one item per instruction.
    ///
    /// Items that are already queued keep their progress.
    pub async fn ingest_tx_out(&self, tx_out: TxOut) -> Result<(), SignerError> {
        info!(height = tx_out.height, count = tx_out.tx_array.len(), "received outbound batch");

        let mut items = Vec::with_capacity(tx_out.tx_array.len());
        for (index, payload) in tx_out.tx_array.into_iter().enumerate() {
            let item = OutboundItem::new(tx_out.height, payload, index as u64);
            if self.store.has(&item.key()).await? {
                debug!(key = %item.key(), "outbound item already queued");
                continue;
            }
            items.push(item);
        }

        self.store.batch(&items).await?;
        Ok(())
    }

    /// Runs one attempt on `item`, bounded by the keysign timeout up to the broadcast.
    pub async fn sign_and_broadcast(
        &self,
        item: &OutboundItem,
    ) -> Result<SignOutcome, SignerError> {
        let deadline = Instant::now() + self.config.keysign_timeout;
        let prepared = timeout_at(deadline, self.prepare(item))
            .await
            .map_err(|_| SignerError::Timeout(self.config.keysign_timeout))??;

        let (client, signed, _vault_guard) = match prepared {
            Prepared::Drop(reason) => return Ok(SignOutcome::Dropped(reason)),
            Prepared::Ready {
                client,
                signed,
                _vault_guard,
            } => (client, signed, _vault_guard),
        };

        match client.broadcast_tx(&item.payload, &signed.raw).await {
            Ok(hash) => {
                info!(%hash, chain = %item.chain(), memo = %item.payload.memo, "broadcast outbound");
                Ok(SignOutcome::Broadcast {
                    hash,
                    observation: signed.observation,
                })
            }
            Err(err) => {
                error!(chain = %item.chain(), memo = %item.payload.memo, %err, "failed to broadcast outbound");

                // only the broadcast is retried next time
                let mut signed_item = item.clone();
                signed_item.status = TxStatus::Signed;
                signed_item.signed_tx = Some(signed.raw);
                signed_item.pending_observation = signed.observation;
                if let Err(store_err) = self.store.set(&signed_item).await {
                    error!(key = %item.key(), %store_err, "failed to keep signed outbound");
                }

                Err(SignerError::Broadcast(err))
            }
        }
    }

    async fn prepare(&self, item: &OutboundItem) -> Result<Prepared, SignerError> {
        let chain = item.chain();
        let vault = item.vault_pub_key();
        let payload = &item.payload;

        let client = self
            .chains
            .get(&chain)
            .cloned()
            .ok_or(SignerError::UnsupportedChain(chain))?;

        let height = self.bridge.get_block_height().await?;
        let period = self
            .constants
            .get_int64(height, SIGNING_TRANSACTION_PERIOD)
            .await?;

        let mut inactive_vault_round7 = false;
        if item.round7_retry {
            let max_attempts = self.bridge.get_mimir(MAX_OUTBOUND_ATTEMPTS).await?;
            let attempt = (height - item.height).checked_div(period).unwrap_or(0);
            if attempt > max_attempts {
                warn!(outbound_height = item.height, height, attempt, "round 7 retry reached max outbound attempts");
                return Ok(Prepared::Drop(DropReason::MaxOutboundAttempts { attempt }));
            }

            inactive_vault_round7 = self.bridge.get_vault(vault).await?.is_inactive();
        }

        if (!item.round7_retry || inactive_vault_round7)
            && height - period > item.height - self.config.reschedule_buffer_blocks
        {
            warn!(outbound_height = item.height, height, period, "outbound is about to be rescheduled");
            return Ok(Prepared::Drop(DropReason::Stale));
        }

        if is_halted(self.bridge.get_mimir(HALT_SIGNING).await?, height) {
            info!("signing has been halted globally");
            return Ok(Prepared::Drop(DropReason::HaltedGlobally));
        }
        let chain_halt = self
            .bridge
            .get_mimir_with_ref(HALT_SIGNING_CHAIN, chain.ticker())
            .await?;
        if is_halted(chain_halt, height) {
            info!(%chain, "signing is halted");
            return Ok(Prepared::Drop(DropReason::HaltedChain));
        }

        if !self.pubkeys.has_pub_key(vault) {
            info!(%vault, address = ?client.get_address(vault).ok(), "not a member of the outbound vault");
            return Ok(Prepared::Drop(DropReason::NotSigner));
        }

        if payload.to_address.is_empty() {
            info!(memo = %payload.memo, "outbound has no destination");
            return Ok(Prepared::Drop(DropReason::EmptyToAddress));
        }

        if !client.is_block_scanner_healthy() {
            error!(%chain, "block scanner is unhealthy, refusing to sign");
            return Err(SignerError::UnhealthyScanner(chain));
        }

        if !payload.out_hash.is_empty() {
            info!(out_hash = %payload.out_hash, "outbound was sent before");
            return Ok(Prepared::Drop(DropReason::AlreadySent(payload.out_hash.clone())));
        }

        let pending = self.bridge.get_keysign(item.height, vault).await?;
        if let Some(sent) = pending
            .tx_array
            .iter()
            .find(|tx| tx.same_transfer(payload) && !tx.out_hash.is_empty())
        {
            info!(out_hash = %sent.out_hash, "outbound already signed by the vault");
            return Ok(Prepared::Drop(DropReason::SignedByPeers(sent.out_hash.clone())));
        }

        let _vault_guard = match client.as_vault_lockable() {
            Some(lockable) => Some(lockable.vault_lock(vault).lock_owned().await),
            None => None,
        };

        let signed = match item.signed_tx.as_ref().filter(|raw| !raw.is_empty()) {
            Some(raw) => {
                info!(memo = %payload.memo, "retrying broadcast of already signed outbound");
                SignedTx {
                    raw: raw.clone(),
                    observation: item.pending_observation.clone(),
                }
            }
            None => {
                let started = Instant::now();
                let signed = client
                    .sign_tx(payload, item.checkpoint.as_deref(), height)
                    .await?;
                debug!(elapsed = ?started.elapsed(), "signed outbound");
                signed
            }
        };

        if signed.raw.is_empty() {
            warn!(memo = %payload.memo, "signed transaction is empty");
            return Ok(Prepared::Drop(DropReason::NothingToSign));
        }

        Ok(Prepared::Ready {
            client,
            signed,
            _vault_guard,
        })
    }

    /// Runs one attempt on `item` and records its outcome in the store.
    ///
    /// Dropped and broadcast items are removed. A final-round signing failure marks the item
    /// for a round-7 retry with the signer's checkpoint. Any error is returned so that the rest
    /// of the item's group waits for the next pass.
    pub async fn process_transaction(&self, item: OutboundItem) -> Result<(), SignerError> {
        info!(
            key = %item.key(),
            height = item.height,
            chain = %item.chain(),
            vault = %item.vault_pub_key(),
            status = ?item.status,
            round7_retry = item.round7_retry,
            "signing outbound"
        );

        match self.sign_and_broadcast(&item).await {
            Ok(SignOutcome::Dropped(reason)) => {
                info!(key = %item.key(), ?reason, "dropping outbound");
            }
            Ok(SignOutcome::Broadcast { hash, observation }) => {
                // a failed removal must not lead to signing the item again
                let mut sent = item.clone();
                sent.payload.out_hash = hash;
                if let Err(err) = self.store.set(&sent).await {
                    error!(key = %item.key(), %err, "failed to record output hash of outbound");
                }

                if let Some(observation) = observation.filter(|_| self.config.auto_observe) {
                    self.observer
                        .observe_signed(TxIn::instant(item.chain(), observation));
                }
            }
            Err(err) => {
                if err.is_round7() {
                    error!(key = %item.key(), %err, "round 7 signing error");
                    let mut retry = item.clone();
                    retry.mark_round7(err.checkpoint().map(<[u8]>::to_vec));
                    if let Err(store_err) = self.store.set(&retry).await {
                        error!(key = %item.key(), %store_err, "failed to mark outbound for round 7 retry");
                    }
                }

                if let Some(blame) = err.keysign_blame() {
                    self.report_keysign_failure(&item, blame).await;
                }

                error!(key = %item.key(), fatal = err.is_fatal(), %err, "failed to sign and broadcast outbound");
                return Err(err);
            }
        }

        self.store.remove(&item).await?;
        Ok(())
    }

    async fn report_keysign_failure(&self, item: &OutboundItem, blame: &Blame) {
        let bridge = &self.bridge;
        let payload = &item.payload;
        let result = retry_with(submission_backoff(self.config.block_time), || async move {
            bridge
                .post_keysign_failure(
                    blame,
                    item.height,
                    &payload.memo,
                    &payload.coins,
                    &payload.vault_pub_key,
                )
                .await
                .inspect_err(|err| warn!(%err, "failed to post keysign failure"))
        })
        .await;

        match result {
            Ok(txid) => info!(%txid, nodes = ?blame.blame_nodes, "posted keysign failure"),
            Err(err) => error!(%err, "gave up posting keysign failure"),
        }
    }
}

#[async_trait]
impl PipelineSigner for SignerCore {
    fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn ordered_lists(&self) -> Result<OrderedLists, DbError> {
        self.store.ordered_lists().await
    }

    async fn process_transaction(&self, item: OutboundItem) -> Result<(), SignerError> {
        SignerCore::process_transaction(self, item).await
    }
}
