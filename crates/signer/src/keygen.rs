//! Key generation requested by consensus.
//!
//! The [`KeygenCoordinator`] runs each requested ceremony, proves the new key can sign, reports
//! the outcome and registers the keys involved. A failed ceremony is retried at the next retry
//! boundary for as long as the churn window allows: a poller waits for the target height and
//! hands the request back to the keygen loop.

use std::{fmt, sync::Arc};

use bifrost_primitives::{
    chain::Chain,
    constants::{CHURN_RETRY_INTERVAL, DEFAULT_CHURN_RETRY_INTERVAL, KEYGEN_RETRY_INTERVAL},
    errors::Blame,
    keygen::{Keygen, KeygenBlock},
    keys::{PubKey, PubKeyError, TxId},
    messages::{ConsensusMsg, TssPoolMsg},
    BlockHeight,
};
use secp256k1::{ecdsa::Signature, Message, SECP256K1};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    config::SignerConfig,
    retry::{retry_with, submission_backoff},
    traits::{Bridge, BridgeError, ChainRegistry, PubKeyValidator, ThresholdKeygen, ThresholdSigner},
};

/// A verification signature that does not match the key it claims to be made with.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// The key does not decode.
    #[error("invalid pubkey: {0}")]
    PubKey(#[from] PubKeyError),

    /// The signature is malformed or does not verify.
    #[error("invalid signature: {0}")]
    Signature(#[from] secp256k1::Error),
}

/// Checks a 64-byte compact ECDSA signature of the SHA-256 digest of `msg` against `pub_key`.
///
/// High-S signatures are accepted.
pub fn verify_signature(
    pub_key: &PubKey,
    msg: &[u8],
    signature: &[u8],
) -> Result<(), VerificationError> {
    let pub_key = pub_key.to_secp256k1()?;

    let mut signature = Signature::from_compact(signature)?;
    signature.normalize_s();

    let digest: [u8; 32] = Sha256::digest(msg).into();
    SECP256K1.verify_ecdsa(&Message::from_digest(digest), &signature, &pub_key)?;

    Ok(())
}

/// Height at which a keygen requested at `block_height` is retried when the chain is at
/// `current_height`: the next retry boundary counted from the request.
///
/// Returns `None` when retries are disabled or the boundary falls within one retry interval of
/// the churn deadline.
pub fn next_retry_height(
    block_height: BlockHeight,
    current_height: BlockHeight,
    retry_interval: i64,
    churn_retry_interval: i64,
) -> Option<BlockHeight> {
    if retry_interval <= 0 {
        return None;
    }

    let target =
        retry_interval - (current_height - block_height).rem_euclid(retry_interval) + current_height;

    (target <= block_height + churn_retry_interval - retry_interval).then_some(target)
}

/// Runs keygen ceremonies and schedules their retries.
pub struct KeygenCoordinator {
    config: SignerConfig,
    bridge: Arc<dyn Bridge>,
    keygen: Arc<dyn ThresholdKeygen>,
    tss_signer: Arc<dyn ThresholdSigner>,
    pubkeys: Arc<dyn PubKeyValidator>,

    /// Chains reported as served by new keys.
    chains: Vec<Chain>,

    /// Where pollers hand back requests due for a retry.
    retries: mpsc::UnboundedSender<KeygenBlock>,

    /// Retry pollers.
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl fmt::Debug for KeygenCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeygenCoordinator")
            .field("chains", &self.chains)
            .field("pending_retries", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl KeygenCoordinator {
    /// Creates a coordinator and the receiving end of its retry queue.
    pub fn new(
        config: SignerConfig,
        bridge: Arc<dyn Bridge>,
        keygen: Arc<dyn ThresholdKeygen>,
        tss_signer: Arc<dyn ThresholdSigner>,
        pubkeys: Arc<dyn PubKeyValidator>,
        chain_clients: &ChainRegistry,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<KeygenBlock>) {
        let mut chains = vec![Chain::Switchly];
        chains.extend(
            chain_clients
                .keys()
                .copied()
                .filter(|chain| *chain != Chain::Switchly),
        );

        let (retries, retry_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            config,
            bridge,
            keygen,
            tss_signer,
            pubkeys,
            chains,
            retries,
            tasks: TaskTracker::new(),
            cancel,
        };

        (coordinator, retry_rx)
    }

    /// Runs every keygen of `block`.
    ///
    /// A failed ceremony is rescheduled when possible. Otherwise the outcome is reported to
    /// consensus, with the blame of a failure, and the keys involved are registered.
    pub async fn process_keygen_block(&self, block: &KeygenBlock) {
        info!(height = block.height, keygens = block.keygens.len(), "processing keygen block");

        for keygen in &block.keygens {
            let started = Instant::now();
            let (pool_pub_key, blame) = match self
                .keygen
                .generate_new_key(block.height, &keygen.members)
                .await
            {
                Ok(pool_pub_key) => (pool_pub_key, Blame::default()),
                Err(err) => {
                    error!(
                        height = block.height,
                        reason = %err.reason,
                        blame_nodes = ?err.blame.blame_nodes,
                        "keygen failed"
                    );
                    (PubKey::default(), err.blame)
                }
            };
            let keygen_time_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

            let verification_signature = if pool_pub_key.is_empty() {
                if self.schedule_keygen_retry(block).await {
                    return;
                }
                error!(height = block.height, "done with keygen retries");
                None
            } else {
                self.verification_signature(&pool_pub_key).await
            };

            let msg = TssPoolMsg {
                pool_pub_key: pool_pub_key.clone(),
                verification_signature,
                blame,
                members: keygen.members.clone(),
                keygen_type: keygen.keygen_type,
                chains: self.chains.clone(),
                height: block.height,
                keygen_time_ms,
            };
            if let Err(err) = self.send_keygen_result(msg).await {
                error!(height = block.height, %err, "failed to report keygen result");
            }

            self.register_keys(pool_pub_key, keygen);
        }
    }

    /// Schedules a retry of `block` at the next retry boundary.
    ///
    /// Returns whether a retry was scheduled. Fails closed: no retry when the retry policy
    /// cannot be read, retries are disabled, or the retry cadence is too tight for a ceremony to
    /// complete.
    pub async fn schedule_keygen_retry(&self, block: &KeygenBlock) -> bool {
        let churn_retry_interval = match self.bridge.get_mimir(CHURN_RETRY_INTERVAL).await {
            Ok(interval) if interval > 0 => interval,
            Ok(_) => DEFAULT_CHURN_RETRY_INTERVAL,
            Err(err) => {
                error!(%err, "failed to read churn retry interval");
                return false;
            }
        };

        let retry_interval = match self.bridge.get_mimir(KEYGEN_RETRY_INTERVAL).await {
            Ok(interval) => interval,
            Err(err) => {
                error!(%err, "failed to read keygen retry interval");
                return false;
            }
        };
        let Ok(retry_blocks) = u32::try_from(retry_interval) else {
            debug!(retry_interval, "keygen retries are disabled");
            return false;
        };
        if retry_blocks == 0 {
            debug!("keygen retries are disabled");
            return false;
        }

        let cadence = self.config.block_time.saturating_mul(retry_blocks);
        if cadence <= self.config.keygen_timeout * 3 / 2 {
            error!(
                retry_interval = ?cadence,
                keygen_timeout = ?self.config.keygen_timeout,
                "keygen retry interval too short"
            );
            return false;
        }

        let current_height = match self.bridge.get_block_height().await {
            Ok(height) => height,
            Err(err) => {
                error!(%err, "failed to get consensus height");
                return false;
            }
        };

        let Some(target) = next_retry_height(
            block.height,
            current_height,
            retry_interval,
            churn_retry_interval,
        ) else {
            info!(
                height = block.height,
                current_height, churn_retry_interval, "too close to the churn deadline to retry keygen"
            );
            return false;
        };

        self.spawn_retry_poller(block.clone(), target);
        info!(height = block.height, retry_height = target, "scheduled keygen retry");

        true
    }

    /// Number of retries waiting for their height.
    pub fn pending_retries(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for the retry pollers to exit. They exit once the cancellation token fires.
    pub async fn wait(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn spawn_retry_poller(&self, block: KeygenBlock, target: BlockHeight) {
        let bridge = self.bridge.clone();
        let retries = self.retries.clone();
        let cancel = self.cancel.clone();
        let block_time = self.config.block_time;

        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(height = block.height, retry_height = target, "keygen retry cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(block_time) => {}
                }

                match bridge.get_block_height().await {
                    Ok(current_height) if current_height >= target => {
                        info!(height = block.height, current_height, "retrying keygen");
                        if retries.send(block).is_err() {
                            warn!("keygen loop is gone, dropping retry");
                        }
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => error!(%err, "failed to get consensus height"),
                }
            }
        });
    }

    /// Signs the new key's own encoding with the new key, to prove the members can sign.
    ///
    /// Best effort: `None` when this node is not part of the signing party or signing fails. A
    /// signature that does not verify locally is still returned, consensus rejects it.
    async fn verification_signature(&self, pool_pub_key: &PubKey) -> Option<Vec<u8>> {
        let msg = pool_pub_key.as_str().as_bytes();

        let signature = match self.tss_signer.remote_sign(msg, pool_pub_key).await {
            Ok(Some(signature)) => signature,
            Ok(None) => {
                debug!(%pool_pub_key, "not in the verification signing party");
                return None;
            }
            Err(err) => {
                info!(%pool_pub_key, %err, "failed to make verification signature");
                return None;
            }
        };

        match verify_signature(pool_pub_key, msg, &signature) {
            Ok(()) => info!(%pool_pub_key, "verification signature verified"),
            Err(err) => error!(%pool_pub_key, %err, "verification signature does not verify"),
        }

        Some(signature)
    }

    async fn send_keygen_result(&self, msg: TssPoolMsg) -> Result<TxId, BridgeError> {
        let height = msg.height;
        let bridge = &self.bridge;

        let txid = retry_with(
            submission_backoff(self.config.keygen_broadcast_max_elapsed),
            || {
                let msgs = vec![ConsensusMsg::TssPool(msg.clone())];
                async move {
                    bridge.broadcast(msgs).await.inspect_err(|err| {
                        warn!(height, %err, "failed to send keygen result");
                    })
                }
            },
        )
        .await?;

        info!(height, %txid, "sent keygen result");
        Ok(txid)
    }

    fn register_keys(&self, pool_pub_key: PubKey, keygen: &Keygen) {
        if !pool_pub_key.is_empty() {
            self.pubkeys.add_pub_key(pool_pub_key, true);
        }
        for member in &keygen.members {
            self.pubkeys.add_pub_key(member.clone(), false);
        }
    }
}
