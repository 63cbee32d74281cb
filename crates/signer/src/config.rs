//! Configuration of the signer.

use std::time::Duration;

use bifrost_primitives::{chain::Chain, constants::CONSENSUS_BLOCK_TIME};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of blocks before the reschedule point after which an item is given up.
pub const DEFAULT_RESCHEDULE_BUFFER_BLOCKS: i64 = 150;

/// Default budget of one keygen ceremony.
pub const DEFAULT_KEYGEN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default budget of one sign-and-broadcast attempt.
pub const DEFAULT_KEYSIGN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default pause between two signing passes.
pub const DEFAULT_SIGN_INTERVAL: Duration = Duration::from_secs(1);

/// Default time to wait at startup for the operator to register the node's signing key.
pub const DEFAULT_NODE_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Configuration of the [`Signer`](crate::signer::Signer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Items scheduled more than a signing period minus this many blocks ago are dropped, since
    /// consensus is about to hand them to another vault.
    pub reschedule_buffer_blocks: i64,

    /// Whether to report the observation of an outbound as soon as it is broadcast.
    pub auto_observe: bool,

    /// Budget of one keygen ceremony. Keygen retries are only scheduled if they are spaced out
    /// by more than one and a half times this.
    pub keygen_timeout: Duration,

    /// Budget of one sign-and-broadcast attempt.
    pub keysign_timeout: Duration,

    /// Expected time between two consensus blocks.
    pub block_time: Duration,

    /// Pause between two signing passes.
    pub sign_interval: Duration,

    /// Upper bound on the time spent submitting a keygen result.
    pub keygen_broadcast_max_elapsed: Duration,

    /// How long startup waits for the node account to carry a signing key. The account is
    /// polled once per block.
    pub node_account_timeout: Duration,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            reschedule_buffer_blocks: DEFAULT_RESCHEDULE_BUFFER_BLOCKS,
            auto_observe: true,
            keygen_timeout: DEFAULT_KEYGEN_TIMEOUT,
            keysign_timeout: DEFAULT_KEYSIGN_TIMEOUT,
            block_time: CONSENSUS_BLOCK_TIME,
            sign_interval: DEFAULT_SIGN_INTERVAL,
            keygen_broadcast_max_elapsed: CONSENSUS_BLOCK_TIME,
            node_account_timeout: DEFAULT_NODE_ACCOUNT_TIMEOUT,
        }
    }
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A duration that paces a loop is zero.
    #[error("{0} must not be zero")]
    ZeroDuration(&'static str),

    /// The reschedule buffer is negative.
    #[error("reschedule buffer must not be negative, got {0}")]
    NegativeRescheduleBuffer(i64),

    /// A chain client is registered under a chain it does not serve.
    #[error("client for {served} registered as {registered}")]
    MisregisteredChain {
        /// Chain the client is registered under.
        registered: Chain,

        /// Chain the client serves.
        served: Chain,
    },
}

impl SignerConfig {
    /// Checks that the configuration can drive the signer's loops.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("keygen_timeout", self.keygen_timeout),
            ("keysign_timeout", self.keysign_timeout),
            ("block_time", self.block_time),
            ("sign_interval", self.sign_interval),
            ("keygen_broadcast_max_elapsed", self.keygen_broadcast_max_elapsed),
        ];
        if let Some((name, _)) = durations.into_iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::ZeroDuration(name));
        }

        if self.reschedule_buffer_blocks < 0 {
            return Err(ConfigError::NegativeRescheduleBuffer(
                self.reschedule_buffer_blocks,
            ));
        }

        Ok(())
    }
}
