//! Names of the consensus constants and mimir policy values read by the signer, and the defaults
//! that apply when a policy value is unset.

use std::time::Duration;

use crate::chain::Chain;

/// Number of blocks an outbound stays assigned to a vault before consensus reschedules it.
pub const SIGNING_TRANSACTION_PERIOD: &str = "SigningTransactionPeriod";

/// Number of blocks between churns. Constants can only change across a churn boundary.
pub const CHURN_INTERVAL: &str = "ChurnInterval";

/// Number of blocks after which a failed churn is retried with a fresh keygen.
pub const CHURN_RETRY_INTERVAL: &str = "ChurnRetryInterval";

/// Number of blocks between keygen retries of the same keygen block.
pub const KEYGEN_RETRY_INTERVAL: &str = "KeygenRetryInterval";

/// Number of outbound items signed concurrently.
pub const SIGNER_CONCURRENCY: &str = "SignerConcurrency";

/// Number of signing periods a round-7 retry may span before it is abandoned.
pub const MAX_OUTBOUND_ATTEMPTS: &str = "MAXOUTBOUNDATTEMPTS";

/// Height from which signing is halted on every chain.
pub const HALT_SIGNING: &str = "HALTSIGNING";

/// Template of the height from which signing is halted on one chain. `{ref}` is replaced by the
/// chain ticker.
pub const HALT_SIGNING_CHAIN: &str = "HALTSIGNING{ref}";

/// Placeholder substituted by [`mimir_with_ref`].
pub const MIMIR_REF_PLACEHOLDER: &str = "{ref}";

/// Default signing period used when the consensus chain does not report one.
pub const DEFAULT_SIGNING_TRANSACTION_PERIOD: i64 = 300;

/// Default churn interval used when the consensus chain does not report one.
pub const DEFAULT_CHURN_INTERVAL: i64 = 43_200;

/// Churn retry interval used when the mimir value is unset or non-positive.
pub const DEFAULT_CHURN_RETRY_INTERVAL: i64 = 720;

/// Signer concurrency used when the mimir value is unset or non-positive.
pub const DEFAULT_SIGNER_CONCURRENCY: i64 = 10;

/// Expected time between two consensus blocks.
pub const CONSENSUS_BLOCK_TIME: Duration = Duration::from_secs(5);

/// Round name reported in the blame of a keysign that failed at its final round.
pub const KEYSIGN_ROUND_7: &str = "SignRound7Message";

/// Expands a mimir key template with its reference.
pub fn mimir_with_ref(template: &str, reference: &str) -> String {
    template.replace(MIMIR_REF_PLACEHOLDER, reference)
}

/// Mimir key of the per-chain signing halt.
pub fn halt_signing_key(chain: Chain) -> String {
    mimir_with_ref(HALT_SIGNING_CHAIN, chain.ticker())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_signing_key_is_suffixed_with_ticker() {
        assert_eq!(halt_signing_key(Chain::Btc), "HALTSIGNINGBTC");
        assert_eq!(halt_signing_key(Chain::Doge), "HALTSIGNINGDOGE");
    }
}
