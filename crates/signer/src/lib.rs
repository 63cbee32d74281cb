//! Outbound signing for the bridge validator.
//!
//! The [`Signer`](signer::Signer) queues the outbound transfers consensus schedules for this
//! node's vaults, signs them with the threshold signing service, broadcasts them to their
//! destination chains and reports the outcome. It also runs the key generation ceremonies
//! consensus requests during churns.
//!
//! Items are queued durably in an [`OutboundStore`](bifrost_db::outbound::OutboundStore) and
//! processed per `(chain, vault)` group in scheduling order by the
//! [`SigningPipeline`](pipeline::SigningPipeline).

pub mod bridge_cache;
pub mod config;
pub mod constants_cache;
pub mod errors;
pub mod keygen;
pub mod pipeline;
pub mod retry;
pub mod sign;
pub mod signer;
pub mod traits;
pub mod vault_lock;

#[cfg(test)]
mod testing;
