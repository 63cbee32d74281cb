//! This crate contains the data model shared by the bifrost signer crates: chains, keys, outbound
//! items, observations, vaults, node accounts and keygen requests, along with the names of the
//! consensus constants and mimir policy values the signer reads.
//!
//! It lies at the bottom of the crate-hierarchy in this workspace i.e., it does not depend on any
//! other crate in this workspace.

pub mod chain;
pub mod constants;
pub mod errors;
pub mod keygen;
pub mod keys;
pub mod messages;
pub mod node;
pub mod observation;
pub mod outbound;
pub mod vault;

/// Height of a block on the consensus chain.
///
/// Signed because the signer routinely computes differences between heights that can go below
/// zero.
pub type BlockHeight = i64;
