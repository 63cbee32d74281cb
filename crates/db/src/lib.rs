//! Durable queue of the outbound items the signer still has to sign or broadcast.
//!
//! [`outbound::OutboundStore`] is the contract the signer programs against. It has an in-memory
//! implementation for tests and ephemeral nodes, and an SQLite implementation for production.

pub mod errors;
pub mod inmemory;
pub mod outbound;
pub mod persistent;
