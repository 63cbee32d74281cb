//! Utilities shared by every process embedding the bifrost signer, such as initializing the
//! tracing framework.

pub mod logging;

// Re-export tracing crate for convenience.
pub use tracing;
