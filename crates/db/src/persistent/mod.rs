//! SQLite-backed persistence of outbound items.

pub mod errors;
pub mod sqlite;
