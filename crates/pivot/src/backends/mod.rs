//! Storage Backends
//!
//! The storage contract consumed by the reconciliation engine, plus an
//! in-memory store and a PostgreSQL store implementing it.

pub mod core;
pub mod memory;
pub mod postgres;

// Re-export core traits and types
pub use core::*;
pub use memory::{MemoryStore, MemoryStoreStats};
pub use postgres::PostgresStore;
