//! SQLite storage layer.
//!
//! The relational memory store, backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod memory;
pub mod pool;
