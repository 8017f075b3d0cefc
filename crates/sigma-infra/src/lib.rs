//! Infrastructure layer for Sigma.
//!
//! Contains the implementations of the `MemoryStore` trait defined in
//! `sigma-core` (SQLite tables, a JSON snapshot file, an in-process graph),
//! startup backend selection, and the configuration file loader.

pub mod backend;
pub mod config;
pub mod file;
pub mod graph;
mod snapshot;
pub mod sqlite;

#[cfg(test)]
mod contract_tests;
