//! Shared domain types for Sigma.
//!
//! This crate contains the data model of the assistant's memory subsystem:
//! messages, entities, facts, the relationships between them, session
//! entries, and the error and configuration types shared across crates.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod memory;
