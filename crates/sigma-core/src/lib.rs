//! Business logic and store trait definitions for Sigma.
//!
//! This crate defines the "ports" (the persistent store and extraction
//! traits) that the infrastructure layer and the generation component
//! implement, plus the logic that is identical for every backend: keyword
//! relevance, fact ranking, the session cache, and the memory orchestrator.
//! Among workspace crates it depends only on `sigma-types`, never on `sigma-infra` or any
//! database/IO crate.

pub mod clock;
pub mod memory;
