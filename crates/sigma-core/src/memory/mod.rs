//! Memory persistence, retrieval, and extraction for Sigma.
//!
//! This module defines the `MemoryStore` trait that every persistent backend
//! implements, the `Extractor` contract consumed from the generation
//! component, the short-term `SessionCache`, and the `MemoryOrchestrator`
//! that coordinates all three.

pub mod box_store;
pub mod extractor;
pub mod index;
pub mod orchestrator;
pub mod relevance;
pub mod session;
pub mod store;
