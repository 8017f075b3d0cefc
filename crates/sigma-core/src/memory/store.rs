//! Persistent memory store trait.
//!
//! Defines the storage contract shared by every backend. Implementations
//! (SQLite, JSON file, in-process graph) live in sigma-infra.

use chrono::{DateTime, Utc};
use sigma_types::error::StorageError;
use sigma_types::memory::{
    Entity, EntityRelation, ExtractedEntity, Fact, FactQuery, Message, Relationship, StoreStats,
};
use uuid::Uuid;

/// Durable store for messages, entities, facts and the edges between them.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in sigma-infra.
pub trait MemoryStore: Send + Sync {
    /// Store one conversation turn, upsert each entity and link it with a
    /// `mentions` edge. Returns the new message id.
    ///
    /// Not atomic across entities: a failure partway through leaves the
    /// message with only the entities written so far.
    fn store_message(
        &self,
        content: &str,
        response: &str,
        entities: &[ExtractedEntity],
    ) -> impl std::future::Future<Output = Result<Uuid, StorageError>> + Send;

    /// Upsert an entity by `(name, type)`.
    ///
    /// New entities get `created == updated == now`. Existing ones merge
    /// properties (incoming keys win) and refresh `updated`. With a message
    /// id that exists, a `mentions` edge is added as well.
    fn store_entity(
        &self,
        entity: &ExtractedEntity,
        message_id: Option<Uuid>,
    ) -> impl std::future::Future<Output = Result<Entity, StorageError>> + Send;

    /// Append a fact with the default confidence, optionally linked to a
    /// message with a `contains-fact` edge. Never deduplicates.
    fn store_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        message_id: Option<Uuid>,
    ) -> impl std::future::Future<Output = Result<Uuid, StorageError>> + Send;

    /// Conversation messages ranked by keyword coverage, newest first on ties.
    fn relevant_memories(
        &self,
        query: &str,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StorageError>> + Send;

    /// Conversation messages, newest first.
    fn recent_conversations(
        &self,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StorageError>> + Send;

    /// Entities co-mentioned with any entity named `entity_name`.
    fn entity_relations(
        &self,
        entity_name: &str,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<EntityRelation>, StorageError>> + Send;

    /// Facts matching the query, by confidence then recency, at most
    /// [`FACT_SEARCH_CAP`](sigma_types::memory::FACT_SEARCH_CAP).
    fn search_facts(
        &self,
        query: &FactQuery,
    ) -> impl std::future::Future<Output = Result<Vec<Fact>, StorageError>> + Send;

    fn get_entity(
        &self,
        name: &str,
        entity_type: &str,
    ) -> impl std::future::Future<Output = Result<Option<Entity>, StorageError>> + Send;

    /// Outgoing edges of a message.
    fn relationships_for_message(
        &self,
        message_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Relationship>, StorageError>> + Send;

    /// Unflagged conversation messages older than `cutoff`, oldest first.
    fn unconsolidated_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StorageError>> + Send;

    /// Set the consolidated flag. Returns how many messages changed.
    fn mark_consolidated(
        &self,
        message_ids: &[Uuid],
    ) -> impl std::future::Future<Output = Result<u64, StorageError>> + Send;

    fn stats(&self) -> impl std::future::Future<Output = Result<StoreStats, StorageError>> + Send;

    /// Release backend resources. Safe to call more than once.
    fn close(&self) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;
}
