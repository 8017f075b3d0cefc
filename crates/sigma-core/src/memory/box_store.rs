//! BoxMemoryStore -- object-safe dynamic dispatch wrapper for MemoryStore.
//!
//! 1. Define an object-safe `MemoryStoreDyn` trait with boxed futures
//! 2. Blanket-impl `MemoryStoreDyn` for all `T: MemoryStore`
//! 3. `BoxMemoryStore` wraps `Box<dyn MemoryStoreDyn>` and delegates
//!
//! `BoxMemoryStore` itself implements `MemoryStore`, so the orchestrator can be
//! generic over the store and still be handed a backend chosen at runtime.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use sigma_types::error::StorageError;
use sigma_types::memory::{
    Entity, EntityRelation, ExtractedEntity, Fact, FactQuery, Message, Relationship, StoreStats,
};
use uuid::Uuid;

use super::store::MemoryStore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Object-safe version of [`MemoryStore`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch (`dyn MemoryStoreDyn`).
/// A blanket implementation is provided for all types implementing `MemoryStore`.
pub trait MemoryStoreDyn: Send + Sync {
    fn store_message_boxed<'a>(
        &'a self,
        content: &'a str,
        response: &'a str,
        entities: &'a [ExtractedEntity],
    ) -> BoxFuture<'a, Uuid>;

    fn store_entity_boxed<'a>(
        &'a self,
        entity: &'a ExtractedEntity,
        message_id: Option<Uuid>,
    ) -> BoxFuture<'a, Entity>;

    fn store_fact_boxed<'a>(
        &'a self,
        subject: &'a str,
        predicate: &'a str,
        object: &'a str,
        message_id: Option<Uuid>,
    ) -> BoxFuture<'a, Uuid>;

    fn relevant_memories_boxed<'a>(
        &'a self,
        query: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Vec<Message>>;

    fn recent_conversations_boxed(&self, limit: usize) -> BoxFuture<'_, Vec<Message>>;

    fn entity_relations_boxed<'a>(
        &'a self,
        entity_name: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Vec<EntityRelation>>;

    fn search_facts_boxed<'a>(&'a self, query: &'a FactQuery) -> BoxFuture<'a, Vec<Fact>>;

    fn get_entity_boxed<'a>(
        &'a self,
        name: &'a str,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Option<Entity>>;

    fn relationships_for_message_boxed<'a>(
        &'a self,
        message_id: &'a Uuid,
    ) -> BoxFuture<'a, Vec<Relationship>>;

    fn unconsolidated_before_boxed(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Vec<Message>>;

    fn mark_consolidated_boxed<'a>(&'a self, message_ids: &'a [Uuid]) -> BoxFuture<'a, u64>;

    fn stats_boxed(&self) -> BoxFuture<'_, StoreStats>;

    fn close_boxed(&self) -> BoxFuture<'_, ()>;
}

/// Blanket implementation: any `MemoryStore` automatically implements `MemoryStoreDyn`.
impl<T: MemoryStore> MemoryStoreDyn for T {
    fn store_message_boxed<'a>(
        &'a self,
        content: &'a str,
        response: &'a str,
        entities: &'a [ExtractedEntity],
    ) -> BoxFuture<'a, Uuid> {
        Box::pin(self.store_message(content, response, entities))
    }

    fn store_entity_boxed<'a>(
        &'a self,
        entity: &'a ExtractedEntity,
        message_id: Option<Uuid>,
    ) -> BoxFuture<'a, Entity> {
        Box::pin(self.store_entity(entity, message_id))
    }

    fn store_fact_boxed<'a>(
        &'a self,
        subject: &'a str,
        predicate: &'a str,
        object: &'a str,
        message_id: Option<Uuid>,
    ) -> BoxFuture<'a, Uuid> {
        Box::pin(self.store_fact(subject, predicate, object, message_id))
    }

    fn relevant_memories_boxed<'a>(
        &'a self,
        query: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Vec<Message>> {
        Box::pin(self.relevant_memories(query, limit))
    }

    fn recent_conversations_boxed(&self, limit: usize) -> BoxFuture<'_, Vec<Message>> {
        Box::pin(self.recent_conversations(limit))
    }

    fn entity_relations_boxed<'a>(
        &'a self,
        entity_name: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Vec<EntityRelation>> {
        Box::pin(self.entity_relations(entity_name, limit))
    }

    fn search_facts_boxed<'a>(&'a self, query: &'a FactQuery) -> BoxFuture<'a, Vec<Fact>> {
        Box::pin(self.search_facts(query))
    }

    fn get_entity_boxed<'a>(
        &'a self,
        name: &'a str,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Option<Entity>> {
        Box::pin(self.get_entity(name, entity_type))
    }

    fn relationships_for_message_boxed<'a>(
        &'a self,
        message_id: &'a Uuid,
    ) -> BoxFuture<'a, Vec<Relationship>> {
        Box::pin(self.relationships_for_message(message_id))
    }

    fn unconsolidated_before_boxed(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Vec<Message>> {
        Box::pin(self.unconsolidated_before(cutoff, limit))
    }

    fn mark_consolidated_boxed<'a>(&'a self, message_ids: &'a [Uuid]) -> BoxFuture<'a, u64> {
        Box::pin(self.mark_consolidated(message_ids))
    }

    fn stats_boxed(&self) -> BoxFuture<'_, StoreStats> {
        Box::pin(self.stats())
    }

    fn close_boxed(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.close())
    }
}

/// Type-erased memory store for runtime backend selection.
///
/// Since `MemoryStore` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxMemoryStore` holds a `MemoryStoreDyn` trait object and
/// implements `MemoryStore` by delegating to it.
pub struct BoxMemoryStore {
    inner: Box<dyn MemoryStoreDyn + Send + Sync>,
}

impl BoxMemoryStore {
    /// Wrap a concrete `MemoryStore` in a type-erased box.
    pub fn new<T: MemoryStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }
}

impl MemoryStore for BoxMemoryStore {
    async fn store_message(
        &self,
        content: &str,
        response: &str,
        entities: &[ExtractedEntity],
    ) -> Result<Uuid, StorageError> {
        self.inner
            .store_message_boxed(content, response, entities)
            .await
    }

    async fn store_entity(
        &self,
        entity: &ExtractedEntity,
        message_id: Option<Uuid>,
    ) -> Result<Entity, StorageError> {
        self.inner.store_entity_boxed(entity, message_id).await
    }

    async fn store_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        message_id: Option<Uuid>,
    ) -> Result<Uuid, StorageError> {
        self.inner
            .store_fact_boxed(subject, predicate, object, message_id)
            .await
    }

    async fn relevant_memories(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        self.inner.relevant_memories_boxed(query, limit).await
    }

    async fn recent_conversations(&self, limit: usize) -> Result<Vec<Message>, StorageError> {
        self.inner.recent_conversations_boxed(limit).await
    }

    async fn entity_relations(
        &self,
        entity_name: &str,
        limit: usize,
    ) -> Result<Vec<EntityRelation>, StorageError> {
        self.inner.entity_relations_boxed(entity_name, limit).await
    }

    async fn search_facts(&self, query: &FactQuery) -> Result<Vec<Fact>, StorageError> {
        self.inner.search_facts_boxed(query).await
    }

    async fn get_entity(
        &self,
        name: &str,
        entity_type: &str,
    ) -> Result<Option<Entity>, StorageError> {
        self.inner.get_entity_boxed(name, entity_type).await
    }

    async fn relationships_for_message(
        &self,
        message_id: &Uuid,
    ) -> Result<Vec<Relationship>, StorageError> {
        self.inner.relationships_for_message_boxed(message_id).await
    }

    async fn unconsolidated_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        self.inner.unconsolidated_before_boxed(cutoff, limit).await
    }

    async fn mark_consolidated(&self, message_ids: &[Uuid]) -> Result<u64, StorageError> {
        self.inner.mark_consolidated_boxed(message_ids).await
    }

    async fn stats(&self) -> Result<StoreStats, StorageError> {
        self.inner.stats_boxed().await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.inner.close_boxed().await
    }
}
