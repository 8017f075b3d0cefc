//! Memory orchestrator.
//!
//! `MemoryOrchestrator` is the only entry point the chat layer uses. It runs
//! extraction, writes through the persistent store, keeps the session cache
//! and merges both into retrieval results.
//!
//! Failure policy: extraction errors are always recovered to empty lists.
//! Storage errors propagate from `store_conversation` and
//! `consolidate_memories`, and degrade every read path to empty results.

use chrono::Duration;
use sigma_types::config::MemoryConfig;
use sigma_types::error::StorageError;
use sigma_types::memory::{
    EntityRelation, ExtractedEntity, ExtractedFact, Fact, FactQuery, MemoryItem, MemoryStats,
    Message,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::extractor::Extractor;
use super::session::SessionCache;
use super::store::MemoryStore;
use crate::clock::{SharedClock, SystemClock};

/// Coordinates extraction, the persistent store and the session cache.
///
/// Generic over `MemoryStore` and `Extractor` so sigma-core never depends on
/// a concrete backend. Pass a `BoxMemoryStore` for runtime backend selection.
pub struct MemoryOrchestrator<S: MemoryStore, E: Extractor> {
    store: S,
    extractor: E,
    session: SessionCache,
    clock: SharedClock,
    config: MemoryConfig,
}

impl<S: MemoryStore, E: Extractor> MemoryOrchestrator<S, E> {
    pub fn new(store: S, extractor: E, config: MemoryConfig) -> Self {
        Self::with_clock(store, extractor, config, SystemClock::shared())
    }

    /// Build with an explicit clock, shared with the session cache.
    pub fn with_clock(store: S, extractor: E, config: MemoryConfig, clock: SharedClock) -> Self {
        let session = SessionCache::with_clock(config.session_capacity, clock.clone());
        Self {
            store,
            extractor,
            session,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn session(&self) -> &SessionCache {
        &self.session
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Persist one conversation turn and remember it in the session.
    ///
    /// Entities come from the user and assistant text together, facts from
    /// the assistant response alone. The message write is the only step whose
    /// failure aborts the turn; a fact write failure after it is returned as
    /// well, leaving the message and its entities in place.
    #[tracing::instrument(
        name = "store_conversation",
        skip(self, user_message, assistant_response),
        fields(user_len = user_message.len(), response_len = assistant_response.len())
    )]
    pub async fn store_conversation(
        &mut self,
        user_message: &str,
        assistant_response: &str,
    ) -> Result<Uuid, StorageError> {
        let combined = format!("{user_message} {assistant_response}");
        let entities = self.entities_or_empty(&combined).await;
        let facts = self.facts_or_empty(assistant_response).await;

        let message_id = self
            .store
            .store_message(user_message, assistant_response, &entities)
            .await?;

        for fact in &facts {
            self.store
                .store_fact(&fact.subject, &fact.predicate, &fact.object, Some(message_id))
                .await?;
        }

        self.session.append(user_message, assistant_response);

        info!(
            message_id = %message_id,
            entities = entities.len(),
            facts = facts.len(),
            "Stored conversation"
        );
        Ok(message_id)
    }

    /// Recent session turns first, then keyword matches from the store.
    ///
    /// At most `session_recall` session entries are used; the store fills
    /// the rest up to `limit`.
    #[tracing::instrument(name = "retrieve_memories", skip(self, query))]
    pub async fn retrieve_memories(&self, query: &str, limit: usize) -> Vec<MemoryItem> {
        let mut items: Vec<MemoryItem> = self
            .session
            .recent(self.config.session_recall.min(limit))
            .iter()
            .map(MemoryItem::from_session)
            .collect();

        let remaining = limit.saturating_sub(items.len());
        if remaining > 0 {
            match self.store.relevant_memories(query, remaining).await {
                Ok(messages) => items.extend(messages.into_iter().map(MemoryItem::from_message)),
                Err(e) => {
                    error!(error = %e, "Persistent memory lookup failed, returning session only");
                }
            }
        }

        // TODO: merge related entities into the returned items once a ranking
        // for them exists; until then they are only logged.
        let related = self.probe_relations(query).await;
        debug!(
            items = items.len(),
            related = related.len(),
            "Retrieved memories"
        );

        items.truncate(limit);
        items
    }

    /// Keyword-matched conversations followed by facts whose predicate and
    /// object both contain the query. Each part keeps its own order.
    #[tracing::instrument(name = "search_memories", skip(self, query))]
    pub async fn search_memories(&self, query: &str) -> Vec<MemoryItem> {
        let mut items = Vec::new();

        match self
            .store
            .relevant_memories(query, self.config.search_limit)
            .await
        {
            Ok(messages) => items.extend(messages.into_iter().map(MemoryItem::from_message)),
            Err(e) => warn!(error = %e, "Conversation search failed"),
        }

        let fact_query = FactQuery::default().predicate(query).object(query);
        match self.store.search_facts(&fact_query).await {
            Ok(facts) => items.extend(facts.into_iter().map(MemoryItem::from_fact)),
            Err(e) => warn!(error = %e, "Fact search failed"),
        }

        items
    }

    pub async fn recent_conversations(&self, limit: usize) -> Vec<Message> {
        self.store
            .recent_conversations(limit)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load recent conversations");
                Vec::new()
            })
    }

    pub async fn entity_relations(&self, entity_name: &str, limit: usize) -> Vec<EntityRelation> {
        self.store
            .entity_relations(entity_name, limit)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, entity = entity_name, "Failed to load entity relations");
                Vec::new()
            })
    }

    pub async fn search_facts(&self, query: &FactQuery) -> Vec<Fact> {
        self.store.search_facts(query).await.unwrap_or_else(|e| {
            warn!(error = %e, "Fact search failed");
            Vec::new()
        })
    }

    /// Session size plus store totals. Store totals are zero when the store
    /// cannot be read.
    pub async fn memory_stats(&self) -> MemoryStats {
        let store_stats = self.store.stats().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read store statistics");
            Default::default()
        });
        MemoryStats::new(self.session.len(), store_stats)
    }

    /// Flag old, unconsolidated conversations. Returns how many were flagged.
    ///
    /// Selects at most `consolidation_batch` messages older than
    /// `consolidation_age_days`, oldest first. Content is left untouched.
    #[tracing::instrument(name = "consolidate_memories", skip(self))]
    pub async fn consolidate_memories(&self) -> Result<usize, StorageError> {
        let cutoff = self.clock.now() - Duration::days(self.config.consolidation_age_days);
        let candidates = self
            .store
            .unconsolidated_before(cutoff, self.config.consolidation_batch)
            .await?;

        if candidates.is_empty() {
            debug!(%cutoff, "No memories to consolidate");
            return Ok(0);
        }

        let ids: Vec<Uuid> = candidates.iter().map(|m| m.id).collect();
        let flagged = self.store.mark_consolidated(&ids).await?;

        info!(%cutoff, flagged, "Consolidated memories");
        Ok(flagged as usize)
    }

    pub async fn close(&self) -> Result<(), StorageError> {
        self.store.close().await
    }

    async fn probe_relations(&self, query: &str) -> Vec<EntityRelation> {
        if self.config.relation_probe_entities == 0 {
            return Vec::new();
        }

        let mut related = Vec::new();
        let probed = self.entities_or_empty(query).await;
        for entity in probed.iter().take(self.config.relation_probe_entities) {
            match self
                .store
                .entity_relations(&entity.name, self.config.relation_probe_limit)
                .await
            {
                Ok(relations) => related.extend(relations),
                Err(e) => warn!(error = %e, entity = %entity.name, "Relation probe failed"),
            }
        }
        related
    }

    async fn entities_or_empty(&self, text: &str) -> Vec<ExtractedEntity> {
        self.extractor
            .extract_entities(text)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Entity extraction failed, continuing without entities");
                Vec::new()
            })
    }

    async fn facts_or_empty(&self, text: &str) -> Vec<ExtractedFact> {
        self.extractor.extract_facts(text).await.unwrap_or_else(|e| {
            warn!(error = %e, "Fact extraction failed, continuing without facts");
            Vec::new()
        })
    }
}
