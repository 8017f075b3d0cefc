//! Graph-native memory store.
//!
//! Messages, entities and facts are nodes of a petgraph `StableDiGraph`;
//! relationships are its edges, carried as edge weights. Traversals walk
//! node neighborhoods directly.
//!
//! The graph lives in process memory. With a snapshot path it is loaded on
//! open and saved after every mutating call; a mutation only becomes visible
//! once its snapshot is on disk.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use sigma_core::clock::SharedClock;
use sigma_core::memory::relevance;
use sigma_core::memory::store::MemoryStore;
use sigma_types::error::{InitializationError, StorageError};
use sigma_types::memory::{
    DEFAULT_FACT_CONFIDENCE, Entity, EntityRelation, ExtractedEntity, Fact, FactQuery,
    MemorySnapshot, Message, MessageKind, NodeKind, RelationLabel, Relationship, StoreStats,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::snapshot::write_snapshot;

/// File name of the graph snapshot inside the data directory.
pub const GRAPH_SNAPSHOT_FILE: &str = "memory-graph.json";

#[derive(Debug, Clone)]
enum GraphNode {
    Message(Message),
    Entity(Entity),
    Fact(Fact),
}

#[derive(Default, Clone)]
struct GraphState {
    graph: StableDiGraph<GraphNode, Relationship>,
    messages: HashMap<Uuid, NodeIndex>,
    entities: HashMap<Uuid, NodeIndex>,
    entity_keys: HashMap<(String, String), NodeIndex>,
    facts: HashMap<Uuid, NodeIndex>,
}

impl GraphState {
    fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        let mut state = Self::default();
        for message in snapshot.messages {
            state.add_message(message);
        }
        for entity in snapshot.entities {
            state.add_entity(entity);
        }
        for fact in snapshot.facts {
            state.add_fact(fact);
        }
        for rel in snapshot.relationships {
            match (state.node(rel.from_kind, &rel.from_id), state.node(rel.to_kind, &rel.to_id)) {
                (Some(from), Some(to)) => {
                    state.graph.add_edge(from, to, rel);
                }
                _ => tracing::warn!(relationship_id = %rel.id, "Dropping edge with missing endpoint"),
            }
        }
        state
    }

    /// Nodes and edges in insertion order.
    fn to_snapshot(&self) -> MemorySnapshot {
        let mut snapshot = MemorySnapshot::default();
        for node in self.nodes() {
            match node {
                GraphNode::Message(m) => snapshot.messages.push(m.clone()),
                GraphNode::Entity(e) => snapshot.entities.push(e.clone()),
                GraphNode::Fact(f) => snapshot.facts.push(f.clone()),
            }
        }
        snapshot.relationships = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_weight(e))
            .cloned()
            .collect();
        snapshot
    }

    fn node(&self, kind: NodeKind, id: &Uuid) -> Option<NodeIndex> {
        match kind {
            NodeKind::Message => self.messages.get(id),
            NodeKind::Entity => self.entities.get(id),
            NodeKind::Fact => self.facts.get(id),
        }
        .copied()
    }

    fn add_message(&mut self, message: Message) -> NodeIndex {
        let id = message.id;
        let idx = self.graph.add_node(GraphNode::Message(message));
        self.messages.insert(id, idx);
        idx
    }

    fn add_entity(&mut self, entity: Entity) -> NodeIndex {
        let (id, key) = (entity.id, (entity.name.clone(), entity.entity_type.clone()));
        let idx = self.graph.add_node(GraphNode::Entity(entity));
        self.entities.insert(id, idx);
        self.entity_keys.insert(key, idx);
        idx
    }

    fn add_fact(&mut self, fact: Fact) -> NodeIndex {
        let id = fact.id;
        let idx = self.graph.add_node(GraphNode::Fact(fact));
        self.facts.insert(id, idx);
        idx
    }

    fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
    }

    fn messages(&self) -> impl Iterator<Item = &Message> {
        self.nodes().filter_map(|node| match node {
            GraphNode::Message(m) => Some(m),
            _ => None,
        })
    }

    fn entity_at(&self, idx: NodeIndex) -> Option<&Entity> {
        match self.graph.node_weight(idx) {
            Some(GraphNode::Entity(e)) => Some(e),
            _ => None,
        }
    }

    fn upsert_entity(
        &mut self,
        entity: &ExtractedEntity,
        message_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Entity {
        let key = (entity.name.clone(), entity.entity_type.clone());
        let merged = self
            .entity_keys
            .get(&key)
            .copied()
            .and_then(|idx| match self.graph.node_weight_mut(idx) {
                Some(GraphNode::Entity(existing)) => {
                    for (k, v) in &entity.properties {
                        existing.properties.insert(k.clone(), v.clone());
                    }
                    existing.updated = now;
                    Some((idx, existing.clone()))
                }
                _ => None,
            });

        let (idx, stored) = match merged {
            Some(found) => found,
            None => {
                let created = Entity {
                    id: Uuid::now_v7(),
                    name: entity.name.clone(),
                    entity_type: entity.entity_type.clone(),
                    properties: entity.properties.clone(),
                    created: now,
                    updated: now,
                };
                (self.add_entity(created.clone()), created)
            }
        };

        if let Some(message_id) = message_id {
            self.link(message_id, idx, NodeKind::Entity, stored.id, RelationLabel::Mentions, now);
        }
        stored
    }

    fn link(
        &mut self,
        message_id: Uuid,
        to: NodeIndex,
        to_kind: NodeKind,
        to_id: Uuid,
        label: RelationLabel,
        at: DateTime<Utc>,
    ) {
        let Some(&from) = self.messages.get(&message_id) else {
            tracing::warn!(message_id = %message_id, %label, "Unknown message, edge not created");
            return;
        };

        self.graph.add_edge(
            from,
            to,
            Relationship {
                id: Uuid::now_v7(),
                from_kind: NodeKind::Message,
                from_id: message_id,
                to_kind,
                to_id,
                label,
                timestamp: at,
            },
        );
    }

    /// Entities reached through a message that mentions `entity`.
    fn co_mentioned(&self, entity: NodeIndex) -> Vec<Entity> {
        let is_mention = |rel: &Relationship| rel.label == RelationLabel::Mentions;

        let mut found = Vec::new();
        for incoming in self.graph.edges_directed(entity, Direction::Incoming) {
            if !is_mention(incoming.weight()) || !self.messages.contains_key(&incoming.weight().from_id) {
                continue;
            }
            for outgoing in self.graph.edges_directed(incoming.source(), Direction::Outgoing) {
                if !is_mention(outgoing.weight()) {
                    continue;
                }
                if let Some(other) = self.entity_at(outgoing.target()) {
                    found.push(other.clone());
                }
            }
        }
        found
    }
}

/// In-process graph implementation of `MemoryStore`.
pub struct GraphMemoryStore {
    state: RwLock<GraphState>,
    snapshot_path: Option<PathBuf>,
    clock: SharedClock,
}

impl GraphMemoryStore {
    /// A purely in-memory graph. Contents are lost on drop.
    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            snapshot_path: None,
            clock,
        }
    }

    /// Load the graph from `path` if it exists. Every mutation is saved back.
    pub async fn open(path: impl Into<PathBuf>, clock: SharedClock) -> Result<Self, InitializationError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| InitializationError::Backend(format!("{}: {e}", parent.display())))?;
        }

        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<MemorySnapshot>(&content).map_err(|e| {
                InitializationError::Backend(format!("malformed {}: {e}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => MemorySnapshot::default(),
            Err(err) => {
                return Err(InitializationError::Backend(format!(
                    "{}: {err}",
                    path.display()
                )));
            }
        };

        let state = GraphState::from_snapshot(snapshot);
        tracing::debug!(
            nodes = state.graph.node_count(),
            edges = state.graph.edge_count(),
            "Loaded memory graph from {}",
            path.display()
        );

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
            clock,
        })
    }

    /// Apply `change` under the write lock. With a snapshot path the change
    /// is made on a copy that replaces the live graph only after it is saved.
    async fn commit<T>(&self, change: impl FnOnce(&mut GraphState) -> T) -> Result<T, StorageError> {
        let mut state = self.state.write().await;
        let Some(path) = &self.snapshot_path else {
            return Ok(change(&mut state));
        };

        let mut next = state.clone();
        let out = change(&mut next);
        write_snapshot(path, &next.to_snapshot()).await?;
        *state = next;
        Ok(out)
    }
}

impl MemoryStore for GraphMemoryStore {
    async fn store_message(
        &self,
        content: &str,
        response: &str,
        entities: &[ExtractedEntity],
    ) -> Result<Uuid, StorageError> {
        let clock = &self.clock;
        self.commit(|state| {
            let id = Uuid::now_v7();
            state.add_message(Message {
                id,
                content: content.to_string(),
                response: response.to_string(),
                timestamp: clock.now(),
                kind: MessageKind::Conversation,
                consolidated: false,
            });

            for entity in entities {
                state.upsert_entity(entity, Some(id), clock.now());
            }
            id
        })
        .await
    }

    async fn store_entity(
        &self,
        entity: &ExtractedEntity,
        message_id: Option<Uuid>,
    ) -> Result<Entity, StorageError> {
        let clock = &self.clock;
        self.commit(|state| state.upsert_entity(entity, message_id, clock.now()))
            .await
    }

    async fn store_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        message_id: Option<Uuid>,
    ) -> Result<Uuid, StorageError> {
        let clock = &self.clock;
        self.commit(|state| {
            let now = clock.now();
            let id = Uuid::now_v7();
            let idx = state.add_fact(Fact {
                id,
                subject: subject.to_string(),
                predicate: predicate.to_string(),
                object: object.to_string(),
                confidence: DEFAULT_FACT_CONFIDENCE,
                timestamp: now,
            });

            if let Some(message_id) = message_id {
                state.link(message_id, idx, NodeKind::Fact, id, RelationLabel::ContainsFact, now);
            }
            id
        })
        .await
    }

    async fn relevant_memories(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let keywords = relevance::keywords(query);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let candidates = state
            .messages()
            .filter(|m| relevance::matched_keywords(&keywords, m) > 0)
            .cloned();
        Ok(relevance::rank_messages(&keywords, candidates, limit))
    }

    async fn recent_conversations(&self, limit: usize) -> Result<Vec<Message>, StorageError> {
        let state = self.state.read().await;
        Ok(relevance::recent_first(state.messages().cloned(), limit))
    }

    async fn entity_relations(
        &self,
        entity_name: &str,
        limit: usize,
    ) -> Result<Vec<EntityRelation>, StorageError> {
        let state = self.state.read().await;
        let probed: Vec<(Uuid, NodeIndex)> = state
            .entity_keys
            .iter()
            .filter(|((name, _), _)| name == entity_name)
            .filter_map(|(_, &idx)| state.entity_at(idx).map(|e| (e.id, idx)))
            .collect();

        let probed_ids: Vec<Uuid> = probed.iter().map(|(id, _)| *id).collect();
        let candidates = probed
            .iter()
            .flat_map(|&(_, idx)| state.co_mentioned(idx))
            .collect::<Vec<_>>();

        Ok(relevance::co_mentioned(candidates, &probed_ids, limit))
    }

    async fn search_facts(&self, query: &FactQuery) -> Result<Vec<Fact>, StorageError> {
        let state = self.state.read().await;
        let matching = state
            .nodes()
            .filter_map(|node| match node {
                GraphNode::Fact(f) if query.matches(f) => Some(f.clone()),
                _ => None,
            })
            .collect();
        Ok(relevance::rank_facts(matching))
    }

    async fn get_entity(
        &self,
        name: &str,
        entity_type: &str,
    ) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().await;
        let key = (name.to_string(), entity_type.to_string());
        Ok(state
            .entity_keys
            .get(&key)
            .and_then(|&idx| state.entity_at(idx))
            .cloned())
    }

    async fn relationships_for_message(
        &self,
        message_id: &Uuid,
    ) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().await;
        let Some(&idx) = state.messages.get(message_id) else {
            return Ok(Vec::new());
        };

        let mut edges: Vec<Relationship> = state
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| edge.weight().clone())
            .collect();
        edges.sort_by_key(|rel| (rel.timestamp, rel.id));
        Ok(edges)
    }

    async fn unconsolidated_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let state = self.state.read().await;
        let mut eligible: Vec<Message> = state
            .messages()
            .filter(|m| {
                m.kind == MessageKind::Conversation && !m.consolidated && m.timestamp < cutoff
            })
            .cloned()
            .collect();
        eligible.sort_by_key(|m| m.timestamp);
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn mark_consolidated(&self, message_ids: &[Uuid]) -> Result<u64, StorageError> {
        {
            let state = self.state.read().await;
            let pending = message_ids.iter().any(|id| {
                state.messages.get(id).is_some_and(|&idx| {
                    matches!(state.graph.node_weight(idx), Some(GraphNode::Message(m)) if !m.consolidated)
                })
            });
            if !pending {
                return Ok(0);
            }
        }

        self.commit(|state| {
            let mut flagged = 0;
            for id in message_ids {
                let Some(&idx) = state.messages.get(id) else {
                    continue;
                };
                if let Some(GraphNode::Message(message)) = state.graph.node_weight_mut(idx) {
                    if !message.consolidated {
                        message.consolidated = true;
                        flagged += 1;
                    }
                }
            }
            flagged
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats, StorageError> {
        let state = self.state.read().await;
        Ok(StoreStats {
            messages: state.messages.len() as u64,
            entities: state.entities.len() as u64,
            facts: state.facts.len() as u64,
            relationships: state.graph.edge_count() as u64,
        })
    }

    /// Flush the current graph once more. Safe to call repeatedly.
    async fn close(&self) -> Result<(), StorageError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let state = self.state.read().await;
        write_snapshot(path, &state.to_snapshot()).await?;
        tracing::debug!("Wrote memory graph snapshot to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigma_core::clock::SystemClock;

    #[tokio::test]
    async fn test_snapshot_round_trip_without_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GRAPH_SNAPSHOT_FILE);

        let store = GraphMemoryStore::open(&path, SystemClock::shared()).await.unwrap();
        let id = store
            .store_message("Alice met Bob", "nice", &[
                ExtractedEntity::new("Alice", "PERSON"),
                ExtractedEntity::new("Bob", "PERSON"),
            ])
            .await
            .unwrap();
        store.store_fact("Alice", "knows", "Bob", Some(id)).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        drop(store);

        let reopened = GraphMemoryStore::open(&path, SystemClock::shared()).await.unwrap();
        let stats = reopened.stats().await.unwrap();
        assert_eq!(
            stats,
            StoreStats {
                messages: 1,
                entities: 2,
                facts: 1,
                relationships: 3,
            }
        );
        let related = reopened.entity_relations("Bob", 5).await.unwrap();
        assert_eq!(related[0].entity.name, "Alice");
    }

    #[tokio::test]
    async fn test_failed_save_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let path = data_dir.join(GRAPH_SNAPSHOT_FILE);

        let store = GraphMemoryStore::open(&path, SystemClock::shared()).await.unwrap();
        let id = store.store_message("kept turn", "ok", &[]).await.unwrap();
        std::fs::remove_dir_all(&data_dir).unwrap();

        let err = store
            .store_message("lost turn", "ok", &[ExtractedEntity::new("Alice", "PERSON")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        let err = store.mark_consolidated(&[id]).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.entities, 0);
        assert!(store.relevant_memories("lost turn", 5).await.unwrap().is_empty());
        let recent = store.recent_conversations(5).await.unwrap();
        assert!(!recent[0].consolidated);
    }

    #[tokio::test]
    async fn test_in_memory_close_is_noop() {
        let store = GraphMemoryStore::in_memory(SystemClock::shared());
        store.store_message("hello", "world", &[]).await.unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert_eq!(store.stats().await.unwrap().messages, 1);
    }

    #[test]
    fn test_dangling_snapshot_edges_are_dropped() {
        let snapshot = MemorySnapshot {
            relationships: vec![Relationship {
                id: Uuid::now_v7(),
                from_kind: NodeKind::Message,
                from_id: Uuid::now_v7(),
                to_kind: NodeKind::Entity,
                to_id: Uuid::now_v7(),
                label: RelationLabel::Mentions,
                timestamp: Utc::now(),
            }],
            ..Default::default()
        };
        let state = GraphState::from_snapshot(snapshot);
        assert_eq!(state.graph.edge_count(), 0);
    }
}
