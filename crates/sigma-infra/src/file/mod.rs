//! Flat-file memory store.
//!
//! Keeps the four collections in memory and rewrites one pretty-printed JSON
//! file after every mutating call (write to a temp file, then rename). Lookup
//! maps and an [`AdjacencyIndex`] are rebuilt on load so traversals never
//! scan the full edge list.
//!
//! A mutation is applied to a copy of the state and only becomes visible
//! once that copy is on disk, so a failed save changes nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sigma_core::clock::SharedClock;
use sigma_core::memory::index::AdjacencyIndex;
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

/// File name of the snapshot inside the data directory.
pub const MEMORY_FILE: &str = "memory.json";

/// Snapshot plus the lookup structures derived from it.
#[derive(Clone)]
struct FileState {
    snapshot: MemorySnapshot,
    edges: AdjacencyIndex,
    messages_by_id: HashMap<Uuid, usize>,
    entities_by_id: HashMap<Uuid, usize>,
    entities_by_key: HashMap<(String, String), usize>,
}

impl FileState {
    fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        let edges = AdjacencyIndex::build(&snapshot.relationships);
        let messages_by_id = snapshot
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id, i))
            .collect();
        let entities_by_id = snapshot
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, i))
            .collect();
        let entities_by_key = snapshot
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.name.clone(), e.entity_type.clone()), i))
            .collect();

        Self {
            snapshot,
            edges,
            messages_by_id,
            entities_by_id,
            entities_by_key,
        }
    }

    fn upsert_entity(
        &mut self,
        entity: &ExtractedEntity,
        message_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Entity {
        let key = (entity.name.clone(), entity.entity_type.clone());
        let stored = match self.entities_by_key.get(&key) {
            Some(&position) => {
                let existing = &mut self.snapshot.entities[position];
                for (k, v) in &entity.properties {
                    existing.properties.insert(k.clone(), v.clone());
                }
                existing.updated = now;
                existing.clone()
            }
            None => {
                let created = Entity {
                    id: Uuid::now_v7(),
                    name: entity.name.clone(),
                    entity_type: entity.entity_type.clone(),
                    properties: entity.properties.clone(),
                    created: now,
                    updated: now,
                };
                let position = self.snapshot.entities.len();
                self.entities_by_key.insert(key, position);
                self.entities_by_id.insert(created.id, position);
                self.snapshot.entities.push(created.clone());
                created
            }
        };

        if let Some(message_id) = message_id {
            self.link(message_id, NodeKind::Entity, stored.id, RelationLabel::Mentions, now);
        }
        stored
    }

    /// Add a message -> node edge unless the message is unknown.
    fn link(
        &mut self,
        message_id: Uuid,
        to_kind: NodeKind,
        to_id: Uuid,
        label: RelationLabel,
        at: DateTime<Utc>,
    ) {
        if !self.messages_by_id.contains_key(&message_id) {
            tracing::warn!(message_id = %message_id, %label, "Unknown message, edge not created");
            return;
        }

        let rel = Relationship {
            id: Uuid::now_v7(),
            from_kind: NodeKind::Message,
            from_id: message_id,
            to_kind,
            to_id,
            label,
            timestamp: at,
        };
        let position = self.snapshot.relationships.len();
        self.edges.insert(position, &rel);
        self.snapshot.relationships.push(rel);
    }
}

/// JSON-file-backed implementation of `MemoryStore`.
pub struct JsonFileMemoryStore {
    path: PathBuf,
    state: RwLock<FileState>,
    clock: SharedClock,
}

impl JsonFileMemoryStore {
    /// Open the snapshot at `path`, starting empty when it does not exist.
    ///
    /// An unreadable or malformed file is an error rather than a fresh start,
    /// so existing memories are never overwritten by an empty snapshot.
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
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No memory file at {}, starting empty", path.display());
                MemorySnapshot::default()
            }
            Err(err) => {
                return Err(InitializationError::Backend(format!(
                    "{}: {err}",
                    path.display()
                )));
            }
        };

        tracing::debug!(
            messages = snapshot.messages.len(),
            entities = snapshot.entities.len(),
            "Loaded memory file {}",
            path.display()
        );

        Ok(Self {
            path,
            state: RwLock::new(FileState::from_snapshot(snapshot)),
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the state, save the copy, then publish it.
    ///
    /// The write lock is held throughout, which serializes saves.
    async fn commit<T>(&self, change: impl FnOnce(&mut FileState) -> T) -> Result<T, StorageError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let out = change(&mut next);
        write_snapshot(&self.path, &next.snapshot).await?;
        *state = next;
        Ok(out)
    }
}

impl MemoryStore for JsonFileMemoryStore {
    async fn store_message(
        &self,
        content: &str,
        response: &str,
        entities: &[ExtractedEntity],
    ) -> Result<Uuid, StorageError> {
        let clock = &self.clock;
        self.commit(|state| {
            let message = Message {
                id: Uuid::now_v7(),
                content: content.to_string(),
                response: response.to_string(),
                timestamp: clock.now(),
                kind: MessageKind::Conversation,
                consolidated: false,
            };
            let id = message.id;
            let position = state.snapshot.messages.len();
            state.messages_by_id.insert(id, position);
            state.snapshot.messages.push(message);

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
            let fact = Fact {
                id: Uuid::now_v7(),
                subject: subject.to_string(),
                predicate: predicate.to_string(),
                object: object.to_string(),
                confidence: DEFAULT_FACT_CONFIDENCE,
                timestamp: now,
            };
            let id = fact.id;
            state.snapshot.facts.push(fact);

            if let Some(message_id) = message_id {
                state.link(message_id, NodeKind::Fact, id, RelationLabel::ContainsFact, now);
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
            .snapshot
            .messages
            .iter()
            .filter(|m| relevance::matched_keywords(&keywords, m) > 0)
            .cloned();
        Ok(relevance::rank_messages(&keywords, candidates, limit))
    }

    async fn recent_conversations(&self, limit: usize) -> Result<Vec<Message>, StorageError> {
        let state = self.state.read().await;
        Ok(relevance::recent_first(
            state.snapshot.messages.iter().cloned(),
            limit,
        ))
    }

    async fn entity_relations(
        &self,
        entity_name: &str,
        limit: usize,
    ) -> Result<Vec<EntityRelation>, StorageError> {
        let state = self.state.read().await;
        let probed: Vec<Uuid> = state
            .snapshot
            .entities
            .iter()
            .filter(|e| e.name == entity_name)
            .map(|e| e.id)
            .collect();
        if probed.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = state
            .edges
            .co_mentioned_ids(&state.snapshot.relationships, &probed)
            .into_iter()
            .filter_map(|id| state.entities_by_id.get(&id))
            .map(|&position| state.snapshot.entities[position].clone());

        Ok(relevance::co_mentioned(candidates, &probed, limit))
    }

    async fn search_facts(&self, query: &FactQuery) -> Result<Vec<Fact>, StorageError> {
        let state = self.state.read().await;
        let matching = state
            .snapshot
            .facts
            .iter()
            .filter(|f| query.matches(f))
            .cloned()
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
            .entities_by_key
            .get(&key)
            .map(|&position| state.snapshot.entities[position].clone()))
    }

    async fn relationships_for_message(
        &self,
        message_id: &Uuid,
    ) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .outgoing(message_id)
            .iter()
            .filter_map(|&position| state.snapshot.relationships.get(position))
            .cloned()
            .collect())
    }

    async fn unconsolidated_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let state = self.state.read().await;
        let mut eligible: Vec<Message> = state
            .snapshot
            .messages
            .iter()
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
                state
                    .messages_by_id
                    .get(id)
                    .is_some_and(|&position| !state.snapshot.messages[position].consolidated)
            });
            if !pending {
                return Ok(0);
            }
        }

        self.commit(|state| {
            let mut flagged = 0;
            for id in message_ids {
                let Some(&position) = state.messages_by_id.get(id) else {
                    continue;
                };
                let message = &mut state.snapshot.messages[position];
                if !message.consolidated {
                    message.consolidated = true;
                    flagged += 1;
                }
            }
            flagged
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats, StorageError> {
        let state = self.state.read().await;
        Ok(StoreStats {
            messages: state.snapshot.messages.len() as u64,
            entities: state.snapshot.entities.len() as u64,
            facts: state.snapshot.facts.len() as u64,
            relationships: state.snapshot.relationships.len() as u64,
        })
    }

    async fn close(&self) -> Result<(), StorageError> {
        // Every mutation is already on disk.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigma_core::clock::SystemClock;

    async fn open_in(dir: &Path) -> JsonFileMemoryStore {
        JsonFileMemoryStore::open(dir.join(MEMORY_FILE), SystemClock::shared())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_mutations_are_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(dir.path()).await;

        let id = store
            .store_message("Meet Alice", "Hi Alice", &[ExtractedEntity::new("Alice", "PERSON")])
            .await
            .unwrap();
        store
            .store_fact("Alice", "lives in", "Paris", Some(id))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join(MEMORY_FILE)).unwrap();
        let on_disk: MemorySnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk.messages.len(), 1);
        assert_eq!(on_disk.entities.len(), 1);
        assert_eq!(on_disk.facts.len(), 1);
        assert_eq!(on_disk.relationships.len(), 2);
        // Pretty-printed, and no temp file left behind
        assert!(raw.contains("\n  "));
        assert!(!dir.path().join("memory.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_reopen_restores_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(dir.path()).await;
        let id = store
            .store_message(
                "Alice and Bob",
                "ok",
                &[
                    ExtractedEntity::new("Alice", "PERSON"),
                    ExtractedEntity::new("Bob", "PERSON"),
                ],
            )
            .await
            .unwrap();
        store.close().await.unwrap();
        drop(store);

        let reopened = open_in(dir.path()).await;
        assert_eq!(reopened.relationships_for_message(&id).await.unwrap().len(), 2);
        let related = reopened.entity_relations("Alice", 5).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].entity.name, "Bob");

        // Upsert after reload still finds the existing entity
        reopened
            .store_entity(&ExtractedEntity::new("Alice", "PERSON"), None)
            .await
            .unwrap();
        assert_eq!(reopened.stats().await.unwrap().entities, 2);
    }

    #[tokio::test]
    async fn test_malformed_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MEMORY_FILE), "{ not json").unwrap();

        let result =
            JsonFileMemoryStore::open(dir.path().join(MEMORY_FILE), SystemClock::shared()).await;
        assert!(matches!(result, Err(InitializationError::Backend(_))));
    }

    #[tokio::test]
    async fn test_failed_save_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let store = open_in(&data_dir).await;
        store.store_message("kept turn", "ok", &[]).await.unwrap();

        std::fs::remove_dir_all(&data_dir).unwrap();
        let result = store
            .store_message("lost turn", "ok", &[ExtractedEntity::new("Alice", "PERSON")])
            .await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.entities, 0);
        assert!(store.relevant_memories("lost turn", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = open_in(&nested).await;
        store.store_message("hello there", "hi", &[]).await.unwrap();
        assert!(nested.join(MEMORY_FILE).exists());
    }
}
