//! Behavior every backend must share, run once per backend.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use sigma_core::clock::{Clock, ManualClock, SharedClock, SystemClock};
use sigma_core::memory::box_store::BoxMemoryStore;
use sigma_core::memory::extractor::{Extractor, SuppliedExtractor};
use sigma_core::memory::orchestrator::MemoryOrchestrator;
use sigma_core::memory::store::MemoryStore;
use sigma_types::config::{BackendKind, MemoryConfig};
use sigma_types::error::ExtractionError;
use sigma_types::memory::{
    DEFAULT_FACT_CONFIDENCE, ExtractedEntity, ExtractedFact, FACT_SEARCH_CAP, FactQuery,
    MemoryItemKind, MemorySource, NodeKind, RelationLabel,
};
use tempfile::TempDir;
use uuid::Uuid;

use crate::backend::open_store;

async fn open(backend: BackendKind, clock: SharedClock) -> (BoxMemoryStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig {
        backend,
        ..Default::default()
    };
    let store = open_store(&config, dir.path(), clock).await.unwrap();
    (store, dir)
}

async fn open_system(backend: BackendKind) -> (BoxMemoryStore, TempDir) {
    open(backend, SystemClock::shared()).await
}

fn orchestrator<E: Extractor>(
    store: BoxMemoryStore,
    extractor: E,
    backend: BackendKind,
    clock: SharedClock,
) -> MemoryOrchestrator<BoxMemoryStore, E> {
    let config = MemoryConfig {
        backend,
        ..Default::default()
    };
    MemoryOrchestrator::with_clock(store, extractor, config, clock)
}

fn alice() -> ExtractedEntity {
    ExtractedEntity::new("Alice", "PERSON")
}

struct FailingExtractor;

impl Extractor for FailingExtractor {
    async fn extract_entities(&self, _: &str) -> Result<Vec<ExtractedEntity>, ExtractionError> {
        Err(ExtractionError::Failed("model offline".to_string()))
    }

    async fn extract_facts(&self, _: &str) -> Result<Vec<ExtractedFact>, ExtractionError> {
        Err(ExtractionError::Malformed("not json".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Store-level checks
// ---------------------------------------------------------------------------

async fn upsert_merges_properties(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;

    let first = store
        .store_entity(
            &alice()
                .with_property("city", json!("Paris"))
                .with_property("age", json!(30)),
            None,
        )
        .await
        .unwrap();
    let second = store
        .store_entity(
            &alice()
                .with_property("age", json!(31))
                .with_property("job", json!("pilot")),
            None,
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.created, first.created);
    assert!(second.updated > first.updated);
    assert_eq!(second.properties["city"], json!("Paris"));
    assert_eq!(second.properties["age"], json!(31));
    assert_eq!(second.properties["job"], json!("pilot"));

    let stored = store.get_entity("Alice", "PERSON").await.unwrap().unwrap();
    assert_eq!(stored, second);
    assert_eq!(store.stats().await.unwrap().entities, 1);
    assert!(store.get_entity("Alice", "PLACE").await.unwrap().is_none());
}

async fn relevance_prefers_coverage_then_recency(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;

    let alice_old = store
        .store_message("Alice called", "Tell her hi", &[])
        .await
        .unwrap();
    let both = store
        .store_message("Alice went to Paris", "Lovely city", &[])
        .await
        .unwrap();
    let alice_new = store
        .store_message("hello", "ALICE says hi", &[])
        .await
        .unwrap();
    store.store_message("weather", "sunny", &[]).await.unwrap();

    let ranked = store.relevant_memories("alice paris", 10).await.unwrap();
    let ids: Vec<Uuid> = ranked.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![both, alice_new, alice_old]);

    assert_eq!(store.relevant_memories("alice paris", 1).await.unwrap().len(), 1);
    assert!(store.relevant_memories("an a", 10).await.unwrap().is_empty());
}

async fn recent_conversations_newest_first(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(store.store_message(&format!("turn {i}"), "ok", &[]).await.unwrap());
    }

    let recent = store.recent_conversations(3).await.unwrap();
    let got: Vec<Uuid> = recent.iter().map(|m| m.id).collect();
    assert_eq!(got, vec![ids[3], ids[2], ids[1]]);
}

async fn fact_search_caps_and_orders(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    let mut ids = Vec::new();
    for i in 0..12 {
        ids.push(
            store
                .store_fact("Rust", "has feature", &format!("feature {i}"), None)
                .await
                .unwrap(),
        );
    }
    // Duplicates are kept as separate assertions
    store.store_fact("Rust", "has feature", "feature 0", None).await.unwrap();
    store.store_fact("Paris", "is in", "France", None).await.unwrap();

    let facts = store
        .search_facts(&FactQuery::default().subject("rust"))
        .await
        .unwrap();
    assert_eq!(facts.len(), FACT_SEARCH_CAP);
    assert!(facts.iter().all(|f| f.confidence == DEFAULT_FACT_CONFIDENCE));
    for pair in facts.windows(2) {
        assert!(pair[0].timestamp >= pair[1].timestamp);
    }
    assert_eq!(facts[1].id, ids[11]);

    let anded = store
        .search_facts(&FactQuery::default().subject("PARIS").object("fran"))
        .await
        .unwrap();
    assert_eq!(anded.len(), 1);
    assert!(
        store
            .search_facts(&FactQuery::default().subject("paris").object("spain"))
            .await
            .unwrap()
            .is_empty()
    );

    let all = store.search_facts(&FactQuery::default()).await.unwrap();
    assert_eq!(all.len(), FACT_SEARCH_CAP);
    assert_eq!(store.stats().await.unwrap().facts, 14);
}

async fn edges_reference_existing_records(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;

    let message_id = store
        .store_message("Alice and Bob", "hi both", &[alice(), ExtractedEntity::new("Bob", "PERSON")])
        .await
        .unwrap();
    let fact_id = store
        .store_fact("Alice", "knows", "Bob", Some(message_id))
        .await
        .unwrap();

    let alice_id = store.get_entity("Alice", "PERSON").await.unwrap().unwrap().id;
    let bob_id = store.get_entity("Bob", "PERSON").await.unwrap().unwrap().id;

    let edges = store.relationships_for_message(&message_id).await.unwrap();
    assert_eq!(edges.len(), 3);
    for edge in &edges {
        assert_eq!(edge.from_kind, NodeKind::Message);
        assert_eq!(edge.from_id, message_id);
        match edge.to_kind {
            NodeKind::Entity => {
                assert_eq!(edge.label, RelationLabel::Mentions);
                assert!(edge.to_id == alice_id || edge.to_id == bob_id);
            }
            NodeKind::Fact => {
                assert_eq!(edge.label, RelationLabel::ContainsFact);
                assert_eq!(edge.to_id, fact_id);
            }
            NodeKind::Message => panic!("message -> message edge"),
        }
    }

    // Unknown message ids store the record but no edge
    store
        .store_fact("Carol", "likes", "tea", Some(Uuid::now_v7()))
        .await
        .unwrap();
    store
        .store_entity(&ExtractedEntity::new("Carol", "PERSON"), Some(Uuid::now_v7()))
        .await
        .unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.relationships, 3);
    assert_eq!(stats.facts, 2);
    assert_eq!(stats.entities, 3);
}

async fn entity_relations_follow_shared_messages(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    let bob = ExtractedEntity::new("Bob", "PERSON");
    let carol = ExtractedEntity::new("Carol", "PERSON");

    store.store_message("m1", "", &[alice(), bob.clone()]).await.unwrap();
    store.store_message("m2", "", &[alice(), carol.clone()]).await.unwrap();
    store
        .store_message("m3", "", &[ExtractedEntity::new("Dave", "PERSON"), bob])
        .await
        .unwrap();
    // Same name, other type: also a probe, never a result
    store
        .store_message("m4", "", &[ExtractedEntity::new("Alice", "SHIP"), carol])
        .await
        .unwrap();

    let relations = store.entity_relations("Alice", 10).await.unwrap();
    let names: Vec<&str> = relations.iter().map(|r| r.entity.name.as_str()).collect();
    // Carol was refreshed by m4, Bob by m3
    assert_eq!(names, vec!["Carol", "Bob"]);
    assert!(relations.iter().all(|r| r.label == RelationLabel::CoMentioned));

    assert_eq!(store.entity_relations("Alice", 1).await.unwrap().len(), 1);
    assert!(store.entity_relations("Nobody", 5).await.unwrap().is_empty());
}

async fn consolidation_flags_each_message_once(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    let a = store.store_message("one", "", &[]).await.unwrap();
    let b = store.store_message("two", "", &[]).await.unwrap();

    let cutoff = Utc::now() + Duration::seconds(1);
    let due = store.unconsolidated_before(cutoff, 1).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, a);

    assert_eq!(store.mark_consolidated(&[a, b]).await.unwrap(), 2);
    assert_eq!(store.mark_consolidated(&[a, b, Uuid::now_v7()]).await.unwrap(), 0);
    assert!(store.unconsolidated_before(cutoff, 10).await.unwrap().is_empty());
    assert!(store.recent_conversations(5).await.unwrap().iter().all(|m| m.consolidated));
}

async fn close_twice_is_safe(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    store.close().await.unwrap();
    store.close().await.unwrap();
}

// ---------------------------------------------------------------------------
// Orchestrator scenarios
// ---------------------------------------------------------------------------

async fn single_mention_scenario(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    let extractor = SuppliedExtractor::new()
        .with_entities(vec![alice()])
        .with_facts(Vec::new());
    let mut memory = orchestrator(store, extractor, backend, SystemClock::shared());

    let id = memory
        .store_conversation("My name is Alice", "Nice to meet you, Alice")
        .await
        .unwrap();

    let stats = memory.memory_stats().await;
    assert_eq!(stats.session_entries, 1);
    assert_eq!(stats.total_messages, 1);
    assert_eq!(stats.total_entities, 1);
    assert_eq!(stats.total_facts, 0);
    assert_eq!(stats.total_relationships, 1);

    let edges = memory.store().relationships_for_message(&id).await.unwrap();
    assert_eq!(edges[0].label, RelationLabel::Mentions);
}

async fn repeated_mention_scenario(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    let extractor = SuppliedExtractor::new().with_entities(vec![alice()]);
    let mut memory = orchestrator(store, extractor, backend, SystemClock::shared());

    let first = memory.store_conversation("Alice is here", "Hi Alice").await.unwrap();
    let second = memory.store_conversation("Alice again", "Welcome back").await.unwrap();

    let stats = memory.memory_stats().await;
    assert_eq!(stats.total_entities, 1);
    assert_eq!(stats.total_relationships, 2);

    let entity = memory.store().get_entity("Alice", "PERSON").await.unwrap().unwrap();
    let first_edge = &memory.store().relationships_for_message(&first).await.unwrap()[0];
    let second_edge = &memory.store().relationships_for_message(&second).await.unwrap()[0];
    assert_eq!(entity.created, first_edge.timestamp);
    assert_eq!(entity.updated, second_edge.timestamp);
}

async fn facts_are_stored_and_searchable(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    let extractor = SuppliedExtractor::new()
        .with_entities(Vec::new())
        .with_facts(vec![ExtractedFact {
            subject: "Ferris".to_string(),
            predicate: "loves rust".to_string(),
            object: "rust the language".to_string(),
        }]);
    let mut memory = orchestrator(store, extractor, backend, SystemClock::shared());

    let id = memory
        .store_conversation("Tell me about rust", "Ferris loves rust")
        .await
        .unwrap();

    let items = memory.search_memories("rust").await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind, MemoryItemKind::Conversation);
    assert_eq!(items[0].id, Some(id));
    assert_eq!(items[1].kind, MemoryItemKind::Fact);
    assert_eq!(items[1].content, "Ferris loves rust rust the language");
    assert_eq!(items[1].confidence, Some(DEFAULT_FACT_CONFIDENCE));

    let edges = memory.store().relationships_for_message(&id).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].label, RelationLabel::ContainsFact);
}

async fn retrieval_merges_session_then_store(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    let extractor = SuppliedExtractor::new();
    let mut memory = orchestrator(store, extractor, backend, SystemClock::shared());

    for i in 0..6 {
        memory
            .store_conversation(&format!("Paris trip day {i}"), "Noted")
            .await
            .unwrap();
    }

    let items = memory.retrieve_memories("paris", 5).await;
    assert_eq!(items.len(), 5);
    let sources: Vec<MemorySource> = items.iter().map(|i| i.source).collect();
    assert_eq!(
        sources,
        vec![
            MemorySource::Session,
            MemorySource::Session,
            MemorySource::Session,
            MemorySource::Persistent,
            MemorySource::Persistent,
        ]
    );
    assert_eq!(items[0].content, "Paris trip day 5");
    assert!(items[0].id.is_none());
    assert!(items[3].id.is_some());
}

async fn extraction_failures_do_not_abort(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    let mut memory = orchestrator(store, FailingExtractor, backend, SystemClock::shared());

    memory
        .store_conversation("Alice visits Paris", "Have fun")
        .await
        .unwrap();
    // Retrieval probes the extractor too and must survive its failure
    assert_eq!(memory.retrieve_memories("paris", 5).await.len(), 2);

    let stats = memory.memory_stats().await;
    assert_eq!(stats.total_messages, 1);
    assert_eq!(stats.total_entities, 0);
    assert_eq!(stats.total_facts, 0);
}

async fn consolidation_respects_cutoff(backend: BackendKind) {
    let now = Utc::now();
    let manual = Arc::new(ManualClock::new(now - Duration::days(8)));
    let clock: SharedClock = manual.clone();

    let (store, _dir) = open(backend, clock.clone()).await;
    let mut memory = orchestrator(store, SuppliedExtractor::new(), backend, clock);

    let old = memory.store_conversation("old news", "yes").await.unwrap();
    manual.set(now - Duration::days(1));
    let fresh = memory.store_conversation("fresh news", "yes").await.unwrap();
    manual.set(now);

    assert_eq!(memory.consolidate_memories().await.unwrap(), 1);
    assert_eq!(memory.consolidate_memories().await.unwrap(), 0);

    let messages = memory.recent_conversations(10).await;
    let flag = |id: Uuid| messages.iter().find(|m| m.id == id).unwrap().consolidated;
    assert!(flag(old));
    assert!(!flag(fresh));
    assert!(manual.now() > now);
}

async fn unicode_case_folding_matches(backend: BackendKind) {
    let (store, _dir) = open_system(backend).await;
    // KELVIN SIGN lowercases to an ASCII 'k'.
    store
        .store_message("\u{212A}elvin scale", "absolute zero", &[])
        .await
        .unwrap();
    store
        .store_fact("\u{212A}elvin", "measures", "temperature", None)
        .await
        .unwrap();

    assert_eq!(store.relevant_memories("kelvin", 5).await.unwrap().len(), 1);
    let facts = store
        .search_facts(&FactQuery::default().subject("kelvin"))
        .await
        .unwrap();
    assert_eq!(facts.len(), 1);
}

async fn writes_survive_reopen_without_close(backend: BackendKind) {
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig {
        backend,
        ..Default::default()
    };

    let store = open_store(&config, dir.path(), SystemClock::shared()).await.unwrap();
    let id = store
        .store_message("Alice lives in Paris", "noted", &[alice()])
        .await
        .unwrap();
    store
        .store_fact("Alice", "lives in", "Paris", Some(id))
        .await
        .unwrap();
    drop(store);

    let reopened = open_store(&config, dir.path(), SystemClock::shared()).await.unwrap();
    let stats = reopened.stats().await.unwrap();
    assert_eq!(stats.messages, 1);
    assert_eq!(stats.entities, 1);
    assert_eq!(stats.facts, 1);
    assert_eq!(stats.relationships, 2);
    assert_eq!(reopened.recent_conversations(5).await.unwrap()[0].id, id);
    reopened.close().await.unwrap();
}

macro_rules! backend_contract {
    ($name:ident, $backend:expr) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn test_upsert_merges_properties() {
                upsert_merges_properties($backend).await;
            }

            #[tokio::test]
            async fn test_relevance_prefers_coverage_then_recency() {
                relevance_prefers_coverage_then_recency($backend).await;
            }

            #[tokio::test]
            async fn test_recent_conversations_newest_first() {
                recent_conversations_newest_first($backend).await;
            }

            #[tokio::test]
            async fn test_fact_search_caps_and_orders() {
                fact_search_caps_and_orders($backend).await;
            }

            #[tokio::test]
            async fn test_edges_reference_existing_records() {
                edges_reference_existing_records($backend).await;
            }

            #[tokio::test]
            async fn test_entity_relations_follow_shared_messages() {
                entity_relations_follow_shared_messages($backend).await;
            }

            #[tokio::test]
            async fn test_consolidation_flags_each_message_once() {
                consolidation_flags_each_message_once($backend).await;
            }

            #[tokio::test]
            async fn test_close_twice_is_safe() {
                close_twice_is_safe($backend).await;
            }

            #[tokio::test]
            async fn test_single_mention_scenario() {
                single_mention_scenario($backend).await;
            }

            #[tokio::test]
            async fn test_repeated_mention_scenario() {
                repeated_mention_scenario($backend).await;
            }

            #[tokio::test]
            async fn test_facts_are_stored_and_searchable() {
                facts_are_stored_and_searchable($backend).await;
            }

            #[tokio::test]
            async fn test_retrieval_merges_session_then_store() {
                retrieval_merges_session_then_store($backend).await;
            }

            #[tokio::test]
            async fn test_extraction_failures_do_not_abort() {
                extraction_failures_do_not_abort($backend).await;
            }

            #[tokio::test]
            async fn test_consolidation_respects_cutoff() {
                consolidation_respects_cutoff($backend).await;
            }

            #[tokio::test]
            async fn test_unicode_case_folding_matches() {
                unicode_case_folding_matches($backend).await;
            }

            #[tokio::test]
            async fn test_writes_survive_reopen_without_close() {
                writes_survive_reopen_without_close($backend).await;
            }
        }
    };
}

backend_contract!(sqlite, BackendKind::Sqlite);
backend_contract!(file, BackendKind::File);
backend_contract!(graph, BackendKind::Graph);
