//! Memory types for Sigma.
//!
//! These types model the assistant's long-term memory: stored conversation
//! turns, the entities and factual triples extracted from them, and the
//! labeled edges connecting a message to what it produced. Session entries
//! and merged retrieval results are modeled here too so every layer shares
//! one vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Confidence assigned to every stored fact.
pub const DEFAULT_FACT_CONFIDENCE: f64 = 0.8;

/// Hard cap on the number of facts returned by a fact search.
pub const FACT_SEARCH_CAP: usize = 10;

/// Kind of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Conversation,
    Other,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Conversation => write!(f, "conversation"),
            MessageKind::Other => write!(f, "other"),
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conversation" => Ok(MessageKind::Conversation),
            "other" => Ok(MessageKind::Other),
            other => Err(format!("invalid message kind: '{other}'")),
        }
    }
}

/// One stored conversation turn: the user's text and the assistant's reply.
///
/// Created once per turn and never mutated, except for the `consolidated`
/// flag set by the consolidation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    /// The user's text.
    pub content: String,
    /// The assistant's reply.
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    #[serde(default)]
    pub consolidated: bool,
}

/// A named, typed real-world referent (person, place, URL, ...).
///
/// Unique by `(name, entity_type)`. Re-mentions merge `properties`
/// (later keys win) and refresh `updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Entity {
    /// Whether this entity is identified by the given `(name, type)` pair.
    pub fn is_keyed_by(&self, name: &str, entity_type: &str) -> bool {
        self.name == name && self.entity_type == entity_type
    }
}

/// A subject-predicate-object triple asserted in a conversation.
///
/// Facts are append-only and intentionally not deduplicated: the same triple
/// stored twice records two separate assertions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: Uuid,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl Fact {
    /// Human-readable rendering: `"{subject} {predicate} {object}"`.
    pub fn display_text(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// The kind of record a relationship endpoint refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Message,
    Entity,
    Fact,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Message => write!(f, "message"),
            NodeKind::Entity => write!(f, "entity"),
            NodeKind::Fact => write!(f, "fact"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "message" => Ok(NodeKind::Message),
            "entity" => Ok(NodeKind::Entity),
            "fact" => Ok(NodeKind::Fact),
            other => Err(format!("invalid node kind: '{other}'")),
        }
    }
}

/// Label carried by a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationLabel {
    /// Message -> Entity it mentions.
    Mentions,
    /// Message -> Fact it contains.
    ContainsFact,
    /// Derived label for entities mentioned by the same message.
    CoMentioned,
}

impl fmt::Display for RelationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationLabel::Mentions => write!(f, "mentions"),
            RelationLabel::ContainsFact => write!(f, "contains-fact"),
            RelationLabel::CoMentioned => write!(f, "co-mentioned"),
        }
    }
}

impl FromStr for RelationLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mentions" => Ok(RelationLabel::Mentions),
            "contains-fact" | "contains_fact" => Ok(RelationLabel::ContainsFact),
            "co-mentioned" | "co_mentioned" => Ok(RelationLabel::CoMentioned),
            other => Err(format!("invalid relation label: '{other}'")),
        }
    }
}

/// A generic labeled edge between two stored records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Uuid,
    pub from_kind: NodeKind,
    pub from_id: Uuid,
    pub to_kind: NodeKind,
    pub to_id: Uuid,
    pub label: RelationLabel,
    pub timestamp: DateTime<Utc>,
}

/// An entity reached from another entity through a shared message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelation {
    pub entity: Entity,
    pub label: RelationLabel,
}

/// An entity as produced by an extractor, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl ExtractedEntity {
    /// An extracted entity with no properties.
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            properties: serde_json::Map::new(),
        }
    }

    /// Attach one property.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// A triple as produced by an extractor, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// Filter for fact searches.
///
/// Each supplied field is a case-insensitive substring match; supplied fields
/// are ANDed and omitted fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactQuery {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
}

impl FactQuery {
    pub fn subject(mut self, s: impl Into<String>) -> Self {
        self.subject = Some(s.into());
        self
    }

    pub fn predicate(mut self, s: impl Into<String>) -> Self {
        self.predicate = Some(s.into());
        self
    }

    pub fn object(mut self, s: impl Into<String>) -> Self {
        self.object = Some(s.into());
        self
    }

    /// Whether `fact` satisfies every supplied field.
    pub fn matches(&self, fact: &Fact) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            match needle {
                Some(n) => haystack.to_lowercase().contains(&n.to_lowercase()),
                None => true,
            }
        }

        contains(&fact.subject, &self.subject)
            && contains(&fact.predicate, &self.predicate)
            && contains(&fact.object, &self.object)
    }
}

/// A short-term memory entry held by the session cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub user_message: String,
    pub assistant_response: String,
    pub timestamp: DateTime<Utc>,
}

/// Where a retrieved memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Session,
    Persistent,
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySource::Session => write!(f, "session"),
            MemorySource::Persistent => write!(f, "persistent"),
        }
    }
}

/// What a retrieved memory represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryItemKind {
    Conversation,
    Fact,
}

impl fmt::Display for MemoryItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryItemKind::Conversation => write!(f, "conversation"),
            MemoryItemKind::Fact => write!(f, "fact"),
        }
    }
}

/// A memory handed to the chat layer, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Stored record id. `None` for session entries.
    pub id: Option<Uuid>,
    pub content: String,
    pub response: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: MemorySource,
    #[serde(rename = "type")]
    pub kind: MemoryItemKind,
    /// Only set for facts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl MemoryItem {
    pub fn from_session(entry: &SessionEntry) -> Self {
        Self {
            id: None,
            content: entry.user_message.clone(),
            response: Some(entry.assistant_response.clone()),
            timestamp: entry.timestamp,
            source: MemorySource::Session,
            kind: MemoryItemKind::Conversation,
            confidence: None,
        }
    }

    pub fn from_message(message: Message) -> Self {
        Self {
            id: Some(message.id),
            content: message.content,
            response: Some(message.response),
            timestamp: message.timestamp,
            source: MemorySource::Persistent,
            kind: MemoryItemKind::Conversation,
            confidence: None,
        }
    }

    pub fn from_fact(fact: Fact) -> Self {
        Self {
            id: Some(fact.id),
            content: fact.display_text(),
            response: None,
            timestamp: fact.timestamp,
            source: MemorySource::Persistent,
            kind: MemoryItemKind::Fact,
            confidence: Some(fact.confidence),
        }
    }
}

/// Totals reported by a persistent store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub messages: u64,
    pub entities: u64,
    pub facts: u64,
    pub relationships: u64,
}

/// Session size plus persistent totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub session_entries: usize,
    pub total_messages: u64,
    pub total_entities: u64,
    pub total_facts: u64,
    pub total_relationships: u64,
}

impl MemoryStats {
    pub fn new(session_entries: usize, store: StoreStats) -> Self {
        Self {
            session_entries,
            total_messages: store.messages,
            total_entities: store.entities,
            total_facts: store.facts,
            total_relationships: store.relationships,
        }
    }
}

/// The four durable collections, as persisted by file-backed stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}
