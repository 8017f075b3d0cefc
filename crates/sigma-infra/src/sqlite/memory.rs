//! SQLite memory store implementation.
//!
//! Implements `MemoryStore` from `sigma-core` with sqlx over split read/write
//! pools: raw queries, private Row structs, writes on the writer pool and
//! reads on the reader pool. The graph is emulated with four tables joined
//! through the generic `relationships` edge table.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sigma_core::clock::{SharedClock, SystemClock};
use sigma_core::memory::relevance;
use sigma_core::memory::store::MemoryStore;
use sigma_types::error::{InitializationError, StorageError};
use sigma_types::memory::{
    DEFAULT_FACT_CONFIDENCE, Entity, EntityRelation, ExtractedEntity, Fact, FactQuery, Message,
    MessageKind, NodeKind, RelationLabel, Relationship, StoreStats,
};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `MemoryStore`.
pub struct SqliteMemoryStore {
    pool: DatabasePool,
    clock: SharedClock,
}

impl SqliteMemoryStore {
    /// Create a store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self::with_clock(pool, SystemClock::shared())
    }

    pub fn with_clock(pool: DatabasePool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    /// Open the database at `database_url`, applying migrations.
    pub async fn open(database_url: &str, clock: SharedClock) -> Result<Self, InitializationError> {
        let pool = DatabasePool::new(database_url).await.map_err(|e| match e {
            sqlx::Error::Migrate(e) => InitializationError::Schema(e.to_string()),
            other => InitializationError::Backend(other.to_string()),
        })?;
        tracing::debug!(database_url, "Opened SQLite memory store");
        Ok(Self::with_clock(pool, clock))
    }

    async fn upsert_entity(
        &self,
        entity: &ExtractedEntity,
        message_id: Option<Uuid>,
    ) -> Result<Entity, StorageError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let existing = sqlx::query("SELECT * FROM entities WHERE name = ? AND type = ?")
            .bind(&entity.name)
            .bind(&entity.entity_type)
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?;

        let now = self.clock.now();
        let stored = match existing {
            Some(row) => {
                let mut stored = EntityRow::from_row(&row).map_err(query_err)?.into_entity()?;
                for (key, value) in &entity.properties {
                    stored.properties.insert(key.clone(), value.clone());
                }
                stored.updated = now;

                sqlx::query("UPDATE entities SET properties = ?, updated = ? WHERE id = ?")
                    .bind(encode_properties(&stored.properties)?)
                    .bind(format_datetime(&stored.updated))
                    .bind(stored.id.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(query_err)?;
                stored
            }
            None => {
                let stored = Entity {
                    id: Uuid::now_v7(),
                    name: entity.name.clone(),
                    entity_type: entity.entity_type.clone(),
                    properties: entity.properties.clone(),
                    created: now,
                    updated: now,
                };

                sqlx::query(
                    r#"INSERT INTO entities (id, name, type, properties, created, updated)
                       VALUES (?, ?, ?, ?, ?, ?)"#,
                )
                .bind(stored.id.to_string())
                .bind(&stored.name)
                .bind(&stored.entity_type)
                .bind(encode_properties(&stored.properties)?)
                .bind(format_datetime(&stored.created))
                .bind(format_datetime(&stored.updated))
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
                stored
            }
        };

        if let Some(message_id) = message_id {
            link_from_message(
                &mut tx,
                message_id,
                NodeKind::Entity,
                stored.id,
                RelationLabel::Mentions,
                now,
            )
            .await?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(stored)
    }

    async fn fetch_messages(
        &self,
        sql: &str,
        binds: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StorageError> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        if let Some(limit) = limit {
            query = query.bind(limit as i64);
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            messages.push(MessageRow::from_row(row).map_err(query_err)?.into_message()?);
        }
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct MessageRow {
    id: String,
    content: String,
    response: String,
    timestamp: String,
    kind: String,
    consolidated: i64,
}

impl MessageRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            content: row.try_get("content")?,
            response: row.try_get("response")?,
            timestamp: row.try_get("timestamp")?,
            kind: row.try_get("kind")?,
            consolidated: row.try_get("consolidated")?,
        })
    }

    fn into_message(self) -> Result<Message, StorageError> {
        let kind: MessageKind = self.kind.parse().map_err(StorageError::Query)?;
        Ok(Message {
            id: parse_uuid(&self.id, "message id")?,
            content: self.content,
            response: self.response,
            timestamp: parse_datetime(&self.timestamp)?,
            kind,
            consolidated: self.consolidated != 0,
        })
    }
}

struct EntityRow {
    id: String,
    name: String,
    entity_type: String,
    properties: String,
    created: String,
    updated: String,
}

impl EntityRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            entity_type: row.try_get("type")?,
            properties: row.try_get("properties")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }

    fn into_entity(self) -> Result<Entity, StorageError> {
        let properties: Map<String, Value> = serde_json::from_str(&self.properties)
            .map_err(|e| StorageError::Serialization(format!("invalid entity properties: {e}")))?;
        Ok(Entity {
            id: parse_uuid(&self.id, "entity id")?,
            name: self.name,
            entity_type: self.entity_type,
            properties,
            created: parse_datetime(&self.created)?,
            updated: parse_datetime(&self.updated)?,
        })
    }
}

struct FactRow {
    id: String,
    subject: String,
    predicate: String,
    object: String,
    confidence: f64,
    timestamp: String,
}

impl FactRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            subject: row.try_get("subject")?,
            predicate: row.try_get("predicate")?,
            object: row.try_get("object")?,
            confidence: row.try_get("confidence")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn into_fact(self) -> Result<Fact, StorageError> {
        Ok(Fact {
            id: parse_uuid(&self.id, "fact id")?,
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
            confidence: self.confidence,
            timestamp: parse_datetime(&self.timestamp)?,
        })
    }
}

struct RelationshipRow {
    id: String,
    from_kind: String,
    from_id: String,
    to_kind: String,
    to_id: String,
    label: String,
    timestamp: String,
}

impl RelationshipRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            from_kind: row.try_get("from_kind")?,
            from_id: row.try_get("from_id")?,
            to_kind: row.try_get("to_kind")?,
            to_id: row.try_get("to_id")?,
            label: row.try_get("label")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn into_relationship(self) -> Result<Relationship, StorageError> {
        Ok(Relationship {
            id: parse_uuid(&self.id, "relationship id")?,
            from_kind: self.from_kind.parse().map_err(StorageError::Query)?,
            from_id: parse_uuid(&self.from_id, "from_id")?,
            to_kind: self.to_kind.parse().map_err(StorageError::Query)?,
            to_id: parse_uuid(&self.to_id, "to_id")?,
            label: self.label.parse().map_err(StorageError::Query)?,
            timestamp: parse_datetime(&self.timestamp)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_err(e: sqlx::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(s).map_err(|e| StorageError::Query(format!("invalid {what}: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width microsecond RFC 3339, so text order is time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_properties(properties: &Map<String, Value>) -> Result<String, StorageError> {
    serde_json::to_string(properties).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Add a message -> node edge, skipping it when the message does not exist.
async fn link_from_message(
    conn: &mut SqliteConnection,
    message_id: Uuid,
    to_kind: NodeKind,
    to_id: Uuid,
    label: RelationLabel,
    at: DateTime<Utc>,
) -> Result<(), StorageError> {
    let exists = sqlx::query("SELECT 1 FROM messages WHERE id = ?")
        .bind(message_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_err)?
        .is_some();

    if !exists {
        tracing::warn!(message_id = %message_id, %label, "Unknown message, edge not created");
        return Ok(());
    }

    sqlx::query(
        r#"INSERT INTO relationships (id, from_kind, from_id, to_kind, to_id, label, timestamp)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(Uuid::now_v7().to_string())
    .bind(NodeKind::Message.to_string())
    .bind(message_id.to_string())
    .bind(to_kind.to_string())
    .bind(to_id.to_string())
    .bind(label.to_string())
    .bind(format_datetime(&at))
    .execute(&mut *conn)
    .await
    .map_err(query_err)?;

    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryStore implementation
// ---------------------------------------------------------------------------

impl MemoryStore for SqliteMemoryStore {
    async fn store_message(
        &self,
        content: &str,
        response: &str,
        entities: &[ExtractedEntity],
    ) -> Result<Uuid, StorageError> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"INSERT INTO messages (id, content, response, timestamp, kind, consolidated)
               VALUES (?, ?, ?, ?, ?, 0)"#,
        )
        .bind(id.to_string())
        .bind(content)
        .bind(response)
        .bind(format_datetime(&self.clock.now()))
        .bind(MessageKind::Conversation.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        for entity in entities {
            self.upsert_entity(entity, Some(id)).await?;
        }

        Ok(id)
    }

    async fn store_entity(
        &self,
        entity: &ExtractedEntity,
        message_id: Option<Uuid>,
    ) -> Result<Entity, StorageError> {
        self.upsert_entity(entity, message_id).await
    }

    async fn store_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        message_id: Option<Uuid>,
    ) -> Result<Uuid, StorageError> {
        let id = Uuid::now_v7();
        let now = self.clock.now();
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO facts (id, subject, predicate, object, confidence, timestamp)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id.to_string())
        .bind(subject)
        .bind(predicate)
        .bind(object)
        .bind(DEFAULT_FACT_CONFIDENCE)
        .bind(format_datetime(&now))
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        if let Some(message_id) = message_id {
            link_from_message(
                &mut tx,
                message_id,
                NodeKind::Fact,
                id,
                RelationLabel::ContainsFact,
                now,
            )
            .await?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(id)
    }

    async fn relevant_memories(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let keywords = relevance::keywords(query);
        if keywords.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // Text matching stays in Rust: SQLite's lower() does not fold the
        // characters that to_lowercase() does.
        let candidates = self
            .fetch_messages("SELECT * FROM messages WHERE kind = 'conversation'", &[], None)
            .await?;
        Ok(relevance::rank_messages(&keywords, candidates, limit))
    }

    async fn recent_conversations(&self, limit: usize) -> Result<Vec<Message>, StorageError> {
        self.fetch_messages(
            "SELECT * FROM messages WHERE kind = 'conversation' ORDER BY timestamp DESC LIMIT ?",
            &[],
            Some(limit),
        )
        .await
    }

    async fn entity_relations(
        &self,
        entity_name: &str,
        limit: usize,
    ) -> Result<Vec<EntityRelation>, StorageError> {
        let probed: Vec<(String,)> = sqlx::query_as("SELECT id FROM entities WHERE name = ?")
            .bind(entity_name)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        if probed.is_empty() {
            return Ok(Vec::new());
        }
        let probed_ids = probed
            .iter()
            .map(|(id,)| parse_uuid(id, "entity id"))
            .collect::<Result<Vec<_>, _>>()?;

        let rows = sqlx::query(
            r#"SELECT DISTINCT other.*
               FROM entities probe
               JOIN relationships m1
                 ON m1.to_kind = 'entity' AND m1.to_id = probe.id
                AND m1.from_kind = 'message' AND m1.label = 'mentions'
               JOIN relationships m2
                 ON m2.from_kind = 'message' AND m2.from_id = m1.from_id
                AND m2.to_kind = 'entity' AND m2.label = 'mentions'
               JOIN entities other ON other.id = m2.to_id
               WHERE probe.name = ?"#,
        )
        .bind(entity_name)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            candidates.push(EntityRow::from_row(row).map_err(query_err)?.into_entity()?);
        }

        Ok(relevance::co_mentioned(candidates, &probed_ids, limit))
    }

    async fn search_facts(&self, query: &FactQuery) -> Result<Vec<Fact>, StorageError> {
        let rows = sqlx::query("SELECT * FROM facts")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut facts = Vec::with_capacity(rows.len());
        for row in &rows {
            let fact = FactRow::from_row(row).map_err(query_err)?.into_fact()?;
            if query.matches(&fact) {
                facts.push(fact);
            }
        }
        Ok(relevance::rank_facts(facts))
    }

    async fn get_entity(
        &self,
        name: &str,
        entity_type: &str,
    ) -> Result<Option<Entity>, StorageError> {
        let row = sqlx::query("SELECT * FROM entities WHERE name = ? AND type = ?")
            .bind(name)
            .bind(entity_type)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(
                EntityRow::from_row(&row).map_err(query_err)?.into_entity()?,
            )),
            None => Ok(None),
        }
    }

    async fn relationships_for_message(
        &self,
        message_id: &Uuid,
    ) -> Result<Vec<Relationship>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM relationships WHERE from_kind = 'message' AND from_id = ? ORDER BY timestamp ASC",
        )
        .bind(message_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut relationships = Vec::with_capacity(rows.len());
        for row in &rows {
            relationships.push(
                RelationshipRow::from_row(row)
                    .map_err(query_err)?
                    .into_relationship()?,
            );
        }
        Ok(relationships)
    }

    async fn unconsolidated_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        self.fetch_messages(
            r#"SELECT * FROM messages
               WHERE kind = 'conversation' AND consolidated = 0 AND timestamp < ?
               ORDER BY timestamp ASC LIMIT ?"#,
            &[format_datetime(&cutoff)],
            Some(limit),
        )
        .await
    }

    async fn mark_consolidated(&self, message_ids: &[Uuid]) -> Result<u64, StorageError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let mut flagged = 0;
        for id in message_ids {
            let result =
                sqlx::query("UPDATE messages SET consolidated = 1 WHERE id = ? AND consolidated = 0")
                    .bind(id.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(query_err)?;
            flagged += result.rows_affected();
        }

        tx.commit().await.map_err(query_err)?;
        Ok(flagged)
    }

    async fn stats(&self) -> Result<StoreStats, StorageError> {
        let (messages, entities, facts, relationships): (i64, i64, i64, i64) = sqlx::query_as(
            r#"SELECT
                 (SELECT COUNT(*) FROM messages),
                 (SELECT COUNT(*) FROM entities),
                 (SELECT COUNT(*) FROM facts),
                 (SELECT COUNT(*) FROM relationships)"#,
        )
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        Ok(StoreStats {
            messages: messages as u64,
            entities: entities as u64,
            facts: facts as u64,
            relationships: relationships as u64,
        })
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}
