//! Keyword relevance and result ordering shared by every backend.
//!
//! Backends only narrow candidates by structure (message kind, a graph walk),
//! never by text: matching and ranking always go through these functions so
//! all backends return identical results.

use std::cmp::Ordering;
use std::collections::HashSet;

use sigma_types::memory::{
    Entity, EntityRelation, FACT_SEARCH_CAP, Fact, Message, MessageKind, RelationLabel,
};
use uuid::Uuid;

/// Split a query into lowercase keywords longer than two characters.
///
/// Repeated words are kept, so each repetition counts again in the matched
/// fraction: for "alice alice paris" a message matching only "alice" scores
/// 2/3 and one matching only "paris" scores 1/3.
pub fn keywords(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() > 2)
        .collect()
}

/// Number of `keywords` found (case-insensitively) in the message's content
/// or response. Repeated keywords are counted once per occurrence.
pub fn matched_keywords(keywords: &[String], message: &Message) -> usize {
    let content = message.content.to_lowercase();
    let response = message.response.to_lowercase();
    keywords
        .iter()
        .filter(|k| content.contains(k.as_str()) || response.contains(k.as_str()))
        .count()
}

/// Rank conversation messages by keyword coverage, newest first on ties.
///
/// Messages that match no keyword are dropped. Because every candidate is
/// scored against the same keyword set, ordering by matched count is the
/// same as ordering by the matched fraction.
pub fn rank_messages(
    keywords: &[String],
    candidates: impl IntoIterator<Item = Message>,
    limit: usize,
) -> Vec<Message> {
    if keywords.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, Message)> = candidates
        .into_iter()
        .filter(|m| m.kind == MessageKind::Conversation)
        .map(|m| (matched_keywords(keywords, &m), m))
        .filter(|(score, _)| *score > 0)
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| b.timestamp.cmp(&a.timestamp)));
    scored.into_iter().take(limit).map(|(_, m)| m).collect()
}

/// Order conversation messages newest first and cap them.
pub fn recent_first(candidates: impl IntoIterator<Item = Message>, limit: usize) -> Vec<Message> {
    let mut messages: Vec<Message> = candidates
        .into_iter()
        .filter(|m| m.kind == MessageKind::Conversation)
        .collect();
    messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    messages.truncate(limit);
    messages
}

/// Order facts by confidence then recency, capped at [`FACT_SEARCH_CAP`].
pub fn rank_facts(mut facts: Vec<Fact>) -> Vec<Fact> {
    facts.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
    facts.truncate(FACT_SEARCH_CAP);
    facts
}

/// Turn co-mentioned entities into relations.
///
/// Drops duplicates and the probed entities themselves, then orders by
/// `updated` descending with name and type as tie-breakers.
pub fn co_mentioned(
    candidates: impl IntoIterator<Item = Entity>,
    probed: &[Uuid],
    limit: usize,
) -> Vec<EntityRelation> {
    let mut seen: HashSet<Uuid> = probed.iter().copied().collect();
    let mut entities: Vec<Entity> = candidates
        .into_iter()
        .filter(|e| seen.insert(e.id))
        .collect();

    entities.sort_by(|a, b| {
        b.updated
            .cmp(&a.updated)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.entity_type.cmp(&b.entity_type))
    });
    entities.truncate(limit);

    entities
        .into_iter()
        .map(|entity| EntityRelation {
            entity,
            label: RelationLabel::CoMentioned,
        })
        .collect()
}
