//! Adjacency index over a flat relationship list.
//!
//! Stores that persist relationships as a plain edge table keep this index
//! alongside it so traversals (e.g. co-mention lookups) touch only the edges
//! of the nodes involved instead of scanning every relationship.

use std::collections::HashMap;

use sigma_types::memory::{NodeKind, RelationLabel, Relationship};
use uuid::Uuid;

/// Maps each node id to the positions of its outgoing and incoming edges
/// in the backing relationship list.
#[derive(Debug, Default, Clone)]
pub struct AdjacencyIndex {
    outgoing: HashMap<Uuid, Vec<usize>>,
    incoming: HashMap<Uuid, Vec<usize>>,
}

impl AdjacencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index for an existing relationship list.
    pub fn build(relationships: &[Relationship]) -> Self {
        let mut index = Self::new();
        for (position, rel) in relationships.iter().enumerate() {
            index.insert(position, rel);
        }
        index
    }

    /// Record the edge stored at `position`.
    pub fn insert(&mut self, position: usize, rel: &Relationship) {
        self.outgoing.entry(rel.from_id).or_default().push(position);
        self.incoming.entry(rel.to_id).or_default().push(position);
    }

    pub fn outgoing(&self, node: &Uuid) -> &[usize] {
        self.outgoing.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming(&self, node: &Uuid) -> &[usize] {
        self.incoming.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids of entities mentioned by any message that also mentions one of
    /// `entities`. May contain duplicates and the probed ids themselves.
    pub fn co_mentioned_ids(&self, relationships: &[Relationship], entities: &[Uuid]) -> Vec<Uuid> {
        let is_mention = |rel: &Relationship| {
            rel.label == RelationLabel::Mentions
                && rel.from_kind == NodeKind::Message
                && rel.to_kind == NodeKind::Entity
        };

        let mut found = Vec::new();
        for entity in entities {
            for &pos in self.incoming(entity) {
                let Some(mention) = relationships.get(pos).filter(|r| is_mention(r)) else {
                    continue;
                };
                for &other in self.outgoing(&mention.from_id) {
                    if let Some(rel) = relationships.get(other).filter(|r| is_mention(r)) {
                        found.push(rel.to_id);
                    }
                }
            }
        }
        found
    }
}
