//! Short-term session memory.
//!
//! `SessionCache` holds the freshest conversation turns in process memory so
//! retrieval does not need a store round trip for the current conversation.
//! Nothing here is persisted; contents are gone when the process exits.

use std::collections::VecDeque;

use sigma_types::memory::SessionEntry;

use crate::clock::{SharedClock, SystemClock};

/// Default number of turns kept.
pub const DEFAULT_SESSION_CAPACITY: usize = 20;

/// Bounded, recency-ordered cache of conversation turns.
///
/// Owned by a single orchestrator; mutation requires `&mut self`, so no
/// locking is involved.
pub struct SessionCache {
    /// Insertion order: front = oldest, back = newest.
    entries: VecDeque<SessionEntry>,
    capacity: usize,
    clock: SharedClock,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, SystemClock::shared())
    }

    pub fn with_clock(capacity: usize, clock: SharedClock) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024) + 1),
            capacity,
            clock,
        }
    }

    /// Record a turn at the current time.
    ///
    /// When the cache grows past capacity, the entry with the smallest
    /// timestamp is evicted and returned.
    pub fn append(
        &mut self,
        user_message: impl Into<String>,
        assistant_response: impl Into<String>,
    ) -> Option<SessionEntry> {
        self.entries.push_back(SessionEntry {
            user_message: user_message.into(),
            assistant_response: assistant_response.into(),
            timestamp: self.clock.now(),
        });

        if self.entries.len() > self.capacity {
            self.evict_oldest()
        } else {
            None
        }
    }

    /// The `n` most recently inserted entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<SessionEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_oldest(&mut self) -> Option<SessionEntry> {
        let oldest = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.timestamp)
            .map(|(i, _)| i)?;
        self.entries.remove(oldest)
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_evicts_oldest_past_capacity() {
        let mut cache = SessionCache::new(20);
        for i in 0..25 {
            cache.append(format!("user {i}"), format!("assistant {i}"));
        }

        assert_eq!(cache.len(), 20);
        let held: Vec<String> = cache.recent(20).into_iter().map(|e| e.user_message).collect();
        let expected: Vec<String> = (5..25).rev().map(|i| format!("user {i}")).collect();
        assert_eq!(held, expected);
    }

    #[test]
    fn test_append_returns_evicted_entry() {
        let mut cache = SessionCache::new(1);
        assert!(cache.append("first", "a").is_none());
        let evicted = cache.append("second", "b").unwrap();
        assert_eq!(evicted.user_message, "first");
        assert_eq!(cache.recent(5)[0].user_message, "second");
    }

    #[test]
    fn test_recent_is_newest_first_and_capped() {
        let mut cache = SessionCache::default();
        cache.append("one", "1");
        cache.append("two", "2");
        cache.append("three", "3");

        let recent = cache.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_message, "three");
        assert_eq!(recent[1].user_message, "two");
        assert!(recent[0].timestamp > recent[1].timestamp);
        assert!(cache.recent(0).is_empty());
    }

    #[test]
    fn test_independent_instances() {
        let mut a = SessionCache::new(5);
        let b = SessionCache::new(5);
        a.append("only in a", "");
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
        a.clear();
        assert!(a.is_empty());
    }
}
