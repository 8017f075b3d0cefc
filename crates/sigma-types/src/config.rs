//! Configuration types for Sigma's memory subsystem.
//!
//! `MemoryConfig` represents the top-level `config.toml` that selects the
//! persistent backend and tunes retrieval and consolidation.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Which persistent store implementation to open at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Relational tables in SQLite.
    #[default]
    Sqlite,
    /// One JSON file rewritten on every mutation.
    File,
    /// In-process property graph with a snapshot file.
    Graph,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::File => write!(f, "file"),
            BackendKind::Graph => write!(f, "graph"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(BackendKind::Sqlite),
            "file" | "json" => Ok(BackendKind::File),
            "graph" => Ok(BackendKind::Graph),
            other => Err(format!("invalid backend: '{other}'")),
        }
    }
}

/// Top-level configuration for the memory subsystem.
///
/// Loaded from `~/.sigma/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Maximum number of turns held by the session cache.
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,

    /// Session entries merged at the front of `retrieve_memories`.
    #[serde(default = "default_session_recall")]
    pub session_recall: usize,

    /// Default result cap for `retrieve_memories`.
    #[serde(default = "default_retrieve_limit")]
    pub retrieve_limit: usize,

    /// Conversation hits included by `search_memories`.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Default cap for recent-conversation listings.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    /// Messages older than this many days are eligible for consolidation.
    #[serde(default = "default_consolidation_age_days")]
    pub consolidation_age_days: i64,

    /// Maximum messages flagged per consolidation run.
    #[serde(default = "default_consolidation_batch")]
    pub consolidation_batch: usize,

    /// How many query entities `retrieve_memories` probes for relations.
    #[serde(default = "default_relation_probe_entities")]
    pub relation_probe_entities: usize,

    /// Relations fetched per probed entity.
    #[serde(default = "default_relation_probe_limit")]
    pub relation_probe_limit: usize,
}

fn default_session_capacity() -> usize {
    20
}

fn default_session_recall() -> usize {
    3
}

fn default_retrieve_limit() -> usize {
    5
}

fn default_search_limit() -> usize {
    10
}

fn default_recent_limit() -> usize {
    20
}

fn default_consolidation_age_days() -> i64 {
    7
}

fn default_consolidation_batch() -> usize {
    50
}

fn default_relation_probe_entities() -> usize {
    2
}

fn default_relation_probe_limit() -> usize {
    2
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            session_capacity: default_session_capacity(),
            session_recall: default_session_recall(),
            retrieve_limit: default_retrieve_limit(),
            search_limit: default_search_limit(),
            recent_limit: default_recent_limit(),
            consolidation_age_days: default_consolidation_age_days(),
            consolidation_batch: default_consolidation_batch(),
            relation_probe_entities: default_relation_probe_entities(),
            relation_probe_limit: default_relation_probe_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_default_values() {
        let config = MemoryConfig::default();
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.session_capacity, 20);
        assert_eq!(config.session_recall, 3);
        assert_eq!(config.retrieve_limit, 5);
        assert_eq!(config.consolidation_age_days, 7);
        assert_eq!(config.consolidation_batch, 50);
    }

    #[test]
    fn test_memory_config_deserialize_with_defaults() {
        let config: MemoryConfig = toml::from_str("").unwrap();
        assert_eq!(config, MemoryConfig::default());
    }

    #[test]
    fn test_memory_config_deserialize_with_values() {
        let toml_str = r#"
backend = "graph"
session_capacity = 50
consolidation_age_days = 30
"#;
        let config: MemoryConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backend, BackendKind::Graph);
        assert_eq!(config.session_capacity, 50);
        assert_eq!(config.consolidation_age_days, 30);
        // Untouched fields keep their defaults
        assert_eq!(config.retrieve_limit, 5);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("SQLite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("json".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert!("neo4j".parse::<BackendKind>().is_err());
    }
}
