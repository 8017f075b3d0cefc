//! Startup backend selection.

use std::path::Path;

use sigma_core::clock::SharedClock;
use sigma_core::memory::box_store::BoxMemoryStore;
use sigma_types::config::{BackendKind, MemoryConfig};
use sigma_types::error::InitializationError;

use crate::file::{JsonFileMemoryStore, MEMORY_FILE};
use crate::graph::{GRAPH_SNAPSHOT_FILE, GraphMemoryStore};
use crate::sqlite::memory::SqliteMemoryStore;
use crate::sqlite::pool::database_url;

/// Open the backend named by `config.backend` inside `data_dir`.
///
/// Any failure here is fatal: the assistant must not run without memory.
pub async fn open_store(
    config: &MemoryConfig,
    data_dir: &Path,
    clock: SharedClock,
) -> Result<BoxMemoryStore, InitializationError> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .map_err(|e| InitializationError::Backend(format!("{}: {e}", data_dir.display())))?;

    let store = match config.backend {
        BackendKind::Sqlite => {
            BoxMemoryStore::new(SqliteMemoryStore::open(&database_url(data_dir), clock).await?)
        }
        BackendKind::File => {
            BoxMemoryStore::new(JsonFileMemoryStore::open(data_dir.join(MEMORY_FILE), clock).await?)
        }
        BackendKind::Graph => BoxMemoryStore::new(
            GraphMemoryStore::open(data_dir.join(GRAPH_SNAPSHOT_FILE), clock).await?,
        ),
    };

    tracing::info!(backend = %config.backend, data_dir = %data_dir.display(), "Memory store ready");
    Ok(store)
}
