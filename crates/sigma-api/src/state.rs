//! Application state wiring the memory orchestrator to a concrete backend.
//!
//! The orchestrator is generic over store and extractor; `AppState` pins it to
//! the runtime-selected `BoxMemoryStore` and the CLI's `SuppliedExtractor`.

use std::path::PathBuf;

use anyhow::Context;

use sigma_core::clock::SystemClock;
use sigma_core::memory::box_store::BoxMemoryStore;
use sigma_core::memory::extractor::SuppliedExtractor;
use sigma_core::memory::orchestrator::MemoryOrchestrator;
use sigma_infra::backend::open_store;
use sigma_infra::config::{load_memory_config, resolve_data_dir};
use sigma_types::config::BackendKind;

pub type ConcreteOrchestrator = MemoryOrchestrator<BoxMemoryStore, SuppliedExtractor>;

/// Everything a command handler needs.
pub struct AppState {
    pub memory: ConcreteOrchestrator,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, apply overrides and
    /// open the configured backend.
    pub async fn init(
        data_dir: Option<PathBuf>,
        backend: Option<BackendKind>,
        extractor: SuppliedExtractor,
    ) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(resolve_data_dir);

        let mut config = load_memory_config(&data_dir).await;
        if let Some(backend) = backend {
            config.backend = backend;
        }

        let clock = SystemClock::shared();
        let store = open_store(&config, &data_dir, clock.clone())
            .await
            .with_context(|| {
                format!(
                    "Failed to open {} memory store in {}",
                    config.backend,
                    data_dir.display()
                )
            })?;

        let memory = MemoryOrchestrator::with_clock(store, extractor, config, clock);

        Ok(Self { memory, data_dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigma_core::memory::store::MemoryStore;

    #[tokio::test]
    async fn test_init_applies_backend_override() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "backend = \"sqlite\"\n")
            .await
            .unwrap();

        let state = AppState::init(
            Some(tmp.path().to_path_buf()),
            Some(BackendKind::File),
            SuppliedExtractor::new(),
        )
        .await
        .unwrap();

        assert_eq!(state.memory.config().backend, BackendKind::File);
        state.memory.store().store_message("hi", "hello", &[]).await.unwrap();
        state.memory.close().await.unwrap();
        assert!(tmp.path().join("memory.json").exists());
    }

    #[tokio::test]
    async fn test_init_reports_unusable_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("occupied");
        std::fs::write(&blocker, "not a directory").unwrap();

        let result = AppState::init(Some(blocker), None, SuppliedExtractor::new()).await;
        let err = result.err().unwrap();
        assert!(err.to_string().contains("Failed to open sqlite memory store"));
    }
}
