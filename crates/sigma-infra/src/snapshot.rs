//! Atomic snapshot writes shared by the file and graph backends.

use std::path::Path;

use sigma_types::error::StorageError;
use sigma_types::memory::MemorySnapshot;

/// Write `snapshot` as pretty JSON to `path`: a sibling `.json.tmp` file is
/// written first and then renamed over the target.
pub(crate) async fn write_snapshot(path: &Path, snapshot: &MemorySnapshot) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| StorageError::Unavailable(format!("{}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::Unavailable(format!("{}: {e}", path.display())))?;
    Ok(())
}
