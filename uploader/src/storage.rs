//! Small helpers for single-file JSON records on disk.

use crate::error::StorageFault;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Prefix that marks a file as not-yet-committed. Readers must ignore these.
pub(crate) const TEMP_PREFIX: &str = ".";

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    path.with_file_name(format!(
        "{TEMP_PREFIX}{name}.tmp-{}",
        Uuid::new_v4().simple()
    ))
}

/// Writes `value` to `path` so that readers observe either the old file or the
/// complete new one, never a prefix.
///
/// The record is written to a hidden sibling, flushed to disk, and renamed
/// over `path`.
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), StorageFault> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageFault::encode(path, e))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageFault::io("create directory", parent, e))?;
    }

    let tmp = temp_path_for(path);
    let written = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageFault::io("write", &tmp, e));
    }

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageFault::io("commit", path, e));
    }

    sync_parent(path).await;
    Ok(())
}

/// Makes the rename itself durable. Best effort: not every platform lets us
/// open a directory for syncing.
async fn sync_parent(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = tokio::fs::File::open(parent).await {
            if let Err(e) = dir.sync_all().await {
                tracing::debug!(dir = %parent.display(), "could not sync directory: {}", e);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Deletes `path`, a leftover temp file from an interrupted write, once it is
/// older than `age`. Younger ones may belong to a write still in progress.
pub(crate) async fn remove_stale_temp(path: &Path, age: Duration) {
    let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return,
    };
    if modified.elapsed().unwrap_or_default() < age {
        return;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale temp file"),
        Err(e) => tracing::warn!(path = %path.display(), "could not remove stale temp file: {}", e),
    }
}

/// Reads a JSON record. A missing file is `Ok(None)`.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageFault> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageFault::io("read", path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageFault::malformed(path, e))
}

/// Removes a file. Returns whether it existed.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool, StorageFault> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageFault::io("remove", path, e)),
    }
}
