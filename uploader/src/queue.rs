//! Durable store of jobs that exhausted immediate delivery.
//!
//! [`FsPendingQueue`] keeps one JSON file per entry, grouped in one directory
//! per [`VideoType`]:
//!
//! ```text
//! pending/
//!   shortform/<job id>.json
//!   longform/<job id>.json
//! ```
//!
//! Every write lands in a hidden temp file first and is renamed into place, so
//! a reader sees each entry either whole or not at all. Entries that fail to
//! decode are logged and skipped rather than failing the listing.

use crate::error::StorageFault;
use crate::job::{JobId, JobStatus, UploadJob, VideoType};
use crate::storage::{self, TEMP_PREFIX};
use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReadDirStream;

/// Temp files older than this are left over from a crashed write.
const STALE_TEMP_AGE: Duration = Duration::from_secs(10 * 60);

/// Which part of the queue an operation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueScope {
    Only(VideoType),
    #[default]
    All,
}

impl QueueScope {
    pub fn includes(self, video_type: VideoType) -> bool {
        match self {
            QueueScope::Only(t) => t == video_type,
            QueueScope::All => true,
        }
    }

    fn types(self) -> impl Iterator<Item = VideoType> {
        VideoType::ALL.into_iter().filter(move |t| self.includes(*t))
    }
}

impl From<VideoType> for QueueScope {
    fn from(t: VideoType) -> Self {
        QueueScope::Only(t)
    }
}

impl fmt::Display for QueueScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueScope::Only(t) => t.fmt(f),
            QueueScope::All => f.write_str("all"),
        }
    }
}

impl FromStr for QueueScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(QueueScope::All)
        } else {
            s.parse().map(QueueScope::Only)
        }
    }
}

/// A queued job together with when it entered the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    #[serde(flatten)]
    pub job: UploadJob,
    pub enqueued_at: Timestamp,
}

impl TryFrom<UploadJob> for PendingEntry {
    type Error = UploadJob;

    /// Only `pending-retry` jobs may be queued; anything else is handed back.
    fn try_from(job: UploadJob) -> Result<Self, Self::Error> {
        if job.status() != JobStatus::PendingRetry {
            return Err(job);
        }
        Ok(Self {
            job,
            enqueued_at: Timestamp::now(),
        })
    }
}

impl PendingEntry {
    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn attempt_count(&self) -> usize {
        self.job.attempts().len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub shortform: usize,
    pub longform: usize,
    pub total: usize,
}

#[async_trait]
pub trait PendingQueue: Send + Sync {
    /// Inserts or replaces the entry with the same id.
    async fn put(&self, entry: &PendingEntry) -> Result<(), StorageFault>;

    async fn get(&self, id: JobId) -> Result<Option<PendingEntry>, StorageFault>;

    /// Entries in `scope`, oldest first, at most `limit` of them.
    async fn list_by_type(
        &self,
        scope: QueueScope,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEntry>, StorageFault>;

    async fn count(&self, scope: QueueScope) -> Result<usize, StorageFault> {
        Ok(self.list_by_type(scope, None).await?.len())
    }

    /// Returns whether an entry was removed.
    async fn remove(&self, id: JobId) -> Result<bool, StorageFault>;

    /// Per-type and total counts, all taken from one listing.
    async fn stats(&self) -> Result<QueueStats, StorageFault> {
        let entries = self.list_by_type(QueueScope::All, None).await?;
        let shortform = entries
            .iter()
            .filter(|e| e.job.video_type == VideoType::Shortform)
            .count();
        Ok(QueueStats {
            shortform,
            longform: entries.len() - shortform,
            total: entries.len(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FsPendingQueue {
    root: PathBuf,
}

impl FsPendingQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, video_type: VideoType) -> PathBuf {
        self.root.join(video_type.as_str())
    }

    fn entry_path(&self, video_type: VideoType, id: JobId) -> PathBuf {
        self.type_dir(video_type).join(format!("{id}.json"))
    }

    /// Decodes and sanity-checks one stored entry. `None` means "skip it".
    fn decode(path: &Path, bytes: &[u8], video_type: VideoType, id: JobId) -> Option<PendingEntry> {
        let entry: PendingEntry = match serde_json::from_slice(bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping corrupt pending entry: {}", e);
                return None;
            }
        };
        if entry.job.id != id || entry.job.video_type != video_type {
            tracing::warn!(
                path = %path.display(),
                job_id = %entry.job.id,
                video_type = %entry.job.video_type,
                "skipping misfiled pending entry"
            );
            return None;
        }
        if entry.job.status() != JobStatus::PendingRetry {
            tracing::warn!(
                path = %path.display(),
                status = %entry.job.status(),
                "skipping pending entry that is not pending-retry"
            );
            return None;
        }
        Some(entry)
    }

    async fn read_entry(
        path: &Path,
        video_type: VideoType,
        id: JobId,
    ) -> Result<Option<PendingEntry>, StorageFault> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Self::decode(path, &bytes, video_type, id)),
            // removed between listing and reading
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageFault::io("read", path, e)),
        }
    }

    async fn list_type(&self, video_type: VideoType) -> Result<Vec<PendingEntry>, StorageFault> {
        let dir = self.type_dir(video_type);
        let read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageFault::io("list", &dir, e)),
        };

        let mut entries = Vec::new();
        let mut files = ReadDirStream::new(read_dir);
        while let Some(file) = files.next().await {
            let file = file.map_err(|e| StorageFault::io("list", &dir, e))?;
            let name = file.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                storage::remove_stale_temp(&file.path(), STALE_TEMP_AGE).await;
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Ok(id) = stem.parse::<JobId>() else {
                tracing::warn!(file = name, dir = %dir.display(), "ignoring unexpected file in pending queue");
                continue;
            };
            if let Some(entry) = Self::read_entry(&file.path(), video_type, id).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl PendingQueue for FsPendingQueue {
    async fn put(&self, entry: &PendingEntry) -> Result<(), StorageFault> {
        debug_assert_eq!(entry.job.status(), JobStatus::PendingRetry);
        let path = self.entry_path(entry.job.video_type, entry.job.id);
        storage::write_json_atomic(&path, entry).await?;
        tracing::debug!(
            job_id = %entry.job.id,
            video_type = %entry.job.video_type,
            attempts = entry.attempt_count(),
            "stored pending entry"
        );
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<PendingEntry>, StorageFault> {
        for video_type in VideoType::ALL {
            let path = self.entry_path(video_type, id);
            if let Some(entry) = Self::read_entry(&path, video_type, id).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn list_by_type(
        &self,
        scope: QueueScope,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEntry>, StorageFault> {
        let mut entries = Vec::new();
        for video_type in scope.types() {
            entries.extend(self.list_type(video_type).await?);
        }
        entries.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.job.id.cmp(&b.job.id))
        });
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn remove(&self, id: JobId) -> Result<bool, StorageFault> {
        let mut removed = false;
        for video_type in VideoType::ALL {
            removed |= storage::remove_if_exists(&self.entry_path(video_type, id)).await?;
        }
        if removed {
            tracing::debug!(job_id = %id, "removed pending entry");
        }
        Ok(removed)
    }
}
