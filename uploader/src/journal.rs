//! Append-only audit trail of everything the pipeline did to a job.
//!
//! Each event is one JSON line, synced to disk before the pipeline moves on.
//! A torn last line (crash mid-append) is skipped on read, and the next append
//! starts on a fresh line so it does not inherit the fragment.

use crate::drivers::{DeliveryMethod, FailureKind};
use crate::error::StorageFault;
use crate::job::{AttemptOutcome, AttemptRecord, JobId, UploadJob, VideoType};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JournalEvent {
    Attempt(AttemptRecord),
    #[serde(rename_all = "camelCase")]
    Published {
        remote_id: String,
    },
    Queued,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub job_id: JobId,
    pub video_type: VideoType,
    pub at: Timestamp,
    pub event: JournalEvent,
}

#[derive(Debug)]
pub struct AttemptJournal {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl AttemptJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, job: &UploadJob, event: JournalEvent) -> Result<(), StorageFault> {
        let entry = JournalEntry {
            job_id: job.id,
            video_type: job.video_type,
            at: Timestamp::now(),
            event,
        };
        let mut line = serde_json::to_vec(&entry).map_err(|e| StorageFault::encode(&self.path, e))?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageFault::io("create directory", parent, e))?;
        }
        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&self.path)
                .await?;
            if file.metadata().await?.len() > 0 {
                file.seek(SeekFrom::End(-1)).await?;
                let mut last = [0u8; 1];
                file.read_exact(&mut last).await?;
                if last[0] != b'\n' {
                    tracing::warn!(path = %self.path.display(), "journal ends in a torn line");
                    line.insert(0, b'\n');
                }
            }
            file.write_all(&line).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;
        written.map_err(|e| StorageFault::io("append to", &self.path, e))
    }

    pub async fn record_attempt(
        &self,
        job: &UploadJob,
        record: &AttemptRecord,
    ) -> Result<(), StorageFault> {
        self.append(job, JournalEvent::Attempt(record.clone())).await
    }

    /// All readable entries, oldest first.
    pub async fn entries(&self) -> Result<Vec<JournalEntry>, StorageFault> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageFault::io("read", &self.path, e)),
        };
        let mut entries = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = n + 1,
                    "skipping unreadable journal line: {}",
                    e
                ),
            }
        }
        Ok(entries)
    }

    pub async fn summary(&self) -> Result<JournalSummary, StorageFault> {
        let mut summary = JournalSummary::default();
        for entry in self.entries().await? {
            match entry.event {
                JournalEvent::Attempt(record) => {
                    let counts = summary.attempts.entry(record.method).or_default();
                    match record.outcome {
                        AttemptOutcome::Succeeded => counts.succeeded += 1,
                        AttemptOutcome::Failed => {
                            counts.failed += 1;
                            if let Some(kind) = record.failure_reason {
                                *summary.failures.entry(kind).or_default() += 1;
                            }
                        }
                    }
                }
                JournalEvent::Published { .. } => summary.published += 1,
                JournalEvent::Queued => summary.queued += 1,
                JournalEvent::Abandoned => summary.abandoned += 1,
            }
        }
        Ok(summary)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCounts {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalSummary {
    pub attempts: BTreeMap<DeliveryMethod, MethodCounts>,
    pub failures: BTreeMap<FailureKind, usize>,
    pub published: usize,
    pub queued: usize,
    pub abandoned: usize,
}
