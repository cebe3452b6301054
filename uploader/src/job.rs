//! The unit of work flowing through the delivery pipeline.
//!
//! An [`UploadJob`] is created once per generated video, carries its own
//! append-only audit trail of [`AttemptRecord`]s, and only ever moves forward
//! through [`JobStatus`].

use crate::drivers::{DeliveryMethod, FailureKind, UploadOutcome};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Stable unique identifier of an [`UploadJob`], never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Which publishing format a video targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    Shortform,
    Longform,
}

impl VideoType {
    pub const ALL: [VideoType; 2] = [VideoType::Shortform, VideoType::Longform];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoType::Shortform => "shortform",
            VideoType::Longform => "longform",
        }
    }
}

impl fmt::Display for VideoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shortform" | "short" => Ok(VideoType::Shortform),
            "longform" | "long" => Ok(VideoType::Longform),
            other => Err(format!("unknown video type: {other}")),
        }
    }
}

/// Lifecycle of a job.
///
/// `new -> delivering -> {published | pending-retry} -> {published | abandoned}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    New,
    Delivering,
    PendingRetry,
    Published,
    Abandoned,
}

impl JobStatus {
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (New, Delivering)
                | (Delivering, Published)
                | (Delivering, PendingRetry)
                | (PendingRetry, Published)
                | (PendingRetry, Abandoned)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::New => "new",
            JobStatus::Delivering => "delivering",
            JobStatus::PendingRetry => "pending-retry",
            JobStatus::Published => "published",
            JobStatus::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("job cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Publishing metadata for a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Platform category id (YouTube's `snippet.categoryId`, e.g. `"25"` for News & Politics).
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Identifier of the article the video was generated from. The caller dedups on it.
    pub source_article: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

/// One delivery attempt. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub method: DeliveryMethod,
    pub timestamp: Timestamp,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl AttemptRecord {
    pub fn from_outcome(method: DeliveryMethod, outcome: &UploadOutcome, timestamp: Timestamp) -> Self {
        match outcome {
            UploadOutcome::Success { remote_id } => Self {
                method,
                timestamp,
                outcome: AttemptOutcome::Succeeded,
                failure_reason: None,
                detail: None,
                remote_id: Some(remote_id.clone()),
            },
            UploadOutcome::Failure { kind, detail } => Self {
                method,
                timestamp,
                outcome: AttemptOutcome::Failed,
                failure_reason: Some(*kind),
                detail: Some(detail.clone()),
                remote_id: None,
            },
        }
    }
}

/// What the upstream renderer hands over for publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub video_type: VideoType,
    pub media_path: PathBuf,
    pub metadata: VideoMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub id: JobId,
    pub video_type: VideoType,
    pub media_path: PathBuf,
    pub metadata: VideoMetadata,
    status: JobStatus,
    #[serde(default)]
    attempts: Vec<AttemptRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_id: Option<String>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_attempt_at: Option<Timestamp>,
}

impl UploadJob {
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: JobId::new(),
            video_type: request.video_type,
            media_path: request.media_path,
            metadata: request.metadata,
            status: JobStatus::New,
            attempts: Vec::new(),
            remote_id: None,
            created_at: Timestamp::now(),
            last_attempt_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn last_attempt_at(&self) -> Option<Timestamp> {
        self.last_attempt_at
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Appends an attempt to the audit trail.
    pub fn record_attempt(&mut self, record: AttemptRecord) {
        self.last_attempt_at = Some(record.timestamp);
        self.attempts.push(record);
    }

    pub fn mark_published(&mut self, remote_id: String) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Published)?;
        self.remote_id = Some(remote_id);
        Ok(())
    }

    /// Checks everything that must hold before any attempt is made.
    pub async fn check_preconditions(&self) -> Result<(), InvalidJobReason> {
        if self.status != JobStatus::New {
            return Err(InvalidJobReason::NotNew(self.status));
        }
        if self.metadata.title.trim().is_empty() {
            return Err(InvalidJobReason::EmptyTitle);
        }
        check_media(&self.media_path).await
    }
}

async fn check_media(path: &Path) -> Result<(), InvalidJobReason> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if !meta.is_file() => Err(InvalidJobReason::MediaMissing(path.to_path_buf())),
        Ok(meta) if meta.len() == 0 => Err(InvalidJobReason::MediaEmpty(path.to_path_buf())),
        Ok(_) => Ok(()),
        Err(_) => Err(InvalidJobReason::MediaMissing(path.to_path_buf())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidJobReason {
    #[error("media asset {} does not exist", .0.display())]
    MediaMissing(PathBuf),
    #[error("media asset {} is empty", .0.display())]
    MediaEmpty(PathBuf),
    #[error("title is empty")]
    EmptyTitle,
    #[error("job is already {0}")]
    NotNew(JobStatus),
}
