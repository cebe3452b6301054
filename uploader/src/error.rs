//! Errors that escape the pipeline.
//!
//! Per-attempt failures are not errors; they are classified outcomes. What
//! ends up here is either the caller's fault ([`DeliveryError::InvalidJob`])
//! or infrastructure the pipeline cannot work without ([`StorageFault`]).

use crate::job::{InvalidJobReason, InvalidTransition, JobId, UploadJob};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A durable store could not be read or written.
#[derive(Debug, Error)]
pub enum StorageFault {
    #[error("failed to {op} {}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record in {}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode record for {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageFault {
    pub(crate) fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(path: &Path, source: serde_json::Error) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn encode(path: &Path, source: serde_json::Error) -> Self {
        Self::Encode {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No attempt was made. The job is handed back unchanged.
    #[error("invalid job {}: {reason}", job.id)]
    InvalidJob {
        job: Box<UploadJob>,
        reason: InvalidJobReason,
    },
    #[error("job {0} already has a delivery in flight")]
    AlreadyInFlight(JobId),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    #[error(transparent)]
    Storage(#[from] StorageFault),
}
