//! Delivery methods behind one narrow contract.
//!
//! Every driver turns an [`UploadJob`] into an [`UploadOutcome`], classifying
//! failures into the closed [`FailureKind`] vocabulary. Callers decide what to
//! do next from that classification alone, so a driver can be swapped out
//! without touching them.

use crate::error::StorageFault;
use crate::job::UploadJob;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod api;
pub mod browser;

pub use api::ApiDriver;
pub use browser::BrowserDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Api,
    Browser,
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeliveryMethod::Api => "api",
            DeliveryMethod::Browser => "browser",
        })
    }
}

/// Why an attempt did not publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    QuotaExceeded,
    AuthExpired,
    Transient,
    PermanentRejection,
    Timeout,
}

impl FailureKind {
    /// Whether trying the same method again later could plausibly succeed.
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureKind::PermanentRejection)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::QuotaExceeded => "quota exceeded",
            FailureKind::AuthExpired => "auth expired",
            FailureKind::Transient => "transient",
            FailureKind::PermanentRejection => "permanent rejection",
            FailureKind::Timeout => "timeout",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success { remote_id: String },
    Failure { kind: FailureKind, detail: String },
}

impl UploadOutcome {
    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success { .. })
    }
}

/// A single delivery method.
///
/// `Err` is reserved for infrastructure faults (a durable store the driver
/// depends on could not be read or written). Anything the remote side did
/// wrong is an [`UploadOutcome::Failure`].
#[async_trait]
pub trait UploadDriver: Send + Sync {
    /// The capability tag recorded on every attempt this driver makes.
    fn method(&self) -> DeliveryMethod;

    /// Whether this driver can make an attempt at all right now.
    ///
    /// A driver that is unavailable is skipped without recording an attempt.
    async fn is_available(&self) -> Result<bool, StorageFault> {
        Ok(true)
    }

    async fn upload(&self, job: &UploadJob) -> Result<UploadOutcome, StorageFault>;
}
