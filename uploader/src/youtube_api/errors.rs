//! Errors from calls to the YouTube API.

use crate::error::StorageFault;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// The JSON body Google APIs return on failure.
///
/// See: <https://developers.google.com/youtube/v3/docs/errors>
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleErrorResponse {
    pub error: GoogleError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleError {
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<GoogleErrorDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleErrorDetail {
    /// Machine-readable cause, e.g. `quotaExceeded`.
    pub reason: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no usable API credential")]
    NoCredential,
    #[error(transparent)]
    Storage(#[from] StorageFault),
    #[error("YouTube API {method} request failed with status {status}: {message}")]
    Status {
        method: Method,
        status: StatusCode,
        /// `errors[].reason` values from the response body, if it had one.
        reasons: Vec<String>,
        message: String,
    },
    #[error("send {method} request to YouTube API")]
    Network {
        method: Method,
        #[source]
        source: reqwest::Error,
    },
    #[error("read media {}", path.display())]
    Media {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("upload session response lacked a usable Location header")]
    MissingUploadUrl,
    #[error("parse YouTube API response")]
    Decode(#[source] reqwest::Error),
}

impl ApiError {
    /// Builds a [`ApiError::Status`] from a non-success response, decoding the
    /// Google error body when there is one.
    pub(crate) async fn from_response(method: Method, response: reqwest::Response) -> Self {
        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Self::from_body(method, status, &text)
    }

    pub(crate) fn from_body(method: Method, status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<GoogleErrorResponse>(body) {
            Ok(GoogleErrorResponse { error }) => Self::Status {
                method,
                status,
                reasons: error.errors.into_iter().map(|e| e.reason).collect(),
                message: error.message,
            },
            Err(_) => Self::Status {
                method,
                status,
                reasons: Vec::new(),
                message: body.trim().to_string(),
            },
        }
    }
}
