//! Delivery through the official YouTube Data API.

use super::{DeliveryMethod, FailureKind, UploadDriver, UploadOutcome};
use crate::error::StorageFault;
use crate::job::UploadJob;
use crate::youtube_api::videos::PrivacyStatus;
use crate::youtube_api::{ApiError, VideoInsertRequest, YouTubeClient};
use async_trait::async_trait;
use http::StatusCode;

/// `errors[].reason` values and what they mean for delivery.
///
/// See: <https://developers.google.com/youtube/v3/docs/errors>
pub const API_REASON_TABLE: &[(&str, FailureKind)] = &[
    ("quotaExceeded", FailureKind::QuotaExceeded),
    ("dailyLimitExceeded", FailureKind::QuotaExceeded),
    ("rateLimitExceeded", FailureKind::QuotaExceeded),
    ("userRateLimitExceeded", FailureKind::QuotaExceeded),
    ("uploadLimitExceeded", FailureKind::QuotaExceeded),
    ("authError", FailureKind::AuthExpired),
    ("invalidCredentials", FailureKind::AuthExpired),
    ("unauthorized", FailureKind::AuthExpired),
    ("backendError", FailureKind::Transient),
    ("internalError", FailureKind::Transient),
    ("serviceUnavailable", FailureKind::Transient),
    ("forbidden", FailureKind::PermanentRejection),
    ("youtubeSignupRequired", FailureKind::PermanentRejection),
    ("badRequest", FailureKind::PermanentRejection),
    ("invalidCategoryId", FailureKind::PermanentRejection),
    ("invalidDescription", FailureKind::PermanentRejection),
    ("invalidFilename", FailureKind::PermanentRejection),
    ("invalidTags", FailureKind::PermanentRejection),
    ("invalidTitle", FailureKind::PermanentRejection),
    ("invalidVideoMetadata", FailureKind::PermanentRejection),
    ("mediaBodyRequired", FailureKind::PermanentRejection),
];

fn classify_reason(reason: &str) -> Option<FailureKind> {
    API_REASON_TABLE
        .iter()
        .find(|(r, _)| *r == reason)
        .map(|(_, kind)| *kind)
}

fn classify_status(status: StatusCode) -> FailureKind {
    match status {
        StatusCode::UNAUTHORIZED => FailureKind::AuthExpired,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FailureKind::Timeout,
        StatusCode::TOO_MANY_REQUESTS => FailureKind::QuotaExceeded,
        s if s.is_server_error() => FailureKind::Transient,
        s if s.is_client_error() => FailureKind::PermanentRejection,
        _ => FailureKind::Transient,
    }
}

/// Maps an API error to the shared failure vocabulary.
///
/// The first reason found in [`API_REASON_TABLE`] wins; otherwise the status
/// class decides.
pub fn classify(err: &ApiError) -> FailureKind {
    match err {
        ApiError::NoCredential => FailureKind::AuthExpired,
        ApiError::Status {
            status, reasons, ..
        } => reasons
            .iter()
            .find_map(|r| classify_reason(r))
            .unwrap_or_else(|| classify_status(*status)),
        ApiError::Network { source, .. } | ApiError::Decode(source) if source.is_timeout() => {
            FailureKind::Timeout
        }
        ApiError::Network { .. } | ApiError::Decode(_) => FailureKind::Transient,
        ApiError::MissingUploadUrl => FailureKind::Transient,
        ApiError::Media { .. } => FailureKind::PermanentRejection,
        // surfaced as a fault by the driver, never classified in practice
        ApiError::Storage(_) => FailureKind::Transient,
    }
}

#[derive(Debug, Clone)]
pub struct ApiDriver {
    client: YouTubeClient,
    privacy: PrivacyStatus,
}

impl ApiDriver {
    pub fn new(client: YouTubeClient, privacy: PrivacyStatus) -> Self {
        Self { client, privacy }
    }
}

#[async_trait]
impl UploadDriver for ApiDriver {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Api
    }

    /// Available when a valid or refreshable credential exists.
    async fn is_available(&self) -> Result<bool, StorageFault> {
        Ok(self.client.credentials().access_token().await?.is_some())
    }

    async fn upload(&self, job: &UploadJob) -> Result<UploadOutcome, StorageFault> {
        let request = VideoInsertRequest::for_job(job, self.privacy);
        match self.client.insert_video(&request, &job.media_path).await {
            Ok(video) => Ok(UploadOutcome::Success {
                remote_id: video.id,
            }),
            Err(ApiError::Storage(fault)) => Err(fault),
            Err(e) => {
                let kind = classify(&e);
                tracing::debug!(job_id = %job.id, %kind, "API upload failed: {:#}", e);
                Ok(UploadOutcome::failure(kind, format!("{:#}", eyre::Report::new(e))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn status_error(status: StatusCode, reasons: &[&str]) -> ApiError {
        ApiError::Status {
            method: Method::POST,
            status,
            reasons: reasons.iter().map(|r| r.to_string()).collect(),
            message: String::new(),
        }
    }

    #[test]
    fn quota_reasons() {
        for reason in ["quotaExceeded", "rateLimitExceeded", "uploadLimitExceeded"] {
            assert_eq!(
                classify(&status_error(StatusCode::FORBIDDEN, &[reason])),
                FailureKind::QuotaExceeded,
                "{reason}"
            );
        }
    }

    #[test]
    fn first_known_reason_wins() {
        let err = status_error(StatusCode::BAD_REQUEST, &["somethingNew", "invalidTitle"]);
        assert_eq!(classify(&err), FailureKind::PermanentRejection);
    }

    #[test]
    fn status_fallbacks() {
        assert_eq!(
            classify(&status_error(StatusCode::UNAUTHORIZED, &[])),
            FailureKind::AuthExpired
        );
        assert_eq!(
            classify(&status_error(StatusCode::SERVICE_UNAVAILABLE, &[])),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&status_error(StatusCode::TOO_MANY_REQUESTS, &[])),
            FailureKind::QuotaExceeded
        );
        assert_eq!(
            classify(&status_error(StatusCode::BAD_REQUEST, &["somethingNew"])),
            FailureKind::PermanentRejection
        );
    }

    #[test]
    fn local_problems() {
        assert_eq!(classify(&ApiError::NoCredential), FailureKind::AuthExpired);
        assert_eq!(classify(&ApiError::MissingUploadUrl), FailureKind::Transient);
        assert_eq!(
            classify(&ApiError::Media {
                path: "x.mp4".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
            FailureKind::PermanentRejection
        );
    }

    #[test]
    fn reason_table_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for (reason, _) in API_REASON_TABLE {
            assert!(seen.insert(*reason), "duplicate reason {reason}");
        }
    }
}
