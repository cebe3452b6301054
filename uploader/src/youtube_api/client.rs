//! Authenticated access to the YouTube Data API.

use crate::credentials::CredentialProvider;
use crate::youtube_api::errors::ApiError;
use crate::youtube_api::videos::{Video, VideoInsertRequest};
use http::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const VIDEO_CONTENT_TYPE: &str = "video/*";

/// Client for the YouTube Data API v3.
///
/// Every request first obtains a fresh access token from the shared
/// [`CredentialProvider`], which refreshes and persists the credential when it
/// is close to expiry.
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    credentials: Arc<CredentialProvider>,
    client: reqwest::Client,
}

impl YouTubeClient {
    pub fn new(credentials: Arc<CredentialProvider>, client: reqwest::Client) -> Self {
        Self {
            credentials,
            client,
        }
    }

    /// An HTTP client suitable for uploads: bounded connect and total time.
    pub fn http_client(request_timeout: Duration) -> reqwest::Result<reqwest::Client> {
        reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(30))
            .timeout(request_timeout)
            .build()
    }

    pub fn credentials(&self) -> &CredentialProvider {
        &self.credentials
    }

    async fn fresh_access_token(&self) -> Result<String, ApiError> {
        self.credentials
            .access_token()
            .await?
            .ok_or(ApiError::NoCredential)
    }

    /// Makes an authenticated request and turns non-success statuses into
    /// [`ApiError::Status`].
    #[instrument(skip(self, json_body, headers), level = tracing::Level::TRACE)]
    async fn make_authenticated_request(
        &self,
        method: Method,
        url: &str,
        query_params: &[(&str, &str)],
        headers: &[(reqwest::header::HeaderName, String)],
        json_body: Option<&impl Serialize>,
    ) -> Result<reqwest::Response, ApiError> {
        let access_token = self.fresh_access_token().await?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .query(query_params);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = json_body {
            request = request
                .header(CONTENT_TYPE, "application/json; charset=UTF-8")
                .json(body);
        }

        let response = request.send().await.map_err(|source| ApiError::Network {
            method: method.clone(),
            source,
        })?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(method, response).await);
        }
        Ok(response)
    }

    /// Uploads a video with the resumable upload protocol and returns the
    /// created resource.
    ///
    /// # Required Scopes
    ///
    /// * `https://www.googleapis.com/auth/youtube.upload`
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/videos/insert>
    #[instrument(skip(self, request), fields(title = %request.snippet.title))]
    pub async fn insert_video(
        &self,
        request: &VideoInsertRequest,
        media: &Path,
    ) -> Result<Video, ApiError> {
        let media_err = |source| ApiError::Media {
            path: media.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(media).await.map_err(media_err)?;
        let length = file.metadata().await.map_err(media_err)?.len();

        // Step 1: open the upload session with the metadata.
        let response = self
            .make_authenticated_request(
                Method::POST,
                UPLOAD_URL,
                &[("uploadType", "resumable"), ("part", "snippet,status")],
                &[
                    (
                        reqwest::header::HeaderName::from_static("x-upload-content-length"),
                        length.to_string(),
                    ),
                    (
                        reqwest::header::HeaderName::from_static("x-upload-content-type"),
                        VIDEO_CONTENT_TYPE.to_string(),
                    ),
                ],
                Some(request),
            )
            .await?;
        let session_url = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or(ApiError::MissingUploadUrl)?;
        tracing::debug!(bytes = length, "opened resumable upload session");

        // Step 2: send the media. The session URL authorizes the upload itself.
        let response = self
            .client
            .put(&session_url)
            .header(CONTENT_TYPE, VIDEO_CONTENT_TYPE)
            .header(CONTENT_LENGTH, length)
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(|source| ApiError::Network {
                method: Method::PUT,
                source,
            })?;
        if !response.status().is_success() {
            return Err(ApiError::from_response(Method::PUT, response).await);
        }

        let video: Video = response.json().await.map_err(ApiError::Decode)?;
        tracing::info!(video_id = %video.id, "uploaded video through the API");
        Ok(video)
    }
}
