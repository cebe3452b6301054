//! YouTube Data API v3 client, restricted to what publishing needs.
//!
//! Uploads use the resumable protocol: a metadata-only `POST` opens an upload
//! session whose URL comes back in the `Location` header, then the media is
//! `PUT` to that URL and the response carries the new [`Video`].

pub mod client;
pub mod errors;
pub mod videos;

pub use client::YouTubeClient;
pub use errors::{ApiError, GoogleError, GoogleErrorResponse};
pub use videos::{PrivacyStatus, Video, VideoInsertRequest, VideoSnippet, VideoStatus};
