//! YouTube Videos API types.

use crate::job::UploadJob;
use serde::{Deserialize, Serialize};

/// Longest title YouTube accepts, in characters.
pub const MAX_TITLE_CHARS: usize = 100;
/// Longest description YouTube accepts, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 5000;

/// Body of the `videos.insert` call.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos/insert>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInsertRequest {
    pub snippet: VideoSnippet,
    pub status: VideoStatus,
}

impl VideoInsertRequest {
    pub fn for_job(job: &UploadJob, privacy_status: PrivacyStatus) -> Self {
        let metadata = &job.metadata;
        Self {
            snippet: VideoSnippet {
                title: truncate_chars(metadata.title.trim(), MAX_TITLE_CHARS),
                description: truncate_chars(&metadata.description, MAX_DESCRIPTION_CHARS),
                tags: metadata.tags.clone(),
                category_id: metadata.category.clone(),
            },
            status: VideoStatus {
                privacy_status,
                self_declared_made_for_kids: false,
            },
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Basic details about a video.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos#snippet>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "categoryId")]
    pub category_id: String,
}

/// See: <https://developers.google.com/youtube/v3/docs/videos#status>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStatus {
    #[serde(rename = "privacyStatus")]
    pub privacy_status: PrivacyStatus,
    #[serde(rename = "selfDeclaredMadeForKids", default)]
    pub self_declared_made_for_kids: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    #[default]
    Public,
    Unlisted,
    Private,
}

/// The `video` resource returned once an upload completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    /// The ID that YouTube uses to uniquely identify the video.
    pub id: String,
    pub snippet: Option<VideoSnippet>,
    pub status: Option<VideoStatus>,
}
