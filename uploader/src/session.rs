//! Persisted browser login session.
//!
//! The pipeline never judges whether a session is still good; the browser
//! driver finds out by looking at what the upload page renders.

use crate::error::StorageFault;
use crate::storage;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
}

/// Snapshot of authenticated browser state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub captured_at: Timestamp,
    pub cookies: Vec<SessionCookie>,
}

impl Session {
    pub fn new(cookies: Vec<SessionCookie>) -> Self {
        Self {
            captured_at: Timestamp::now(),
            cookies,
        }
    }
}

/// The session file. Writes go through a lock so two savers never interleave.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<Session>, StorageFault> {
        storage::read_json(&self.path).await
    }

    pub async fn save(&self, session: &Session) -> Result<(), StorageFault> {
        let _guard = self.write_lock.lock().await;
        storage::write_json_atomic(&self.path, session).await?;
        tracing::debug!(cookies = session.cookies.len(), "saved browser session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        assert_eq!(store.load().await.unwrap(), None);

        let session = Session::new(vec![SessionCookie {
            name: "SID".into(),
            value: "abc".into(),
            domain: Some(".youtube.com".into()),
            path: Some("/".into()),
            secure: Some(true),
            http_only: None,
        }]);
        store.save(&session).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(session));
    }
}
