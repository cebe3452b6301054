//! API credential persistence and refresh.
//!
//! [`CredentialStore`] only reads and writes the credential file.
//! [`CredentialProvider`] is what the API driver talks to: it hands out an
//! access token that is valid for at least [`REFRESH_BUFFER`], refreshing and
//! persisting the credential first when needed.

use crate::error::StorageFault;
use crate::storage;
use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Refresh once less than this much validity remains.
pub const REFRESH_BUFFER: SignedDuration = SignedDuration::from_secs(300);

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expiry: Timestamp,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl Credential {
    /// Whether the access token expires within [`REFRESH_BUFFER`] of `now`.
    pub fn needs_refresh(&self, now: Timestamp) -> bool {
        now.checked_add(REFRESH_BUFFER)
            .map_or(true, |deadline| self.expiry <= deadline)
    }
}

/// The credential file. Absence is a normal state, not an error.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<Credential>, StorageFault> {
        storage::read_json(&self.path).await
    }

    pub async fn save(&self, credential: &Credential) -> Result<(), StorageFault> {
        storage::write_json_atomic(&self.path, credential).await
    }
}

/// Exchanges a refresh token for a new credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// * `Ok(Some(_))` - refreshed
    /// * `Ok(None)` - the grant is no longer valid; a new authorization is needed
    /// * `Err(_)` - network or provider error; the grant may still be fine
    async fn refresh(&self, credential: &Credential) -> eyre::Result<Option<Credential>>;
}

/// Hands out valid access tokens, refreshing through the store as needed.
///
/// Refreshes are serialized so the same credential is never refreshed or
/// written twice concurrently.
pub struct CredentialProvider {
    store: CredentialStore,
    refresher: Option<Arc<dyn TokenRefresher>>,
    refresh_lock: Mutex<()>,
}

impl fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("store", &self.store)
            .field("can_refresh", &self.refresher.is_some())
            .finish()
    }
}

impl CredentialProvider {
    pub fn new(store: CredentialStore, refresher: Option<Arc<dyn TokenRefresher>>) -> Self {
        Self {
            store,
            refresher,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Returns an access token that stays valid for at least [`REFRESH_BUFFER`].
    ///
    /// `Ok(None)` means no credential is obtainable right now: there is no
    /// credential file, it cannot be refreshed, or the refresh failed.
    #[instrument(skip(self))]
    pub async fn access_token(&self) -> Result<Option<String>, StorageFault> {
        let _guard = self.refresh_lock.lock().await;

        let Some(credential) = self.store.load().await? else {
            tracing::debug!(path = %self.store.path().display(), "no stored API credential");
            return Ok(None);
        };

        if !credential.needs_refresh(Timestamp::now()) {
            return Ok(Some(credential.access_token));
        }

        tracing::debug!(expiry = %credential.expiry, "access token expires soon, attempting refresh");
        let Some(refresher) = &self.refresher else {
            tracing::warn!("access token expired and no OAuth client is configured to refresh it");
            return Ok(None);
        };
        if credential.refresh_token.is_none() {
            tracing::warn!("no refresh token available, cannot refresh");
            return Ok(None);
        }

        match refresher.refresh(&credential).await {
            Ok(Some(mut fresh)) => {
                // providers commonly omit the refresh token on refresh; keep the one we have
                if fresh.refresh_token.is_none() {
                    tracing::trace!("new token lacks refresh token, preserving original");
                    fresh.refresh_token = credential.refresh_token.clone();
                }
                self.store.save(&fresh).await?;
                tracing::info!(expiry = %fresh.expiry, "refreshed API credential");
                Ok(Some(fresh.access_token))
            }
            Ok(None) => {
                tracing::warn!("refresh grant rejected, API credential needs re-authorization");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("API credential refresh failed: {:#}", e);
                Ok(None)
            }
        }
    }

    /// Whether a credential file exists at all.
    pub async fn has_credential(&self) -> Result<bool, StorageFault> {
        Ok(self.store.load().await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedRefresher {
        calls: AtomicUsize,
        result: fn() -> eyre::Result<Option<Credential>>,
    }

    #[async_trait]
    impl TokenRefresher for ScriptedRefresher {
        async fn refresh(&self, _: &Credential) -> eyre::Result<Option<Credential>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn credential(access: &str, expires_in: SignedDuration) -> Credential {
        Credential {
            access_token: access.into(),
            refresh_token: Some("refresh".into()),
            scope: "https://www.googleapis.com/auth/youtube.upload".into(),
            token_type: "Bearer".into(),
            expiry: Timestamp::now().checked_add(expires_in).unwrap(),
        }
    }

    fn provider(
        dir: &Path,
        result: fn() -> eyre::Result<Option<Credential>>,
    ) -> (CredentialProvider, Arc<ScriptedRefresher>) {
        let refresher = Arc::new(ScriptedRefresher {
            calls: AtomicUsize::new(0),
            result,
        });
        let store = CredentialStore::new(dir.join("credentials.json"));
        (
            CredentialProvider::new(store, Some(refresher.clone() as Arc<dyn TokenRefresher>)),
            refresher,
        )
    }

    #[test]
    fn refresh_buffer_boundary() {
        let now = Timestamp::now();
        let mut c = credential("a", SignedDuration::from_secs(3600));
        assert!(!c.needs_refresh(now));
        c.expiry = now.checked_add(SignedDuration::from_secs(299)).unwrap();
        assert!(c.needs_refresh(now));
        c.expiry = now.checked_add(SignedDuration::from_secs(301)).unwrap();
        assert!(!c.needs_refresh(now));
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = credential("super-secret", SignedDuration::from_secs(60));
        let s = format!("{c:?}");
        assert!(!s.contains("super-secret"));
        assert!(!s.contains("\"refresh\""));
    }

    #[tokio::test]
    async fn absent_file_means_no_credential() {
        let dir = tempfile::tempdir().unwrap();
        let (p, refresher) = provider(dir.path(), || Ok(None));
        assert_eq!(p.access_token().await.unwrap(), None);
        assert!(!p.has_credential().await.unwrap());
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_token_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let (p, refresher) = provider(dir.path(), || Ok(None));
        p.store()
            .save(&credential("fresh", SignedDuration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(p.access_token().await.unwrap().as_deref(), Some("fresh"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn near_expiry_refreshes_and_preserves_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let (p, refresher) = provider(dir.path(), || {
            let mut c = credential("renewed", SignedDuration::from_secs(3600));
            c.refresh_token = None;
            Ok(Some(c))
        });
        p.store()
            .save(&credential("stale", SignedDuration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(p.access_token().await.unwrap().as_deref(), Some("renewed"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        let stored = p.store().load().await.unwrap().unwrap();
        assert_eq!(stored.access_token, "renewed");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));

        // now fresh, no second refresh
        assert_eq!(p.access_token().await.unwrap().as_deref(), Some("renewed"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_or_failed_refresh_means_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (p, _) = provider(dir.path(), || Ok(None));
        p.store()
            .save(&credential("stale", SignedDuration::from_secs(-60)))
            .await
            .unwrap();
        assert_eq!(p.access_token().await.unwrap(), None);

        let (p, _) = provider(dir.path(), || Err(eyre::eyre!("connection reset")));
        assert_eq!(p.access_token().await.unwrap(), None);
        // the stale credential is left alone for a later refresh
        assert_eq!(
            p.store().load().await.unwrap().unwrap().access_token,
            "stale"
        );
    }

    #[tokio::test]
    async fn no_refresher_configured() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store
            .save(&credential("stale", SignedDuration::from_secs(10)))
            .await
            .unwrap();
        let p = CredentialProvider::new(store, None);
        assert_eq!(p.access_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_storage_fault() {
        let dir = tempfile::tempdir().unwrap();
        let (p, _) = provider(dir.path(), || Ok(None));
        std::fs::write(p.store().path(), b"not json").unwrap();
        assert!(matches!(
            p.access_token().await,
            Err(StorageFault::Malformed { .. })
        ));
    }
}
