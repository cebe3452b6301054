//! Wires the stores, drivers, dispatcher and retry coordinator together.

use crate::config::Config;
use crate::credentials::{CredentialProvider, CredentialStore, TokenRefresher};
use crate::dispatcher::Dispatcher;
use crate::drivers::browser::{BrowserDriver, WebDriverLauncher};
use crate::drivers::{ApiDriver, UploadDriver};
use crate::error::StorageFault;
use crate::inflight::InFlight;
use crate::journal::{AttemptJournal, JournalSummary};
use crate::queue::{FsPendingQueue, PendingQueue, QueueStats};
use crate::retry::RetryCoordinator;
use crate::session::SessionStore;
use crate::youtube_api::{PrivacyStatus, YouTubeClient};
use eyre::Context;
use serde::Serialize;
use std::sync::Arc;

/// Everything one process needs, sharing a single queue, journal, in-flight
/// registry and browser gate between delivery and retry.
pub struct Pipeline {
    pub credentials: Arc<CredentialProvider>,
    pub sessions: Arc<SessionStore>,
    pub queue: Arc<FsPendingQueue>,
    pub journal: Arc<AttemptJournal>,
    pub dispatcher: Dispatcher,
    pub coordinator: RetryCoordinator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub pending: QueueStats,
    pub journal: JournalSummary,
    /// Whether an API credential has been stored with `authorize`.
    pub api_credential: bool,
    /// Whether a browser session has been stored with `login`.
    pub browser_session: bool,
}

impl Pipeline {
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        let refresher = config
            .oauth()
            .map(|oauth| Arc::new(oauth) as Arc<dyn TokenRefresher>);
        if refresher.is_none() {
            tracing::debug!("no OAuth client configured; expired API credentials will not be refreshed");
        }
        let credentials = Arc::new(CredentialProvider::new(
            CredentialStore::new(config.credentials_path()),
            refresher,
        ));

        let http = YouTubeClient::http_client(config.api_timeout()).context("build HTTP client")?;
        let api = Arc::new(ApiDriver::new(
            YouTubeClient::new(Arc::clone(&credentials), http),
            PrivacyStatus::Public,
        ));

        let sessions = Arc::new(SessionStore::new(config.session_path()));
        let launcher = Arc::new(WebDriverLauncher::new(
            config.webdriver_url.clone(),
            !config.headed,
            config.step_timeout(),
        ));
        let browser = Arc::new(BrowserDriver::new(
            launcher,
            Arc::clone(&sessions),
            config.browser_timeouts(),
        ));

        let queue = Arc::new(FsPendingQueue::new(config.pending_dir()));
        let journal = Arc::new(AttemptJournal::new(config.journal_path()));
        let in_flight = InFlight::new();

        let dispatcher = Dispatcher::new(
            vec![api as Arc<dyn UploadDriver>, browser.clone()],
            queue.clone(),
            Arc::clone(&journal),
            in_flight.clone(),
        );
        let coordinator =
            RetryCoordinator::new(queue.clone(), browser, Arc::clone(&journal), in_flight);

        Ok(Self {
            credentials,
            sessions,
            queue,
            journal,
            dispatcher,
            coordinator,
        })
    }

    pub async fn stats(&self) -> Result<PipelineStats, StorageFault> {
        Ok(PipelineStats {
            pending: self.queue.stats().await?,
            journal: self.journal.summary().await?,
            api_credential: self.credentials.has_credential().await?,
            browser_session: self.sessions.load().await?.is_some(),
        })
    }
}
