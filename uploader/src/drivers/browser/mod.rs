//! Delivery by driving the platform's web upload flow.
//!
//! The driver walks a fixed sequence of [`BrowserStage`]s over an
//! [`UploadPage`]:
//!
//! ```text
//! NavigatingToUploadSurface -> AuthenticationCheck -> ResumeWithSession   -> FillingMetadata -> Submitting -> Confirmed
//!                                                 \-> RequireManualLogin -> Failed (AuthExpired)
//! ```
//!
//! Any stage may end in `Failed`. Only one browser session runs at a time per
//! driver; share a single [`BrowserDriver`] between everything that delivers.

use super::{DeliveryMethod, FailureKind, UploadDriver, UploadOutcome};
use crate::error::StorageFault;
use crate::job::{UploadJob, VideoMetadata, VideoType};
use crate::session::{Session, SessionStore};
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

pub mod webdriver;

pub use webdriver::WebDriverLauncher;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("browser automation failed: {0}")]
    Driver(String),
}

/// Maps automation errors to the shared failure vocabulary.
pub fn classify(err: &PageError) -> FailureKind {
    match err {
        PageError::Timeout(_) | PageError::ElementNotFound(_) => FailureKind::Timeout,
        PageError::Navigation(_) | PageError::Driver(_) => FailureKind::Transient,
        PageError::Rejected(_) => FailureKind::PermanentRejection,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Authenticated,
    LoginRequired,
}

/// One open browser tab on the platform's upload flow.
#[async_trait]
pub trait UploadPage: Send {
    async fn restore_session(&mut self, session: &Session) -> Result<(), PageError>;
    async fn open_upload_surface(&mut self) -> Result<(), PageError>;
    /// Waits until either the authenticated upload view or a login page shows.
    async fn detect_authentication(&mut self) -> Result<AuthState, PageError>;
    async fn attach_media(&mut self, path: &Path) -> Result<(), PageError>;
    async fn fill_metadata(
        &mut self,
        metadata: &VideoMetadata,
        video_type: VideoType,
    ) -> Result<(), PageError>;
    /// Publishes and returns the platform's id for the new video.
    async fn submit(&mut self) -> Result<String, PageError>;
    async fn capture_session(&mut self) -> Result<Session, PageError>;
    async fn close(&mut self);
}

#[async_trait]
pub trait PageLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn UploadPage>, PageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserStage {
    NavigatingToUploadSurface,
    AuthenticationCheck,
    ResumeWithSession,
    RequireManualLogin,
    FillingMetadata,
    Submitting,
    Confirmed { remote_id: String },
    Failed { kind: FailureKind, detail: String },
}

impl BrowserStage {
    fn failed(err: PageError) -> Self {
        BrowserStage::Failed {
            kind: classify(&err),
            detail: err.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BrowserStage::Confirmed { .. } | BrowserStage::Failed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            BrowserStage::NavigatingToUploadSurface => "navigating-to-upload-surface",
            BrowserStage::AuthenticationCheck => "authentication-check",
            BrowserStage::ResumeWithSession => "resume-with-session",
            BrowserStage::RequireManualLogin => "require-manual-login",
            BrowserStage::FillingMetadata => "filling-metadata",
            BrowserStage::Submitting => "submitting",
            BrowserStage::Confirmed { .. } => "confirmed",
            BrowserStage::Failed { .. } => "failed",
        }
    }
}

impl From<BrowserStage> for UploadOutcome {
    fn from(stage: BrowserStage) -> Self {
        match stage {
            BrowserStage::Confirmed { remote_id } => UploadOutcome::Success { remote_id },
            BrowserStage::Failed { kind, detail } => UploadOutcome::Failure { kind, detail },
            other => UploadOutcome::failure(
                FailureKind::Transient,
                format!("browser flow stopped in {}", other.name()),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BrowserTimeouts {
    /// Ceiling on detecting the authenticated view. Past it, the session is treated as expired.
    pub auth: Duration,
    /// Bound on each ordinary page interaction.
    pub step: Duration,
    /// Bound on submitting, which includes the media transfer.
    pub upload: Duration,
}

impl Default for BrowserTimeouts {
    fn default() -> Self {
        Self {
            auth: Duration::from_secs(30),
            step: Duration::from_secs(60),
            upload: Duration::from_secs(900),
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, PageError>>,
) -> Result<T, PageError> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(PageError::Timeout(what.to_string())))
}

pub struct BrowserDriver {
    launcher: Arc<dyn PageLauncher>,
    sessions: Arc<SessionStore>,
    timeouts: BrowserTimeouts,
    /// Held for the whole of a browser attempt.
    gate: Mutex<()>,
}

impl std::fmt::Debug for BrowserDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserDriver")
            .field("sessions", &self.sessions)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl BrowserDriver {
    pub fn new(
        launcher: Arc<dyn PageLauncher>,
        sessions: Arc<SessionStore>,
        timeouts: BrowserTimeouts,
    ) -> Self {
        Self {
            launcher,
            sessions,
            timeouts,
            gate: Mutex::new(()),
        }
    }

    async fn advance(
        &self,
        page: &mut dyn UploadPage,
        job: &UploadJob,
        stage: BrowserStage,
    ) -> BrowserStage {
        let t = self.timeouts;
        match stage {
            BrowserStage::NavigatingToUploadSurface => {
                match bounded(t.step, "upload page", page.open_upload_surface()).await {
                    Ok(()) => BrowserStage::AuthenticationCheck,
                    Err(e) => BrowserStage::failed(e),
                }
            }
            BrowserStage::AuthenticationCheck => {
                match bounded(t.auth, "authenticated view", page.detect_authentication()).await {
                    Ok(AuthState::Authenticated) => BrowserStage::ResumeWithSession,
                    Ok(AuthState::LoginRequired) => BrowserStage::RequireManualLogin,
                    // never saw the authenticated view in time: the session is as good as gone
                    Err(PageError::Timeout(_)) => BrowserStage::RequireManualLogin,
                    Err(e) => BrowserStage::failed(e),
                }
            }
            BrowserStage::ResumeWithSession => BrowserStage::FillingMetadata,
            BrowserStage::RequireManualLogin => BrowserStage::Failed {
                kind: FailureKind::AuthExpired,
                detail: "browser session is not logged in; run `login` to refresh it".into(),
            },
            BrowserStage::FillingMetadata => {
                let filled = async {
                    bounded(t.step, "media picker", page.attach_media(&job.media_path)).await?;
                    bounded(
                        t.step,
                        "metadata form",
                        page.fill_metadata(&job.metadata, job.video_type),
                    )
                    .await
                }
                .await;
                match filled {
                    Ok(()) => BrowserStage::Submitting,
                    Err(e) => BrowserStage::failed(e),
                }
            }
            BrowserStage::Submitting => {
                match bounded(t.upload, "upload confirmation", page.submit()).await {
                    Ok(remote_id) => BrowserStage::Confirmed { remote_id },
                    Err(e) => BrowserStage::failed(e),
                }
            }
            terminal => terminal,
        }
    }

    /// Runs the stage machine to a terminal stage.
    async fn run(&self, page: &mut dyn UploadPage, job: &UploadJob, session: &Session) -> BrowserStage {
        if let Err(e) = bounded(self.timeouts.step, "session restore", page.restore_session(session)).await {
            return BrowserStage::failed(e);
        }

        let mut stage = BrowserStage::NavigatingToUploadSurface;
        while !stage.is_terminal() {
            tracing::debug!(job_id = %job.id, stage = stage.name(), "browser upload stage");
            stage = self.advance(page, job, stage).await;
        }
        stage
    }

    /// Persists the cookies the platform handed out during a successful
    /// upload. The upload already happened, so failures here only get logged.
    async fn refresh_session(&self, page: &mut dyn UploadPage) {
        match bounded(self.timeouts.step, "session capture", page.capture_session()).await {
            Ok(session) => {
                if let Err(e) = self.sessions.save(&session).await {
                    tracing::error!("could not persist refreshed browser session: {:#}", eyre::Report::new(e));
                }
            }
            Err(e) => tracing::warn!("could not capture browser session after upload: {}", e),
        }
    }
}

#[async_trait]
impl UploadDriver for BrowserDriver {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Browser
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn upload(&self, job: &UploadJob) -> Result<UploadOutcome, StorageFault> {
        let _gate = self.gate.lock().await;

        let session = match self.sessions.load().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::warn!(
                    stage = BrowserStage::RequireManualLogin.name(),
                    "no browser session stored"
                );
                return Ok(UploadOutcome::failure(
                    FailureKind::AuthExpired,
                    "no browser session stored; run `login` to create one",
                ));
            }
            // a garbled session is as unusable as a missing one
            Err(e @ StorageFault::Malformed { .. }) => {
                tracing::warn!(
                    stage = BrowserStage::RequireManualLogin.name(),
                    "stored browser session is unreadable: {}",
                    e
                );
                return Ok(UploadOutcome::failure(
                    FailureKind::AuthExpired,
                    "stored browser session is unreadable; run `login` to replace it",
                ));
            }
            Err(e) => return Err(e),
        };

        let mut page = match self.launcher.launch().await {
            Ok(page) => page,
            Err(e) => return Ok(BrowserStage::failed(e).into()),
        };
        let stage = self.run(page.as_mut(), job, &session).await;
        if let BrowserStage::Confirmed { remote_id } = &stage {
            tracing::info!(remote_id = %remote_id, "uploaded video through the browser");
            self.refresh_session(page.as_mut()).await;
        }
        page.close().await;
        Ok(stage.into())
    }
}

/// Lets an operator log in by hand and stores the resulting session.
///
/// Opens the upload surface and polls until the authenticated view shows up
/// or `wait` runs out.
pub async fn capture_login_session(
    launcher: &dyn PageLauncher,
    sessions: &SessionStore,
    wait: Duration,
) -> eyre::Result<Session> {
    use eyre::Context;

    let mut page = launcher.launch().await.context("start browser")?;
    let captured = async {
        page.open_upload_surface()
            .await
            .context("open upload page")?;
        let deadline = tokio::time::Instant::now() + wait;
        tracing::info!(?wait, "waiting for you to log in in the browser window");
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                eyre::bail!("gave up waiting for login after {:?}", wait);
            }
            match bounded(remaining.min(Duration::from_secs(30)), "login", page.detect_authentication()).await {
                Ok(AuthState::Authenticated) => break,
                Ok(AuthState::LoginRequired) | Err(PageError::Timeout(_)) => {
                    tokio::time::sleep(Duration::from_secs(2).min(remaining)).await;
                }
                Err(e) => return Err(e).context("check login state"),
            }
        }
        page.capture_session().await.context("capture browser session")
    }
    .await;
    page.close().await;

    let session = captured?;
    sessions
        .save(&session)
        .await
        .context("persist browser session")?;
    tracing::info!(cookies = session.cookies.len(), "stored browser session");
    Ok(session)
}
