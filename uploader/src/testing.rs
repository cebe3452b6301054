//! Fixtures and scripted fakes shared by the unit tests.

use crate::drivers::browser::{AuthState, PageError, PageLauncher, UploadPage};
use crate::drivers::{DeliveryMethod, FailureKind, UploadDriver, UploadOutcome};
use crate::error::StorageFault;
use crate::job::{
    AttemptRecord, JobRequest, JobStatus, UploadJob, VideoMetadata, VideoType,
};
use crate::session::{Session, SessionCookie};
use async_trait::async_trait;
use jiff::Timestamp;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A brand new job whose media file exists and is non-empty.
pub(crate) fn job_with_media(dir: &Path, video_type: VideoType) -> UploadJob {
    let media_path = dir.join(format!("render-{}.mp4", uuid::Uuid::new_v4().simple()));
    std::fs::write(&media_path, b"\x00\x00\x00\x18ftypmp42").unwrap();
    UploadJob::new(JobRequest {
        video_type,
        media_path,
        metadata: VideoMetadata {
            title: "Council approves new transit plan".into(),
            description: "What changes for commuters.".into(),
            category: "25".into(),
            tags: vec![],
            source_article: format!("article-{}", uuid::Uuid::new_v4().simple()),
        },
    })
}

/// A job that failed every immediate attempt and waits for retry.
pub(crate) fn pending_job(dir: &Path, video_type: VideoType) -> UploadJob {
    let mut job = job_with_media(dir, video_type);
    job.transition(JobStatus::Delivering).unwrap();
    job.record_attempt(AttemptRecord::from_outcome(
        DeliveryMethod::Browser,
        &UploadOutcome::failure(FailureKind::Timeout, "upload form never appeared"),
        Timestamp::now(),
    ));
    job.transition(JobStatus::PendingRetry).unwrap();
    job
}

/// Driver that plays back queued outcomes in order.
///
/// Once the script runs out every further call fails as transient.
pub(crate) struct ScriptedDriver {
    method: DeliveryMethod,
    available: bool,
    broken: bool,
    outcomes: Mutex<VecDeque<UploadOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedDriver {
    pub(crate) fn new(method: DeliveryMethod, outcomes: impl IntoIterator<Item = UploadOutcome>) -> Self {
        Self {
            method,
            available: true,
            broken: false,
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn unavailable(method: DeliveryMethod) -> Self {
        Self {
            available: false,
            ..Self::new(method, [])
        }
    }

    /// Every upload hits a storage fault.
    pub(crate) fn broken(method: DeliveryMethod) -> Self {
        Self {
            broken: true,
            ..Self::new(method, [])
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn success(remote_id: &str) -> UploadOutcome {
    UploadOutcome::Success {
        remote_id: remote_id.to_string(),
    }
}

#[async_trait]
impl UploadDriver for ScriptedDriver {
    fn method(&self) -> DeliveryMethod {
        self.method
    }

    async fn is_available(&self) -> Result<bool, StorageFault> {
        Ok(self.available)
    }

    async fn upload(&self, _job: &UploadJob) -> Result<UploadOutcome, StorageFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(StorageFault::io(
                "read",
                Path::new("session.json"),
                std::io::Error::other("disk unavailable"),
            ));
        }
        let next = self.outcomes.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| UploadOutcome::failure(FailureKind::Transient, "script exhausted")))
    }
}

/// How a [`ScriptedLauncher`]'s pages behave.
#[derive(Debug, Clone)]
pub(crate) struct PageScript {
    pub launch_error: Option<PageError>,
    /// `None` never resolves.
    pub auth: Option<AuthState>,
    pub fill_error: Option<PageError>,
    pub submit: Result<String, PageError>,
    pub capture_error: Option<PageError>,
}

impl Default for PageScript {
    fn default() -> Self {
        Self {
            launch_error: None,
            auth: Some(AuthState::Authenticated),
            fill_error: None,
            submit: Ok("browser-video".into()),
            capture_error: None,
        }
    }
}

#[derive(Debug, Default)]
struct PageCounters {
    launches: AtomicUsize,
    closes: AtomicUsize,
}

pub(crate) struct ScriptedLauncher {
    script: PageScript,
    counters: Arc<PageCounters>,
}

impl ScriptedLauncher {
    pub(crate) fn new(script: PageScript) -> Self {
        Self {
            script,
            counters: Arc::default(),
        }
    }

    pub(crate) fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Box<dyn UploadPage>, PageError> {
        if let Some(e) = &self.script.launch_error {
            return Err(e.clone());
        }
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPage {
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedPage {
    script: PageScript,
    counters: Arc<PageCounters>,
}

#[async_trait]
impl UploadPage for ScriptedPage {
    async fn restore_session(&mut self, _session: &Session) -> Result<(), PageError> {
        Ok(())
    }

    async fn open_upload_surface(&mut self) -> Result<(), PageError> {
        Ok(())
    }

    async fn detect_authentication(&mut self) -> Result<AuthState, PageError> {
        match self.script.auth {
            Some(state) => Ok(state),
            None => std::future::pending().await,
        }
    }

    async fn attach_media(&mut self, _path: &Path) -> Result<(), PageError> {
        Ok(())
    }

    async fn fill_metadata(
        &mut self,
        _metadata: &VideoMetadata,
        _video_type: VideoType,
    ) -> Result<(), PageError> {
        match &self.script.fill_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn submit(&mut self) -> Result<String, PageError> {
        self.script.submit.clone()
    }

    async fn capture_session(&mut self) -> Result<Session, PageError> {
        if let Some(e) = &self.script.capture_error {
            return Err(e.clone());
        }
        Ok(Session::new(vec![SessionCookie {
            name: "SID".into(),
            value: "fresh".into(),
            domain: Some("www.youtube.com".into()),
            path: Some("/".into()),
            secure: Some(true),
            http_only: Some(true),
        }]))
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}
