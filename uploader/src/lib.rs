//! Delivery of rendered videos to YouTube.
//!
//! A job goes to the [`Dispatcher`], which tries the official API first and
//! browser automation second. Whatever neither could publish lands in the
//! [`PendingQueue`](queue::PendingQueue), which the [`RetryCoordinator`]
//! drains on a schedule or on demand.

pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod drivers;
pub mod error;
pub mod inflight;
pub mod job;
pub mod journal;
pub mod oauth;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod session;
mod storage;
pub mod youtube_api;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{DeliveryOutcome, Dispatcher};
pub use drivers::{DeliveryMethod, FailureKind, UploadDriver, UploadOutcome};
pub use error::{DeliveryError, StorageFault};
pub use job::{JobId, JobRequest, JobStatus, UploadJob, VideoMetadata, VideoType};
pub use pipeline::Pipeline;
pub use retry::{PurgeOutcome, RetryCoordinator, RetrySummary};
