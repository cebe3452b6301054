//! Delivery of a single job through an ordered list of strategies.
//!
//! Each strategy gets exactly one attempt, in order, until one publishes.
//! Every attempt is appended to the job's trail and the journal before the
//! next step. A job that no strategy could publish is moved to
//! `pending-retry` and handed to the [`PendingQueue`]. The same happens
//! before a driver's storage fault is passed up to the caller.

use crate::drivers::{DeliveryMethod, UploadDriver, UploadOutcome};
use crate::error::DeliveryError;
use crate::inflight::InFlight;
use crate::job::{AttemptRecord, InvalidTransition, JobStatus, UploadJob};
use crate::journal::{AttemptJournal, JournalEvent};
use crate::queue::{PendingEntry, PendingQueue};
use jiff::Timestamp;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// How a `deliver` call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum DeliveryOutcome {
    #[serde(rename_all = "camelCase")]
    Published { remote_id: String, job: UploadJob },
    QueuedPending { job: UploadJob },
}

impl DeliveryOutcome {
    pub fn job(&self) -> &UploadJob {
        match self {
            DeliveryOutcome::Published { job, .. } | DeliveryOutcome::QueuedPending { job } => job,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, DeliveryOutcome::Published { .. })
    }
}

pub struct Dispatcher {
    strategies: Vec<Arc<dyn UploadDriver>>,
    queue: Arc<dyn PendingQueue>,
    journal: Arc<AttemptJournal>,
    in_flight: InFlight,
}

impl Dispatcher {
    /// `strategies` are tried in the order given.
    pub fn new(
        strategies: Vec<Arc<dyn UploadDriver>>,
        queue: Arc<dyn PendingQueue>,
        journal: Arc<AttemptJournal>,
        in_flight: InFlight,
    ) -> Self {
        Self {
            strategies,
            queue,
            journal,
            in_flight,
        }
    }

    pub fn methods(&self) -> Vec<DeliveryMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    #[instrument(skip_all, fields(job_id = %job.id, video_type = %job.video_type))]
    pub async fn deliver(&self, mut job: UploadJob) -> Result<DeliveryOutcome, DeliveryError> {
        if let Err(reason) = job.check_preconditions().await {
            tracing::warn!(%reason, "rejecting job before any attempt");
            return Err(DeliveryError::InvalidJob {
                job: Box::new(job),
                reason,
            });
        }
        let Some(_claim) = self.in_flight.claim(job.id) else {
            return Err(DeliveryError::AlreadyInFlight(job.id));
        };
        job.transition(JobStatus::Delivering)?;

        for strategy in &self.strategies {
            let method = strategy.method();
            let attempted = async {
                if !strategy.is_available().await? {
                    return Ok(None);
                }
                tracing::info!(%method, "attempting delivery");
                strategy.upload(&job).await.map(Some)
            }
            .await;
            let outcome = match attempted {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    tracing::info!(%method, "delivery method unavailable, skipping");
                    continue;
                }
                Err(fault) => {
                    // park the job first so the fault cannot lose it
                    tracing::error!(%method, "delivery method hit a storage fault: {}", fault);
                    self.park(job).await?;
                    return Err(fault.into());
                }
            };

            let record = AttemptRecord::from_outcome(method, &outcome, Timestamp::now());
            job.record_attempt(record.clone());
            self.journal.record_attempt(&job, &record).await?;

            match outcome {
                UploadOutcome::Success { remote_id } => {
                    job.mark_published(remote_id.clone())?;
                    self.journal
                        .append(
                            &job,
                            JournalEvent::Published {
                                remote_id: remote_id.clone(),
                            },
                        )
                        .await?;
                    tracing::info!(%method, %remote_id, "published");
                    return Ok(DeliveryOutcome::Published { remote_id, job });
                }
                UploadOutcome::Failure { kind, detail } => {
                    tracing::warn!(%method, %kind, detail = %detail, "delivery attempt failed, escalating");
                }
            }
        }

        let entry = self.park(job).await?;
        tracing::warn!(
            attempts = entry.attempt_count(),
            "all delivery methods failed, queued for retry"
        );
        Ok(DeliveryOutcome::QueuedPending { job: entry.job })
    }

    /// Moves an unpublished job to `pending-retry` and into the queue.
    async fn park(&self, mut job: UploadJob) -> Result<PendingEntry, DeliveryError> {
        job.transition(JobStatus::PendingRetry)?;
        let entry = PendingEntry::try_from(job).map_err(|job| InvalidTransition {
            from: job.status(),
            to: JobStatus::PendingRetry,
        })?;
        self.queue.put(&entry).await?;
        self.journal.append(&entry.job, JournalEvent::Queued).await?;
        Ok(entry)
    }
}
