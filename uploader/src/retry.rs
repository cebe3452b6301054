//! Draining the pending queue.
//!
//! Queued jobs already failed through every method once, so retries go
//! through a single driver (the browser) and one entry at a time. There is no
//! attempt cap: an entry stays queued until it publishes or an operator
//! purges it. [`PendingEntry::attempt_count`] is there for any policy layered
//! on top.

use crate::drivers::{UploadDriver, UploadOutcome};
use crate::error::StorageFault;
use crate::inflight::InFlight;
use crate::job::{AttemptRecord, JobId, JobStatus, UploadJob};
use crate::journal::{AttemptJournal, JournalEvent};
use crate::queue::{PendingEntry, PendingQueue, QueueScope};
use jiff::Timestamp;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySummary {
    pub success_count: usize,
    pub failed_count: usize,
    pub total_attempted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeOutcome {
    Abandoned(Box<UploadJob>),
    NotFound,
    /// A delivery for the job is running right now; nothing was changed.
    InFlight,
}

pub struct RetryCoordinator {
    queue: Arc<dyn PendingQueue>,
    driver: Arc<dyn UploadDriver>,
    journal: Arc<AttemptJournal>,
    in_flight: InFlight,
}

impl RetryCoordinator {
    pub fn new(
        queue: Arc<dyn PendingQueue>,
        driver: Arc<dyn UploadDriver>,
        journal: Arc<AttemptJournal>,
        in_flight: InFlight,
    ) -> Self {
        Self {
            queue,
            driver,
            journal,
            in_flight,
        }
    }

    /// Retries the oldest `max` entries in `scope`, sequentially.
    ///
    /// Individual failures only show up in the counts; `Err` means a store
    /// could not be read or written.
    #[instrument(skip(self))]
    pub async fn retry_by_type(
        &self,
        scope: QueueScope,
        max: Option<usize>,
    ) -> Result<RetrySummary, StorageFault> {
        let entries = self.queue.list_by_type(scope, max).await?;
        let mut summary = RetrySummary::default();
        if entries.is_empty() {
            tracing::debug!("nothing to retry");
            return Ok(summary);
        }
        tracing::info!(entries = entries.len(), "retrying pending uploads");

        for listed in entries {
            let id = listed.id();
            let Some(_claim) = self.in_flight.claim(id) else {
                tracing::debug!(job_id = %id, "delivery already in flight, skipping");
                continue;
            };
            // may have been purged or retried since the listing
            let Some(entry) = self.queue.get(id).await? else {
                continue;
            };

            if self.retry_entry(entry).await? {
                summary.success_count += 1;
            } else {
                summary.failed_count += 1;
            }
            summary.total_attempted += 1;
        }

        tracing::info!(
            success = summary.success_count,
            failed = summary.failed_count,
            "retry run finished"
        );
        Ok(summary)
    }

    /// One attempt at a queued entry. Returns whether it published.
    #[instrument(skip_all, fields(job_id = %entry.id(), video_type = %entry.job.video_type))]
    async fn retry_entry(&self, mut entry: PendingEntry) -> Result<bool, StorageFault> {
        let method = self.driver.method();
        let outcome = self.driver.upload(&entry.job).await?;
        let record = AttemptRecord::from_outcome(method, &outcome, Timestamp::now());
        entry.job.record_attempt(record.clone());
        self.journal.record_attempt(&entry.job, &record).await?;

        match outcome {
            UploadOutcome::Success { remote_id } => {
                if let Err(e) = entry.job.mark_published(remote_id.clone()) {
                    tracing::error!("queued job was not pending: {}", e);
                }
                self.journal
                    .append(
                        &entry.job,
                        JournalEvent::Published {
                            remote_id: remote_id.clone(),
                        },
                    )
                    .await?;
                self.queue.remove(entry.id()).await?;
                tracing::info!(%method, %remote_id, "published from queue");
                Ok(true)
            }
            UploadOutcome::Failure { kind, detail } => {
                self.queue.put(&entry).await?;
                tracing::warn!(
                    %method,
                    %kind,
                    attempts = entry.attempt_count(),
                    detail = %detail,
                    "retry failed, left in queue"
                );
                if !kind.is_retryable() {
                    tracing::warn!(job_id = %entry.id(), "rejected outright; retrying will not help, consider purging it");
                }
                Ok(false)
            }
        }
    }

    /// Runs [`Self::retry_by_type`] every `period` until `shutdown` resolves.
    ///
    /// A failed run is logged and the next tick still fires. Returns how many
    /// runs completed.
    pub async fn run_every(
        &self,
        period: Duration,
        scope: QueueScope,
        max: Option<usize>,
        shutdown: impl Future<Output = ()>,
    ) -> usize {
        let mut ticks = tokio::time::interval(period);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut runs = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticks.tick() => {}
            }
            match self.retry_by_type(scope, max).await {
                Ok(_) => {}
                Err(e) => tracing::error!("scheduled retry failed: {:#}", eyre::Report::new(e)),
            }
            runs += 1;
        }
        tracing::info!(runs, "retry schedule stopped");
        runs
    }

    /// Gives up on a queued job: marks it abandoned, journals that, and drops
    /// it from the queue.
    #[instrument(skip(self))]
    pub async fn purge(&self, id: JobId) -> Result<PurgeOutcome, StorageFault> {
        let Some(_claim) = self.in_flight.claim(id) else {
            return Ok(PurgeOutcome::InFlight);
        };
        let Some(mut entry) = self.queue.get(id).await? else {
            return Ok(PurgeOutcome::NotFound);
        };
        if let Err(e) = entry.job.transition(JobStatus::Abandoned) {
            tracing::error!("queued job was not pending: {}", e);
        }
        self.journal
            .append(&entry.job, JournalEvent::Abandoned)
            .await?;
        self.queue.remove(id).await?;
        tracing::info!(attempts = entry.attempt_count(), "abandoned queued job");
        Ok(PurgeOutcome::Abandoned(Box::new(entry.job)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{DeliveryMethod, FailureKind};
    use crate::job::VideoType;
    use crate::queue::FsPendingQueue;
    use crate::testing::{ScriptedDriver, pending_job, success};
    use jiff::SignedDuration;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    struct Harness {
        queue: Arc<FsPendingQueue>,
        journal: Arc<AttemptJournal>,
        browser: Arc<ScriptedDriver>,
        in_flight: InFlight,
        coordinator: RetryCoordinator,
    }

    fn harness(dir: &Path, browser: ScriptedDriver) -> Harness {
        let queue = Arc::new(FsPendingQueue::new(dir.join("pending")));
        let journal = Arc::new(AttemptJournal::new(dir.join("attempts.jsonl")));
        let browser = Arc::new(browser);
        let in_flight = InFlight::new();
        let coordinator = RetryCoordinator::new(
            queue.clone(),
            browser.clone(),
            journal.clone(),
            in_flight.clone(),
        );
        Harness {
            queue,
            journal,
            browser,
            in_flight,
            coordinator,
        }
    }

    async fn enqueue(h: &Harness, dir: &Path, video_type: VideoType, secs: i64) -> PendingEntry {
        let mut entry = PendingEntry::try_from(pending_job(dir, video_type)).unwrap();
        entry.enqueued_at = Timestamp::UNIX_EPOCH
            .checked_add(SignedDuration::from_secs(secs))
            .unwrap();
        h.queue.put(&entry).await.unwrap();
        entry
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), ScriptedDriver::new(DeliveryMethod::Browser, []));

        let summary = h
            .coordinator
            .retry_by_type(QueueScope::All, None)
            .await
            .unwrap();
        assert_eq!(summary, RetrySummary::default());
        assert_eq!(h.browser.calls(), 0);
        assert!(!h.journal.path().exists());
        assert!(!h.queue.root().exists());
    }

    #[tokio::test]
    async fn max_limits_to_oldest_entries() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(
            dir.path(),
            ScriptedDriver::new(DeliveryMethod::Browser, [success("vid")]),
        );
        let oldest = enqueue(&h, dir.path(), VideoType::Shortform, 1).await;
        let second = enqueue(&h, dir.path(), VideoType::Shortform, 2).await;
        let third = enqueue(&h, dir.path(), VideoType::Shortform, 3).await;

        let summary = h
            .coordinator
            .retry_by_type(VideoType::Shortform.into(), Some(1))
            .await
            .unwrap();
        assert_eq!(
            summary,
            RetrySummary {
                success_count: 1,
                failed_count: 0,
                total_attempted: 1,
            }
        );
        assert_eq!(h.browser.calls(), 1);
        assert_eq!(h.queue.get(oldest.id()).await.unwrap(), None);
        assert_eq!(h.queue.get(second.id()).await.unwrap(), Some(second));
        assert_eq!(h.queue.get(third.id()).await.unwrap(), Some(third));
    }

    #[tokio::test]
    async fn failures_stay_queued_with_one_more_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(
            dir.path(),
            ScriptedDriver::new(
                DeliveryMethod::Browser,
                [
                    UploadOutcome::failure(FailureKind::AuthExpired, "login required"),
                    success("vid-2"),
                ],
            ),
        );
        let first = enqueue(&h, dir.path(), VideoType::Longform, 1).await;
        let second = enqueue(&h, dir.path(), VideoType::Longform, 2).await;

        let summary = h
            .coordinator
            .retry_by_type(QueueScope::All, None)
            .await
            .unwrap();
        assert_eq!(
            summary,
            RetrySummary {
                success_count: 1,
                failed_count: 1,
                total_attempted: 2,
            }
        );

        let still = h.queue.get(first.id()).await.unwrap().unwrap();
        assert_eq!(still.attempt_count(), first.attempt_count() + 1);
        assert_eq!(still.enqueued_at, first.enqueued_at);
        assert_eq!(still.job.status(), JobStatus::PendingRetry);
        assert_eq!(h.queue.get(second.id()).await.unwrap(), None);

        let journal = h.journal.summary().await.unwrap();
        assert_eq!(journal.attempts[&DeliveryMethod::Browser].failed, 1);
        assert_eq!(journal.attempts[&DeliveryMethod::Browser].succeeded, 1);
        assert_eq!(journal.published, 1);
    }

    #[tokio::test]
    async fn scope_leaves_other_types_alone() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(
            dir.path(),
            ScriptedDriver::new(DeliveryMethod::Browser, [success("a"), success("b")]),
        );
        let long = enqueue(&h, dir.path(), VideoType::Longform, 1).await;
        enqueue(&h, dir.path(), VideoType::Shortform, 2).await;

        let summary = h
            .coordinator
            .retry_by_type(VideoType::Shortform.into(), None)
            .await
            .unwrap();
        assert_eq!(summary.total_attempted, 1);
        assert_eq!(h.queue.get(long.id()).await.unwrap(), Some(long));
    }

    #[tokio::test]
    async fn claimed_entries_are_skipped_uncounted() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(
            dir.path(),
            ScriptedDriver::new(DeliveryMethod::Browser, [success("a")]),
        );
        let busy = enqueue(&h, dir.path(), VideoType::Shortform, 1).await;
        let _held = h.in_flight.claim(busy.id()).unwrap();

        let summary = h
            .coordinator
            .retry_by_type(QueueScope::All, None)
            .await
            .unwrap();
        assert_eq!(summary, RetrySummary::default());
        assert_eq!(h.browser.calls(), 0);
    }

    #[tokio::test]
    async fn purge_abandons_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), ScriptedDriver::new(DeliveryMethod::Browser, []));
        let entry = enqueue(&h, dir.path(), VideoType::Shortform, 1).await;

        let PurgeOutcome::Abandoned(job) = h.coordinator.purge(entry.id()).await.unwrap() else {
            panic!("expected the entry to be abandoned");
        };
        assert_eq!(job.status(), JobStatus::Abandoned);
        assert_eq!(h.queue.get(entry.id()).await.unwrap(), None);
        assert_eq!(h.journal.summary().await.unwrap().abandoned, 1);

        assert_eq!(
            h.coordinator.purge(entry.id()).await.unwrap(),
            PurgeOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn purge_refuses_in_flight_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), ScriptedDriver::new(DeliveryMethod::Browser, []));
        let entry = enqueue(&h, dir.path(), VideoType::Longform, 1).await;
        let _held = h.in_flight.claim(entry.id()).unwrap();

        assert_eq!(
            h.coordinator.purge(entry.id()).await.unwrap(),
            PurgeOutcome::InFlight
        );
        assert_eq!(h.queue.get(entry.id()).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn schedule_runs_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), ScriptedDriver::new(DeliveryMethod::Browser, []));
        let runs = h
            .coordinator
            .run_every(
                Duration::from_millis(10),
                QueueScope::All,
                None,
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await;
        assert!(runs >= 1, "expected at least one run, got {runs}");
    }
}
