//! Drives one job to a terminal state by polling its status.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::retry::Backoff;
use super::PollerHandle;
use crate::api::HeatmapBackend;
use crate::broadcast::JobNotifier;
use crate::config::RetryConfig;
use crate::model::{JobStatus, StatusReport};
use crate::registry::{JobRegistry, StatusUpdate};

/// Why a status poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The job completed and the completion was published.
    Completed,
    /// The backend reported `error`; carries its message.
    Failed(String),
    /// The owner cancelled the loop.
    Cancelled,
    /// The job was deleted or is no longer in the registry.
    Removed,
    /// The job already reached a different terminal state elsewhere.
    Superseded,
}

/// Polls the status endpoint of one job at a fixed interval.
///
/// Transport failures are logged and retried on the next tick. The loop
/// ends only on a terminal status, cancellation or deletion; a backend that
/// never reports a terminal state is polled indefinitely.
#[derive(Clone)]
pub struct StatusPoller {
    backend: Arc<dyn HeatmapBackend>,
    registry: Arc<JobRegistry>,
    notifier: Arc<dyn JobNotifier>,
    interval: Duration,
    retry: Option<RetryConfig>,
}

impl StatusPoller {
    pub fn new(
        backend: Arc<dyn HeatmapBackend>,
        registry: Arc<JobRegistry>,
        notifier: Arc<dyn JobNotifier>,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            registry,
            notifier,
            interval,
            retry: None,
        }
    }

    /// Enables backoff between consecutive failed polls.
    pub fn with_retry(mut self, retry: Option<RetryConfig>) -> Self {
        self.retry = retry;
        self
    }

    /// Spawns the poll loop for `job_id` on the current runtime.
    pub fn spawn(&self, job_id: &str) -> PollerHandle<PollOutcome> {
        let cancel = CancellationToken::new();
        let poller = self.clone();
        let job_id = job_id.to_string();
        let token = cancel.clone();
        let join = tokio::spawn(async move { poller.run(&job_id, &token).await });
        PollerHandle::new(cancel, join)
    }

    /// Runs the poll loop to completion.
    pub async fn run(&self, job_id: &str, cancel: &CancellationToken) -> PollOutcome {
        let span = tracing::info_span!("status_poller", job_id = %job_id);
        async {
            let outcome = self.poll_loop(job_id, cancel).await;
            log::debug!("Status poller for {} finished: {:?}", job_id, outcome);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn poll_loop(&self, job_id: &str, cancel: &CancellationToken) -> PollOutcome {
        let mut backoff = Backoff::new(self.interval, self.retry.clone());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep(backoff.delay()) => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                result = self.backend.job_status(job_id) => result,
            };

            let report = match result {
                Ok(report) => {
                    backoff.record_success();
                    report
                }
                Err(e) => {
                    log::debug!("Status poll for {} failed, retrying: {}", job_id, e);
                    backoff.record_failure();
                    continue;
                }
            };

            if let Some(outcome) = self.apply(job_id, &report, cancel).await {
                return outcome;
            }
        }
    }

    /// Applies one report. Returns the outcome once the loop should stop.
    async fn apply(
        &self,
        job_id: &str,
        report: &StatusReport,
        cancel: &CancellationToken,
    ) -> Option<PollOutcome> {
        match self.registry.apply_status(job_id, report) {
            StatusUpdate::Removed | StatusUpdate::Unknown => {
                log::debug!("Job {} no longer tracked, stopping", job_id);
                return Some(PollOutcome::Removed);
            }
            StatusUpdate::Stale => {
                let current = self.registry.get(job_id).map(|job| job.status);
                match current {
                    // A history refresh got there first; still ours to announce.
                    Some(status) if status == report.status && status.is_terminal() => {}
                    Some(status) if status.is_terminal() => {
                        log::debug!(
                            "Job {} already {}, dropping {} report",
                            job_id,
                            status,
                            report.status
                        );
                        return Some(PollOutcome::Superseded);
                    }
                    _ => {
                        log::debug!("Dropping stale {} report for {}", report.status, job_id);
                        return None;
                    }
                }
            }
            StatusUpdate::Applied { previous, current } => {
                log::debug!("Job {}: {} -> {}", job_id, previous, current);
            }
            StatusUpdate::Refreshed => {}
        }

        match report.status {
            JobStatus::Completed => Some(self.complete(job_id, cancel).await),
            JobStatus::Error => {
                let message = report.message.clone().unwrap_or_default();
                let name = self.job_name(job_id);
                self.notifier.job_failed(job_id, &name, &message);
                Some(PollOutcome::Failed(message))
            }
            JobStatus::Pending | JobStatus::Processing => None,
        }
    }

    /// One history refetch for the fields the status endpoint lacks, then
    /// the completion signal. A deletion meanwhile wins.
    async fn complete(&self, job_id: &str, cancel: &CancellationToken) -> PollOutcome {
        let history = tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            history = self.backend.job_history() => history,
        };

        if self.registry.is_removed(job_id) {
            return PollOutcome::Removed;
        }
        match history {
            Ok(jobs) => {
                self.registry.merge_history(jobs);
            }
            Err(e) => log::warn!("History refresh after completion of {} failed: {}", job_id, e),
        }

        let name = self.job_name(job_id);
        self.notifier.job_completed(job_id, &name);
        PollOutcome::Completed
    }

    fn job_name(&self, job_id: &str) -> String {
        self.registry
            .get(job_id)
            .map(|job| job.display_name().to_string())
            .unwrap_or_else(|| "Heatmap".to_string())
    }
}
