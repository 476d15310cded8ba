//! Progress polling for the custom heatmap sub-job.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::PollerHandle;
use crate::api::HeatmapBackend;

/// Receives progress observations for a custom sub-job.
pub trait ProgressSink: Send + Sync {
    /// Records a raw progress value for the sub-job identified by
    /// `parent_job_id` and `generation`.
    ///
    /// Returns the progress now held (clamped, never decreasing), or `None`
    /// when that sub-job is no longer the current one.
    fn record_progress(&self, parent_job_id: &str, generation: u64, raw: f64) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomOutcome {
    /// Progress reached 1.
    Done,
    Cancelled,
    /// A newer request, a different selection or a deletion replaced it.
    Superseded,
}

/// Polls the custom progress endpoint of a parent job.
#[derive(Clone)]
pub struct CustomProgressPoller {
    backend: Arc<dyn HeatmapBackend>,
    interval: Duration,
}

impl CustomProgressPoller {
    pub fn new(backend: Arc<dyn HeatmapBackend>, interval: Duration) -> Self {
        Self { backend, interval }
    }

    pub fn spawn(
        &self,
        parent_job_id: &str,
        generation: u64,
        sink: Arc<dyn ProgressSink>,
    ) -> PollerHandle<CustomOutcome> {
        let cancel = CancellationToken::new();
        let poller = self.clone();
        let parent_job_id = parent_job_id.to_string();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            poller
                .run(&parent_job_id, generation, sink.as_ref(), &token)
                .await
        });
        PollerHandle::new(cancel, join)
    }

    pub async fn run(
        &self,
        parent_job_id: &str,
        generation: u64,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> CustomOutcome {
        let span = tracing::info_span!("custom_progress", job_id = %parent_job_id, generation);
        async {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return CustomOutcome::Cancelled,
                    _ = tokio::time::sleep(self.interval) => {}
                }

                let result = tokio::select! {
                    _ = cancel.cancelled() => return CustomOutcome::Cancelled,
                    result = self.backend.custom_progress(parent_job_id) => result,
                };

                let raw = match result {
                    Ok(progress) => progress.progress,
                    Err(e) => {
                        log::debug!("Custom progress poll for {} failed: {}", parent_job_id, e);
                        continue;
                    }
                };

                match sink.record_progress(parent_job_id, generation, raw) {
                    None => {
                        log::debug!(
                            "Custom sub-job {}#{} superseded, stopping",
                            parent_job_id,
                            generation
                        );
                        return CustomOutcome::Superseded;
                    }
                    Some(progress) if progress >= 1.0 => return CustomOutcome::Done,
                    Some(_) => {}
                }
            }
        }
        .instrument(span)
        .await
    }
}
