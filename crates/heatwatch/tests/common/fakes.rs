//! Scripted collaborators built only on the public API.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use heatwatch::api::{ApiError, HeatmapBackend};
use heatwatch::model::{
    Analysis, CustomHeatmapRequest, CustomProgress, ExportFile, ExportFormat, Job, StatusReport,
};
use heatwatch::DurationProbe;

/// Backend whose answers are scripted per test. The last status or progress
/// value repeats once a script runs out; history can be swapped mid-test.
#[derive(Default)]
pub struct FakeBackend {
    statuses: Mutex<VecDeque<StatusReport>>,
    history: Mutex<Vec<Job>>,
    progress: Mutex<VecDeque<f64>>,
    analysis: Mutex<Option<Analysis>>,
    status_delay: Mutex<Duration>,
    status_calls: AtomicUsize,
    history_calls: AtomicUsize,
    progress_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(self, statuses: Vec<StatusReport>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub fn with_history(self, history: Vec<Job>) -> Self {
        self.set_history(history);
        self
    }

    pub fn with_progress(self, progress: Vec<f64>) -> Self {
        *self.progress.lock().unwrap() = progress.into();
        self
    }

    pub fn with_analysis(self, analysis: Analysis) -> Self {
        *self.analysis.lock().unwrap() = Some(analysis);
        self
    }

    pub fn with_status_delay(self, delay: Duration) -> Self {
        *self.status_delay.lock().unwrap() = delay;
        self
    }

    pub fn set_history(&self, history: Vec<Job>) {
        *self.history.lock().unwrap() = history;
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn progress_calls(&self) -> usize {
        self.progress_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

fn next_sticky<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut queue = queue.lock().unwrap();
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[async_trait]
impl HeatmapBackend for FakeBackend {
    async fn job_status(&self, _job_id: &str) -> Result<StatusReport, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        next_sticky(&self.statuses).ok_or_else(|| ApiError::Client("no status".to_string()))
    }

    async fn job_history(&self) -> Result<Vec<Job>, ApiError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.history.lock().unwrap().clone())
    }

    async fn submit_custom_heatmap(
        &self,
        _job_id: &str,
        _request: &CustomHeatmapRequest,
    ) -> Result<(), ApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn custom_progress(&self, _job_id: &str) -> Result<CustomProgress, ApiError> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        next_sticky(&self.progress)
            .map(|progress| CustomProgress { progress })
            .ok_or_else(|| ApiError::Client("no progress".to_string()))
    }

    async fn analysis(&self, _job_id: &str) -> Result<Analysis, ApiError> {
        self.analysis
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ApiError::status(404, r#"{"error": "No analysis"}"#))
    }

    async fn delete_job(&self, _job_id: &str) -> Result<(), ApiError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn export(&self, job_id: &str, format: ExportFormat) -> Result<ExportFile, ApiError> {
        Ok(ExportFile {
            bytes: b"zone,visits\nentrance,3\n".to_vec(),
            mime_type: format.mime_type().to_string(),
            filename: format.filename(job_id),
        })
    }
}

/// Probe that always answers with the same duration.
pub struct FixedProbe(pub Option<f64>);

#[async_trait]
impl DurationProbe for FixedProbe {
    async fn probe_duration(&self, _media_url: &str) -> Option<f64> {
        self.0
    }
}
