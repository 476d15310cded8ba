//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{ApiError, HeatmapBackend};
use crate::broadcast::JobNotifier;
use crate::model::{
    Analysis, CustomHeatmapRequest, CustomProgress, ExportFile, ExportFormat, Job, StatusReport,
};

/// Replays scripted responses. The last scripted status or progress value
/// repeats once the script runs out.
#[derive(Default)]
pub struct ScriptedBackend {
    statuses: Mutex<VecDeque<Result<StatusReport, String>>>,
    history: Mutex<Vec<Job>>,
    progress: Mutex<VecDeque<f64>>,
    analysis: Mutex<Option<Result<Analysis, (u16, String)>>>,
    delete_fails: Mutex<bool>,
    status_delay: Mutex<Duration>,
    status_calls: AtomicUsize,
    history_calls: AtomicUsize,
    progress_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(self, statuses: Vec<Result<StatusReport, ApiError>>) -> Self {
        *self.statuses.lock().unwrap() = statuses
            .into_iter()
            .map(|r| r.map_err(|e| e.to_string()))
            .collect();
        self
    }

    pub fn with_history(self, history: Vec<Job>) -> Self {
        *self.history.lock().unwrap() = history;
        self
    }

    /// Replaces the listing later `job_history` calls return.
    pub fn set_history(&self, history: Vec<Job>) {
        *self.history.lock().unwrap() = history;
    }

    pub fn with_progress(self, progress: Vec<f64>) -> Self {
        *self.progress.lock().unwrap() = progress.into();
        self
    }

    pub fn with_analysis(self, analysis: Analysis) -> Self {
        *self.analysis.lock().unwrap() = Some(Ok(analysis));
        self
    }

    pub fn with_analysis_error(self, status: u16, body: &str) -> Self {
        *self.analysis.lock().unwrap() = Some(Err((status, body.to_string())));
        self
    }

    pub fn with_failing_delete(self) -> Self {
        *self.delete_fails.lock().unwrap() = true;
        self
    }

    pub fn with_status_delay(self, delay: Duration) -> Self {
        *self.status_delay.lock().unwrap() = delay;
        self
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
impl HeatmapBackend for ScriptedBackend {
    async fn job_status(&self, _job_id: &str) -> Result<StatusReport, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match next_sticky(&self.statuses) {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(ApiError::Client(message)),
            None => Err(ApiError::Client("no status scripted".to_string())),
        }
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
            .ok_or_else(|| ApiError::Client("no progress scripted".to_string()))
    }

    async fn analysis(&self, _job_id: &str) -> Result<Analysis, ApiError> {
        match self.analysis.lock().unwrap().clone() {
            Some(Ok(analysis)) => Ok(analysis),
            Some(Err((status, body))) => Err(ApiError::status(status, &body)),
            None => Ok(Analysis::default()),
        }
    }

    async fn delete_job(&self, _job_id: &str) -> Result<(), ApiError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if *self.delete_fails.lock().unwrap() {
            return Err(ApiError::status(500, "internal error"));
        }
        Ok(())
    }

    async fn export(&self, job_id: &str, format: ExportFormat) -> Result<ExportFile, ApiError> {
        Ok(ExportFile {
            bytes: format!("export of {}", job_id).into_bytes(),
            mime_type: format.mime_type().to_string(),
            filename: format.filename(job_id),
        })
    }
}

/// Records every notification as `"{job_id}:{name or message}"`.
#[derive(Default)]
pub struct RecordingNotifier {
    completed: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<String> {
        self.failed.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl JobNotifier for RecordingNotifier {
    fn job_completed(&self, job_id: &str, job_name: &str) {
        self.completed
            .lock()
            .unwrap()
            .push(format!("{}:{}", job_id, job_name));
    }

    fn job_failed(&self, job_id: &str, _job_name: &str, message: &str) {
        self.failed
            .lock()
            .unwrap()
            .push(format!("{}:{}", job_id, message));
    }

    fn job_cancelled(&self, job_id: &str, job_name: &str) {
        self.cancelled
            .lock()
            .unwrap()
            .push(format!("{}:{}", job_id, job_name));
    }
}
