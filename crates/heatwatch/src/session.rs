//! Per-context orchestration: selection, tracked jobs, the custom sub-job
//! and everything derived from them.
//!
//! State lives behind a plain mutex that is never held across an await.
//! Every background result re-checks the selection epoch (or sub-job
//! generation) it was started for before it touches state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::analysis::AnalysisFetcher;
use crate::api::{ApiError, HeatmapBackend, ResourceUrls};
use crate::broadcast::{ContextSignal, ContextSignals, JobNotifier, Notification};
use crate::config::{ClientConfig, RetryConfig};
use crate::context::ExecutionContext;
use crate::error::{HeatwatchError, Result, ValidationError};
use crate::model::{
    Analysis, Area, CustomHeatmapRequest, CustomSubJob, ExportFile, ExportFormat, Job,
};
use crate::poller::{
    CustomOutcome, CustomProgressPoller, PollOutcome, PollerHandle, ProgressSink, StatusPoller,
};
use crate::probe::DurationProbe;
use crate::registry::JobRegistry;

const GENERATING_MESSAGE: &str = "Generating heatmap...";
const SENDING_MESSAGE: &str = "Sending request…";
const CUSTOM_DONE_MESSAGE: &str = "Custom heatmap generated!";

/// Timing knobs of a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub status_interval: Duration,
    pub custom_interval: Duration,
    pub retry: Option<RetryConfig>,
}

impl SessionOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            status_interval: config.status_poll_interval(),
            custom_interval: config.custom_progress_interval(),
            retry: config.retry.clone(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_millis(2000),
            custom_interval: Duration::from_millis(500),
            retry: None,
        }
    }
}

/// Immutable view of a session at one point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    /// Completed jobs, newest first.
    pub history: Vec<Job>,
    pub selected_job: Option<Job>,
    pub heatmap_generated: bool,
    pub status_message: Option<String>,
    /// Inline warning from the last rejected request.
    pub warning: Option<String>,
    pub generating: bool,
    pub custom_progress: Option<f64>,
    pub analysis: Option<Analysis>,
    pub analysis_error: Option<String>,
    pub analysis_loading: bool,
    pub video_duration: Option<f64>,
    pub heatmap_url: Option<String>,
    pub custom_heatmap_url: Option<String>,
}

#[derive(Default)]
struct ViewState {
    selected: Option<String>,
    /// Bumped on every selection change.
    epoch: u64,
    heatmap_generated: bool,
    /// Job whose status poll drives the generating flag.
    tracking: Option<String>,
    status_message: Option<String>,
    warning: Option<String>,
    custom: Option<CustomSubJob>,
    custom_handle: Option<PollerHandle<CustomOutcome>>,
    next_generation: u64,
    analysis: Option<Analysis>,
    analysis_error: Option<String>,
    analysis_loading: bool,
    video_duration: Option<f64>,
    heatmap_url: Option<String>,
    custom_heatmap_url: Option<String>,
}

impl ViewState {
    fn clear_custom(&mut self) {
        self.custom = None;
        // Dropping the handle cancels the poller.
        self.custom_handle = None;
    }

    fn clear_selection(&mut self) {
        self.selected = None;
        self.epoch += 1;
        self.heatmap_generated = false;
        self.clear_custom();
        self.analysis = None;
        self.analysis_error = None;
        self.analysis_loading = false;
        self.video_duration = None;
        self.heatmap_url = None;
        self.custom_heatmap_url = None;
        self.warning = None;
    }

    fn is_current(&self, job_id: &str, epoch: u64) -> bool {
        self.epoch == epoch && self.selected.as_deref() == Some(job_id)
    }
}

struct Tracked {
    ticket: u64,
    handle: PollerHandle<PollOutcome>,
}

struct SessionInner {
    backend: Arc<dyn HeatmapBackend>,
    probe: Arc<dyn DurationProbe>,
    urls: ResourceUrls,
    registry: Arc<JobRegistry>,
    notifier: Arc<dyn JobNotifier>,
    signals: ContextSignals,
    status_poller: StatusPoller,
    custom_poller: CustomProgressPoller,
    analysis: AnalysisFetcher,
    state: Mutex<ViewState>,
    pollers: Mutex<HashMap<String, Tracked>>,
    next_ticket: Mutex<u64>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            log::warn!("Session lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// The orchestration component of one execution context.
///
/// Must be created inside a tokio runtime. Dropping the session cancels
/// every poller and background task it started.
pub struct HeatmapSession {
    inner: Arc<SessionInner>,
}

impl HeatmapSession {
    pub fn new(
        backend: Arc<dyn HeatmapBackend>,
        probe: Arc<dyn DurationProbe>,
        urls: ResourceUrls,
        notifier: Arc<dyn JobNotifier>,
        signals: ContextSignals,
        options: SessionOptions,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let status_poller = StatusPoller::new(
            backend.clone(),
            registry.clone(),
            notifier.clone(),
            options.status_interval,
        )
        .with_retry(options.retry.clone());
        let custom_poller = CustomProgressPoller::new(backend.clone(), options.custom_interval);

        let inner = Arc::new(SessionInner {
            analysis: AnalysisFetcher::new(backend.clone()),
            backend,
            probe,
            urls,
            registry,
            notifier,
            signals: signals.clone(),
            status_poller,
            custom_poller,
            state: Mutex::new(ViewState::default()),
            pollers: Mutex::new(HashMap::new()),
            next_ticket: Mutex::new(0),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });

        inner.spawn_signal_listener(signals.subscribe());
        Self { inner }
    }

    /// Session wired to an execution context's notifier and signals.
    pub fn for_context(
        context: &ExecutionContext,
        backend: Arc<dyn HeatmapBackend>,
        probe: Arc<dyn DurationProbe>,
        config: &ClientConfig,
    ) -> Self {
        Self::new(
            backend,
            probe,
            ResourceUrls::new(&config.base_url),
            context.notifier(),
            context.signals().clone(),
            SessionOptions::from_config(config),
        )
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    /// Loads history and selects `initial_job_id` if it is among the
    /// completed jobs.
    pub async fn load_history(&self, initial_job_id: Option<&str>) -> Result<Vec<Job>> {
        let jobs = match self.inner.backend.job_history().await {
            Ok(jobs) => jobs,
            Err(e) => {
                log::warn!("Loading history failed: {}", e);
                self.inner
                    .signals
                    .notify(Notification::error("Failed to load heatmap history"));
                return Err(e.into());
            }
        };
        self.inner.apply_listing(jobs);
        let completed = self.inner.registry.list_completed();

        if let Some(job_id) = initial_job_id {
            if completed.iter().any(|job| job.job_id == job_id) {
                self.inner.select_job(job_id);
            } else {
                log::debug!("Initial job {} not among completed jobs", job_id);
            }
        }
        Ok(completed)
    }

    /// Re-lists history without touching the selection.
    pub async fn refresh_history(&self) -> Result<()> {
        self.inner.refresh_history().await.map_err(Into::into)
    }

    /// Registers a submitted job and polls it until it is terminal.
    pub fn track_job(&self, job_id: &str, name: Option<&str>) {
        self.inner.track_job(job_id, name);
    }

    /// Stops polling a job and announces the cancellation to every context.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        self.inner.cancel_job(job_id)
    }

    /// Makes `job_id` the selected job. Returns `None` for unknown ids.
    pub fn select_job(&self, job_id: &str) -> Option<Job> {
        self.inner.select_job(job_id)
    }

    /// Validates and submits a custom heatmap for the selected job.
    ///
    /// Returns once the backend acknowledged the request; progress keeps
    /// updating in the background until it reaches 1.
    pub async fn request_custom_heatmap(
        &self,
        start_time: Option<f64>,
        end_time: Option<f64>,
        area: Area,
    ) -> Result<()> {
        self.inner
            .request_custom_heatmap(start_time, end_time, area)
            .await
    }

    /// Deletes a job on the backend, then everything that refers to it.
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.inner.delete_job(job_id).await
    }

    pub async fn export(&self, format: ExportFormat) -> Result<ExportFile> {
        self.inner.export(format).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot()
    }

    /// Cancels every poller and background task and waits for them.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

impl Drop for HeatmapSession {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
        lock(&self.inner.pollers).clear();
        lock(&self.inner.state).clear_custom();
    }
}

impl SessionInner {
    fn spawn_task<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = future => {}
            }
        });
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    fn spawn_signal_listener(self: &Arc<Self>, mut rx: broadcast::Receiver<ContextSignal>) {
        // Weak, so the listener does not keep the session alive.
        let weak = Arc::downgrade(self);
        self.spawn_task(async move {
            loop {
                match rx.recv().await {
                    Ok(ContextSignal::Refresh) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if let Err(e) = inner.refresh_history().await {
                            log::debug!("History refresh failed: {}", e);
                        }
                    }
                    Ok(ContextSignal::Notify(_)) => {}
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Session signal listener lagged, missed {} signals", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    async fn refresh_history(&self) -> std::result::Result<(), ApiError> {
        let jobs = self.backend.job_history().await?;
        let listed = jobs.len();
        self.apply_listing(jobs);
        log::debug!("History refreshed, {} jobs", listed);
        Ok(())
    }

    /// Makes the registry match a full history listing. Jobs still being
    /// polled survive even when the backend does not list them yet.
    fn apply_listing(&self, jobs: Vec<Job>) {
        let keep: HashSet<String> = lock(&self.pollers).keys().cloned().collect();
        for job_id in self.registry.replace_history(jobs, &keep) {
            log::info!("Job {} is gone from the backend", job_id);
            self.forget_locally(&job_id);
        }
    }

    /// Drops everything in this session that refers to `job_id`.
    fn forget_locally(&self, job_id: &str) {
        if let Some(tracked) = lock(&self.pollers).remove(job_id) {
            tracked.handle.cancel();
        }
        let mut state = lock(&self.state);
        if state.tracking.as_deref() == Some(job_id) {
            state.tracking = None;
            state.status_message = None;
        }
        if state
            .custom
            .as_ref()
            .is_some_and(|c| c.parent_job_id == job_id)
        {
            state.clear_custom();
        }
        if state.selected.as_deref() == Some(job_id) {
            state.clear_selection();
            state.status_message = None;
        }
    }

    fn track_job(self: &Arc<Self>, job_id: &str, name: Option<&str>) {
        if !self.registry.upsert(Job::pending(job_id, name)) {
            log::warn!("Not tracking deleted job {}", job_id);
            return;
        }

        let ticket = {
            let mut next = lock(&self.next_ticket);
            *next += 1;
            *next
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let poller = self.status_poller.clone();
        let weak = Arc::downgrade(self);
        let id = job_id.to_string();
        let join = tokio::spawn(async move {
            let outcome = poller.run(&id, &token).await;
            if !token.is_cancelled() {
                if let Some(inner) = weak.upgrade() {
                    inner.tracking_finished(&id, ticket, &outcome);
                }
            }
            outcome
        });

        {
            let mut state = lock(&self.state);
            state.tracking = Some(job_id.to_string());
            state.status_message = Some(GENERATING_MESSAGE.to_string());
        }
        let previous = lock(&self.pollers).insert(
            job_id.to_string(),
            Tracked {
                ticket,
                handle: PollerHandle::new(cancel, join),
            },
        );
        if previous.is_some() {
            log::debug!("Replaced status poller for {}", job_id);
        }
        log::info!("Tracking job {}", job_id);
    }

    fn tracking_finished(self: &Arc<Self>, job_id: &str, ticket: u64, outcome: &PollOutcome) {
        {
            let mut pollers = lock(&self.pollers);
            if pollers.get(job_id).is_some_and(|t| t.ticket == ticket) {
                pollers.remove(job_id);
            }
        }

        let was_tracking = {
            let mut state = lock(&self.state);
            let was_tracking = state.tracking.as_deref() == Some(job_id);
            if was_tracking {
                state.tracking = None;
                state.status_message = match outcome {
                    PollOutcome::Failed(message) => Some(message.clone()),
                    _ => self
                        .registry
                        .get(job_id)
                        .map(|job| job.message)
                        .filter(|m| !m.is_empty()),
                };
            }
            was_tracking
        };

        if was_tracking && *outcome == PollOutcome::Completed {
            self.select_job(job_id);
        }
    }

    fn cancel_job(&self, job_id: &str) -> bool {
        let Some(tracked) = lock(&self.pollers).remove(job_id) else {
            return false;
        };
        tracked.handle.cancel();
        {
            let mut state = lock(&self.state);
            if state.tracking.as_deref() == Some(job_id) {
                state.tracking = None;
                state.status_message = None;
            }
        }
        let name = self
            .registry
            .get(job_id)
            .map(|job| job.display_name().to_string())
            .unwrap_or_else(|| "Heatmap".to_string());
        self.notifier.job_cancelled(job_id, &name);
        true
    }

    fn select_job(self: &Arc<Self>, job_id: &str) -> Option<Job> {
        let job = self.registry.get(job_id)?;
        let fetch_analysis = AnalysisFetcher::applies_to(Some(&job));

        let epoch = {
            let mut state = lock(&self.state);
            state.clear_selection();
            state.selected = Some(job_id.to_string());
            state.heatmap_generated = true;
            state.heatmap_url = Some(self.urls.heatmap_image(job_id));
            state.analysis_loading = fetch_analysis;
            state.epoch
        };
        log::debug!("Selected job {} (epoch {})", job_id, epoch);

        let inner = Arc::clone(self);
        let id = job_id.to_string();
        self.spawn_task(async move {
            let url = inner.urls.processed_video(&id);
            let duration = inner
                .probe
                .probe_duration(&url)
                .await
                .filter(|d| d.is_finite() && *d >= 0.0);
            let mut state = lock(&inner.state);
            if state.is_current(&id, epoch) {
                state.video_duration = duration;
            }
        });

        if fetch_analysis {
            let inner = Arc::clone(self);
            let id = job_id.to_string();
            self.spawn_task(async move {
                let result = inner.analysis.fetch(&id).await;
                let mut state = lock(&inner.state);
                if !state.is_current(&id, epoch) {
                    log::debug!("Discarding analysis for deselected job {}", id);
                    return;
                }
                state.analysis_loading = false;
                match result {
                    Ok(analysis) => {
                        state.analysis = Some(analysis);
                        state.analysis_error = None;
                    }
                    Err(message) => {
                        state.analysis = None;
                        state.analysis_error = Some(message);
                    }
                }
            });
        }

        Some(job)
    }

    fn validate_window(
        state: &ViewState,
        start_time: Option<f64>,
        end_time: Option<f64>,
    ) -> std::result::Result<(String, f64, f64), ValidationError> {
        let job_id = state.selected.clone().ok_or(ValidationError::NoJobSelected)?;
        let (Some(start), Some(end)) = (start_time, end_time) else {
            return Err(ValidationError::MissingWindow);
        };
        if !start.is_finite() || !end.is_finite() {
            return Err(ValidationError::MissingWindow);
        }
        if start < 0.0 || end < 0.0 {
            return Err(ValidationError::NegativeTime);
        }
        if start >= end {
            return Err(ValidationError::InvertedWindow);
        }
        if let Some(duration) = state.video_duration {
            if end > duration {
                return Err(ValidationError::ExceedsDuration {
                    end_time: end,
                    duration,
                });
            }
        }
        Ok((job_id, start, end))
    }

    async fn request_custom_heatmap(
        self: &Arc<Self>,
        start_time: Option<f64>,
        end_time: Option<f64>,
        area: Area,
    ) -> Result<()> {
        let (job_id, request, generation) = {
            let mut state = lock(&self.state);
            let (job_id, start, end) = match Self::validate_window(&state, start_time, end_time) {
                Ok(window) => window,
                Err(e) => {
                    log::debug!("Custom heatmap request rejected: {}", e);
                    state.warning = Some(e.to_string());
                    return Err(e.into());
                }
            };
            let request = CustomHeatmapRequest {
                start_time: start,
                end_time: end,
                area,
            };
            state.warning = None;
            state.next_generation += 1;
            let generation = state.next_generation;
            state.custom = Some(CustomSubJob::new(&job_id, request, generation));
            state.custom_handle = Some(self.custom_poller.spawn(
                &job_id,
                generation,
                Arc::clone(self) as Arc<dyn ProgressSink>,
            ));
            state.status_message = Some(SENDING_MESSAGE.to_string());
            (job_id, request, generation)
        };

        let result = self.backend.submit_custom_heatmap(&job_id, &request).await;

        let mut state = lock(&self.state);
        let current = state
            .custom
            .as_ref()
            .is_some_and(|c| c.generation == generation && c.parent_job_id == job_id);
        if !current {
            log::debug!("Custom request {}#{} superseded", job_id, generation);
            return Ok(());
        }

        match result {
            Ok(()) => {
                state.status_message = Some(CUSTOM_DONE_MESSAGE.to_string());
                state.heatmap_generated = true;
                state.custom_heatmap_url = Some(self.urls.custom_heatmap_image(
                    &job_id,
                    request.start_time,
                    request.end_time,
                ));
                drop(state);
                self.signals.notify(Notification::success(CUSTOM_DONE_MESSAGE));
                Ok(())
            }
            Err(e) => {
                state.clear_custom();
                state.status_message = None;
                drop(state);
                self.signals.notify(Notification::error(format!(
                    "Failed to generate custom heatmap: {}",
                    e
                )));
                Err(e.into())
            }
        }
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        if let Err(e) = self.backend.delete_job(job_id).await {
            log::warn!("Deleting job {} failed: {}", job_id, e);
            self.signals
                .notify(Notification::error("Failed to delete heatmap."));
            return Err(e.into());
        }

        self.registry.remove(job_id);
        self.forget_locally(job_id);

        log::info!("Deleted job {}", job_id);
        self.signals.notify(Notification::success("Heatmap deleted!"));
        Ok(())
    }

    async fn export(&self, format: ExportFormat) -> Result<ExportFile> {
        let job_id = {
            let state = lock(&self.state);
            match (&state.selected, state.heatmap_generated) {
                (Some(job_id), true) => job_id.clone(),
                _ => {
                    self.signals.notify(Notification::error(
                        ValidationError::NothingToExport.to_string(),
                    ));
                    return Err(ValidationError::NothingToExport.into());
                }
            }
        };

        let label = format.extension().to_uppercase();
        match self.backend.export(&job_id, format).await {
            Ok(file) => {
                self.signals
                    .notify(Notification::success(format!("Heatmap exported as {}", label)));
                Ok(file)
            }
            Err(e) => {
                log::warn!("Export of {} as {} failed: {}", job_id, label, e);
                self.signals.notify(Notification::error(format!(
                    "Failed to export heatmap as {}",
                    label
                )));
                Err(HeatwatchError::Api(e))
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let state = lock(&self.state);
        let tracked_job = state.tracking.as_deref().and_then(|id| self.registry.get(id));
        let custom_active = state.custom.as_ref().is_some_and(|c| !c.is_done());

        let status_message = match &tracked_job {
            Some(job) if !job.message.is_empty() => Some(job.message.clone()),
            Some(_) => Some(GENERATING_MESSAGE.to_string()),
            None => state.status_message.clone(),
        };

        SessionSnapshot {
            history: self.registry.list_completed(),
            selected_job: state.selected.as_deref().and_then(|id| self.registry.get(id)),
            heatmap_generated: state.heatmap_generated,
            status_message,
            warning: state.warning.clone(),
            generating: tracked_job.is_some() || custom_active,
            custom_progress: state.custom.as_ref().map(|c| c.progress),
            analysis: state.analysis.clone(),
            analysis_error: state.analysis_error.clone(),
            analysis_loading: state.analysis_loading,
            video_duration: state.video_duration,
            heatmap_url: state.heatmap_url.clone(),
            custom_heatmap_url: state.custom_heatmap_url.clone(),
        }
    }

    async fn shutdown(&self) {
        self.cancel.cancel();

        let pollers: Vec<Tracked> = lock(&self.pollers).drain().map(|(_, t)| t).collect();
        let custom = {
            let mut state = lock(&self.state);
            state.custom = None;
            state.tracking = None;
            state.custom_handle.take()
        };
        if let Some(custom) = custom {
            custom.cancel();
            custom.join().await;
        }
        for tracked in &pollers {
            tracked.handle.cancel();
        }
        futures_util::future::join_all(pollers.into_iter().map(|t| t.handle.join())).await;

        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for result in futures_util::future::join_all(tasks).await {
            if let Err(e) = result {
                log::warn!("Session task ended abnormally: {}", e);
            }
        }
        log::info!("Session shut down");
    }
}

impl ProgressSink for SessionInner {
    fn record_progress(&self, parent_job_id: &str, generation: u64, raw: f64) -> Option<f64> {
        let mut state = lock(&self.state);
        if state.selected.as_deref() != Some(parent_job_id) {
            return None;
        }
        let custom = state
            .custom
            .as_mut()
            .filter(|c| c.parent_job_id == parent_job_id && c.generation == generation)?;
        let held = custom.observe(raw);
        if custom.is_done() {
            log::debug!("Custom heatmap for {} finished", parent_job_id);
        }
        Some(held)
    }
}
