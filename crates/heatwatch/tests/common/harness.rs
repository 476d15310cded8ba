//! Contexts, sessions and signal recording for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use heatwatch::api::ResourceUrls;
use heatwatch::model::{Job, JobStatus};
use heatwatch::{
    ContextSignal, DurationProbe, ExecutionContext, HeatmapSession, Notification,
    NotificationLevel, SessionOptions,
};

use super::fakes::FakeBackend;

pub const BASE_URL: &str = "http://heatmaps.test";

/// A completed job created `minutes_ago`, named `{id}.mp4`.
pub fn completed_job(id: &str, minutes_ago: i64) -> Job {
    let mut job = Job::pending(id, Some(&format!("{}.mp4", id)));
    job.status = JobStatus::Completed;
    job.message = "done".to_string();
    job.created_at = chrono::Utc::now() - chrono::Duration::minutes(minutes_ago);
    job.placeholder = false;
    job
}

/// Short cadences so real-time tests stay fast.
pub fn fast_options() -> SessionOptions {
    SessionOptions {
        status_interval: Duration::from_millis(50),
        custom_interval: Duration::from_millis(20),
        retry: None,
    }
}

/// Context sharing `dir` with any other context opened on it.
pub fn shared_context(dir: &Path) -> ExecutionContext {
    ExecutionContext::with_store_dir(
        dir,
        Duration::from_millis(25),
        Duration::from_millis(25),
        Duration::from_secs(600),
    )
    .expect("Failed to open shared store")
}

pub fn session_for(
    context: &ExecutionContext,
    backend: Arc<FakeBackend>,
    probe: Arc<dyn DurationProbe>,
    options: SessionOptions,
) -> HeatmapSession {
    HeatmapSession::new(
        backend,
        probe,
        ResourceUrls::new(BASE_URL),
        context.notifier(),
        context.signals().clone(),
        options,
    )
}

/// Records every signal a context emits.
pub struct SignalLog {
    signals: Arc<Mutex<Vec<ContextSignal>>>,
    task: JoinHandle<()>,
}

impl SignalLog {
    pub fn attach(context: &ExecutionContext) -> Self {
        let signals = Arc::new(Mutex::new(Vec::new()));
        let sink = signals.clone();
        let mut rx = context.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => sink.lock().unwrap().push(signal),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { signals, task }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                ContextSignal::Notify(n) => Some(n.clone()),
                ContextSignal::Refresh => None,
            })
            .collect()
    }

    pub fn notifications_at(&self, level: NotificationLevel) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter(|n| n.level == level)
            .map(|n| n.message)
            .collect()
    }

    pub fn refreshes(&self) -> usize {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter(|s| **s == ContextSignal::Refresh)
            .count()
    }
}

impl Drop for SignalLog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Polls `condition` every 20ms until it holds or `limit` passes.
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
