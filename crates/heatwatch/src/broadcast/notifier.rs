//! The notifier interface handed to pollers and the session.

use super::job_events::{JobEvent, JobEventBus};
use crate::shared::SharedStore;

/// Receives job lifecycle outcomes from whoever observed them.
///
/// Injected into each poller instead of firing on a global target.
pub trait JobNotifier: Send + Sync {
    fn job_completed(&self, job_id: &str, job_name: &str);
    fn job_failed(&self, job_id: &str, job_name: &str, message: &str);
    fn job_cancelled(&self, job_id: &str, job_name: &str);
}

/// Publishes on both channels: the same-context bus and, for completion and
/// cancellation, the shared store other contexts watch.
pub struct CrossContextNotifier {
    origin: String,
    bus: JobEventBus,
    store: Option<SharedStore>,
}

impl CrossContextNotifier {
    pub fn new(origin: &str, bus: JobEventBus, store: Option<SharedStore>) -> Self {
        Self {
            origin: origin.to_string(),
            bus,
            store,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn publish(&self, event: JobEvent) {
        if let (Some(store), Some(key)) = (&self.store, event.kind.store_key()) {
            if let Err(e) = store.write_record(key, &event.to_record()) {
                log::warn!(
                    "Failed to publish {:?} for job {:?} to shared store: {}",
                    event.kind,
                    event.job_id,
                    e
                );
            }
        }
        self.bus.send(event);
    }
}

impl JobNotifier for CrossContextNotifier {
    fn job_completed(&self, job_id: &str, job_name: &str) {
        log::info!("Job {} completed", job_id);
        self.publish(JobEvent::completed(&self.origin, job_id, job_name));
    }

    fn job_failed(&self, job_id: &str, job_name: &str, message: &str) {
        log::info!("Job {} failed: {}", job_id, message);
        self.publish(JobEvent::failed(&self.origin, job_id, job_name, message));
    }

    fn job_cancelled(&self, job_id: &str, job_name: &str) {
        log::info!("Job {} cancelled", job_id);
        self.publish(JobEvent::cancelled(&self.origin, job_id, job_name));
    }
}
