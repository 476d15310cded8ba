//! Same-context job event bus.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::shared::{CrossContextRecord, JOB_CANCELLED_KEY, JOB_COMPLETED_KEY};

/// What happened to a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Completed,
    Cancelled,
    Failed,
}

impl JobEventKind {
    /// Shared store key carrying this kind of event to other contexts.
    ///
    /// Failures stay local, so they have no key.
    pub fn store_key(self) -> Option<&'static str> {
        match self {
            JobEventKind::Completed => Some(JOB_COMPLETED_KEY),
            JobEventKind::Cancelled => Some(JOB_CANCELLED_KEY),
            JobEventKind::Failed => None,
        }
    }

    pub fn from_store_key(key: &str) -> Option<Self> {
        match key {
            JOB_COMPLETED_KEY => Some(JobEventKind::Completed),
            JOB_CANCELLED_KEY => Some(JobEventKind::Cancelled),
            _ => None,
        }
    }
}

/// A job lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    /// Unique per event; used for deduplication.
    pub event_id: Option<String>,
    pub kind: JobEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub job_name: String,
    /// Backend message (failures only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Context that produced the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    fn new(kind: JobEventKind, origin: &str, job_id: &str, job_name: &str) -> Self {
        Self {
            event_id: Some(uuid::Uuid::new_v4().to_string()),
            kind,
            job_id: Some(job_id.to_string()),
            job_name: job_name.to_string(),
            message: None,
            origin: Some(origin.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn completed(origin: &str, job_id: &str, job_name: &str) -> Self {
        Self::new(JobEventKind::Completed, origin, job_id, job_name)
    }

    pub fn cancelled(origin: &str, job_id: &str, job_name: &str) -> Self {
        Self::new(JobEventKind::Cancelled, origin, job_id, job_name)
    }

    pub fn failed(origin: &str, job_id: &str, job_name: &str, message: &str) -> Self {
        let mut event = Self::new(JobEventKind::Failed, origin, job_id, job_name);
        event.message = Some(message.to_string());
        event
    }

    /// Rebuilds an event observed in the shared store.
    pub fn from_record(kind: JobEventKind, record: CrossContextRecord) -> Self {
        Self {
            event_id: record.event_id,
            kind,
            job_id: record.job_id,
            job_name: record.job_name,
            message: None,
            origin: record.origin,
            timestamp: record.written_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn to_record(&self) -> CrossContextRecord {
        CrossContextRecord {
            job_name: self.job_name.clone(),
            job_id: self.job_id.clone(),
            event_id: self.event_id.clone(),
            origin: self.origin.clone(),
            written_at: Some(self.timestamp),
        }
    }
}

/// In-process publish/subscribe channel for [`JobEvent`]s.
#[derive(Clone)]
pub struct JobEventBus {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_send_receive() {
        let bus = JobEventBus::default();
        let mut rx = bus.subscribe();

        bus.send(JobEvent::completed("ctx-a", "J1", "lobby.mp4"));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, JobEventKind::Completed);
        assert_eq!(received.job_id.as_deref(), Some("J1"));
        assert_eq!(received.origin.as_deref(), Some("ctx-a"));
    }

    #[test]
    fn test_send_without_receivers() {
        let bus = JobEventBus::new(4);
        bus.send(JobEvent::cancelled("ctx-a", "J1", "lobby.mp4"));
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = JobEvent::completed("ctx", "J1", "x");
        let b = JobEvent::completed("ctx", "J1", "x");
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_record_conversion() {
        let event = JobEvent::completed("ctx-a", "J1", "lobby.mp4");
        let back = JobEvent::from_record(JobEventKind::Completed, event.to_record());
        assert_eq!(back, event);
    }

    #[test]
    fn test_store_keys() {
        assert_eq!(JobEventKind::Completed.store_key(), Some("jobCompleted"));
        assert_eq!(JobEventKind::Cancelled.store_key(), Some("jobCancelled"));
        assert_eq!(JobEventKind::Failed.store_key(), None);
        assert_eq!(
            JobEventKind::from_store_key("jobCancelled"),
            Some(JobEventKind::Cancelled)
        );
        assert_eq!(JobEventKind::from_store_key("theme"), None);
    }
}
