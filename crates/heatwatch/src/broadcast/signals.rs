//! Signals a context's view layer reacts to.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::job_events::{JobEvent, JobEventKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationLevel::Success => write!(f, "success"),
            NotificationLevel::Info => write!(f, "info"),
            NotificationLevel::Warning => write!(f, "warning"),
            NotificationLevel::Error => write!(f, "error"),
        }
    }
}

/// Advisory text notification shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            job_id: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }

    pub fn with_job(mut self, job_id: Option<&str>) -> Self {
        self.job_id = job_id.map(str::to_string);
        self
    }

    /// The notification presented for a delivered job event.
    pub fn for_event(event: &JobEvent) -> Self {
        let notification = match event.kind {
            JobEventKind::Completed => {
                Self::success(format!("Processing complete for \"{}\"", event.job_name))
            }
            JobEventKind::Cancelled => {
                Self::info(format!("Processing cancelled for \"{}\"", event.job_name))
            }
            JobEventKind::Failed => Self::error(format!(
                "Generation failed: {}",
                event.message.as_deref().unwrap_or_default()
            )),
        };
        notification.with_job(event.job_id.as_deref())
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSignal {
    /// Present a notification.
    Notify(Notification),
    /// Reload any visible job history.
    Refresh,
}

/// Broadcast channel of [`ContextSignal`]s for one context.
#[derive(Clone)]
pub struct ContextSignals {
    sender: Arc<broadcast::Sender<ContextSignal>>,
}

impl ContextSignals {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, signal: ContextSignal) {
        let _ = self.sender.send(signal);
    }

    pub fn notify(&self, notification: Notification) {
        log::info!("{}", notification);
        self.send(ContextSignal::Notify(notification));
    }

    pub fn refresh(&self) {
        self.send(ContextSignal::Refresh);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextSignal> {
        self.sender.subscribe()
    }
}

impl Default for ContextSignals {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_notification_texts() {
        let done = Notification::for_event(&JobEvent::completed("c", "J1", "lobby.mp4"));
        assert_eq!(done.level, NotificationLevel::Success);
        assert_eq!(done.message, "Processing complete for \"lobby.mp4\"");
        assert_eq!(done.job_id.as_deref(), Some("J1"));

        let cancelled = Notification::for_event(&JobEvent::cancelled("c", "J1", "lobby.mp4"));
        assert_eq!(cancelled.level, NotificationLevel::Info);
        assert_eq!(cancelled.message, "Processing cancelled for \"lobby.mp4\"");

        let failed =
            Notification::for_event(&JobEvent::failed("c", "J1", "lobby.mp4", "codec error"));
        assert_eq!(failed.level, NotificationLevel::Error);
        assert_eq!(failed.message, "Generation failed: codec error");
    }

    #[test]
    fn test_signals_roundtrip() {
        let signals = ContextSignals::default();
        let mut rx = signals.subscribe();

        signals.notify(Notification::warning("Please select a job first."));
        signals.refresh();

        assert_eq!(
            rx.try_recv().unwrap(),
            ContextSignal::Notify(Notification::warning("Please select a job first."))
        );
        assert_eq!(rx.try_recv().unwrap(), ContextSignal::Refresh);
    }
}
