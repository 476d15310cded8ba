//! Job event fan-out within and across execution contexts.

pub mod job_events;
pub mod notifier;
pub mod signals;
pub mod sink;

pub use job_events::{JobEvent, JobEventBus, JobEventKind};
pub use notifier::{CrossContextNotifier, JobNotifier};
pub use signals::{ContextSignal, ContextSignals, Notification, NotificationLevel};
pub use sink::EventSink;
