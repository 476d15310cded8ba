//! Single deduplicated sink fed by both notification channels.

use std::time::Duration;

use moka::sync::Cache;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::job_events::{JobEvent, JobEventKind};
use super::signals::{ContextSignals, Notification};
use crate::shared::{CrossContextRecord, StorageChange};

/// Turns job events into [`ContextSignal`](super::ContextSignal)s, at most
/// once per event id in this context.
pub struct EventSink {
    origin: String,
    signals: ContextSignals,
    delivered: Cache<String, ()>,
}

impl EventSink {
    pub fn new(origin: &str, signals: ContextSignals, dedup_ttl: Duration) -> Self {
        Self {
            origin: origin.to_string(),
            signals,
            delivered: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(dedup_ttl)
                .build(),
        }
    }

    /// Handles an event from the same-context bus.
    pub fn handle_local(&self, event: JobEvent) -> bool {
        self.deliver(event)
    }

    /// Handles a change observed in the shared store.
    ///
    /// Records written by this context are dropped even if the watcher let
    /// them through.
    pub fn handle_storage(&self, change: StorageChange) -> bool {
        let Some(kind) = JobEventKind::from_store_key(&change.key) else {
            return false;
        };
        let Some(raw) = change.new_value else {
            return false;
        };
        let Some(record) = CrossContextRecord::parse(&raw) else {
            return false;
        };
        if record.origin.as_deref() == Some(self.origin.as_str()) {
            log::debug!("Dropping own {} record for '{}'", change.key, record.job_name);
            return false;
        }
        self.deliver(JobEvent::from_record(kind, record))
    }

    fn deliver(&self, event: JobEvent) -> bool {
        if let Some(event_id) = &event.event_id {
            if self.delivered.contains_key(event_id) {
                log::debug!("Event {} already delivered", event_id);
                return false;
            }
            self.delivered.insert(event_id.clone(), ());
        }

        self.signals.notify(Notification::for_event(&event));
        if event.kind != JobEventKind::Failed {
            self.signals.refresh();
        }
        true
    }

    /// Runs the sink until `cancel` fires or the bus closes.
    pub async fn run(
        self,
        mut bus_rx: broadcast::Receiver<JobEvent>,
        mut storage_rx: Option<broadcast::Receiver<StorageChange>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = bus_rx.recv() => match result {
                    Ok(event) => {
                        self.handle_local(event);
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Job event sink lagged, missed {} events", n);
                    }
                    Err(RecvError::Closed) => {
                        log::info!("Job event bus closed, stopping event sink");
                        break;
                    }
                },
                result = recv_storage(&mut storage_rx) => match result {
                    Ok(change) => {
                        self.handle_storage(change);
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Shared store listener lagged, missed {} changes", n);
                    }
                    Err(RecvError::Closed) => {
                        log::info!("Shared store watcher closed, continuing with local events only");
                        storage_rx = None;
                    }
                },
            }
        }
    }

    pub fn spawn(
        self,
        bus_rx: broadcast::Receiver<JobEvent>,
        storage_rx: Option<broadcast::Receiver<StorageChange>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(bus_rx, storage_rx, cancel))
    }
}

async fn recv_storage(
    rx: &mut Option<broadcast::Receiver<StorageChange>>,
) -> Result<StorageChange, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
