//! One execution context: its identity, notification channels and the
//! background tasks that feed them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{
    ContextSignal, ContextSignals, CrossContextNotifier, EventSink, JobEventBus, JobNotifier,
};
use crate::config::ClientConfig;
use crate::error::StoreError;
use crate::shared::{AsyncStoreWatcher, SharedStore, StorageChange};

/// Wires the event bus, shared store watcher, notifier and event sink of a
/// single context together.
///
/// Must be created inside a tokio runtime; the event sink is spawned on it.
pub struct ExecutionContext {
    context_id: String,
    bus: JobEventBus,
    signals: ContextSignals,
    notifier: Arc<CrossContextNotifier>,
    store: Option<SharedStore>,
    watcher: Option<AsyncStoreWatcher>,
    cancel: CancellationToken,
    sink_handle: Option<JoinHandle<()>>,
}

impl ExecutionContext {
    /// Starts a context that takes part in cross-context signalling through
    /// the configured shared store directory.
    pub fn start(config: &ClientConfig) -> Result<Self, StoreError> {
        let dir = config.shared_store.resolve_directory().ok_or_else(|| {
            StoreError::WatchError("could not determine shared store directory".to_string())
        })?;
        Self::with_store_dir(
            &dir,
            config.shared_store.poll_interval(),
            config.shared_store.debounce(),
            config.dedup_ttl(),
        )
    }

    pub fn with_store_dir(
        dir: &Path,
        poll_interval: Duration,
        debounce: Duration,
        dedup_ttl: Duration,
    ) -> Result<Self, StoreError> {
        let store = SharedStore::open(dir)?;
        let mut watcher = AsyncStoreWatcher::new(store.clone(), poll_interval, debounce);
        let storage_rx = watcher.subscribe();
        watcher.start();
        Ok(Self::build(Some(store), Some(watcher), Some(storage_rx), dedup_ttl))
    }

    /// A context that only sees its own events.
    pub fn local_only(dedup_ttl: Duration) -> Self {
        Self::build(None, None, None, dedup_ttl)
    }

    fn build(
        store: Option<SharedStore>,
        watcher: Option<AsyncStoreWatcher>,
        storage_rx: Option<broadcast::Receiver<StorageChange>>,
        dedup_ttl: Duration,
    ) -> Self {
        let context_id = uuid::Uuid::new_v4().to_string();
        let bus = JobEventBus::default();
        let signals = ContextSignals::default();
        let notifier = Arc::new(CrossContextNotifier::new(
            &context_id,
            bus.clone(),
            store.clone(),
        ));
        let cancel = CancellationToken::new();

        let sink = EventSink::new(&context_id, signals.clone(), dedup_ttl);
        let sink_handle = sink.spawn(bus.subscribe(), storage_rx, cancel.clone());

        log::info!(
            "Execution context {} started ({})",
            context_id,
            if store.is_some() { "shared" } else { "local only" }
        );

        Self {
            context_id,
            bus,
            signals,
            notifier,
            store,
            watcher,
            cancel,
            sink_handle: Some(sink_handle),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn notifier(&self) -> Arc<dyn JobNotifier> {
        self.notifier.clone()
    }

    pub fn signals(&self) -> &ContextSignals {
        &self.signals
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextSignal> {
        self.signals.subscribe()
    }

    pub fn bus(&self) -> &JobEventBus {
        &self.bus
    }

    pub fn store(&self) -> Option<&SharedStore> {
        self.store.as_ref()
    }

    /// Stops the event sink and the store watcher.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.sink_handle.take() {
            if let Err(e) = handle.await {
                log::warn!("Event sink task ended abnormally: {}", e);
            }
        }
        if let Some(mut watcher) = self.watcher.take() {
            // Joining the watcher thread blocks for up to one receive timeout.
            let _ = tokio::task::spawn_blocking(move || watcher.stop()).await;
        }
        log::info!("Execution context {} stopped", self.context_id);
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // The watcher stops itself when dropped.
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::NotificationLevel;

    #[tokio::test]
    async fn test_local_context_delivers_own_events_once() {
        let mut ctx = ExecutionContext::local_only(Duration::from_secs(60));
        let mut rx = ctx.subscribe();

        ctx.notifier().job_completed("J1", "lobby.mp4");

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match first {
            ContextSignal::Notify(n) => assert_eq!(n.level, NotificationLevel::Success),
            other => panic!("unexpected {:?}", other),
        }
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, ContextSignal::Refresh);

        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_context_ids_differ() {
        let a = ExecutionContext::local_only(Duration::from_secs(1));
        let b = ExecutionContext::local_only(Duration::from_secs(1));
        assert_ne!(a.context_id(), b.context_id());
    }
}
