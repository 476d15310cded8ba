//! Change notifications for the shared store.
//!
//! Mirrors a browser `storage` event: every context gets a
//! [`StorageChange`] when a key file changes or a new event file appears
//! under a key, except for writes made by the same context's own
//! [`SharedStore`] handle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig, DebouncedEvent};
use tokio::sync::broadcast;

use super::store::SharedStore;
use crate::error::StoreError;

/// A key changed in the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    /// New content, `None` when the key was removed.
    pub new_value: Option<String>,
}

/// Watches the shared store directory for changes made by other contexts.
pub struct StoreWatcher {
    store: SharedStore,
    poll_interval: Duration,
    debounce: Duration,
    sender: broadcast::Sender<StorageChange>,
    shutdown: Arc<AtomicBool>,
}

impl StoreWatcher {
    pub fn new(store: SharedStore, poll_interval: Duration, debounce: Duration) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            store,
            poll_interval,
            debounce,
            sender,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.sender.subscribe()
    }

    /// Watches the store directory.
    ///
    /// Blocks until [`StoreWatcher::stop`] is called.
    pub fn watch(&self) -> Result<(), StoreError> {
        let (tx, rx) = std::sync::mpsc::channel();

        let poll_config = NotifyConfig::default()
            .with_poll_interval(self.poll_interval)
            .with_compare_contents(true);
        let debouncer_config = DebouncerConfig::default()
            .with_timeout(self.debounce)
            .with_notify_config(poll_config);

        let mut debouncer = new_debouncer_opt::<_, PollWatcher>(debouncer_config, tx)
            .map_err(|e| StoreError::WatchError(e.to_string()))?;
        debouncer
            .watcher()
            .watch(self.store.dir(), RecursiveMode::NonRecursive)
            .map_err(|e| StoreError::WatchError(e.to_string()))?;

        log::info!("Watching shared store at {}", self.store.dir().display());

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    for event in events {
                        if let Some(change) = self.process_event(event) {
                            let _ = self.sender.send(change);
                        }
                    }
                }
                Ok(Err(e)) => {
                    log::error!("Shared store watch error: {}", e);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        log::info!("Stopped watching shared store");
        Ok(())
    }

    /// Turns a raw file event into a change, dropping temp files, unrelated
    /// files and this context's own writes.
    fn process_event(&self, event: DebouncedEvent) -> Option<StorageChange> {
        let file = self.store.file_for_path(&event.path)?;
        let new_value = match self.store.read_path(&event.path) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to read shared key '{}': {}", file.key, e);
                return None;
            }
        };

        match &new_value {
            // A pruned event file is not a change to its key.
            None if file.is_event() => return None,
            Some(value) if self.store.is_own_write(&event.path, value) => {
                log::debug!("Suppressing own write to shared key '{}'", file.key);
                return None;
            }
            _ => {}
        }

        Some(StorageChange {
            key: file.key,
            new_value,
        })
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Runs a [`StoreWatcher`] on a background thread.
pub struct AsyncStoreWatcher {
    watcher: Arc<StoreWatcher>,
    watch_handle: Option<std::thread::JoinHandle<Result<(), StoreError>>>,
}

impl AsyncStoreWatcher {
    pub fn new(store: SharedStore, poll_interval: Duration, debounce: Duration) -> Self {
        Self {
            watcher: Arc::new(StoreWatcher::new(store, poll_interval, debounce)),
            watch_handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.watch_handle.is_some() {
            return;
        }
        let watcher = Arc::clone(&self.watcher);
        self.watch_handle = Some(std::thread::spawn(move || watcher.watch()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.watcher.subscribe()
    }

    pub fn store_dir(&self) -> PathBuf {
        self.watcher.store.dir().to_path_buf()
    }

    pub fn stop(&mut self) {
        self.watcher.stop();
        if let Some(handle) = self.watch_handle.take() {
            match handle.join() {
                Ok(Err(e)) => log::warn!("Shared store watcher exited with error: {}", e),
                Err(_) => log::error!("Shared store watcher thread panicked"),
                Ok(Ok(())) => {}
            }
        }
    }
}

impl Drop for AsyncStoreWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
