//! Cancellable timer-driven poll loops.

pub mod custom;
pub mod retry;
pub mod status;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use custom::{CustomOutcome, CustomProgressPoller, ProgressSink};
pub use retry::{next_delay, Backoff};
pub use status::{PollOutcome, StatusPoller};

/// Owner's handle to a spawned poll loop.
///
/// Dropping the handle cancels the loop.
pub struct PollerHandle<T> {
    cancel: CancellationToken,
    join: Option<JoinHandle<T>>,
}

impl<T> PollerHandle<T> {
    pub(crate) fn new(cancel: CancellationToken, join: JoinHandle<T>) -> Self {
        Self {
            cancel,
            join: Some(join),
        }
    }

    /// Stops the loop before its next poll; an in-flight response is dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// Waits for the loop to end. Returns `None` if the task panicked.
    pub async fn join(mut self) -> Option<T> {
        let join = self.join.take()?;
        match join.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::error!("Poller task failed: {}", e);
                None
            }
        }
    }
}

impl<T> Drop for PollerHandle<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
