use crossbeam_channel::Receiver;

use crate::QueueError;

/// Handle to the eventual result of a queued operation.
///
/// Dropping the handle does not cancel the operation; it still runs in its
/// place in the queue and the result is discarded.
#[must_use = "dropping a Pending discards the operation's result"]
#[derive(Debug)]
pub struct Pending<R> {
    key: String,
    result: Receiver<Result<R, QueueError>>,
}

impl<R> Pending<R> {
    pub(crate) fn new(key: String, result: Receiver<Result<R, QueueError>>) -> Self {
        Self { key, result }
    }

    /// Resource key the operation was submitted to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Block until the operation has run.
    pub fn wait(self) -> Result<R, QueueError> {
        match self.result.recv() {
            Ok(result) => result,
            Err(_) => Err(QueueError::WorkerLost(self.key)),
        }
    }
}
