use thiserror::Error;

/// Errors produced while submitting to or waiting on a resource queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("resource {0} does not have an associated queue")]
    NotOpened(String),
    #[error("queue for {0} is shutting down")]
    Stopped(String),
    #[error("failed to spawn worker for {key}: {source}")]
    Spawn {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("queued operation failed: {0:#}")]
    Operation(anyhow::Error),
    #[error("queued operation panicked: {0}")]
    Panicked(String),
    #[error("worker for {0} exited before completing the operation")]
    WorkerLost(String),
}
