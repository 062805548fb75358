use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{Pending, QueueError, QueueOptions};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How long the worker behind a queue is kept alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persistence {
    /// One worker thread owns the key until shutdown.
    Dedicated,
    /// A worker is spawned when work arrives and exits once the queue has
    /// been idle for [`QueueOptions::idle_timeout`].
    Ephemeral,
}

/// Lifecycle of a resource queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    Uninitialized,
    Active,
    Draining,
    Stopped,
}

/// FIFO execution channel for a single resource key.
///
/// Any thread may enqueue. At most one worker dequeues at a time, so at most
/// one operation per key runs at any instant.
pub struct ResourceQueue {
    shared: Arc<Shared>,
}

struct Shared {
    key: String,
    persistence: Persistence,
    idle_timeout: Duration,
    jobs: Receiver<Job>,
    control: Mutex<Control>,
}

struct Control {
    state: QueueState,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    worker_running: bool,
}

impl ResourceQueue {
    /// Open a queue for `key`. Dedicated queues start their worker
    /// immediately; ephemeral queues start one on first submission.
    pub fn open(
        key: impl Into<String>,
        persistence: Persistence,
        options: QueueOptions,
    ) -> Result<Self, QueueError> {
        let (sender, jobs) = unbounded();
        let shared = Arc::new(Shared {
            key: key.into(),
            persistence,
            idle_timeout: options.idle_timeout,
            jobs,
            control: Mutex::new(Control {
                state: QueueState::Uninitialized,
                sender: Some(sender),
                worker: None,
                worker_running: false,
            }),
        });

        {
            let mut control = shared.control.lock();
            if persistence == Persistence::Dedicated {
                spawn_worker(&shared, &mut control)?;
            }
            control.state = QueueState::Active;
        }

        debug!(key = %shared.key, ?persistence, "opened resource queue");
        Ok(Self { shared })
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn persistence(&self) -> Persistence {
        self.shared.persistence
    }

    pub fn state(&self) -> QueueState {
        self.shared.control.lock().state
    }

    /// Whether a worker thread currently serves this queue.
    pub fn has_worker(&self) -> bool {
        self.shared.control.lock().worker_running
    }

    /// Append an operation to the tail of the queue.
    pub fn enqueue<R, F>(&self, operation: F) -> Result<Pending<R>, QueueError>
    where
        R: Send + 'static,
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);
        let key = self.shared.key.clone();
        let job: Job = Box::new(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(operation)) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => {
                    warn!(key = %key, "queued operation failed: {err:#}");
                    Err(QueueError::Operation(err))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(key = %key, "queued operation panicked: {message}");
                    Err(QueueError::Panicked(message))
                }
            };
            let _ = result_tx.send(outcome);
        });

        let mut control = self.shared.control.lock();
        if control.state != QueueState::Active {
            return Err(QueueError::Stopped(self.shared.key.clone()));
        }
        let sender = control
            .sender
            .as_ref()
            .ok_or_else(|| QueueError::Stopped(self.shared.key.clone()))?;
        sender
            .send(job)
            .map_err(|_| QueueError::Stopped(self.shared.key.clone()))?;
        if !control.worker_running {
            spawn_worker(&self.shared, &mut control)?;
        }
        Ok(Pending::new(self.shared.key.clone(), result_rx))
    }

    /// Stop accepting work, let the worker finish everything already queued,
    /// then join it.
    pub fn shutdown(&self) {
        let worker = {
            let mut control = self.shared.control.lock();
            if matches!(control.state, QueueState::Draining | QueueState::Stopped) {
                return;
            }
            control.state = QueueState::Draining;
            control.sender = None;
            if !control.worker_running && !self.shared.jobs.is_empty() {
                if let Err(err) = spawn_worker(&self.shared, &mut control) {
                    warn!(key = %self.shared.key, "unable to drain queue: {err}");
                }
            }
            control.worker.take()
        };

        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                warn!(key = %self.shared.key, "queue shut down from its own worker; not joining");
            } else if worker.join().is_err() {
                warn!(key = %self.shared.key, "queue worker terminated abnormally");
            }
        }

        self.shared.control.lock().state = QueueState::Stopped;
        debug!(key = %self.shared.key, "resource queue stopped");
    }
}

impl Drop for ResourceQueue {
    fn drop(&mut self) {
        // Disconnecting the channel lets the worker drain and exit on its own.
        self.shared.control.lock().sender = None;
    }
}

impl std::fmt::Debug for ResourceQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceQueue")
            .field("key", &self.shared.key)
            .field("persistence", &self.shared.persistence)
            .field("state", &self.state())
            .finish()
    }
}

fn spawn_worker(shared: &Arc<Shared>, control: &mut Control) -> Result<(), QueueError> {
    let worker_shared = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name(format!("queue:{}", shared.key))
        .spawn(move || run_worker(worker_shared))
        .map_err(|source| QueueError::Spawn {
            key: shared.key.clone(),
            source,
        })?;
    control.worker = Some(handle);
    control.worker_running = true;
    Ok(())
}

fn run_worker(shared: Arc<Shared>) {
    debug!(key = %shared.key, "queue worker started");
    loop {
        let job = match shared.persistence {
            Persistence::Dedicated => match shared.jobs.recv() {
                Ok(job) => job,
                Err(_) => break,
            },
            Persistence::Ephemeral => match shared.jobs.recv_timeout(shared.idle_timeout) {
                Ok(job) => job,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    // Checked under the control lock so an enqueue either
                    // lands before we look or sees `worker_running == false`.
                    let mut control = shared.control.lock();
                    if shared.jobs.is_empty() {
                        control.worker_running = false;
                        control.worker = None;
                        break;
                    }
                    continue;
                }
            },
        };
        job();
    }
    debug!(key = %shared.key, "queue worker exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
