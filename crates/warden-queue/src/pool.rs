use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::{Pending, Persistence, QueueError, QueueOptions, QueueState, ResourceQueue};

/// Set of resource queues addressed by key.
#[derive(Debug, Default)]
pub struct QueuePool {
    options: QueueOptions,
    queues: RwLock<HashMap<String, Arc<ResourceQueue>>>,
}

impl QueuePool {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            options,
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Open the queue for `key`, or return the one already open. The
    /// persistence of an existing queue is never changed.
    pub fn open(&self, key: &str, persistence: Persistence) -> Result<Arc<ResourceQueue>, QueueError> {
        if let Some(queue) = self.queues.read().get(key) {
            return Ok(Arc::clone(queue));
        }

        let mut queues = self.queues.write();
        if let Some(queue) = queues.get(key) {
            return Ok(Arc::clone(queue));
        }
        let queue = Arc::new(ResourceQueue::open(key, persistence, self.options)?);
        queues.insert(key.to_string(), Arc::clone(&queue));
        Ok(queue)
    }

    pub fn get(&self, key: &str) -> Option<Arc<ResourceQueue>> {
        self.queues.read().get(key).cloned()
    }

    /// Submit an operation to an already opened queue.
    pub fn submit<R, F>(&self, key: &str, operation: F) -> Result<Pending<R>, QueueError>
    where
        R: Send + 'static,
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        let queue = self
            .get(key)
            .ok_or_else(|| QueueError::NotOpened(key.to_string()))?;
        queue.enqueue(operation)
    }

    pub fn state(&self, key: &str) -> QueueState {
        self.get(key)
            .map(|queue| queue.state())
            .unwrap_or(QueueState::Uninitialized)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.queues.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Shut every queue down, waiting for queued work to finish.
    pub fn drain_all(&self) {
        let queues: Vec<_> = self.queues.read().values().cloned().collect();
        debug!(count = queues.len(), "draining resource queues");
        for queue in queues {
            queue.shutdown();
        }
    }
}
