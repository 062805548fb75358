//! Ordered task queues keyed by resource.
//!
//! Every resource key (usually a canonical file path) owns one
//! [`ResourceQueue`]. Operations submitted to the same key run one at a time
//! and complete in submission order; operations on different keys run in
//! parallel with no ordering relationship. A failing or panicking operation
//! only affects its own [`Pending`] handle, the worker moves on to the next
//! queued operation.

mod error;
mod pending;
mod pool;
mod queue;

use std::time::Duration;

pub use error::QueueError;
pub use pending::Pending;
pub use pool::QueuePool;
pub use queue::{Persistence, QueueState, ResourceQueue};

/// Tunables shared by every queue opened through a [`QueuePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// How long an [`Persistence::Ephemeral`] worker waits for more work
    /// before tearing itself down.
    pub idle_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5),
        }
    }
}
