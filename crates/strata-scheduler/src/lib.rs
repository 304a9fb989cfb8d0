//! Execution primitives shared by strata crates.
//!
//! - [`Scheduler`] owns the CPU pools (rayon) and the IO runtime (tokio) background work runs on.
//! - [`BatchDebouncer`] coalesces bursts of keyed work into delayed batches with at most one
//!   drain cycle in flight.
//!
//! Cancellation is cooperative via [`CancellationToken`].

mod debouncer;
mod scheduler;
mod task;

pub use debouncer::{BatchDebouncer, BatchError, BatchProcessor};
pub use scheduler::{PoolKind, Scheduler, SchedulerConfig};
pub use task::{AsyncTask, BlockingTask};
pub use tokio_util::sync::CancellationToken;

/// Returned by cooperative work that observed a cancelled token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

impl Cancelled {
    /// Bail out with [`Cancelled`] if `token` has been cancelled.
    pub fn check(token: &CancellationToken) -> Result<(), Cancelled> {
        if token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked")]
    Panicked,
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}
