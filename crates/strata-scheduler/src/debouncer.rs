use std::{hash::Hash, mem, sync::Arc, time::Duration};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{CancellationToken, Cancelled, PoolKind, Scheduler, TaskError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("batch processing failed: {0}")]
    Failed(String),
}

/// Consumes one drained batch of debounced work.
///
/// Items arrive in first-enqueue order of their keys. An `Err` (or a panic) is logged and the
/// batch is dropped; the debouncer keeps running.
pub trait BatchProcessor<K, V>: Send + Sync + 'static {
    fn process(&self, batch: Vec<(K, V)>, token: &CancellationToken) -> Result<(), BatchError>;
}

impl<K, V, F> BatchProcessor<K, V> for F
where
    F: Fn(Vec<(K, V)>, &CancellationToken) -> Result<(), BatchError> + Send + Sync + 'static,
{
    fn process(&self, batch: Vec<(K, V)>, token: &CancellationToken) -> Result<(), BatchError> {
        self(batch, token)
    }
}

struct DebounceState<K, V> {
    pending: IndexMap<K, V>,
    /// A timer or drain cycle is in flight.
    armed: bool,
}

struct BatchDebouncerInner<K, V> {
    name: &'static str,
    scheduler: Scheduler,
    pool: PoolKind,
    delay: Duration,
    processor: Arc<dyn BatchProcessor<K, V>>,
    state: Mutex<DebounceState<K, V>>,
    shutdown: CancellationToken,
}

/// Coalesces keyed work items and processes them in delayed batches.
///
/// Enqueuing an item for a key that is already pending replaces the earlier item. The first
/// enqueue on an idle debouncer arms a single timer; when it fires, the pending map is swapped
/// out and handed to the [`BatchProcessor`] on a blocking pool. Items enqueued while a batch is
/// being processed land in the next batch, and the timer is re-armed once the current batch is
/// done. At most one drain cycle is in flight at any time.
pub struct BatchDebouncer<K, V> {
    inner: Arc<BatchDebouncerInner<K, V>>,
}

impl<K, V> Clone for BatchDebouncer<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> BatchDebouncer<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    pub fn new(
        name: &'static str,
        scheduler: Scheduler,
        pool: PoolKind,
        delay: Duration,
        processor: impl BatchProcessor<K, V>,
    ) -> Self {
        Self {
            inner: Arc::new(BatchDebouncerInner {
                name,
                scheduler,
                pool,
                delay,
                processor: Arc::new(processor),
                state: Mutex::new(DebounceState {
                    pending: IndexMap::new(),
                    armed: false,
                }),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Insert or replace the pending item for `key`, arming the timer if needed.
    pub fn enqueue(&self, key: K, item: V) {
        // Checked under the lock: `shutdown` cancels before it clears `pending`.
        let mut state = self.inner.state.lock();
        if self.inner.shutdown.is_cancelled() {
            tracing::debug!(
                target: "strata.scheduler",
                debouncer = self.inner.name,
                "ignoring enqueue after shutdown"
            );
            return;
        }

        state.pending.insert(key, item);
        BatchDebouncerInner::arm_locked(&self.inner, &mut state);
    }

    /// Number of items waiting for the next drain.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// `true` when nothing is pending and no timer or drain is in flight.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        !state.armed && state.pending.is_empty()
    }

    /// Stop accepting work. Pending items are discarded and an in-flight batch observes a
    /// cancelled token.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut state = self.inner.state.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        if dropped > 0 {
            tracing::debug!(
                target: "strata.scheduler",
                debouncer = self.inner.name,
                dropped,
                "discarded pending work on shutdown"
            );
        }
    }
}

impl<K, V> BatchDebouncerInner<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    fn arm_locked(this: &Arc<Self>, state: &mut DebounceState<K, V>) {
        if state.armed || state.pending.is_empty() {
            return;
        }
        state.armed = true;

        let inner = Arc::clone(this);
        this.scheduler.io_handle().spawn(async move {
            tokio::select! {
                _ = inner.shutdown.cancelled() => {
                    inner.state.lock().armed = false;
                }
                _ = tokio::time::sleep(inner.delay) => {
                    Self::drain(inner).await;
                }
            }
        });
    }

    async fn drain(this: Arc<Self>) {
        let batch: Vec<(K, V)> = {
            let mut state = this.state.lock();
            mem::take(&mut state.pending).into_iter().collect()
        };

        if !batch.is_empty() {
            let len = batch.len();
            let processor = Arc::clone(&this.processor);
            let task = this.scheduler.spawn_blocking_on(
                this.pool,
                this.shutdown.child_token(),
                move |token| Ok(processor.process(batch, &token)),
            );

            match task.join().await {
                Ok(Ok(())) => {
                    tracing::trace!(
                        target: "strata.scheduler",
                        debouncer = this.name,
                        len,
                        "processed batch"
                    );
                }
                Ok(Err(BatchError::Cancelled(_))) | Err(TaskError::Cancelled) => {
                    tracing::debug!(
                        target: "strata.scheduler",
                        debouncer = this.name,
                        len,
                        "batch cancelled"
                    );
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        target: "strata.scheduler",
                        debouncer = this.name,
                        len,
                        error = %err,
                        "batch processing failed"
                    );
                }
                Err(TaskError::Panicked) => {
                    tracing::error!(
                        target: "strata.scheduler",
                        debouncer = this.name,
                        len,
                        "batch processor panicked"
                    );
                }
            }
        }

        let mut state = this.state.lock();
        state.armed = false;
        if !this.shutdown.is_cancelled() {
            Self::arm_locked(&this, &mut state);
        }
    }
}
