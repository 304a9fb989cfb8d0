use std::{future::Future, sync::Arc};

use rayon::ThreadPool;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;

use strata_core::panic_payload_to_str;

use crate::{task::AsyncTask, task::BlockingTask, CancellationToken, Cancelled, TaskError};

enum BlockingPool {
    Rayon(ThreadPool),
    /// No dedicated threads could be started; jobs use the IO runtime's blocking threads.
    Runtime(Handle),
}

impl BlockingPool {
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            BlockingPool::Rayon(pool) => pool.spawn(job),
            BlockingPool::Runtime(handle) => {
                drop(handle.spawn_blocking(job));
            }
        }
    }
}

fn build_rayon_pool(prefix: &'static str, threads: usize, fallback: &Handle) -> BlockingPool {
    let mut threads = threads.max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
        {
            Ok(pool) => return BlockingPool::Rayon(pool),
            // Thread limits reached: retry with a smaller pool.
            Err(err) if threads > 1 => {
                tracing::warn!(
                    target: "strata.scheduler",
                    pool = prefix,
                    threads,
                    error = %err,
                    "failed to build worker pool; retrying with fewer threads"
                );
                threads = (threads / 2).max(1);
            }
            Err(err) => {
                tracing::warn!(
                    target: "strata.scheduler",
                    pool = prefix,
                    error = %err,
                    "no worker threads available; using the IO runtime's blocking threads"
                );
                return BlockingPool::Runtime(fallback.clone());
            }
        }
    }
}

fn build_io_runtime(threads: usize) -> Runtime {
    let mut threads = threads.max(1);
    loop {
        match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .enable_time()
            .thread_name("strata-io")
            .build()
        {
            Ok(rt) => return rt,
            Err(_) if threads > 1 => {
                threads = 1;
            }
            Err(err) => {
                return tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap_or_else(|_| panic!("failed to build IO runtime: {err}"));
            }
        }
    }
}

/// Which blocking pool a job runs on.
///
/// `Compute` is for document output that an editor is waiting on; `Background` is for debounced
/// tag helper discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Compute,
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub compute_threads: usize,
    pub background_threads: usize,
    pub io_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            compute_threads: available.saturating_sub(1).clamp(1, 4),
            background_threads: available.clamp(1, 2),
            io_threads: 1,
        }
    }
}

/// Owns the worker pools and the timer/IO runtime used by background services.
///
/// Cloning is cheap; all clones share the same pools. Jobs are wrapped in `catch_unwind` so a
/// panicking job surfaces as [`TaskError::Panicked`] instead of tearing down a pool thread.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    compute_pool: BlockingPool,
    background_pool: BlockingPool,
    io_runtime: Option<Runtime>,
    io_handle: Handle,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let io_runtime = build_io_runtime(config.io_threads);
        let io_handle = io_runtime.handle().clone();
        Self::build(config, Some(io_runtime), io_handle)
    }

    /// Build a scheduler that drives timers and async work on an existing Tokio runtime instead
    /// of starting a dedicated `strata-io` runtime.
    pub fn new_with_io_handle(config: SchedulerConfig, io_handle: Handle) -> Self {
        Self::build(config, None, io_handle)
    }

    fn build(config: SchedulerConfig, io_runtime: Option<Runtime>, io_handle: Handle) -> Self {
        tracing::debug!(
            target: "strata.scheduler",
            compute_threads = config.compute_threads,
            background_threads = config.background_threads,
            io_threads = config.io_threads,
            dedicated_io = io_runtime.is_some(),
            "starting scheduler"
        );
        Self {
            inner: Arc::new(SchedulerInner {
                compute_pool: build_rayon_pool("strata-compute", config.compute_threads, &io_handle),
                background_pool: build_rayon_pool(
                    "strata-background",
                    config.background_threads,
                    &io_handle,
                ),
                io_runtime,
                io_handle,
            }),
        }
    }

    pub fn io_handle(&self) -> Handle {
        self.inner.io_handle.clone()
    }

    pub fn spawn_blocking_on<T, F>(
        &self,
        pool: PoolKind,
        token: CancellationToken,
        f: F,
    ) -> BlockingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if token.is_cancelled() {
            let _ = tx.send(Err(TaskError::Cancelled));
            return BlockingTask::new(token, rx);
        }

        let token_for_job = token.clone();
        let job = move || {
            let result =
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(token_for_job))) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(TaskError::from(err)),
                    Err(panic) => {
                        tracing::error!(
                            target: "strata.scheduler",
                            pool = ?pool,
                            panic = %panic_payload_to_str(&*panic),
                            "task panicked"
                        );
                        Err(TaskError::Panicked)
                    }
                };
            let _ = tx.send(result);
        };

        match pool {
            PoolKind::Compute => self.inner.compute_pool.spawn(job),
            PoolKind::Background => self.inner.background_pool.spawn(job),
        }

        BlockingTask::new(token, rx)
    }

    pub fn spawn_io<T, F, Fut>(&self, f: F) -> AsyncTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Cancelled>> + Send + 'static,
    {
        self.spawn_io_with_token(CancellationToken::new(), f)
    }

    pub fn spawn_io_with_token<T, F, Fut>(&self, token: CancellationToken, f: F) -> AsyncTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Cancelled>> + Send + 'static,
    {
        if token.is_cancelled() {
            let handle = self.io_handle().spawn(async { Err(TaskError::Cancelled) });
            return AsyncTask::new(token, handle);
        }

        let token_for_fut = token.clone();
        let handle = self
            .io_handle()
            .spawn(async move { f(token_for_fut).await.map_err(TaskError::from) });
        AsyncTask::new(token, handle)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.io_runtime.take() {
            runtime.shutdown_background();
        }
    }
}
