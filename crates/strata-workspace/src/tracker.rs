use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use futures::FutureExt;
use parking_lot::Mutex;
use strata_core::{panic_payload_to_str, FilePath};
use strata_project::{ProjectConfiguration, ProjectSnapshot, TagHelperDescriptor};
use strata_scheduler::{Scheduler, TaskError};
use tokio::sync::watch;

use crate::{
    ContextChangeKind, ErrorReporter, ProjectChangeEvent, ProjectChangeKind,
    ProjectChangeListener, ResolveError, TagHelperResolver,
};

const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

struct TrackerState {
    attached: bool,
    snapshot: Option<Arc<ProjectSnapshot>>,
    tag_helpers: Arc<[TagHelperDescriptor]>,
    /// Snapshot the in-flight resolution was started for.
    computing: Option<Arc<ProjectSnapshot>>,
    subscribers: Vec<Sender<ContextChangeKind>>,
}

struct TrackerInner {
    file_path: FilePath,
    project_path: FilePath,
    resolver: Arc<dyn TagHelperResolver>,
    error_reporter: Arc<dyn ErrorReporter>,
    scheduler: Scheduler,
    state: Mutex<TrackerState>,
    computing_tx: watch::Sender<bool>,
}

/// Follows the project of one open document and keeps its tag helpers current.
///
/// At most one resolution runs at a time. When the project moves on while a resolution is in
/// flight, a new one starts for the latest snapshot as soon as the current one completes.
#[derive(Clone)]
pub struct DocumentTracker {
    inner: Arc<TrackerInner>,
}

impl DocumentTracker {
    pub fn new(
        file_path: FilePath,
        project_path: FilePath,
        resolver: Arc<dyn TagHelperResolver>,
        error_reporter: Arc<dyn ErrorReporter>,
        scheduler: Scheduler,
    ) -> Self {
        let (computing_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackerInner {
                file_path,
                project_path,
                resolver,
                error_reporter,
                scheduler,
                state: Mutex::new(TrackerState {
                    attached: false,
                    snapshot: None,
                    tag_helpers: Arc::from(Vec::new()),
                    computing: None,
                    subscribers: Vec::new(),
                }),
                computing_tx,
            }),
        }
    }

    pub fn file_path(&self) -> &FilePath {
        &self.inner.file_path
    }

    pub fn project_path(&self) -> &FilePath {
        &self.inner.project_path
    }

    /// Start following `snapshot`, usually obtained from
    /// [`ProjectManagerHandle::get_or_create_project`](crate::ProjectManagerHandle::get_or_create_project).
    pub fn attach(&self, snapshot: Arc<ProjectSnapshot>) {
        let mut state = self.inner.state.lock();
        state.attached = true;
        state.snapshot = Some(snapshot);
        let resolve = self
            .inner
            .context_changed(&mut state, ContextChangeKind::ProjectChanged);
        drop(state);
        self.inner.resolve(resolve);
    }

    pub fn detach(&self) {
        let mut state = self.inner.state.lock();
        if !state.attached {
            return;
        }
        state.attached = false;
        state.snapshot = None;
        state.tag_helpers = Arc::from(Vec::new());
        let resolve = self
            .inner
            .context_changed(&mut state, ContextChangeKind::ProjectChanged);
        drop(state);
        self.inner.resolve(resolve);
    }

    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().attached
    }

    pub fn subscribe(&self) -> Receiver<ContextChangeKind> {
        let (tx, rx) = async_channel::bounded(SUBSCRIBER_QUEUE_CAPACITY);
        self.inner.state.lock().subscribers.push(tx);
        rx
    }

    pub fn project_snapshot(&self) -> Option<Arc<ProjectSnapshot>> {
        self.inner.state.lock().snapshot.clone()
    }

    pub fn configuration(&self) -> Option<ProjectConfiguration> {
        self.project_snapshot()
            .map(|snapshot| snapshot.configuration().clone())
    }

    pub fn tag_helpers(&self) -> Arc<[TagHelperDescriptor]> {
        Arc::clone(&self.inner.state.lock().tag_helpers)
    }

    pub fn is_computing(&self) -> bool {
        self.inner.state.lock().computing.is_some()
    }

    /// Resolves once no resolution is in flight; immediately if idle.
    pub fn pending_computation(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.inner.computing_tx.subscribe();
        async move {
            let _ = rx.wait_for(|computing| !*computing).await;
        }
    }
}

impl ProjectChangeListener for DocumentTracker {
    fn project_changed(&self, event: &ProjectChangeEvent) {
        if event.file_path() != &self.inner.project_path {
            return;
        }

        let mut state = self.inner.state.lock();
        if !state.attached {
            return;
        }

        let resolve = match event.kind {
            ProjectChangeKind::ProjectAdded | ProjectChangeKind::ProjectChanged => {
                state.snapshot = Some(Arc::clone(&event.snapshot));
                self.inner
                    .context_changed(&mut state, ContextChangeKind::ProjectChanged)
            }
            ProjectChangeKind::ProjectRemoved => {
                let services = Arc::clone(event.snapshot.state().services());
                state.snapshot = Some(Arc::new(ProjectSnapshot::ephemeral(
                    services,
                    self.inner.project_path.clone(),
                )));
                self.inner
                    .context_changed(&mut state, ContextChangeKind::ProjectChanged)
            }
            ProjectChangeKind::DocumentsChanged => {
                state.snapshot = Some(Arc::clone(&event.snapshot));
                None
            }
            ProjectChangeKind::TagHelpersChanged => {
                state.snapshot = Some(Arc::clone(&event.snapshot));
                self.inner.start_computing(&mut state)
            }
        };
        drop(state);
        self.inner.resolve(resolve);
    }
}

impl TrackerInner {
    /// Returns the snapshot to resolve once `state` is unlocked.
    fn context_changed(
        &self,
        state: &mut TrackerState,
        kind: ContextChangeKind,
    ) -> Option<Arc<ProjectSnapshot>> {
        publish(&mut state.subscribers, kind);
        if kind == ContextChangeKind::ProjectChanged {
            self.start_computing(state)
        } else {
            None
        }
    }

    /// Adopts current results or claims the in-flight marker. Returns the snapshot to resolve
    /// once `state` is unlocked.
    fn start_computing(&self, state: &mut TrackerState) -> Option<Arc<ProjectSnapshot>> {
        if state.computing.is_some() {
            // The completion handler restarts against the latest snapshot.
            return None;
        }
        let snapshot = state.snapshot.clone()?;

        if let Some(tag_helpers) = snapshot.try_get_tag_helpers() {
            state.tag_helpers = tag_helpers;
            publish(&mut state.subscribers, ContextChangeKind::TagHelpersChanged);
            return None;
        }

        tracing::debug!(
            target: "strata.workspace",
            document = %self.file_path,
            project = %self.project_path,
            version = %snapshot.version(),
            "resolving tag helpers"
        );
        state.computing = Some(Arc::clone(&snapshot));
        self.computing_tx.send_replace(true);
        Some(snapshot)
    }

    /// Runs the resolver for `snapshot` on the IO runtime. Must be called without the state lock.
    fn resolve(self: &Arc<Self>, snapshot: Option<Arc<ProjectSnapshot>>) {
        let Some(snapshot) = snapshot else {
            return;
        };

        let resolution =
            match panic::catch_unwind(AssertUnwindSafe(|| self.resolver.resolve(snapshot))) {
                Ok(resolution) => resolution,
                Err(panic) => {
                    tracing::error!(
                        target: "strata.workspace",
                        project = %self.project_path,
                        panic = %panic_payload_to_str(&*panic),
                        "tag helper resolver panicked"
                    );
                    let failed = Err(ResolveError::panicked(&self.project_path));
                    futures::future::ready(failed).boxed()
                }
            };
        let task = self
            .scheduler
            .spawn_io(move |_token| async move { Ok(resolution.await) });

        let inner = Arc::clone(self);
        self.scheduler.io_handle().spawn(async move {
            let result = match task.await {
                Ok(result) => result,
                Err(TaskError::Panicked) => Err(ResolveError::panicked(&inner.project_path)),
                Err(TaskError::Cancelled) => Err(ResolveError::Cancelled),
            };
            inner.tag_helpers_resolved(result);
        });
    }

    fn tag_helpers_resolved(self: &Arc<Self>, result: Result<Vec<TagHelperDescriptor>, ResolveError>) {
        let mut state = self.state.lock();
        let computed_for = state.computing.take();
        let mut restart = None;

        if state.attached {
            state.tag_helpers = match result {
                Ok(tag_helpers) => tag_helpers.into(),
                Err(err) => {
                    self.error_reporter
                        .report_error(&err, Some(&self.project_path));
                    Arc::from(Vec::new())
                }
            };
            publish(&mut state.subscribers, ContextChangeKind::TagHelpersChanged);

            let moved = match (&state.snapshot, &computed_for) {
                (Some(current), Some(computed_for)) => !Arc::ptr_eq(current, computed_for),
                _ => false,
            };
            if moved {
                restart = self.start_computing(&mut state);
            }
        }

        if state.computing.is_none() {
            self.computing_tx.send_replace(false);
        }
        drop(state);
        self.resolve(restart);
    }
}

fn publish(subscribers: &mut Vec<Sender<ContextChangeKind>>, kind: ContextChangeKind) {
    subscribers.retain(|tx| match tx.try_send(kind) {
        Ok(()) => true,
        Err(async_channel::TrySendError::Full(_)) => true,
        Err(async_channel::TrySendError::Closed(_)) => false,
    });
}
