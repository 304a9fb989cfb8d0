use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use indexmap::IndexMap;
use strata_core::FilePath;
use strata_project::{
    ExternalContext, ExternalContextId, HostProject, ProjectServices, ProjectSnapshot,
    ProjectSnapshotUpdateContext, ProjectState, StateDifference,
};

use crate::{
    ErrorReporter, ForegroundDispatcher, ProjectChangeEvent, ProjectChangeKind,
    ProjectChangeListener,
};

const SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;

/// Differences that make the current tag helpers worth recomputing.
const START_BACKGROUND_WORK: StateDifference = StateDifference::CONFIGURATION_CHANGED
    .union(StateDifference::EXTERNAL_CONTEXT_ADDED)
    .union(StateDifference::EXTERNAL_CONTEXT_CHANGED)
    .union(StateDifference::EXTERNAL_CONTEXT_REMOVED);

/// Differences reported as [`ProjectChangeKind::ProjectChanged`].
const NOTIFY_PROJECT_CHANGED: StateDifference = StateDifference::INVALIDATING;

/// Differences between the scheduled and the live state that void a background result.
const REJECT_COMPUTED_UPDATE: StateDifference = StateDifference::INVALIDATING;

/// Differences for which a background result is kept but the snapshot stays dirty.
const ACCEPT_COMPUTED_UPDATE_DIRTY: StateDifference = StateDifference::EXTERNAL_CONTEXT_CHANGED;

/// Receives snapshots that need their tag helpers (re)computed.
pub trait BackgroundWorkQueue: Send + Sync {
    fn enqueue(&self, update: ProjectSnapshotUpdateContext);
}

/// The project registry.
///
/// Owns the current snapshot of every host project and the catalog of external contexts the
/// host has announced. Every operation must run on the thread bound by the
/// [`ForegroundDispatcher`] and panics otherwise; use
/// [`ProjectManagerHost`](crate::ProjectManagerHost) to reach the manager from other threads.
pub struct ProjectSnapshotManager {
    dispatcher: ForegroundDispatcher,
    services: Arc<ProjectServices>,
    work_queue: Arc<dyn BackgroundWorkQueue>,
    error_reporter: Arc<dyn ErrorReporter>,
    projects: HashMap<FilePath, Arc<ProjectSnapshot>>,
    /// Supported contexts in announcement order.
    known_contexts: IndexMap<ExternalContextId, ExternalContext>,
    listeners: Vec<Arc<dyn ProjectChangeListener>>,
    subscribers: Vec<Sender<ProjectChangeEvent>>,
}

impl ProjectSnapshotManager {
    pub fn new(
        dispatcher: ForegroundDispatcher,
        services: Arc<ProjectServices>,
        work_queue: Arc<dyn BackgroundWorkQueue>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            dispatcher,
            services,
            work_queue,
            error_reporter,
            projects: HashMap::new(),
            known_contexts: IndexMap::new(),
            listeners: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn services(&self) -> &Arc<ProjectServices> {
        &self.services
    }

    /// Register a listener that is called synchronously for every change.
    pub fn add_listener(&mut self, listener: Arc<dyn ProjectChangeListener>) {
        self.dispatcher.assert_foreground_thread();
        self.listeners.push(listener);
    }

    /// Stream of change events. Events are dropped for a subscriber whose queue is full.
    pub fn subscribe(&mut self) -> Receiver<ProjectChangeEvent> {
        let (tx, rx) = async_channel::bounded(SUBSCRIBER_QUEUE_CAPACITY);
        self.add_subscriber(tx);
        rx
    }

    pub(crate) fn add_subscriber(&mut self, tx: Sender<ProjectChangeEvent>) {
        self.dispatcher.assert_foreground_thread();
        self.subscribers.push(tx);
    }

    pub fn projects(&self) -> Vec<Arc<ProjectSnapshot>> {
        self.dispatcher.assert_foreground_thread();
        let mut projects: Vec<_> = self.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.file_path().cmp(b.file_path()));
        projects
    }

    pub fn get_loaded_project(&self, file_path: &FilePath) -> Option<Arc<ProjectSnapshot>> {
        self.dispatcher.assert_foreground_thread();
        self.projects.get(file_path).cloned()
    }

    /// The loaded snapshot for `file_path`, or an uninitialized placeholder that is not
    /// registered.
    pub fn get_or_create_project(&self, file_path: &FilePath) -> Arc<ProjectSnapshot> {
        self.dispatcher.assert_foreground_thread();
        self.projects.get(file_path).cloned().unwrap_or_else(|| {
            Arc::new(ProjectSnapshot::ephemeral(
                Arc::clone(&self.services),
                file_path.clone(),
            ))
        })
    }

    pub fn host_project_added(&mut self, host_project: HostProject) {
        self.dispatcher.assert_foreground_thread();

        let file_path = host_project.file_path().clone();
        if self.projects.contains_key(&file_path) {
            tracing::debug!(
                target: "strata.workspace",
                project = %file_path,
                "ignoring duplicate host project"
            );
            return;
        }

        let external_context = self.find_known_context(&file_path, None).cloned();
        let state = ProjectState::new(Arc::clone(&self.services), host_project, external_context);
        let snapshot = Arc::new(ProjectSnapshot::new(state));
        self.projects.insert(file_path.clone(), Arc::clone(&snapshot));

        tracing::debug!(
            target: "strata.workspace",
            project = %file_path,
            version = %snapshot.version(),
            initialized = snapshot.is_initialized(),
            "host project added"
        );

        if snapshot.is_initialized() {
            self.work_queue.enqueue(snapshot.create_update_context());
        }
        self.notify(ProjectChangeKind::ProjectAdded, snapshot);
    }

    pub fn host_project_changed(&mut self, host_project: HostProject) {
        self.dispatcher.assert_foreground_thread();

        let Some(original) = self.projects.get(host_project.file_path()).cloned() else {
            tracing::debug!(
                target: "strata.workspace",
                project = %host_project.file_path(),
                "ignoring change for unknown host project"
            );
            return;
        };

        let state = original.state().with_host_project(host_project);
        self.apply_state(&original, state);
    }

    pub fn host_project_removed(&mut self, host_project: &HostProject) {
        self.dispatcher.assert_foreground_thread();

        let Some(removed) = self.projects.remove(host_project.file_path()) else {
            tracing::debug!(
                target: "strata.workspace",
                project = %host_project.file_path(),
                "ignoring removal of unknown host project"
            );
            return;
        };

        tracing::debug!(
            target: "strata.workspace",
            project = %removed.file_path(),
            "host project removed"
        );
        self.notify(ProjectChangeKind::ProjectRemoved, removed);
    }

    pub fn external_context_added(&mut self, context: ExternalContext) {
        self.dispatcher.assert_foreground_thread();

        let Some(file_path) = self.remember_context(&context) else {
            return;
        };
        let Some(original) = self.projects.get(&file_path).cloned() else {
            return;
        };
        if original.external_context().is_some() {
            return;
        }

        let state = original.state().with_external_context(Some(context));
        self.apply_state(&original, state);
    }

    pub fn external_context_changed(&mut self, context: ExternalContext) {
        self.dispatcher.assert_foreground_thread();

        let Some(file_path) = self.remember_context(&context) else {
            return;
        };
        let Some(original) = self.projects.get(&file_path).cloned() else {
            return;
        };
        let bound_elsewhere = original
            .external_context()
            .is_some_and(|bound| bound.id != context.id);
        if bound_elsewhere {
            return;
        }

        let state = original.state().with_external_context(Some(context));
        self.apply_state(&original, state);
    }

    /// Unbinds `context`, falling back to another announced context for the same project.
    pub fn external_context_removed(&mut self, context: &ExternalContext) {
        self.dispatcher.assert_foreground_thread();

        if !context.is_supported() {
            return;
        }
        self.known_contexts.shift_remove(&context.id);

        let Some(file_path) = context.file_path.as_ref() else {
            return;
        };
        let Some(original) = self.projects.get(file_path).cloned() else {
            return;
        };
        let is_bound = original
            .external_context()
            .is_some_and(|bound| bound.id == context.id);
        if !is_bound {
            return;
        }

        let fallback = self.find_known_context(file_path, Some(context.id)).cloned();
        if let Some(fallback) = &fallback {
            tracing::debug!(
                target: "strata.workspace",
                project = %file_path,
                removed = %context.id,
                fallback = %fallback.id,
                "rebinding project to surviving external context"
            );
        }

        let state = original.state().with_external_context(fallback);
        self.apply_state(&original, state);
    }

    /// Install background results computed for `update.snapshot`.
    ///
    /// Results computed against a configuration or context binding that has since changed are
    /// discarded and the live snapshot is queued again.
    pub fn project_updated(&mut self, update: ProjectSnapshotUpdateContext) {
        self.dispatcher.assert_foreground_thread();

        let Some(current) = self.projects.get(update.file_path()).cloned() else {
            tracing::debug!(
                target: "strata.workspace",
                project = %update.file_path(),
                "dropping update for unknown project"
            );
            return;
        };
        if !current.is_initialized() {
            tracing::debug!(
                target: "strata.workspace",
                project = %current.file_path(),
                "dropping update for uninitialized project"
            );
            return;
        }

        let difference = ProjectState::compute_difference(update.snapshot.state(), current.state());
        if difference.intersects(REJECT_COMPUTED_UPDATE) {
            tracing::debug!(
                target: "strata.workspace",
                project = %current.file_path(),
                scheduled = %update.version(),
                live = %current.version(),
                difference = ?difference,
                "rejecting stale update"
            );
            self.work_queue.enqueue(current.create_update_context());
            return;
        }

        let snapshot = Arc::new(current.with_computed_update(&update, difference));
        self.projects
            .insert(snapshot.file_path().clone(), Arc::clone(&snapshot));

        tracing::debug!(
            target: "strata.workspace",
            project = %snapshot.file_path(),
            version = %snapshot.version(),
            tag_helpers = snapshot.tag_helpers().len(),
            dirty = snapshot.is_dirty(),
            "installed computed update"
        );

        if difference.intersects(ACCEPT_COMPUTED_UPDATE_DIRTY) {
            self.work_queue.enqueue(snapshot.create_update_context());
        }
        if current.tag_helpers()[..] != snapshot.tag_helpers()[..] {
            self.notify(ProjectChangeKind::TagHelpersChanged, snapshot);
        }
    }

    pub fn report_error(&self, error: &(dyn Error + 'static), project: Option<&FilePath>) {
        self.error_reporter.report_error(error, project);
    }

    /// Records a supported context in the catalog and returns its project path.
    fn remember_context(&mut self, context: &ExternalContext) -> Option<FilePath> {
        if !context.is_supported() {
            tracing::trace!(
                target: "strata.workspace",
                context = %context.id,
                "ignoring unsupported external context"
            );
            return None;
        }
        self.known_contexts.insert(context.id, context.clone());
        context.file_path.clone()
    }

    fn find_known_context(
        &self,
        file_path: &FilePath,
        excluding: Option<ExternalContextId>,
    ) -> Option<&ExternalContext> {
        self.known_contexts
            .values()
            .find(|context| Some(context.id) != excluding && context.matches_path(file_path))
    }

    fn apply_state(&mut self, original: &Arc<ProjectSnapshot>, state: ProjectState) {
        let difference = ProjectState::compute_difference(original.state(), &state);
        let snapshot = Arc::new(original.with_state(state, difference));
        self.projects
            .insert(snapshot.file_path().clone(), Arc::clone(&snapshot));

        tracing::debug!(
            target: "strata.workspace",
            project = %snapshot.file_path(),
            from = %original.version(),
            to = %snapshot.version(),
            difference = ?difference,
            "project state changed"
        );

        if snapshot.is_initialized() && difference.intersects(START_BACKGROUND_WORK) {
            self.work_queue.enqueue(snapshot.create_update_context());
        }

        if difference.intersects(NOTIFY_PROJECT_CHANGED) {
            self.notify(ProjectChangeKind::ProjectChanged, snapshot);
        } else if difference.contains(StateDifference::DOCUMENTS_CHANGED) {
            self.notify(ProjectChangeKind::DocumentsChanged, snapshot);
        }
    }

    fn notify(&mut self, kind: ProjectChangeKind, snapshot: Arc<ProjectSnapshot>) {
        let event = ProjectChangeEvent::new(kind, snapshot);
        for listener in &self.listeners {
            listener.project_changed(&event);
        }
        publish_to_subscribers(&mut self.subscribers, &event);
    }
}

fn publish_to_subscribers(
    subscribers: &mut Vec<Sender<ProjectChangeEvent>>,
    event: &ProjectChangeEvent,
) {
    subscribers.retain(|tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(async_channel::TrySendError::Full(_)) => {
            tracing::warn!(
                target: "strata.workspace",
                project = %event.file_path(),
                kind = ?event.kind,
                "subscriber queue full; dropping event"
            );
            true
        }
        Err(async_channel::TrySendError::Closed(_)) => false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use strata_project::{
        ContextLanguage, DefaultProjectEngineFactory, DocumentDescriptor, ProjectConfiguration,
    };

    use crate::TracingErrorReporter;

    #[derive(Default)]
    struct NullQueue;

    impl BackgroundWorkQueue for NullQueue {
        fn enqueue(&self, _update: ProjectSnapshotUpdateContext) {}
    }

    fn manager() -> ProjectSnapshotManager {
        ProjectSnapshotManager::new(
            ForegroundDispatcher::current(),
            Arc::new(ProjectServices::new(Arc::new(DefaultProjectEngineFactory))),
            Arc::new(NullQueue),
            Arc::new(TracingErrorReporter),
        )
    }

    fn host(path: &str) -> HostProject {
        HostProject::new(
            path,
            ProjectConfiguration::new("MVC-2.1", "2.1"),
            [DocumentDescriptor::new("/app/Views/Index.cshtml", "Views/Index.cshtml")],
        )
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let mut manager = manager();
        let rx = manager.subscribe();
        let kept = manager.subscribe();
        drop(rx);

        manager.host_project_added(host("/app/App.csproj"));
        assert_eq!(manager.subscribers.len(), 1);
        assert_eq!(
            kept.try_recv().map(|event| event.kind),
            Ok(ProjectChangeKind::ProjectAdded)
        );
    }

    #[test]
    fn unsupported_contexts_are_not_cataloged() {
        let mut manager = manager();
        let vb = ExternalContext::new(ExternalContextId(1), "/app/App.csproj", ContextLanguage::VisualBasic);
        manager.external_context_added(vb);
        assert!(manager.known_contexts.is_empty());

        let mut pathless = ExternalContext::new(ExternalContextId(2), "/app/App.csproj", ContextLanguage::CSharp);
        pathless.file_path = None;
        manager.external_context_added(pathless);
        assert!(manager.known_contexts.is_empty());
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let mut manager = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            manager.add_listener(Arc::new(move |_: &ProjectChangeEvent| seen.lock().push(tag)));
        }

        manager.host_project_added(host("/app/App.csproj"));
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }
}
