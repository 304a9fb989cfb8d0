#![allow(dead_code)]

use std::collections::VecDeque;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use strata_project::{
    ContextLanguage, DefaultProjectEngineFactory, DocumentDescriptor, ExternalContext,
    ExternalContextId, FilePath, HostProject, ProjectConfiguration, ProjectEngine,
    ProjectEngineBuilder, ProjectEngineFactory, ProjectFileSystem, ProjectServices,
    ProjectSnapshot, ProjectSnapshotUpdateContext, TagHelperDescriptor,
};
use strata_workspace::{
    BackgroundWorkQueue, ErrorReporter, ProjectChangeEvent, ProjectChangeKind,
    ProjectChangeListener, ResolveError, TagHelperResolver,
};
use tokio::sync::oneshot;

pub const PROJECT: &str = "/src/App/App.csproj";

#[derive(Default)]
pub struct CountingFactory {
    created: AtomicUsize,
}

impl CountingFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ProjectEngineFactory for CountingFactory {
    fn create(
        &self,
        configuration: &ProjectConfiguration,
        file_system: ProjectFileSystem,
        configure: Option<&dyn Fn(&mut ProjectEngineBuilder)>,
    ) -> Arc<dyn ProjectEngine> {
        self.created.fetch_add(1, Ordering::SeqCst);
        DefaultProjectEngineFactory.create(configuration, file_system, configure)
    }
}

pub fn services() -> (Arc<CountingFactory>, Arc<ProjectServices>) {
    let factory = Arc::new(CountingFactory::default());
    let services = Arc::new(ProjectServices::new(factory.clone()));
    (factory, services)
}

#[derive(Default)]
pub struct RecordingQueue {
    updates: Mutex<Vec<ProjectSnapshotUpdateContext>>,
}

impl RecordingQueue {
    pub fn take(&self) -> Vec<ProjectSnapshotUpdateContext> {
        std::mem::take(&mut *self.updates.lock())
    }

    pub fn len(&self) -> usize {
        self.updates.lock().len()
    }
}

impl BackgroundWorkQueue for RecordingQueue {
    fn enqueue(&self, update: ProjectSnapshotUpdateContext) {
        self.updates.lock().push(update);
    }
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ProjectChangeEvent>>,
}

impl RecordingListener {
    pub fn take(&self) -> Vec<ProjectChangeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn kinds(&self) -> Vec<ProjectChangeKind> {
        self.take().into_iter().map(|event| event.kind).collect()
    }
}

impl ProjectChangeListener for RecordingListener {
    fn project_changed(&self, event: &ProjectChangeEvent) {
        self.events.lock().push(event.clone());
    }
}

#[derive(Default)]
pub struct RecordingErrorReporter {
    reports: Mutex<Vec<(String, Option<FilePath>)>>,
}

impl RecordingErrorReporter {
    pub fn reports(&self) -> Vec<(String, Option<FilePath>)> {
        self.reports.lock().clone()
    }
}

impl ErrorReporter for RecordingErrorReporter {
    fn report_error(&self, error: &(dyn Error + 'static), project: Option<&FilePath>) {
        self.reports
            .lock()
            .push((error.to_string(), project.cloned()));
    }
}

type Reply = oneshot::Sender<Result<Vec<TagHelperDescriptor>, ResolveError>>;

/// Resolver whose futures complete only when the test says so.
#[derive(Default)]
pub struct ScriptedResolver {
    calls: Mutex<VecDeque<(Arc<ProjectSnapshot>, Reply)>>,
}

impl ScriptedResolver {
    pub fn pending(&self) -> usize {
        self.calls.lock().len()
    }

    /// Complete the oldest outstanding call and return the snapshot it was made for.
    pub fn complete(
        &self,
        result: Result<Vec<TagHelperDescriptor>, ResolveError>,
    ) -> Arc<ProjectSnapshot> {
        let (snapshot, reply) = self
            .calls
            .lock()
            .pop_front()
            .expect("no outstanding resolve call");
        let _ = reply.send(result);
        snapshot
    }
}

impl TagHelperResolver for ScriptedResolver {
    fn resolve(
        &self,
        snapshot: Arc<ProjectSnapshot>,
    ) -> BoxFuture<'static, Result<Vec<TagHelperDescriptor>, ResolveError>> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().push_back((snapshot, tx));
        async move { rx.await.unwrap_or(Err(ResolveError::Cancelled)) }.boxed()
    }
}

/// Resolver that answers immediately with a fixed list, or fails for projects in `failing`.
pub struct StaticResolver {
    pub tag_helpers: Vec<TagHelperDescriptor>,
    pub failing: Vec<FilePath>,
    pub calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new(tag_helpers: Vec<TagHelperDescriptor>) -> Self {
        Self {
            tag_helpers,
            failing: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl TagHelperResolver for StaticResolver {
    fn resolve(
        &self,
        snapshot: Arc<ProjectSnapshot>,
    ) -> BoxFuture<'static, Result<Vec<TagHelperDescriptor>, ResolveError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.failing.contains(snapshot.file_path()) {
            Err(ResolveError::Failed {
                project: snapshot.file_path().clone(),
                message: "assembly load failed".to_string(),
            })
        } else {
            Ok(self.tag_helpers.clone())
        };
        async move { result }.boxed()
    }
}

pub fn configuration(name: &str) -> ProjectConfiguration {
    ProjectConfiguration::new(name, "2.1")
}

pub fn document(name: &str) -> DocumentDescriptor {
    DocumentDescriptor::new(format!("/src/App/{name}"), name)
}

pub fn host(documents: &[&str]) -> HostProject {
    host_at(PROJECT, configuration("MVC-2.1"), documents)
}

pub fn host_at(path: &str, configuration: ProjectConfiguration, documents: &[&str]) -> HostProject {
    HostProject::new(path, configuration, documents.iter().map(|doc| document(doc)))
}

pub fn context(id: u64) -> ExternalContext {
    context_at(id, PROJECT)
}

pub fn context_at(id: u64, path: &str) -> ExternalContext {
    ExternalContext::new(ExternalContextId(id), path, ContextLanguage::CSharp)
}

pub fn tag_helper(name: &str) -> TagHelperDescriptor {
    TagHelperDescriptor::new(name, "App", format!("App.TagHelpers.{name}"))
}
