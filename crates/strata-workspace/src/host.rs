use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::{Context, Result};
use crossbeam_channel::{self as channel, Receiver, Sender};
use strata_config::StrataConfig;
use strata_core::{panic_payload_to_str, FilePath};
use strata_project::{
    ExternalContext, HostProject, ProjectServices, ProjectSnapshot, ProjectSnapshotUpdateContext,
};
use strata_scheduler::Scheduler;

use crate::{
    BackgroundWorkQueue, DocumentGenerator, DocumentOutputBuilder, ErrorReporter,
    ForegroundDispatcher, ManagerError, ProjectChangeEvent, ProjectChangeListener,
    ProjectSnapshotManager, ProjectSnapshotWorker, ProjectSnapshotWorkerQueue, TagHelperResolver,
};

const FOREGROUND_THREAD_NAME: &str = "strata-foreground";
const SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;

type ReportedError = Arc<dyn Error + Send + Sync>;

enum Command {
    HostProjectAdded(HostProject),
    HostProjectChanged(HostProject),
    HostProjectRemoved(HostProject),
    ExternalContextAdded(ExternalContext),
    ExternalContextChanged(ExternalContext),
    ExternalContextRemoved(ExternalContext),
    ProjectUpdated(ProjectSnapshotUpdateContext),
    ReportError {
        error: ReportedError,
        project: Option<FilePath>,
    },
    AddListener(Arc<dyn ProjectChangeListener>),
    Subscribe(async_channel::Sender<ProjectChangeEvent>),
    GetLoadedProject(FilePath, Sender<Option<Arc<ProjectSnapshot>>>),
    GetOrCreateProject(FilePath, Sender<Arc<ProjectSnapshot>>),
    Projects(Sender<Vec<Arc<ProjectSnapshot>>>),
    Flush(Sender<()>),
    Shutdown,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::HostProjectAdded(_) => "host_project_added",
            Command::HostProjectChanged(_) => "host_project_changed",
            Command::HostProjectRemoved(_) => "host_project_removed",
            Command::ExternalContextAdded(_) => "external_context_added",
            Command::ExternalContextChanged(_) => "external_context_changed",
            Command::ExternalContextRemoved(_) => "external_context_removed",
            Command::ProjectUpdated(_) => "project_updated",
            Command::ReportError { .. } => "report_error",
            Command::AddListener(_) => "add_listener",
            Command::Subscribe(_) => "subscribe",
            Command::GetLoadedProject(..) => "get_loaded_project",
            Command::GetOrCreateProject(..) => "get_or_create_project",
            Command::Projects(_) => "projects",
            Command::Flush(_) => "flush",
            Command::Shutdown => "shutdown",
        }
    }
}

/// Cloneable entry point to a [`ProjectSnapshotManager`] running on its foreground thread.
///
/// Mutations are fire-and-forget and applied in the order they were sent. Queries block until
/// the foreground thread answers and therefore fail with [`ManagerError::Reentrant`] when issued
/// from the foreground thread itself (for example from a listener).
#[derive(Clone)]
pub struct ProjectManagerHandle {
    tx: Sender<Command>,
    foreground: ThreadId,
}

impl ProjectManagerHandle {
    pub fn host_project_added(&self, host_project: HostProject) -> Result<(), ManagerError> {
        self.send(Command::HostProjectAdded(host_project))
    }

    pub fn host_project_changed(&self, host_project: HostProject) -> Result<(), ManagerError> {
        self.send(Command::HostProjectChanged(host_project))
    }

    pub fn host_project_removed(&self, host_project: HostProject) -> Result<(), ManagerError> {
        self.send(Command::HostProjectRemoved(host_project))
    }

    pub fn external_context_added(&self, context: ExternalContext) -> Result<(), ManagerError> {
        self.send(Command::ExternalContextAdded(context))
    }

    pub fn external_context_changed(&self, context: ExternalContext) -> Result<(), ManagerError> {
        self.send(Command::ExternalContextChanged(context))
    }

    pub fn external_context_removed(&self, context: ExternalContext) -> Result<(), ManagerError> {
        self.send(Command::ExternalContextRemoved(context))
    }

    pub fn project_updated(&self, update: ProjectSnapshotUpdateContext) -> Result<(), ManagerError> {
        self.send(Command::ProjectUpdated(update))
    }

    pub fn report_error(
        &self,
        error: ReportedError,
        project: Option<FilePath>,
    ) -> Result<(), ManagerError> {
        self.send(Command::ReportError { error, project })
    }

    pub fn add_listener(&self, listener: Arc<dyn ProjectChangeListener>) -> Result<(), ManagerError> {
        self.send(Command::AddListener(listener))
    }

    /// Events for every change applied after this call.
    pub fn subscribe(&self) -> Result<async_channel::Receiver<ProjectChangeEvent>, ManagerError> {
        let (tx, rx) = async_channel::bounded(SUBSCRIBER_QUEUE_CAPACITY);
        self.send(Command::Subscribe(tx))?;
        Ok(rx)
    }

    pub fn get_loaded_project(
        &self,
        file_path: FilePath,
    ) -> Result<Option<Arc<ProjectSnapshot>>, ManagerError> {
        self.query(|reply| Command::GetLoadedProject(file_path, reply))
    }

    pub fn get_or_create_project(
        &self,
        file_path: FilePath,
    ) -> Result<Arc<ProjectSnapshot>, ManagerError> {
        self.query(|reply| Command::GetOrCreateProject(file_path, reply))
    }

    pub fn projects(&self) -> Result<Vec<Arc<ProjectSnapshot>>, ManagerError> {
        self.query(Command::Projects)
    }

    /// Block until every command sent before this call has been applied.
    pub fn flush(&self) -> Result<(), ManagerError> {
        self.query(Command::Flush)
    }

    pub fn is_foreground_thread(&self) -> bool {
        thread::current().id() == self.foreground
    }

    fn send(&self, command: Command) -> Result<(), ManagerError> {
        self.tx.send(command).map_err(|_| ManagerError::Closed)
    }

    fn query<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T, ManagerError> {
        if self.is_foreground_thread() {
            return Err(ManagerError::Reentrant);
        }
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.send(make(reply_tx))?;
        reply_rx.recv().map_err(|_| ManagerError::Closed)
    }
}

/// Owns the foreground thread that runs a [`ProjectSnapshotManager`].
///
/// Dropping the host stops the thread after it has applied every command already queued.
pub struct ProjectManagerHost {
    handle: ProjectManagerHandle,
    scheduler: Option<Scheduler>,
    thread: Option<JoinHandle<()>>,
}

impl ProjectManagerHost {
    /// Spawn the foreground thread. `make_queue` runs on that thread and receives a handle the
    /// queue can use to post results back.
    pub fn spawn<Q>(
        services: Arc<ProjectServices>,
        error_reporter: Arc<dyn ErrorReporter>,
        make_queue: Q,
    ) -> Result<Self>
    where
        Q: FnOnce(ProjectManagerHandle) -> Arc<dyn BackgroundWorkQueue> + Send + 'static,
    {
        let (tx, rx) = channel::unbounded();
        let tx_for_thread = tx.clone();

        let thread = thread::Builder::new()
            .name(FOREGROUND_THREAD_NAME.to_string())
            .spawn(move || {
                let dispatcher = ForegroundDispatcher::current();
                let handle = ProjectManagerHandle {
                    tx: tx_for_thread,
                    foreground: dispatcher.thread_id(),
                };
                let work_queue = make_queue(handle);
                let mut manager =
                    ProjectSnapshotManager::new(dispatcher, services, work_queue, error_reporter);
                run_foreground(&mut manager, rx);
            })
            .context("failed to spawn project manager thread")?;

        let handle = ProjectManagerHandle {
            tx,
            foreground: thread.thread().id(),
        };

        Ok(Self {
            handle,
            scheduler: None,
            thread: Some(thread),
        })
    }

    /// Spawn a manager backed by a [`ProjectSnapshotWorkerQueue`] configured from `config`.
    pub fn start(
        config: &StrataConfig,
        services: Arc<ProjectServices>,
        resolver: Arc<dyn TagHelperResolver>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self> {
        let scheduler = Scheduler::new(config.scheduler.to_scheduler_config());
        let delay = config.worker_queue.delay();
        let worker = ProjectSnapshotWorker::new(resolver);

        let scheduler_for_queue = scheduler.clone();
        let mut host = Self::spawn(services, error_reporter, move |handle| {
            Arc::new(ProjectSnapshotWorkerQueue::new(
                scheduler_for_queue,
                delay,
                worker,
                handle,
            ))
        })?;
        host.scheduler = Some(scheduler);

        tracing::info!(
            target: "strata.workspace",
            worker_queue_delay_ms = delay.as_millis() as u64,
            "project manager started"
        );
        Ok(host)
    }

    pub fn handle(&self) -> ProjectManagerHandle {
        self.handle.clone()
    }

    /// Register a [`DocumentGenerator`] configured from `config` as a listener of this manager.
    ///
    /// The generator shares the scheduler created by [`ProjectManagerHost::start`], or gets its
    /// own when the host was built with [`ProjectManagerHost::spawn`].
    pub fn attach_generator(
        &self,
        config: &StrataConfig,
        builder: Arc<dyn DocumentOutputBuilder>,
    ) -> Result<Arc<DocumentGenerator>, ManagerError> {
        let scheduler = self
            .scheduler
            .clone()
            .unwrap_or_else(|| Scheduler::new(config.scheduler.to_scheduler_config()));
        let generator = Arc::new(DocumentGenerator::from_config(config, scheduler, builder));
        self.handle.add_listener(generator.clone())?;
        tracing::debug!(
            target: "strata.workspace",
            delay_ms = config.generator.delay_ms,
            "document generator attached"
        );
        Ok(generator)
    }

    /// The scheduler created by [`ProjectManagerHost::start`].
    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.handle.tx.send(Command::Shutdown);
        if thread.join().is_err() {
            tracing::error!(target: "strata.workspace", "project manager thread panicked");
        }
    }
}

impl Drop for ProjectManagerHost {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_foreground(manager: &mut ProjectSnapshotManager, rx: Receiver<Command>) {
    tracing::debug!(target: "strata.workspace", "foreground thread running");

    for command in rx.iter() {
        if matches!(command, Command::Shutdown) {
            break;
        }
        let name = command.name();
        let result = panic::catch_unwind(AssertUnwindSafe(|| apply(manager, command)));
        if let Err(panic) = result {
            tracing::error!(
                target: "strata.workspace",
                command = name,
                panic = %panic_payload_to_str(&*panic),
                "project manager command panicked"
            );
        }
    }

    tracing::debug!(target: "strata.workspace", "foreground thread stopped");
}

fn apply(manager: &mut ProjectSnapshotManager, command: Command) {
    match command {
        Command::HostProjectAdded(host_project) => manager.host_project_added(host_project),
        Command::HostProjectChanged(host_project) => manager.host_project_changed(host_project),
        Command::HostProjectRemoved(host_project) => manager.host_project_removed(&host_project),
        Command::ExternalContextAdded(context) => manager.external_context_added(context),
        Command::ExternalContextChanged(context) => manager.external_context_changed(context),
        Command::ExternalContextRemoved(context) => manager.external_context_removed(&context),
        Command::ProjectUpdated(update) => manager.project_updated(update),
        Command::ReportError { error, project } => {
            manager.report_error(&*error, project.as_ref())
        }
        Command::AddListener(listener) => manager.add_listener(listener),
        Command::Subscribe(tx) => manager.add_subscriber(tx),
        Command::GetLoadedProject(file_path, reply) => {
            let _ = reply.send(manager.get_loaded_project(&file_path));
        }
        Command::GetOrCreateProject(file_path, reply) => {
            let _ = reply.send(manager.get_or_create_project(&file_path));
        }
        Command::Projects(reply) => {
            let _ = reply.send(manager.projects());
        }
        Command::Flush(reply) => {
            let _ = reply.send(());
        }
        Command::Shutdown => {}
    }
}
