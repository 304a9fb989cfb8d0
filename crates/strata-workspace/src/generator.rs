use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use strata_config::StrataConfig;
use strata_core::{FilePath, VersionStamp};
use strata_project::{DocumentDescriptor, ProjectSnapshot};
use strata_scheduler::{BatchDebouncer, BatchError, CancellationToken, Cancelled, PoolKind, Scheduler};

use crate::{BuildError, ProjectChangeEvent, ProjectChangeKind, ProjectChangeListener};

/// Produces the generated output for one document.
pub trait DocumentOutputBuilder: Send + Sync + 'static {
    fn build(
        &self,
        project: &ProjectSnapshot,
        document: &DocumentDescriptor,
        token: &CancellationToken,
    ) -> Result<(), BuildError>;
}

#[derive(Debug, Default, Clone, Copy)]
struct EntryVersions {
    known: VersionStamp,
    computed: VersionStamp,
}

/// A document the generator keeps output for.
#[derive(Debug)]
pub struct DocumentEntry {
    project_path: FilePath,
    document: DocumentDescriptor,
    detached: AtomicBool,
    versions: Mutex<EntryVersions>,
    snapshot: Mutex<Arc<ProjectSnapshot>>,
}

impl DocumentEntry {
    fn new(snapshot: Arc<ProjectSnapshot>, document: DocumentDescriptor) -> Self {
        Self {
            project_path: snapshot.file_path().clone(),
            document,
            detached: AtomicBool::new(false),
            versions: Mutex::new(EntryVersions {
                known: VersionStamp::create(),
                computed: VersionStamp::default(),
            }),
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn project_path(&self) -> &FilePath {
        &self.project_path
    }

    pub fn document(&self) -> &DocumentDescriptor {
        &self.document
    }

    pub fn snapshot(&self) -> Arc<ProjectSnapshot> {
        Arc::clone(&self.snapshot.lock())
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Version of the latest input the output must reflect.
    pub fn known_version(&self) -> VersionStamp {
        self.versions.lock().known
    }

    /// Version the current output was generated for; default if never generated.
    pub fn computed_version(&self) -> VersionStamp {
        self.versions.lock().computed
    }

    pub fn is_up_to_date(&self) -> bool {
        let versions = self.versions.lock();
        !versions.known.is_newer_than(versions.computed)
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    fn set_snapshot(&self, snapshot: Arc<ProjectSnapshot>) {
        *self.snapshot.lock() = snapshot;
    }

    fn set_dirty(&self) {
        let mut versions = self.versions.lock();
        versions.known = versions.known.get_newer();
    }

    fn set_computed(&self, version: VersionStamp) {
        let mut versions = self.versions.lock();
        if version.is_newer_than(versions.computed) {
            versions.computed = version;
        }
    }
}

struct ProjectEntry {
    snapshot: Arc<ProjectSnapshot>,
    documents: IndexMap<FilePath, Arc<DocumentEntry>>,
}

#[derive(Default)]
struct GeneratorState {
    projects: HashMap<FilePath, ProjectEntry>,
    /// Document path to the entries of every project that includes it.
    files: HashMap<FilePath, IndexMap<FilePath, Arc<DocumentEntry>>>,
}

impl GeneratorState {
    fn attach(&mut self, entry: Arc<DocumentEntry>) {
        self.files
            .entry(entry.document.file_path.clone())
            .or_default()
            .insert(entry.project_path.clone(), entry);
    }

    fn detach(&mut self, entry: &DocumentEntry) {
        entry.detach();
        let file_path = &entry.document.file_path;
        if let Some(by_project) = self.files.get_mut(file_path) {
            by_project.shift_remove(&entry.project_path);
            if by_project.is_empty() {
                self.files.remove(file_path);
            }
        }
    }
}

/// Keeps generated output for every document of every loaded project.
///
/// Listens to project changes, tracks one [`DocumentEntry`] per (project, document) pair, and
/// hands entries that need regeneration to a [`DocumentOutputBuilder`] in debounced batches.
pub struct DocumentGenerator {
    state: Mutex<GeneratorState>,
    debouncer: BatchDebouncer<(FilePath, FilePath), Arc<DocumentEntry>>,
}

impl DocumentGenerator {
    pub fn new(scheduler: Scheduler, delay: Duration, builder: Arc<dyn DocumentOutputBuilder>) -> Self {
        let processor = move |batch: Vec<((FilePath, FilePath), Arc<DocumentEntry>)>,
                              token: &CancellationToken|
              -> Result<(), BatchError> {
            for (_, entry) in batch {
                if entry.is_detached() {
                    tracing::trace!(
                        target: "strata.workspace",
                        document = %entry.document.file_path,
                        "skipping detached document"
                    );
                    continue;
                }
                Cancelled::check(token)?;

                let version = entry.known_version();
                let snapshot = entry.snapshot();
                match builder.build(&snapshot, &entry.document, token) {
                    Ok(()) => entry.set_computed(version),
                    Err(BuildError::Cancelled) => return Err(Cancelled.into()),
                    Err(err) => {
                        tracing::warn!(
                            target: "strata.workspace",
                            project = %entry.project_path,
                            document = %entry.document.file_path,
                            error = %err,
                            "document generation failed"
                        );
                    }
                }
            }
            Ok(())
        };

        Self {
            state: Mutex::new(GeneratorState::default()),
            debouncer: BatchDebouncer::new(
                "document-generator",
                scheduler,
                PoolKind::Compute,
                delay,
                processor,
            ),
        }
    }

    /// Generator using the `[generator]` debounce window from `config`.
    pub fn from_config(
        config: &StrataConfig,
        scheduler: Scheduler,
        builder: Arc<dyn DocumentOutputBuilder>,
    ) -> Self {
        Self::new(scheduler, config.generator.delay(), builder)
    }

    /// Entries for `document` across every project that includes it.
    pub fn document_entries(&self, document: &FilePath) -> Vec<Arc<DocumentEntry>> {
        self.state
            .lock()
            .files
            .get(document)
            .map(|by_project| by_project.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn project_documents(&self, project: &FilePath) -> Vec<Arc<DocumentEntry>> {
        self.state
            .lock()
            .projects
            .get(project)
            .map(|entry| entry.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn project_snapshot(&self, project: &FilePath) -> Option<Arc<ProjectSnapshot>> {
        self.state
            .lock()
            .projects
            .get(project)
            .map(|entry| Arc::clone(&entry.snapshot))
    }

    /// `true` when no regeneration is pending or running.
    pub fn is_idle(&self) -> bool {
        self.debouncer.is_idle()
    }

    pub fn shutdown(&self) {
        self.debouncer.shutdown();
    }

    fn enqueue(&self, entry: &Arc<DocumentEntry>) {
        self.debouncer.enqueue(
            (entry.project_path.clone(), entry.document.file_path.clone()),
            Arc::clone(entry),
        );
    }

    fn project_added(&self, snapshot: &Arc<ProjectSnapshot>) {
        let mut state = self.state.lock();
        if let Some(previous) = state.projects.remove(snapshot.file_path()) {
            for entry in previous.documents.values() {
                state.detach(entry);
            }
        }

        let mut documents = IndexMap::new();
        for document in snapshot.documents() {
            let entry = Arc::new(DocumentEntry::new(Arc::clone(snapshot), document.clone()));
            state.attach(Arc::clone(&entry));
            self.enqueue(&entry);
            documents.insert(document.file_path.clone(), entry);
        }

        tracing::debug!(
            target: "strata.workspace",
            project = %snapshot.file_path(),
            documents = documents.len(),
            "tracking project documents"
        );
        state.projects.insert(
            snapshot.file_path().clone(),
            ProjectEntry {
                snapshot: Arc::clone(snapshot),
                documents,
            },
        );
    }

    fn project_removed(&self, snapshot: &ProjectSnapshot) {
        let mut state = self.state.lock();
        let Some(removed) = state.projects.remove(snapshot.file_path()) else {
            return;
        };
        for entry in removed.documents.values() {
            state.detach(entry);
        }
        tracing::debug!(
            target: "strata.workspace",
            project = %snapshot.file_path(),
            documents = removed.documents.len(),
            "detached project documents"
        );
    }

    fn project_updated(&self, snapshot: &Arc<ProjectSnapshot>, mark_dirty: bool) {
        let mut state = self.state.lock();
        let Some(mut project) = state.projects.remove(snapshot.file_path()) else {
            drop(state);
            tracing::debug!(
                target: "strata.workspace",
                project = %snapshot.file_path(),
                "change for untracked project; tracking it now"
            );
            self.project_added(snapshot);
            return;
        };

        let wanted: IndexMap<FilePath, &DocumentDescriptor> = snapshot
            .documents()
            .iter()
            .map(|document| (document.file_path.clone(), document))
            .collect();

        // Gone, or same path with different properties.
        let stale: Vec<FilePath> = project
            .documents
            .iter()
            .filter(|(path, entry)| wanted.get(*path).map_or(true, |doc| **doc != entry.document))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &stale {
            if let Some(entry) = project.documents.shift_remove(path) {
                state.detach(&entry);
            }
        }

        for entry in project.documents.values() {
            entry.set_snapshot(Arc::clone(snapshot));
            if mark_dirty {
                entry.set_dirty();
                self.enqueue(entry);
            }
        }

        for (path, document) in wanted {
            if project.documents.contains_key(&path) {
                continue;
            }
            let entry = Arc::new(DocumentEntry::new(Arc::clone(snapshot), document.clone()));
            state.attach(Arc::clone(&entry));
            self.enqueue(&entry);
            project.documents.insert(path, entry);
        }

        project.snapshot = Arc::clone(snapshot);
        state.projects.insert(snapshot.file_path().clone(), project);
    }
}

impl ProjectChangeListener for DocumentGenerator {
    fn project_changed(&self, event: &ProjectChangeEvent) {
        match event.kind {
            ProjectChangeKind::ProjectAdded => self.project_added(&event.snapshot),
            ProjectChangeKind::ProjectRemoved => self.project_removed(&event.snapshot),
            ProjectChangeKind::ProjectChanged | ProjectChangeKind::TagHelpersChanged => {
                self.project_updated(&event.snapshot, true)
            }
            ProjectChangeKind::DocumentsChanged => self.project_updated(&event.snapshot, false),
        }
    }
}

impl Drop for DocumentGenerator {
    fn drop(&mut self) {
        self.debouncer.shutdown();
    }
}
