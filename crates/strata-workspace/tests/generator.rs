mod support;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use strata_project::{DocumentDescriptor, FilePath, ProjectSnapshot};
use strata_scheduler::{CancellationToken, Scheduler, SchedulerConfig};
use strata_workspace::{
    BuildError, DocumentGenerator, DocumentOutputBuilder, ForegroundDispatcher,
    ProjectSnapshotManager,
};

use support::*;

const TIMEOUT: Duration = Duration::from_secs(5);

struct RecordingBuilder {
    built: Sender<(FilePath, FilePath)>,
    failing: Vec<FilePath>,
}

impl DocumentOutputBuilder for RecordingBuilder {
    fn build(
        &self,
        project: &ProjectSnapshot,
        document: &DocumentDescriptor,
        _token: &CancellationToken,
    ) -> Result<(), BuildError> {
        if self.failing.contains(&document.file_path) {
            return Err(BuildError::Failed {
                document: document.file_path.clone(),
                message: "syntax error".to_string(),
            });
        }
        let _ = self
            .built
            .send((project.file_path().clone(), document.file_path.clone()));
        Ok(())
    }
}

struct Harness {
    manager: ProjectSnapshotManager,
    generator: Arc<DocumentGenerator>,
    built: Receiver<(FilePath, FilePath)>,
}

impl Harness {
    fn new(delay: Duration, failing: &[&str]) -> Self {
        let scheduler = Scheduler::new(SchedulerConfig {
            compute_threads: 1,
            background_threads: 1,
            io_threads: 1,
        });
        let (tx, built) = crossbeam_channel::unbounded();
        let builder = RecordingBuilder {
            built: tx,
            failing: failing.iter().map(|name| document(name).file_path).collect(),
        };
        let generator = Arc::new(DocumentGenerator::new(scheduler, delay, Arc::new(builder)));

        let (_, services) = services();
        let mut manager = ProjectSnapshotManager::new(
            ForegroundDispatcher::current(),
            services,
            Arc::new(RecordingQueue::default()),
            Arc::new(RecordingErrorReporter::default()),
        );
        manager.add_listener(generator.clone());

        Self {
            manager,
            generator,
            built,
        }
    }

    fn fast() -> Self {
        Self::new(Duration::from_millis(10), &[])
    }

    /// Document names built for the default project until the generator goes idle.
    fn drain_built(&self) -> BTreeSet<String> {
        let deadline = Instant::now() + TIMEOUT;
        while !self.generator.is_idle() {
            assert!(Instant::now() < deadline, "generator did not go idle");
            thread::sleep(Duration::from_millis(5));
        }
        self.built
            .try_iter()
            .filter(|(project, _)| *project == FilePath::new(PROJECT))
            .filter_map(|(_, document)| document.file_name().map(str::to_owned))
            .collect()
    }

    fn entry(&self, name: &str) -> Arc<strata_workspace::DocumentEntry> {
        self.generator
            .project_documents(&FilePath::new(PROJECT))
            .into_iter()
            .find(|entry| entry.document().target_path.as_str() == name)
            .unwrap_or_else(|| panic!("no entry for {name}"))
    }
}

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|name| name.to_string()).collect()
}

#[test]
fn added_project_generates_every_document() {
    let mut h = Harness::fast();
    h.manager
        .host_project_added(host(&["Index.cshtml", "About.cshtml"]));

    assert_eq!(h.drain_built(), names(&["Index.cshtml", "About.cshtml"]));
    assert!(h.entry("Index.cshtml").is_up_to_date());
    assert!(h.entry("About.cshtml").is_up_to_date());
}

#[test]
fn documents_change_only_generates_new_documents() {
    let mut h = Harness::fast();
    h.manager.host_project_added(host(&["Index.cshtml"]));
    h.drain_built();
    let before = h.entry("Index.cshtml").known_version();

    h.manager
        .host_project_changed(host(&["Index.cshtml", "About.cshtml"]));

    assert_eq!(h.drain_built(), names(&["About.cshtml"]));
    assert_eq!(h.entry("Index.cshtml").known_version(), before);
}

#[test]
fn project_change_regenerates_surviving_documents() {
    let mut h = Harness::fast();
    h.manager.host_project_added(host(&["Index.cshtml"]));
    h.drain_built();
    let before = h.entry("Index.cshtml").known_version();

    h.manager
        .host_project_changed(host_at(PROJECT, configuration("MVC-3.0"), &["Index.cshtml"]));

    assert_eq!(h.drain_built(), names(&["Index.cshtml"]));
    let entry = h.entry("Index.cshtml");
    assert!(entry.known_version().is_newer_than(before));
    assert!(entry.is_up_to_date());
    assert_eq!(entry.snapshot().configuration().name, "MVC-3.0");
}

#[test]
fn removed_documents_are_detached() {
    let mut h = Harness::fast();
    h.manager
        .host_project_added(host(&["Index.cshtml", "About.cshtml"]));
    h.drain_built();
    let about = h.entry("About.cshtml");

    h.manager.host_project_changed(host(&["Index.cshtml"]));

    assert!(about.is_detached());
    assert!(h
        .generator
        .document_entries(&document("About.cshtml").file_path)
        .is_empty());
    assert_eq!(h.generator.project_documents(&FilePath::new(PROJECT)).len(), 1);
}

#[test]
fn document_property_change_replaces_the_entry() {
    let mut h = Harness::fast();
    h.manager.host_project_added(host(&["Index.cshtml"]));
    h.drain_built();
    let old = h.entry("Index.cshtml");

    let moved = strata_project::HostProject::new(
        PROJECT,
        configuration("MVC-2.1"),
        [DocumentDescriptor::new(
            document("Index.cshtml").file_path,
            "Views/Index.cshtml",
        )],
    );
    h.manager.host_project_changed(moved);

    assert!(old.is_detached());
    assert_eq!(h.drain_built(), names(&["Index.cshtml"]));
    let replaced = h.entry("Views/Index.cshtml");
    assert!(!replaced.is_detached());
    assert!(replaced.is_up_to_date());
}

#[test]
fn removed_project_skips_pending_generation() {
    let mut h = Harness::new(Duration::from_millis(100), &[]);
    h.manager.host_project_added(host(&["Index.cshtml"]));
    let entry = h.entry("Index.cshtml");

    h.manager.host_project_removed(&host(&[]));

    assert!(entry.is_detached());
    assert!(h.drain_built().is_empty());
    assert!(h.generator.project_documents(&FilePath::new(PROJECT)).is_empty());
    assert!(!entry.is_up_to_date());
}

#[test]
fn shared_document_has_one_entry_per_project() {
    let mut h = Harness::fast();
    h.manager.host_project_added(host(&["_Layout.cshtml"]));
    h.manager.host_project_added(host_at(
        "/src/Other/Other.csproj",
        configuration("MVC-2.1"),
        &["_Layout.cshtml"],
    ));
    h.drain_built();

    let entries = h
        .generator
        .document_entries(&document("_Layout.cshtml").file_path);
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|entry| entry.is_up_to_date()));
}

#[test]
fn failed_document_does_not_block_the_rest_of_the_batch() {
    let mut h = Harness::new(Duration::from_millis(10), &["Broken.cshtml"]);
    h.manager
        .host_project_added(host(&["Broken.cshtml", "Index.cshtml"]));

    assert_eq!(h.drain_built(), names(&["Index.cshtml"]));
    assert!(!h.entry("Broken.cshtml").is_up_to_date());
    assert!(h.entry("Index.cshtml").is_up_to_date());
}

#[test]
fn change_for_untracked_project_is_treated_as_added() {
    let mut h = Harness::fast();
    h.manager.host_project_added(host(&["Index.cshtml"]));
    h.drain_built();

    // Forget the project, then replay a change event for it.
    let snapshot = h.generator.project_snapshot(&FilePath::new(PROJECT)).unwrap();
    strata_workspace::ProjectChangeListener::project_changed(
        &*h.generator,
        &strata_workspace::ProjectChangeEvent::new(
            strata_workspace::ProjectChangeKind::ProjectRemoved,
            Arc::clone(&snapshot),
        ),
    );
    strata_workspace::ProjectChangeListener::project_changed(
        &*h.generator,
        &strata_workspace::ProjectChangeEvent::new(
            strata_workspace::ProjectChangeKind::DocumentsChanged,
            snapshot,
        ),
    );

    assert_eq!(h.drain_built(), names(&["Index.cshtml"]));
}
