use std::sync::Arc;

use strata_core::FilePath;
use strata_project::ProjectSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectChangeKind {
    ProjectAdded,
    ProjectRemoved,
    /// Configuration or external context binding changed.
    ProjectChanged,
    /// Only the document set changed.
    DocumentsChanged,
    /// Background computation produced a different tag helper list.
    TagHelpersChanged,
}

/// A change to one project. For [`ProjectChangeKind::ProjectRemoved`] the snapshot is the last
/// one the registry held.
#[derive(Debug, Clone)]
pub struct ProjectChangeEvent {
    pub kind: ProjectChangeKind,
    pub snapshot: Arc<ProjectSnapshot>,
}

impl ProjectChangeEvent {
    pub fn new(kind: ProjectChangeKind, snapshot: Arc<ProjectSnapshot>) -> Self {
        Self { kind, snapshot }
    }

    pub fn file_path(&self) -> &FilePath {
        self.snapshot.file_path()
    }
}

/// Observer invoked synchronously on the foreground thread, in mutation order.
pub trait ProjectChangeListener: Send + Sync {
    fn project_changed(&self, event: &ProjectChangeEvent);
}

impl<F> ProjectChangeListener for F
where
    F: Fn(&ProjectChangeEvent) + Send + Sync,
{
    fn project_changed(&self, event: &ProjectChangeEvent) {
        self(event)
    }
}

/// What a [`DocumentTracker`](crate::DocumentTracker) reports to its subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextChangeKind {
    ProjectChanged,
    TagHelpersChanged,
}
