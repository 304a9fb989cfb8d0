//! Project snapshot management for strata.
//!
//! [`ProjectSnapshotManager`] is the single owner of the project registry. It runs on one
//! foreground thread (see [`ProjectManagerHost`]), applies host and external-context changes,
//! schedules background tag helper discovery through a [`BackgroundWorkQueue`], and tells
//! listeners what changed. [`DocumentGenerator`] and [`DocumentTracker`] are the two built-in
//! consumers of those notifications.

mod error;
mod event;
mod foreground;
mod generator;
mod host;
mod manager;
mod tracker;
mod worker;

pub use error::{BuildError, ErrorReporter, ManagerError, ResolveError, TracingErrorReporter};
pub use event::{ContextChangeKind, ProjectChangeEvent, ProjectChangeKind, ProjectChangeListener};
pub use foreground::ForegroundDispatcher;
pub use generator::{DocumentEntry, DocumentGenerator, DocumentOutputBuilder};
pub use host::{ProjectManagerHandle, ProjectManagerHost};
pub use manager::{BackgroundWorkQueue, ProjectSnapshotManager};
pub use tracker::DocumentTracker;
pub use worker::{ProjectSnapshotWorker, ProjectSnapshotWorkerQueue, TagHelperResolver};
