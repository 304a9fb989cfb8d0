//! Immutable, versioned project snapshots.
//!
//! A [`ProjectState`] records what the host told us about a project (its descriptor and the
//! external compilation context bound to it). A [`ProjectSnapshot`] wraps a state together with
//! the derived results computed for it and a lazily created [`ProjectEngine`]. Snapshots are
//! never mutated; every change produces a new snapshot, and [`StateDifference`] decides which
//! cached pieces the new snapshot may inherit.

mod context;
mod descriptor;
mod engine;
mod snapshot;
mod state;
mod tag_helper;

pub use context::{ContextLanguage, ExternalContext, ExternalContextId};
pub use descriptor::{DocumentDescriptor, HostProject, ProjectConfiguration};
pub use engine::{
    DefaultProjectEngine, DefaultProjectEngineFactory, ProjectEngine, ProjectEngineBuilder,
    ProjectEngineFactory, ProjectFileSystem, TagHelperFeature,
};
pub use snapshot::{ProjectSnapshot, ProjectSnapshotUpdateContext};
pub use state::{ProjectServices, ProjectState, StateDifference};
pub use tag_helper::{ComputedState, TagHelperDescriptor};

pub use strata_core::{FilePath, VersionStamp};
