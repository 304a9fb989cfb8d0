use std::sync::Arc;

use strata_core::{FilePath, VersionStamp};

use crate::engine::ProjectEngineCell;
use crate::{
    ComputedState, DocumentDescriptor, ExternalContext, HostProject, ProjectConfiguration,
    ProjectEngine, ProjectServices, ProjectState, StateDifference, TagHelperDescriptor,
};

/// The public, immutable view of a project at one point in time.
///
/// A snapshot pairs a [`ProjectState`] with the derived results last computed for it. It is
/// *dirty* while those results are missing or were computed for an older state version.
#[derive(Debug)]
pub struct ProjectSnapshot {
    state: ProjectState,
    computed: Option<ComputedState>,
    engine: Arc<ProjectEngineCell>,
    ephemeral: bool,
}

impl ProjectSnapshot {
    pub fn new(state: ProjectState) -> Self {
        let engine = Arc::new(ProjectEngineCell::new(
            Arc::clone(state.services()),
            state.host_project().configuration().clone(),
            state.host_project().file_path(),
        ));
        Self {
            state,
            computed: None,
            engine,
            ephemeral: false,
        }
    }

    /// Placeholder for a project the host has not described: fallback configuration, no
    /// documents, no external context, default version.
    pub fn ephemeral(services: Arc<ProjectServices>, file_path: FilePath) -> Self {
        let host_project = HostProject::new(file_path, ProjectConfiguration::fallback(), []);
        let state = ProjectState::with_version(services, host_project, None, VersionStamp::default());
        Self {
            ephemeral: true,
            ..Self::new(state)
        }
    }

    /// Successor of `self` holding `state`, where `difference` is
    /// `compute_difference(self.state(), &state)`.
    ///
    /// The engine is inherited unless the configuration changed. Computed results are dropped on
    /// configuration or context add/remove, kept as-is on a context change, and otherwise kept
    /// and advanced to the new version when they were current for `self`.
    #[must_use]
    pub fn with_state(&self, state: ProjectState, difference: StateDifference) -> Self {
        let engine = if difference.contains(StateDifference::CONFIGURATION_CHANGED) {
            Arc::new(ProjectEngineCell::new(
                Arc::clone(state.services()),
                state.host_project().configuration().clone(),
                state.host_project().file_path(),
            ))
        } else {
            Arc::clone(&self.engine)
        };

        let computed = if difference.intersects(StateDifference::INVALIDATING) {
            None
        } else if difference.contains(StateDifference::EXTERNAL_CONTEXT_CHANGED) {
            self.computed.clone()
        } else {
            // Stale results stay pinned to the version they were computed for.
            self.computed.as_ref().map(|computed| {
                if computed.version == self.version() {
                    computed.advanced_to(state.version())
                } else {
                    computed.clone()
                }
            })
        };

        Self {
            state,
            computed,
            engine,
            ephemeral: false,
        }
    }

    /// Successor of `self` (the live snapshot) with the results carried by `update`, where
    /// `difference` is `compute_difference(update.snapshot.state(), self.state())`.
    ///
    /// The results count as current unless the external context moved on while they were being
    /// computed, in which case they are recorded for the version they were computed against and
    /// the snapshot stays dirty.
    #[must_use]
    pub fn with_computed_update(
        &self,
        update: &ProjectSnapshotUpdateContext,
        difference: StateDifference,
    ) -> Self {
        let version = if difference.contains(StateDifference::EXTERNAL_CONTEXT_CHANGED) {
            update.snapshot.version()
        } else {
            self.version()
        };

        Self {
            state: self.state.clone(),
            computed: Some(ComputedState::new(Arc::clone(&update.tag_helpers), version)),
            engine: Arc::clone(&self.engine),
            ephemeral: false,
        }
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn host_project(&self) -> &HostProject {
        self.state.host_project()
    }

    pub fn file_path(&self) -> &FilePath {
        self.state.host_project().file_path()
    }

    pub fn configuration(&self) -> &ProjectConfiguration {
        self.state.host_project().configuration()
    }

    pub fn documents(&self) -> &[DocumentDescriptor] {
        self.state.host_project().documents()
    }

    pub fn external_context(&self) -> Option<&ExternalContext> {
        self.state.external_context()
    }

    pub fn version(&self) -> VersionStamp {
        self.state.version()
    }

    pub fn computed_state(&self) -> Option<&ComputedState> {
        self.computed.as_ref()
    }

    pub fn computed_version(&self) -> Option<VersionStamp> {
        self.computed.as_ref().map(|computed| computed.version)
    }

    /// Bound to an external compilation context.
    pub fn is_initialized(&self) -> bool {
        self.state.external_context().is_some()
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn is_dirty(&self) -> bool {
        self.computed_version() != Some(self.version())
    }

    pub fn has_configuration_changed(&self, original: &ProjectSnapshot) -> bool {
        self.configuration() != original.configuration()
    }

    /// Last computed tag helpers, or empty if never computed.
    pub fn tag_helpers(&self) -> Arc<[TagHelperDescriptor]> {
        self.computed
            .as_ref()
            .map(|computed| Arc::clone(&computed.tag_helpers))
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Tag helpers if they are known to be current for this snapshot.
    ///
    /// Ephemeral snapshots have nothing to compute and always answer with an empty list.
    pub fn try_get_tag_helpers(&self) -> Option<Arc<[TagHelperDescriptor]>> {
        if self.ephemeral {
            return Some(Arc::from(Vec::new()));
        }
        if self.is_dirty() {
            return None;
        }
        Some(self.tag_helpers())
    }

    /// The project engine, created on first use and shared with related snapshots.
    ///
    /// If this snapshot carries results newer than the engine's tag helper feature, the feature
    /// is refreshed before returning.
    pub fn project_engine(&self) -> Arc<dyn ProjectEngine> {
        let engine = self.engine.get();
        if let Some(computed) = &self.computed {
            if self.engine.feature().refresh(computed) {
                tracing::trace!(
                    target: "strata.project",
                    project = %self.file_path(),
                    version = %computed.version,
                    "refreshed engine tag helpers"
                );
            }
        }
        engine
    }

    /// `true` if both snapshots hand out the same engine instance.
    pub fn shares_engine_with(&self, other: &ProjectSnapshot) -> bool {
        Arc::ptr_eq(&self.engine, &other.engine)
    }

    pub fn create_update_context(self: &Arc<Self>) -> ProjectSnapshotUpdateContext {
        ProjectSnapshotUpdateContext::new(Arc::clone(self))
    }
}

/// A unit of background work: the snapshot results were requested for and, once computed, the
/// results themselves.
#[derive(Debug, Clone)]
pub struct ProjectSnapshotUpdateContext {
    pub snapshot: Arc<ProjectSnapshot>,
    pub tag_helpers: Arc<[TagHelperDescriptor]>,
}

impl ProjectSnapshotUpdateContext {
    pub fn new(snapshot: Arc<ProjectSnapshot>) -> Self {
        Self {
            snapshot,
            tag_helpers: Arc::from(Vec::new()),
        }
    }

    pub fn file_path(&self) -> &FilePath {
        self.snapshot.file_path()
    }

    pub fn version(&self) -> VersionStamp {
        self.snapshot.version()
    }

    #[must_use]
    pub fn with_tag_helpers(mut self, tag_helpers: impl Into<Arc<[TagHelperDescriptor]>>) -> Self {
        self.tag_helpers = tag_helpers.into();
        self
    }
}
