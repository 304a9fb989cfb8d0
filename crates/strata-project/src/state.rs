use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use strata_core::VersionStamp;

use crate::{ExternalContext, HostProject, ProjectEngineFactory};

bitflags! {
    /// What changed between two [`ProjectState`]s.
    #[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct StateDifference: u32 {
        const CONFIGURATION_CHANGED = 1 << 0;
        const EXTERNAL_CONTEXT_ADDED = 1 << 1;
        const EXTERNAL_CONTEXT_REMOVED = 1 << 2;
        const EXTERNAL_CONTEXT_CHANGED = 1 << 3;
        const DOCUMENTS_CHANGED = 1 << 4;
    }
}

impl StateDifference {
    /// Changes that invalidate previously computed results outright.
    pub const INVALIDATING: Self = Self::CONFIGURATION_CHANGED
        .union(Self::EXTERNAL_CONTEXT_ADDED)
        .union(Self::EXTERNAL_CONTEXT_REMOVED);
}

/// Services shared by every state of every project.
pub struct ProjectServices {
    engine_factory: Arc<dyn ProjectEngineFactory>,
}

impl ProjectServices {
    pub fn new(engine_factory: Arc<dyn ProjectEngineFactory>) -> Self {
        Self { engine_factory }
    }

    pub fn engine_factory(&self) -> &Arc<dyn ProjectEngineFactory> {
        &self.engine_factory
    }
}

impl fmt::Debug for ProjectServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectServices").finish_non_exhaustive()
    }
}

/// Immutable record of one project's inputs.
///
/// Every `with_*` method returns a new state whose version is strictly newer than this one.
#[derive(Clone)]
pub struct ProjectState {
    services: Arc<ProjectServices>,
    host_project: HostProject,
    external_context: Option<ExternalContext>,
    version: VersionStamp,
}

impl ProjectState {
    pub fn new(
        services: Arc<ProjectServices>,
        host_project: HostProject,
        external_context: Option<ExternalContext>,
    ) -> Self {
        Self::with_version(services, host_project, external_context, VersionStamp::create())
    }

    pub(crate) fn with_version(
        services: Arc<ProjectServices>,
        host_project: HostProject,
        external_context: Option<ExternalContext>,
        version: VersionStamp,
    ) -> Self {
        Self {
            services,
            host_project,
            external_context,
            version,
        }
    }

    pub fn services(&self) -> &Arc<ProjectServices> {
        &self.services
    }

    pub fn host_project(&self) -> &HostProject {
        &self.host_project
    }

    pub fn external_context(&self) -> Option<&ExternalContext> {
        self.external_context.as_ref()
    }

    pub fn version(&self) -> VersionStamp {
        self.version
    }

    #[must_use]
    pub fn with_host_project(&self, host_project: HostProject) -> Self {
        Self {
            services: Arc::clone(&self.services),
            host_project,
            external_context: self.external_context.clone(),
            version: self.version.get_newer(),
        }
    }

    #[must_use]
    pub fn with_external_context(&self, external_context: Option<ExternalContext>) -> Self {
        Self {
            services: Arc::clone(&self.services),
            host_project: self.host_project.clone(),
            external_context,
            version: self.version.get_newer(),
        }
    }

    /// Classify what changed going from `older` to `newer`.
    ///
    /// Total over any pair of states; lineage is not checked. Context changes are detected by
    /// version only. Documents are compared as sets.
    pub fn compute_difference(older: &ProjectState, newer: &ProjectState) -> StateDifference {
        let mut difference = StateDifference::empty();

        if older.host_project.configuration() != newer.host_project.configuration() {
            difference |= StateDifference::CONFIGURATION_CHANGED;
        }

        match (&older.external_context, &newer.external_context) {
            (None, Some(_)) => difference |= StateDifference::EXTERNAL_CONTEXT_ADDED,
            (Some(_), None) => difference |= StateDifference::EXTERNAL_CONTEXT_REMOVED,
            (Some(old), Some(new)) if old.version != new.version => {
                difference |= StateDifference::EXTERNAL_CONTEXT_CHANGED
            }
            _ => {}
        }

        let older_documents: HashSet<_> = older.host_project.documents().iter().collect();
        let newer_documents: HashSet<_> = newer.host_project.documents().iter().collect();
        if older_documents != newer_documents {
            difference |= StateDifference::DOCUMENTS_CHANGED;
        }

        difference
    }
}

impl fmt::Debug for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectState")
            .field("host_project", &self.host_project)
            .field("external_context", &self.external_context)
            .field("version", &self.version)
            .finish()
    }
}
