use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use strata_core::{FilePath, VersionStamp};

use crate::{ComputedState, ProjectConfiguration, ProjectServices, TagHelperDescriptor};

/// File system view rooted at a project's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFileSystem {
    root: FilePath,
}

impl ProjectFileSystem {
    /// A file system rooted at the directory containing `project_path`.
    pub fn for_project(project_path: &FilePath) -> Self {
        let raw = project_path.as_str();
        let root = match raw.rfind(['/', '\\']) {
            Some(0) => &raw[..1],
            Some(idx) => &raw[..idx],
            None => "",
        };
        Self {
            root: FilePath::new(root),
        }
    }

    pub fn root(&self) -> &FilePath {
        &self.root
    }
}

/// Tag helpers installed into an engine, refreshed as newer results arrive.
#[derive(Debug, Default)]
pub struct TagHelperFeature {
    state: Mutex<TagHelperFeatureState>,
}

#[derive(Debug, Default)]
struct TagHelperFeatureState {
    version: VersionStamp,
    tag_helpers: Option<Arc<[TagHelperDescriptor]>>,
}

impl TagHelperFeature {
    pub fn version(&self) -> VersionStamp {
        self.state.lock().version
    }

    pub fn tag_helpers(&self) -> Arc<[TagHelperDescriptor]> {
        self.state
            .lock()
            .tag_helpers
            .clone()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Adopt `computed` if it is newer than what the feature holds. Returns `true` on change.
    pub fn refresh(&self, computed: &ComputedState) -> bool {
        let mut state = self.state.lock();
        if !computed.version.is_newer_than(state.version) {
            return false;
        }
        state.version = computed.version;
        state.tag_helpers = Some(Arc::clone(&computed.tag_helpers));
        true
    }
}

/// Collects what a [`ProjectEngineFactory`] needs to build an engine.
pub struct ProjectEngineBuilder {
    configuration: ProjectConfiguration,
    file_system: ProjectFileSystem,
    tag_helper_feature: Option<Arc<TagHelperFeature>>,
}

impl ProjectEngineBuilder {
    pub fn new(configuration: ProjectConfiguration, file_system: ProjectFileSystem) -> Self {
        Self {
            configuration,
            file_system,
            tag_helper_feature: None,
        }
    }

    pub fn configuration(&self) -> &ProjectConfiguration {
        &self.configuration
    }

    pub fn set_tag_helper_feature(&mut self, feature: Arc<TagHelperFeature>) {
        self.tag_helper_feature = Some(feature);
    }

    pub fn build(self) -> DefaultProjectEngine {
        DefaultProjectEngine {
            configuration: self.configuration,
            file_system: self.file_system,
            tag_helper_feature: self.tag_helper_feature,
        }
    }
}

/// The derived-computation context for a project (code generation, tag helper binding).
///
/// Expensive to build; snapshots share one until the configuration changes.
pub trait ProjectEngine: Send + Sync {
    fn configuration(&self) -> &ProjectConfiguration;

    fn file_system(&self) -> &ProjectFileSystem;

    fn tag_helper_feature(&self) -> Option<&Arc<TagHelperFeature>>;

    fn tag_helpers(&self) -> Arc<[TagHelperDescriptor]> {
        self.tag_helper_feature()
            .map(|feature| feature.tag_helpers())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }
}

/// Builds [`ProjectEngine`]s.
///
/// May be called from any thread. `configure` lets the caller install features before the
/// engine is finalized.
pub trait ProjectEngineFactory: Send + Sync {
    fn create(
        &self,
        configuration: &ProjectConfiguration,
        file_system: ProjectFileSystem,
        configure: Option<&dyn Fn(&mut ProjectEngineBuilder)>,
    ) -> Arc<dyn ProjectEngine>;
}

#[derive(Debug)]
pub struct DefaultProjectEngine {
    configuration: ProjectConfiguration,
    file_system: ProjectFileSystem,
    tag_helper_feature: Option<Arc<TagHelperFeature>>,
}

impl ProjectEngine for DefaultProjectEngine {
    fn configuration(&self) -> &ProjectConfiguration {
        &self.configuration
    }

    fn file_system(&self) -> &ProjectFileSystem {
        &self.file_system
    }

    fn tag_helper_feature(&self) -> Option<&Arc<TagHelperFeature>> {
        self.tag_helper_feature.as_ref()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProjectEngineFactory;

impl ProjectEngineFactory for DefaultProjectEngineFactory {
    fn create(
        &self,
        configuration: &ProjectConfiguration,
        file_system: ProjectFileSystem,
        configure: Option<&dyn Fn(&mut ProjectEngineBuilder)>,
    ) -> Arc<dyn ProjectEngine> {
        let mut builder = ProjectEngineBuilder::new(configuration.clone(), file_system);
        if let Some(configure) = configure {
            configure(&mut builder);
        }
        Arc::new(builder.build())
    }
}

/// Lazily created engine shared by every snapshot in one configuration lineage.
pub(crate) struct ProjectEngineCell {
    services: Arc<ProjectServices>,
    configuration: ProjectConfiguration,
    file_system: ProjectFileSystem,
    feature: Arc<TagHelperFeature>,
    engine: OnceLock<Arc<dyn ProjectEngine>>,
}

impl ProjectEngineCell {
    pub(crate) fn new(
        services: Arc<ProjectServices>,
        configuration: ProjectConfiguration,
        project_path: &FilePath,
    ) -> Self {
        Self {
            services,
            configuration,
            file_system: ProjectFileSystem::for_project(project_path),
            feature: Arc::new(TagHelperFeature::default()),
            engine: OnceLock::new(),
        }
    }

    /// The engine, built on first use. `OnceLock` runs the factory at most once even when
    /// several threads race here.
    pub(crate) fn get(&self) -> Arc<dyn ProjectEngine> {
        let engine = self.engine.get_or_init(|| {
            tracing::debug!(
                target: "strata.project",
                root = %self.file_system.root(),
                configuration = %self.configuration.name,
                "creating project engine"
            );
            let feature = Arc::clone(&self.feature);
            let install = move |builder: &mut ProjectEngineBuilder| {
                builder.set_tag_helper_feature(Arc::clone(&feature));
            };
            self.services.engine_factory().create(
                &self.configuration,
                self.file_system.clone(),
                Some(&install),
            )
        });
        Arc::clone(engine)
    }

    pub(crate) fn is_created(&self) -> bool {
        self.engine.get().is_some()
    }

    pub(crate) fn feature(&self) -> &Arc<TagHelperFeature> {
        &self.feature
    }
}

impl fmt::Debug for ProjectEngineCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectEngineCell")
            .field("configuration", &self.configuration.name)
            .field("created", &self.is_created())
            .finish_non_exhaustive()
    }
}
