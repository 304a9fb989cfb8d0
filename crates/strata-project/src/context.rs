use std::fmt;

use strata_core::{FilePath, VersionStamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalContextId(pub u64);

impl fmt::Display for ExternalContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextLanguage {
    CSharp,
    VisualBasic,
}

/// Handle to the compilation context the host maintains for a project file.
///
/// Several contexts can exist for one path (one per target framework); a project binds to one of
/// them at a time. Only the `version` is compared to detect changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalContext {
    pub id: ExternalContextId,
    pub file_path: Option<FilePath>,
    pub language: ContextLanguage,
    pub version: VersionStamp,
}

impl ExternalContext {
    pub fn new(id: ExternalContextId, file_path: impl Into<FilePath>, language: ContextLanguage) -> Self {
        Self {
            id,
            file_path: Some(file_path.into()),
            language,
            version: VersionStamp::create(),
        }
    }

    /// Contexts the project system can bind to: C# with a known project path.
    pub fn is_supported(&self) -> bool {
        self.language == ContextLanguage::CSharp && self.file_path.is_some()
    }

    /// `true` if this context belongs to the project at `path`.
    pub fn matches_path(&self, path: &FilePath) -> bool {
        self.file_path.as_ref() == Some(path)
    }

    /// The same context after the host reported a change.
    #[must_use]
    pub fn with_newer_version(&self) -> Self {
        Self {
            version: self.version.get_newer(),
            ..self.clone()
        }
    }
}
