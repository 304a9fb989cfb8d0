use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_core::FilePath;

/// Language configuration a project is compiled with.
///
/// Opaque to the snapshot machinery beyond equality: any difference forces a fresh engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectConfiguration {
    pub name: String,
    pub language_version: String,
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl ProjectConfiguration {
    pub fn new(name: impl Into<String>, language_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language_version: language_version.into(),
            extensions: Vec::new(),
        }
    }

    /// Configuration assumed for projects the host has not described yet.
    pub fn fallback() -> Self {
        Self::new("MVC-2.1", "2.1")
    }
}

/// A document owned by a project: the source file and the path it is generated for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub file_path: FilePath,
    pub target_path: FilePath,
}

impl DocumentDescriptor {
    pub fn new(file_path: impl Into<FilePath>, target_path: impl Into<FilePath>) -> Self {
        Self {
            file_path: file_path.into(),
            target_path: target_path.into(),
        }
    }
}

/// The host project system's description of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProject {
    file_path: FilePath,
    configuration: ProjectConfiguration,
    documents: Arc<[DocumentDescriptor]>,
}

impl HostProject {
    pub fn new(
        file_path: impl Into<FilePath>,
        configuration: ProjectConfiguration,
        documents: impl IntoIterator<Item = DocumentDescriptor>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            configuration,
            documents: documents.into_iter().collect(),
        }
    }

    pub fn file_path(&self) -> &FilePath {
        &self.file_path
    }

    pub fn configuration(&self) -> &ProjectConfiguration {
        &self.configuration
    }

    /// Documents in host order.
    pub fn documents(&self) -> &[DocumentDescriptor] {
        &self.documents
    }

    #[must_use]
    pub fn with_configuration(&self, configuration: ProjectConfiguration) -> Self {
        Self {
            configuration,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_documents(&self, documents: impl IntoIterator<Item = DocumentDescriptor>) -> Self {
        Self {
            documents: documents.into_iter().collect(),
            ..self.clone()
        }
    }
}
