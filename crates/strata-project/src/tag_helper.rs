use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_core::VersionStamp;

/// A tag helper discovered for a project.
///
/// Equality is structural; two resolutions producing equal lists are treated as "no change".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagHelperDescriptor {
    pub name: String,
    pub assembly_name: String,
    pub type_name: String,
    #[serde(default)]
    pub tag_names: Vec<String>,
}

impl TagHelperDescriptor {
    pub fn new(
        name: impl Into<String>,
        assembly_name: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            assembly_name: assembly_name.into(),
            type_name: type_name.into(),
            tag_names: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tag_name(mut self, tag: impl Into<String>) -> Self {
        self.tag_names.push(tag.into());
        self
    }
}

/// Derived results and the state version they were computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedState {
    pub tag_helpers: Arc<[TagHelperDescriptor]>,
    pub version: VersionStamp,
}

impl ComputedState {
    pub fn new(tag_helpers: Arc<[TagHelperDescriptor]>, version: VersionStamp) -> Self {
        Self {
            tag_helpers,
            version,
        }
    }

    /// Same results, recorded as valid for `version`.
    #[must_use]
    pub fn advanced_to(&self, version: VersionStamp) -> Self {
        Self {
            tag_helpers: Arc::clone(&self.tag_helpers),
            version,
        }
    }
}
