use serde::de::DeserializeOwned;

/// Diagnostics produced while loading a strata config.
///
/// Loading is best effort: a config is returned whenever deserialization succeeds, and anything
/// questionable about it is described here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiagnostics {
    /// Keys present in the TOML that the schema does not know, as dotted paths
    /// (`scheduler.io_thread`).
    pub unknown_keys: Vec<String>,
    /// Recoverable problems; the offending value was replaced.
    pub warnings: Vec<ConfigWarning>,
}

impl ConfigDiagnostics {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unknown_keys.is_empty() && self.warnings.is_empty()
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    InvalidValue { toml_path: String, message: String },
    LoggingLevelInvalid { value: String, normalized: String },
}

pub(crate) fn deserialize_toml_with_unknown_keys<T: DeserializeOwned>(
    text: &str,
) -> Result<(T, Vec<String>), toml::de::Error> {
    let mut unknown = Vec::<String>::new();
    let deserializer = toml::de::Deserializer::new(text);
    let value = serde_ignored::deserialize(deserializer, |path| {
        unknown.push(normalize_ignored_path(path));
    })?;
    unknown.sort();
    unknown.dedup();
    Ok((value, unknown))
}

fn normalize_ignored_path(path: serde_ignored::Path) -> String {
    // `serde_ignored` renders root paths with a leading `.`.
    path.to_string().trim_start_matches('.').to_owned()
}
