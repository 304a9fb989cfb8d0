//! Configuration and logging setup for strata services.

mod diagnostics;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use diagnostics::{ConfigDiagnostics, ConfigWarning};
pub use logging::{init_tracing, LoggingConfig};

/// Top-level `strata.toml` configuration.
///
/// ```toml
/// [logging]
/// level = "info"
///
/// [scheduler]
/// background_threads = 2
///
/// [worker_queue]
/// delay_ms = 200
///
/// [generator]
/// delay_ms = 2000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Debounce window for background tag helper computation.
    #[serde(default)]
    pub worker_queue: WorkerQueueConfig,

    /// Debounce window for document output generation.
    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "SchedulerSettings::default_compute_threads")]
    pub compute_threads: usize,
    #[serde(default = "SchedulerSettings::default_background_threads")]
    pub background_threads: usize,
    #[serde(default = "SchedulerSettings::default_io_threads")]
    pub io_threads: usize,
}

impl SchedulerSettings {
    fn default_compute_threads() -> usize {
        strata_scheduler::SchedulerConfig::default().compute_threads
    }

    fn default_background_threads() -> usize {
        strata_scheduler::SchedulerConfig::default().background_threads
    }

    fn default_io_threads() -> usize {
        strata_scheduler::SchedulerConfig::default().io_threads
    }

    pub fn to_scheduler_config(&self) -> strata_scheduler::SchedulerConfig {
        strata_scheduler::SchedulerConfig {
            compute_threads: self.compute_threads.max(1),
            background_threads: self.background_threads.max(1),
            io_threads: self.io_threads.max(1),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            compute_threads: Self::default_compute_threads(),
            background_threads: Self::default_background_threads(),
            io_threads: Self::default_io_threads(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerQueueConfig {
    #[serde(default = "WorkerQueueConfig::default_delay_ms")]
    pub delay_ms: u64,
}

impl WorkerQueueConfig {
    fn default_delay_ms() -> u64 {
        200
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for WorkerQueueConfig {
    fn default() -> Self {
        Self {
            delay_ms: Self::default_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "GeneratorConfig::default_delay_ms")]
    pub delay_ms: u64,
}

impl GeneratorConfig {
    fn default_delay_ms() -> u64 {
        2_000
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            delay_ms: Self::default_delay_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // Keep the message only; the default `Display` embeds a snippet of the input.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl StrataConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let (config, _diagnostics) = Self::load_from_path_with_diagnostics(path)?;
        Ok(config)
    }

    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str_with_diagnostics(&text)
    }

    /// Parse TOML, collecting unknown keys and repairing invalid values.
    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (mut config, unknown_keys) =
            diagnostics::deserialize_toml_with_unknown_keys::<StrataConfig>(text)?;
        let warnings = config.repair();
        for key in &unknown_keys {
            tracing::debug!(target: "strata.config", key = %key, "ignoring unknown config key");
        }
        Ok((
            config,
            ConfigDiagnostics {
                unknown_keys,
                warnings,
            },
        ))
    }

    fn repair(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let threads = [
            ("scheduler.compute_threads", &mut self.scheduler.compute_threads),
            ("scheduler.background_threads", &mut self.scheduler.background_threads),
            ("scheduler.io_threads", &mut self.scheduler.io_threads),
        ];
        for (toml_path, value) in threads {
            if *value == 0 {
                *value = 1;
                warnings.push(ConfigWarning::InvalidValue {
                    toml_path: toml_path.to_owned(),
                    message: "must be at least 1; using 1".to_owned(),
                });
            }
        }

        if !self.logging.level_is_valid() {
            let normalized = "info".to_owned();
            warnings.push(ConfigWarning::LoggingLevelInvalid {
                value: std::mem::replace(&mut self.logging.level, normalized.clone()),
                normalized,
            });
        }

        warnings
    }
}

pub const STRATA_CONFIG_ENV_VAR: &str = "STRATA_CONFIG_PATH";

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

fn config_env_lock() -> &'static ReentrantMutex<()> {
    CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

/// Run `f` while holding the config environment lock.
///
/// Tests that set [`STRATA_CONFIG_ENV_VAR`] wrap the mutation and the discovery call in this so
/// concurrent discovery never observes a half-applied override.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = config_env_lock().lock();
    f()
}

/// Find the config file for a workspace root.
///
/// Search order:
/// 1) `STRATA_CONFIG_PATH` (absolute or relative to `workspace_root`)
/// 2) `strata.toml`
/// 3) `.strata.toml`
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    let _guard = config_env_lock().lock();
    if let Some(value) = std::env::var_os(STRATA_CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(value);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            workspace_root.join(candidate)
        };
        return Some(path.canonicalize().unwrap_or(path));
    }

    ["strata.toml", ".strata.toml"]
        .into_iter()
        .map(|name| workspace_root.join(name))
        .find(|path| path.is_file())
        .map(|path| path.canonicalize().unwrap_or(path))
}

/// Load the config for a workspace root; [`StrataConfig::default`] when none exists.
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(StrataConfig, Option<PathBuf>, ConfigDiagnostics), ConfigError> {
    let Some(path) = discover_config_path(workspace_root) else {
        return Ok((StrataConfig::default(), None, ConfigDiagnostics::default()));
    };

    let (config, diagnostics) = StrataConfig::load_from_path_with_diagnostics(&path)?;
    Ok((config, Some(path), diagnostics))
}
