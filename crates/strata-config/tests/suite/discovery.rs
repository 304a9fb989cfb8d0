use std::ffi::OsString;

use strata_config::{
    discover_config_path, load_for_workspace, with_config_env_lock, StrataConfig,
    STRATA_CONFIG_ENV_VAR,
};
use tempfile::tempdir;

struct EnvVarGuard {
    key: &'static str,
    prev: Option<OsString>,
}

impl EnvVarGuard {
    fn set(key: &'static str, value: impl AsRef<std::ffi::OsStr>) -> Self {
        let prev = std::env::var_os(key);
        std::env::set_var(key, value);
        Self { key, prev }
    }

    fn unset(key: &'static str) -> Self {
        let prev = std::env::var_os(key);
        std::env::remove_var(key);
        Self { key, prev }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => std::env::set_var(self.key, v),
            None => std::env::remove_var(self.key),
        }
    }
}

#[test]
fn discovers_strata_toml_before_dotfile() {
    with_config_env_lock(|| {
        let _env = EnvVarGuard::unset(STRATA_CONFIG_ENV_VAR);

        let dir = tempdir().unwrap();
        let primary = dir.path().join("strata.toml");
        std::fs::write(&primary, "[generator]\ndelay_ms = 1\n").unwrap();
        std::fs::write(dir.path().join(".strata.toml"), "").unwrap();

        let discovered = discover_config_path(dir.path()).expect("strata.toml is present");
        assert_eq!(discovered, primary.canonicalize().unwrap_or(primary));
    });
}

#[test]
fn falls_back_to_dotfile() {
    with_config_env_lock(|| {
        let _env = EnvVarGuard::unset(STRATA_CONFIG_ENV_VAR);

        let dir = tempdir().unwrap();
        let dotfile = dir.path().join(".strata.toml");
        std::fs::write(&dotfile, "").unwrap();

        let discovered = discover_config_path(dir.path()).expect(".strata.toml is present");
        assert_eq!(discovered, dotfile.canonicalize().unwrap_or(dotfile));
    });
}

#[test]
fn env_var_overrides_and_resolves_relative_to_root() {
    with_config_env_lock(|| {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("strata.toml"), "").unwrap();
        let custom = dir.path().join("custom.toml");
        std::fs::write(&custom, "[worker_queue]\ndelay_ms = 5\n").unwrap();

        let _env = EnvVarGuard::set(STRATA_CONFIG_ENV_VAR, "custom.toml");
        let (config, path, diagnostics) = load_for_workspace(dir.path()).unwrap();
        assert_eq!(path, Some(custom.canonicalize().unwrap_or(custom)));
        assert_eq!(config.worker_queue.delay_ms, 5);
        assert!(diagnostics.is_empty());
    });
}

#[test]
fn missing_config_yields_defaults() {
    with_config_env_lock(|| {
        let _env = EnvVarGuard::unset(STRATA_CONFIG_ENV_VAR);

        let dir = tempdir().unwrap();
        let (config, path, diagnostics) = load_for_workspace(dir.path()).unwrap();
        assert_eq!(path, None);
        assert_eq!(config, StrataConfig::default());
        assert!(diagnostics.is_empty());
    });
}

#[test]
fn unreadable_config_reports_io_error() {
    let dir = tempdir().unwrap();
    let err = StrataConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"), "{err}");
}
