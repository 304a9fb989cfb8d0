use std::time::Duration;

use strata_config::{ConfigWarning, StrataConfig};

#[test]
fn full_config_parses_without_diagnostics() {
    let text = r#"
[logging]
level = "debug"
json = true
stderr = false
file = "/tmp/strata.log"

[scheduler]
compute_threads = 3
background_threads = 2
io_threads = 1

[worker_queue]
delay_ms = 50

[generator]
delay_ms = 500
"#;

    let (config, diagnostics) = StrataConfig::load_from_str_with_diagnostics(text).unwrap();
    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
    assert!(!config.logging.stderr);
    assert_eq!(config.scheduler.compute_threads, 3);
    assert_eq!(config.worker_queue.delay(), Duration::from_millis(50));
    assert_eq!(config.generator.delay(), Duration::from_millis(500));

    let scheduler = config.scheduler.to_scheduler_config();
    assert_eq!(scheduler.compute_threads, 3);
    assert_eq!(scheduler.background_threads, 2);
}

#[test]
fn unknown_keys_are_reported_with_paths() {
    let text = r#"
telemetry = true

[scheduler]
io_thread = 4

[generator]
delay_ms = 10
batch = 3
"#;

    let (config, diagnostics) = StrataConfig::load_from_str_with_diagnostics(text).unwrap();
    assert_eq!(
        diagnostics.unknown_keys,
        vec!["generator.batch", "scheduler.io_thread", "telemetry"]
    );
    assert_eq!(config.generator.delay_ms, 10);
}

#[test]
fn zero_thread_counts_are_clamped_with_warnings() {
    let text = "[scheduler]\ncompute_threads = 0\nbackground_threads = 0\n";

    let (config, diagnostics) = StrataConfig::load_from_str_with_diagnostics(text).unwrap();
    assert_eq!(config.scheduler.compute_threads, 1);
    assert_eq!(config.scheduler.background_threads, 1);
    assert_eq!(
        diagnostics.warnings,
        vec![
            ConfigWarning::InvalidValue {
                toml_path: "scheduler.compute_threads".to_owned(),
                message: "must be at least 1; using 1".to_owned(),
            },
            ConfigWarning::InvalidValue {
                toml_path: "scheduler.background_threads".to_owned(),
                message: "must be at least 1; using 1".to_owned(),
            },
        ]
    );
}

#[test]
fn invalid_logging_level_falls_back_to_info() {
    let text = "[logging]\nlevel = \"strata=loud\"\n";

    let (config, diagnostics) = StrataConfig::load_from_str_with_diagnostics(text).unwrap();
    assert_eq!(config.logging.level, "info");
    assert_eq!(
        diagnostics.warnings,
        vec![ConfigWarning::LoggingLevelInvalid {
            value: "strata=loud".to_owned(),
            normalized: "info".to_owned(),
        }]
    );
}
