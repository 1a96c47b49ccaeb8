//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Shared primitives and utilities for the speed monitor."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use r8_speeder_common::config::SpeederConfig;
use r8_speeder_common::LogFormat;
use tempfile::NamedTempFile;

#[test]
fn loads_first_existing_candidate() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
[limits]
alert_margin_mph = 4.5
sustained_duration_secs = 120
priority_tokens = "991,Super"
special_route_prefix = "410"

[tracker]
stale_timeout_secs = 3

[notifications]
enabled = true
alert_webhook = "https://hooks.example.invalid/alert"
alert_role = "1234"

[logging]
level = "r8_speeder_core=debug"
format = "structured-json"
file = false
"#
    )
    .expect("write config");
    file.flush().expect("flush");

    let missing = PathBuf::from("does/not/exist.toml");
    let loaded = SpeederConfig::load_with_source(&[missing, file.path().to_path_buf()]);
    assert_eq!(loaded.source.as_deref(), Some(file.path()));
    assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);

    let config = loaded.config;
    assert_eq!(config.limits.alert_margin_mph, 4.5);
    assert_eq!(config.limits.sustained_duration, Duration::from_secs(120));
    assert_eq!(config.limits.priority_tokens, vec!["991", "Super"]);
    assert_eq!(config.limits.special_route_prefix, "410");
    assert_eq!(config.tracker.stale_timeout, Duration::from_secs(3));
    assert!(config.notifications.enabled);
    assert!(config.notifications.has_webhooks());
    assert_eq!(config.notifications.alert_role.as_deref(), Some("1234"));
    assert_eq!(config.logging.format, LogFormat::StructuredJson);
    assert_eq!(config.logging.level, "r8_speeder_core=debug");
    assert!(!config.logging.file);
}

#[test]
fn missing_files_produce_defaults_and_a_warning() {
    let loaded = SpeederConfig::load_with_source(&[PathBuf::from("nowhere/speeder.toml")]);
    assert!(loaded.source.is_none());
    assert_eq!(loaded.warnings.len(), 1);
    assert_eq!(loaded.config.limits.over_margin_mph, 20.0);
}

#[test]
fn wrong_types_never_abort_loading() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "[tracker]\nconfirmation_delay_secs = \"five\"\nhysteresis_mph = 2\n[notifications]\nenabled = \"yes\"\n"
    )
    .expect("write config");
    file.flush().expect("flush");

    let loaded = SpeederConfig::load_with_source(&[file.path()]);
    assert_eq!(loaded.warnings.len(), 2, "{:?}", loaded.warnings);
    assert_eq!(
        loaded.config.tracker.confirmation_delay,
        Duration::from_secs(5)
    );
    assert_eq!(loaded.config.tracker.hysteresis_mph, 2.0);
    assert!(!loaded.config.notifications.enabled);
}
