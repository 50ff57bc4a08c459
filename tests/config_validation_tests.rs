//! Config Validation Tests
//!
//! Exercises the config layer independently from the queue: TOML parsing,
//! range validation, partial updates and write-back to the source file.

use paraclate_sync::config::{
    AttunementUpdate, ConfigError, ParaclateConfig, SharedConfig, SyncConfig, SyncConfigUpdate, TuningFrequency,
};

fn validation_errors(result: Result<ParaclateConfig, ConfigError>) -> Vec<String> {
    match result {
        Err(ConfigError::Validation(errors)) => errors,
        other => panic!("expected validation error, got {other:?}"),
    }
}

// ============================================================================
// File validation
// ============================================================================

#[test]
fn empty_file_uses_defaults() {
    let config = ParaclateConfig::from_toml_str("").unwrap();
    assert_eq!(config, ParaclateConfig::default());
    assert_eq!(config.sync.report_interval_minutes, 15);
    assert_eq!(config.queue.max_retries, 5);
    assert_eq!(config.queue.emergency_max_retries, 10);
}

#[test]
fn every_problem_is_reported() {
    let toml_str = r#"
[sync]
tid = ""
report_interval_minutes = 0
retention_days = 0
utc_offset_minutes = 2000

[sync.attunement]
tuning_aggressiveness = 150

[queue]
max_retries = 0
base_delay_secs = 10
max_delay_secs = 5

[server]
addr = "not-an-address"
"#;
    let errors = validation_errors(ParaclateConfig::from_toml_str(toml_str));
    for needle in [
        "sync.tid",
        "report_interval_minutes",
        "retention_days",
        "utc_offset_minutes",
        "tuning_aggressiveness",
        "queue.max_retries",
        "queue.max_delay_secs",
        "server.addr",
    ] {
        assert!(errors.iter().any(|e| e.contains(needle)), "missing {needle} in {errors:?}");
    }
}

#[test]
fn endpoint_must_be_http() {
    let toml_str = r#"
[sync]
endpoint = "ftp://reports.example.com"
"#;
    let errors = validation_errors(ParaclateConfig::from_toml_str(toml_str));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("http://"));
}

#[test]
fn emergency_budget_cannot_be_smaller() {
    let toml_str = r#"
[queue]
max_retries = 8
emergency_max_retries = 4
"#;
    let errors = validation_errors(ParaclateConfig::from_toml_str(toml_str));
    assert!(errors[0].contains("emergency_max_retries"));
}

#[test]
fn malformed_slot_is_a_parse_error() {
    let toml_str = r#"
[sync]
grand_summary_times = ["09:00", "24:30"]
"#;
    assert!(matches!(ParaclateConfig::from_toml_str(toml_str), Err(ConfigError::Parse(_, _))));
}

#[test]
fn unknown_frequency_is_a_parse_error() {
    let toml_str = r#"
[sync.attunement]
tuning_frequency = "hourly"
"#;
    assert!(matches!(ParaclateConfig::from_toml_str(toml_str), Err(ConfigError::Parse(_, _))));
}

#[test]
fn load_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = ParaclateConfig::load_from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::Io(_, _))));
}

#[test]
fn parse_error_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("paraclate.toml");
    std::fs::write(&path, "[sync\ntid = ").unwrap();

    let err = ParaclateConfig::load_from_file(&path).unwrap_err();
    assert!(err.to_string().contains("paraclate.toml"), "{err}");
}

// ============================================================================
// Live updates
// ============================================================================

#[test]
fn aggressiveness_150_leaves_config_unchanged() {
    let shared = SharedConfig::new(SyncConfig::default());
    let before = shared.get();

    let update = SyncConfigUpdate {
        report_interval_minutes: Some(30),
        attunement: Some(AttunementUpdate {
            tuning_aggressiveness: Some(150),
            ..AttunementUpdate::default()
        }),
        ..SyncConfigUpdate::default()
    };
    let err = shared.apply_update(&update).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref e) if e.len() == 1));
    assert_eq!(*shared.get(), *before);
    assert_eq!(shared.get().report_interval_minutes, 15);
}

#[test]
fn negative_values_are_validation_errors() {
    let shared = SharedConfig::new(SyncConfig::default());
    let update = SyncConfigUpdate {
        report_interval_minutes: Some(-5),
        retention_days: Some(-1),
        ..SyncConfigUpdate::default()
    };
    match shared.apply_update(&update) {
        Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2, "{errors:?}"),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn update_from_json_body() {
    let shared = SharedConfig::new(SyncConfig::default());
    let update: SyncConfigUpdate = serde_json::from_value(serde_json::json!({
        "grand_summary_times": ["18:00", "06:30"],
        "attunement": { "auto_tuning_enabled": true, "tuning_frequency": "monthly" }
    }))
    .unwrap();

    let updated = shared.apply_update(&update).unwrap();
    assert_eq!(updated.grand_summary_times.len(), 2);
    assert!(updated.attunement.auto_tuning_enabled);
    assert_eq!(updated.attunement.tuning_frequency, TuningFrequency::Monthly);
    // Untouched fields keep their values
    assert_eq!(updated.tid, "unassigned");
}

#[test]
fn accepted_update_rewrites_source_file_and_keeps_other_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("paraclate.toml");
    std::fs::write(
        &path,
        r#"
[sync]
tid = "tenant-a"
fid = "site-1"

[queue]
max_retries = 7
emergency_max_retries = 12
"#,
    )
    .unwrap();

    let document = ParaclateConfig::load_from_file(&path).unwrap();
    let shared = SharedConfig::with_file(document, path.clone());
    shared
        .apply_update(&SyncConfigUpdate {
            utc_offset_minutes: Some(-300),
            ..SyncConfigUpdate::default()
        })
        .unwrap();

    let reloaded = ParaclateConfig::load_from_file(&path).unwrap();
    assert_eq!(reloaded.sync.utc_offset_minutes, -300);
    assert_eq!(reloaded.sync.tid, "tenant-a");
    assert_eq!(reloaded.queue.max_retries, 7);
    assert_eq!(reloaded.queue.emergency_max_retries, 12);
}

#[test]
fn rejected_update_does_not_touch_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("paraclate.toml");
    let shared = SharedConfig::with_file(ParaclateConfig::default(), path.clone());

    let result = shared.apply_update(&SyncConfigUpdate {
        endpoint: Some(String::new()),
        ..SyncConfigUpdate::default()
    });
    assert!(result.is_err());
    assert!(!path.exists());
}
