//! Tests for configuration validation

use std::collections::HashMap;

use workcell_scheduler::config::{SchedulerConfig, UnresolvedConsumablePolicy};

#[test]
fn test_scheduler_config_validation() {
    assert!(SchedulerConfig::default().validate().is_ok());
}

#[test]
fn test_scheduler_config_invalid_batch_size() {
    let invalid = SchedulerConfig {
        recovery_batch_size: 0,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_task_name() {
    let invalid = SchedulerConfig {
        execution_task_name: "  ".to_string(),
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_lease() {
    let mut invalid = SchedulerConfig::default();
    invalid.reservation.timeout_secs = Some(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_expiry_windows() {
    let mut invalid = SchedulerConfig::default();
    invalid.consumables.expiry_critical_days = 30;
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "recovery_batch_size": 50,
        "reservation": { "timeout_secs": 900 },
        "consumables": { "unresolved_policy": "block" }
    }"#;

    let config = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(config.recovery_batch_size, 50);
    assert_eq!(config.execution_task_name, "execute_protocol_run");
    assert_eq!(config.reservation.timeout_secs, Some(900));
    assert_eq!(config.reservation.sweep_interval_secs, 30);
    assert_eq!(config.consumables.unresolved_policy, UnresolvedConsumablePolicy::Block);
    assert!(config.consumables.auto_assign);
}

#[test]
fn test_config_from_json_rejects_invalid_values() {
    assert!(SchedulerConfig::from_json_str(r#"{ "recovery_batch_size": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_config_from_lookup() {
    let vars: HashMap<&str, &str> = [
        ("WORKCELL_EXECUTION_TASK", "run_protocol"),
        ("WORKCELL_SWEEP_INTERVAL_SECS", "5"),
        ("WORKCELL_AUTO_ASSIGN", "false"),
    ]
    .into_iter()
    .collect();

    let config =
        SchedulerConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).unwrap();
    assert_eq!(config.execution_task_name, "run_protocol");
    assert_eq!(config.reservation.sweep_interval_secs, 5);
    assert!(!config.consumables.auto_assign);
}

#[test]
fn test_config_from_lookup_reports_bad_values() {
    let err = SchedulerConfig::from_lookup(|key| {
        (key == "WORKCELL_RECOVERY_BATCH_SIZE").then(|| "many".to_string())
    })
    .unwrap_err();
    assert!(err.contains("WORKCELL_RECOVERY_BATCH_SIZE"));
}

#[test]
fn test_policy_parsing() {
    assert_eq!(
        "Proceed".parse::<UnresolvedConsumablePolicy>(),
        Ok(UnresolvedConsumablePolicy::Proceed)
    );
    assert!("maybe".parse::<UnresolvedConsumablePolicy>().is_err());
}
