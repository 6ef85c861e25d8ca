//! Tests for error types

use uuid::Uuid;
use workcell_scheduler::core::{AppResult, SchedulerError, StoreError};

#[test]
fn test_asset_acquisition_error() {
    let holder = Uuid::nil();
    let err = SchedulerError::AssetAcquisition {
        lock_key: "deck:deck_1".to_string(),
        holders: vec![holder],
    };
    assert_eq!(
        format!("{err}"),
        format!("asset deck:deck_1 is already reserved by run(s) {holder}")
    );
    assert_eq!(err.kind(), "asset_acquisition");
    assert!(err.is_known());
}

#[test]
fn test_unresolved_consumables_error() {
    let err = SchedulerError::UnresolvedConsumables {
        names: vec!["source".to_string(), "tips".to_string()],
    };
    assert_eq!(format!("{err}"), "unresolved consumables: source, tips");
}

#[test]
fn test_store_error_is_transparent() {
    let err: SchedulerError = StoreError::Backend("connection failed".to_string()).into();
    assert_eq!(format!("{err}"), "backend error: connection failed");
    assert_eq!(err.kind(), "store");
    assert!(!err.is_known());
}

#[test]
fn test_conflict_error() {
    let err = StoreError::Conflict {
        lock_key: "asset:tip_1".to_string(),
        holder: Uuid::nil(),
    };
    assert_eq!(
        format!("{err}"),
        format!("lock key asset:tip_1 is held by run {}", Uuid::nil())
    );
}

#[test]
fn test_invalid_config_error() {
    let err = SchedulerError::InvalidConfig("bad".to_string());
    assert_eq!(format!("{err}"), "invalid config: bad");
    assert!(!err.is_known());
}

#[test]
fn test_app_result_carries_scheduler_errors() {
    fn load() -> AppResult<()> {
        Err(SchedulerError::Orchestrator("broker gone".to_string()))?;
        Ok(())
    }

    let err = load().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SchedulerError>(),
        Some(SchedulerError::Orchestrator(_))
    ));
}
