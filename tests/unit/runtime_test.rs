//! Tests for runtime API models

use serde_json::json;
use uuid::Uuid;
use workcell_scheduler::builders::ProtocolSchedulerBuilder;
use workcell_scheduler::config::SchedulerConfig;
use workcell_scheduler::runtime::{health, ForceReleaseRequest, ScheduleRequest};

#[test]
fn test_schedule_request_defaults() {
    let run_id = Uuid::new_v4();
    let req: ScheduleRequest = serde_json::from_value(json!({ "run_id": run_id })).unwrap();
    assert_eq!(req.run_id, run_id);
    assert!(req.params.is_null());
    assert!(req.initial_state.is_none());
}

#[test]
fn test_force_release_request_defaults() {
    let req: ForceReleaseRequest =
        serde_json::from_value(json!({ "run_id": Uuid::nil() })).unwrap();
    assert!(req.lock_keys.is_empty());
}

#[test]
fn test_health_on_idle_scheduler() {
    let scheduler = ProtocolSchedulerBuilder::in_memory(SchedulerConfig::default())
        .build()
        .unwrap();
    let status = health(&scheduler);
    assert!(status.ok);
    assert_eq!(status.active_schedules, 0);
    assert_eq!(status.claimed_lock_keys, 0);
}
