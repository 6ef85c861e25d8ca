//! Tests for audit sink

use uuid::Uuid;
use workcell_scheduler::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let run_id = Uuid::new_v4();

    let event = build_audit_event(
        run_id,
        Some("asset:plate_1"),
        AuditAction::Reserve,
        Some("granted".to_string()),
    );
    sink.record(event);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].run_id, run_id);
    assert_eq!(events[0].lock_key.as_deref(), Some("asset:plate_1"));
    assert_eq!(events[0].action, AuditAction::Reserve);
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    let runs: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

    for run in &runs {
        sink.record(build_audit_event(*run, None, AuditAction::Schedule, None));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].run_id, runs[1]); // First one popped
    assert_eq!(events[1].run_id, runs[2]);
}

#[test]
fn test_clones_share_the_buffer() {
    let sink = InMemoryAuditSink::new(4);
    let mut writer = sink.clone();
    writer.record(build_audit_event(Uuid::nil(), None, AuditAction::Cancel, None));
    writer.record(build_audit_event(Uuid::nil(), None, AuditAction::Release, None));

    assert_eq!(sink.events().len(), 2);
    assert_eq!(sink.events_for(AuditAction::Cancel).len(), 1);
}

#[test]
fn test_event_serialization() {
    let event = build_audit_event(Uuid::nil(), Some("deck:deck_1"), AuditAction::Expire, None);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["action"], "expire");
    assert_eq!(json["lock_key"], "deck:deck_1");
}
