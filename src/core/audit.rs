//! Audit trail of reservation and scheduling decisions.
//!
//! Sinks receive one event per grant, conflict, release, expiry and run
//! lifecycle transition. The in-memory sink keeps a bounded ring buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of decision recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A lock key was granted to a run.
    Reserve,
    /// A reservation attempt hit another run's claim.
    Conflict,
    /// A lock key was released.
    Release,
    /// A lease ran out.
    Expire,
    /// A run was admitted.
    Schedule,
    /// A run was cancelled.
    Cancel,
    /// A run finished and let go of its assets.
    Complete,
    /// A stale run was failed at startup.
    Recover,
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: Uuid,
    /// Related run.
    pub run_id: Uuid,
    /// Lock key the event concerns, if any.
    pub lock_key: Option<String>,
    /// Action taken.
    pub action: AuditAction,
    /// Event time.
    pub created_at: DateTime<Utc>,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Shared handle to a sink, as held by the manager and the scheduler.
pub type SharedAuditSink = Arc<Mutex<Box<dyn AuditSink>>>;

/// Wrap a sink for sharing.
pub fn shared(sink: impl AuditSink + 'static) -> SharedAuditSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// In-memory audit sink for testing and dev. Clones share the same buffer.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events of one action.
    #[must_use]
    pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    run_id: Uuid,
    lock_key: Option<&str>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4(),
        run_id,
        lock_key: lock_key.map(str::to_owned),
        action,
        created_at: Utc::now(),
        detail,
    }
}

/// Record on an optional sink.
pub(crate) fn record(
    sink: Option<&SharedAuditSink>,
    run_id: Uuid,
    lock_key: Option<&str>,
    action: AuditAction,
    detail: Option<String>,
) {
    if let Some(sink) = sink {
        sink.lock()
            .record(build_audit_event(run_id, lock_key, action, detail));
    }
}
