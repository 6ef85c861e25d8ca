//! In-memory record of one run's active schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::model::RuntimeAssetRequirement;
use crate::util::{now_utc, Priority};

/// Where an admitted run stands with the execution queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    /// Assets reserved, execution not yet handed off.
    Scheduling,
    /// Accepted by the task queue.
    Queued,
    /// Broker unreachable; the run executes without the queue.
    RunningDirect,
}

/// Active schedule of one run.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// Entry identifier, stamped on the run's reservations.
    pub id: Uuid,
    /// Run being scheduled.
    pub protocol_run_id: Uuid,
    /// Protocol name, for display.
    pub protocol_name: String,
    /// Requirements with their reservation ids.
    pub required_assets: Vec<RuntimeAssetRequirement>,
    /// Scheduling priority.
    pub priority: Priority,
    /// Admission time.
    pub scheduled_at: DateTime<Utc>,
    /// Queue hand-off state.
    pub status: ScheduleStatus,
    /// Task id returned by the queue.
    pub task_id: Option<String>,
}

impl ScheduleEntry {
    /// New entry in `Scheduling` state.
    #[must_use]
    pub fn new(
        id: Uuid,
        protocol_run_id: Uuid,
        protocol_name: String,
        required_assets: Vec<RuntimeAssetRequirement>,
    ) -> Self {
        let priority = required_assets
            .iter()
            .map(|r| r.priority)
            .max()
            .unwrap_or_default();
        Self {
            id,
            protocol_run_id,
            protocol_name,
            required_assets,
            priority,
            scheduled_at: now_utc(),
            status: ScheduleStatus::Scheduling,
            task_id: None,
        }
    }

    /// Lock keys held for the entry, in requirement order without repeats.
    #[must_use]
    pub fn lock_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::with_capacity(self.required_assets.len());
        for key in self.required_assets.iter().map(RuntimeAssetRequirement::lock_key) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Serializable view.
    #[must_use]
    pub fn snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            protocol_run_id: self.protocol_run_id,
            schedule_entry_id: self.id,
            protocol_name: self.protocol_name.clone(),
            status: self.status,
            priority: self.priority,
            scheduled_at: self.scheduled_at,
            task_id: self.task_id.clone(),
            lock_keys: self.lock_keys(),
        }
    }
}

/// Status view returned to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    /// Run being scheduled.
    pub protocol_run_id: Uuid,
    /// Entry identifier.
    pub schedule_entry_id: Uuid,
    /// Protocol name.
    pub protocol_name: String,
    /// Queue hand-off state.
    pub status: ScheduleStatus,
    /// Scheduling priority.
    pub priority: Priority,
    /// Admission time.
    pub scheduled_at: DateTime<Utc>,
    /// Task id returned by the queue.
    pub task_id: Option<String>,
    /// Lock keys held.
    pub lock_keys: Vec<String>,
}
