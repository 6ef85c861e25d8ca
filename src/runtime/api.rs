//! API-facing request/response models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::{AssetReservationManager, ProtocolScheduler, ScheduleSnapshot};

/// Schedule submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    /// Run to admit.
    pub run_id: Uuid,
    /// Run parameters; UUID strings bind requirements by name.
    #[serde(default)]
    pub params: Value,
    /// Optional state handed to the executor.
    #[serde(default)]
    pub initial_state: Option<Value>,
}

/// Schedule outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleResponse {
    /// Run identifier.
    pub run_id: Uuid,
    /// Whether the run was admitted.
    pub scheduled: bool,
    /// Machine-readable error kind, if scheduling failed.
    pub error_kind: Option<String>,
    /// Error message, if scheduling failed.
    pub error: Option<String>,
}

/// Listing of active schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSchedulesResponse {
    /// Number of active schedules.
    pub count: usize,
    /// Schedules, oldest first.
    pub schedules: Vec<ScheduleSnapshot>,
}

/// Administrative release of lock keys on behalf of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceReleaseRequest {
    /// Run whose claims are released.
    pub run_id: Uuid,
    /// Keys to release; empty releases everything the run holds.
    #[serde(default)]
    pub lock_keys: Vec<String>,
}

/// Result of a force release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceReleaseResponse {
    /// Run whose claims were released.
    pub run_id: Uuid,
    /// Reservation rows marked released.
    pub released: usize,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Active schedules in this process.
    pub active_schedules: usize,
    /// Lock keys claimed in this process.
    pub claimed_lock_keys: usize,
}

/// Admit a run and fold the outcome into a response.
pub async fn submit_schedule(scheduler: &ProtocolScheduler, req: ScheduleRequest) -> ScheduleResponse {
    match scheduler
        .schedule(req.run_id, &req.params, req.initial_state.as_ref())
        .await
    {
        Ok(scheduled) => ScheduleResponse {
            run_id: req.run_id,
            scheduled,
            error_kind: None,
            error: None,
        },
        Err(err) => ScheduleResponse {
            run_id: req.run_id,
            scheduled: false,
            error_kind: Some(err.kind().to_owned()),
            error: Some(err.to_string()),
        },
    }
}

/// List active schedules.
pub fn list_schedules(scheduler: &ProtocolScheduler) -> ActiveSchedulesResponse {
    let schedules = scheduler.list_active_schedules();
    ActiveSchedulesResponse {
        count: schedules.len(),
        schedules,
    }
}

/// Release lock keys regardless of any active schedule.
pub async fn force_release(
    manager: &AssetReservationManager,
    req: ForceReleaseRequest,
) -> Result<ForceReleaseResponse, String> {
    let released = if req.lock_keys.is_empty() {
        manager.release_all_for_run(req.run_id).await
    } else {
        manager.release(&req.lock_keys, req.run_id, None).await
    }
    .map_err(|e| e.to_string())?;
    Ok(ForceReleaseResponse {
        run_id: req.run_id,
        released,
    })
}

/// Return a health payload.
pub fn health(scheduler: &ProtocolScheduler) -> Health {
    Health {
        ok: true,
        active_schedules: scheduler.list_active_schedules().len(),
        claimed_lock_keys: scheduler.reservations().cache_snapshot().len(),
    }
}
