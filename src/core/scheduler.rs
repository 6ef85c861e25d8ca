//! Protocol run admission: analyze → reserve → enqueue → track → release.
//!
//! The scheduler owns the active-schedule map. Reservations live in the
//! [`AssetReservationManager`]; run state lives behind [`RunRepository`]. Both
//! in-memory maps are process-local, which is why [`ProtocolScheduler::recover_stale_runs`]
//! fails anything left half-scheduled by a previous process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{SchedulerConfig, UnresolvedConsumablePolicy};
use crate::core::audit::{self, AuditAction, SharedAuditSink};
use crate::core::consumables::{is_consumable, ConsumableAssignmentService};
use crate::core::error::SchedulerError;
use crate::core::model::{
    AssetKind, AssetRequirement, ProtocolDefinition, RunStatus, RuntimeAssetRequirement,
};
use crate::core::reservation::AssetReservationManager;
use crate::core::schedule_entry::{ScheduleEntry, ScheduleSnapshot, ScheduleStatus};
use crate::core::store::{EnqueueOutcome, RunRepository, TaskQueue};
use crate::util::now_utc;

/// Error recorded on runs failed by [`ProtocolScheduler::recover_stale_runs`].
pub const STALE_RUN_MESSAGE: &str = "Run was interrupted by a server restart: in-memory \
    reservation and schedule state was lost. Resubmit the run to schedule it again.";

const DECK_FQN: &str = "pylabrobot.resources.Deck";

/// Outcome of the startup recovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Runs marked FAILED.
    pub recovered: Vec<Uuid>,
    /// Runs that could not be updated.
    pub errors: Vec<Uuid>,
    /// Pages fetched from the run store.
    pub pages: usize,
    /// Reservation rows released on behalf of recovered runs.
    pub released_reservations: usize,
}

/// Admits protocol runs and tracks their asset claims.
pub struct ProtocolScheduler {
    runs: Arc<dyn RunRepository>,
    reservations: Arc<AssetReservationManager>,
    consumables: ConsumableAssignmentService,
    queue: Arc<dyn TaskQueue>,
    config: SchedulerConfig,
    active: Mutex<HashMap<Uuid, ScheduleEntry>>,
    /// Runs between admission check and entry insertion.
    in_flight: Mutex<HashSet<Uuid>>,
    audit: Option<SharedAuditSink>,
}

/// Holds a run's admission slot; dropping it frees the slot.
struct AdmissionSlot<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    run_id: Uuid,
}

impl Drop for AdmissionSlot<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.run_id);
    }
}

impl ProtocolScheduler {
    /// Compose a scheduler from its collaborators.
    pub fn new(
        runs: Arc<dyn RunRepository>,
        reservations: Arc<AssetReservationManager>,
        consumables: ConsumableAssignmentService,
        queue: Arc<dyn TaskQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            runs,
            reservations,
            consumables,
            queue,
            config,
            active: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            audit: None,
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// The reservation manager, for administrative release.
    #[must_use]
    pub const fn reservations(&self) -> &Arc<AssetReservationManager> {
        &self.reservations
    }

    /// The consumable matcher.
    #[must_use]
    pub const fn consumables(&self) -> &ConsumableAssignmentService {
        &self.consumables
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Build the runtime requirement list for a protocol.
    ///
    /// A `params` entry named after a requirement and holding a resource UUID
    /// binds that requirement. Remaining consumables get best-effort
    /// suggestions; a failed lookup never fails the analysis.
    pub async fn analyze_requirements(
        &self,
        definition: &ProtocolDefinition,
        params: &Value,
        workcell_id: Option<Uuid>,
    ) -> Vec<RuntimeAssetRequirement> {
        let mut requirements: Vec<RuntimeAssetRequirement> = definition
            .assets
            .iter()
            .cloned()
            .map(|asset| RuntimeAssetRequirement::new(asset, AssetKind::Asset))
            .collect();

        if definition.preconfigure_deck {
            let name = definition
                .deck_param_name
                .clone()
                .unwrap_or_else(|| "deck".into());
            requirements.push(RuntimeAssetRequirement::new(
                AssetRequirement::new(name, DECK_FQN),
                AssetKind::Deck,
            ));
        }

        for requirement in &mut requirements {
            requirement.suggested_asset_id = bound_asset(params, requirement.name());
        }

        if self.config.consumables.auto_assign {
            self.suggest_consumables(&mut requirements, workcell_id).await;
        }
        debug!(
            protocol = %definition.name,
            requirements = requirements.len(),
            "analyzed asset requirements"
        );
        requirements
    }

    /// Admit a run: reserve its assets and hand it to the execution queue.
    ///
    /// Returns `Ok(false)` when the run or its definition does not exist, when
    /// the run is already scheduled, or when the queue rejects the task.
    /// Asset conflicts fail the run and return [`SchedulerError::AssetAcquisition`].
    pub async fn schedule(
        &self,
        run_id: Uuid,
        params: &Value,
        initial_state: Option<&Value>,
    ) -> Result<bool, SchedulerError> {
        match self.try_schedule(run_id, params, initial_state).await {
            Ok(scheduled) => Ok(scheduled),
            Err(err) if err.is_known() => Err(err),
            Err(err) => {
                error!(run_id = %run_id, error = %err, "unexpected failure while scheduling");
                Err(SchedulerError::Orchestrator(format!(
                    "failed to schedule run {run_id}: {err}"
                )))
            }
        }
    }

    /// Release a scheduled run's assets and forget it.
    ///
    /// Returns `false` if the run has no active schedule or the release failed.
    pub async fn cancel_scheduled_run(&self, run_id: Uuid) -> bool {
        let Some(lock_keys) = self.active_lock_keys(run_id) else {
            debug!(run_id = %run_id, "cancel: run has no active schedule");
            return false;
        };
        match self.reservations.release(&lock_keys, run_id, None).await {
            Ok(released) => {
                self.active.lock().remove(&run_id);
                info!(run_id = %run_id, released, "cancelled scheduled run");
                audit::record(self.audit.as_ref(), run_id, None, AuditAction::Cancel, None);
                true
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "failed to release assets on cancel");
                false
            }
        }
    }

    /// Release a finished run's assets and forget it.
    ///
    /// Also force-releases any lock key the reservation cache still attributes
    /// to the run once it has no active schedule.
    pub async fn complete_scheduled_run(&self, run_id: Uuid) -> bool {
        let found = match self.active_lock_keys(run_id) {
            Some(lock_keys) => match self.reservations.release(&lock_keys, run_id, None).await {
                Ok(released) => {
                    self.active.lock().remove(&run_id);
                    info!(run_id = %run_id, released, "completed scheduled run");
                    audit::record(self.audit.as_ref(), run_id, None, AuditAction::Complete, None);
                    true
                }
                Err(err) => {
                    error!(run_id = %run_id, error = %err, "failed to release assets on completion");
                    return false;
                }
            },
            None => {
                debug!(run_id = %run_id, "complete: run has no active schedule");
                false
            }
        };

        let still_active = self.active.lock().contains_key(&run_id);
        let orphaned = self.reservations.claimed_keys(run_id);
        if !still_active && !orphaned.is_empty() {
            warn!(
                run_id = %run_id,
                lock_keys = ?orphaned,
                "reservation cache out of sync with active schedules, force releasing"
            );
            if let Err(err) = self.reservations.release(&orphaned, run_id, None).await {
                error!(run_id = %run_id, error = %err, "failed to force release orphaned keys");
            }
        }
        found
    }

    /// Current schedule of a run, if active.
    #[must_use]
    pub fn get_schedule_status(&self, run_id: Uuid) -> Option<ScheduleSnapshot> {
        self.active.lock().get(&run_id).map(ScheduleEntry::snapshot)
    }

    /// All active schedules, oldest first.
    #[must_use]
    pub fn list_active_schedules(&self) -> Vec<ScheduleSnapshot> {
        let mut snapshots: Vec<ScheduleSnapshot> =
            self.active.lock().values().map(ScheduleEntry::snapshot).collect();
        snapshots.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.protocol_run_id.cmp(&b.protocol_run_id))
        });
        snapshots
    }

    /// Expire overdue leases and drop the schedules that lost them.
    ///
    /// A run whose lease lapsed no longer owns its hardware, so its entry is
    /// removed, its remaining claims are released and the run is failed.
    /// Returns the affected runs, sorted.
    pub async fn expire_overdue_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, SchedulerError> {
        let expired = self.reservations.expire_overdue(now).await?;
        let mut lapsed: HashMap<Uuid, Vec<String>> = HashMap::new();
        for reservation in expired {
            lapsed
                .entry(reservation.protocol_run_id)
                .or_default()
                .push(reservation.lock_key);
        }

        let mut dropped = Vec::new();
        for (run_id, mut lock_keys) in lapsed {
            let removed = self.active.lock().remove(&run_id);
            let Some(entry) = removed else {
                continue;
            };
            if let Err(err) = self
                .reservations
                .release(&entry.lock_keys(), run_id, None)
                .await
            {
                error!(run_id = %run_id, error = %err, "failed to release claims after lease expiry");
            }
            lock_keys.sort();
            warn!(run_id = %run_id, lock_keys = ?lock_keys, "lease expired under active schedule");
            self.fail_run(run_id, &SchedulerError::LeaseExpired { lock_keys })
                .await;
            dropped.push(run_id);
        }
        dropped.sort();
        Ok(dropped)
    }

    /// Startup sweep: fail every run left QUEUED or PREPARING by a previous
    /// process and release its reservations.
    pub async fn recover_stale_runs(&self) -> Result<RecoveryReport, SchedulerError> {
        let batch_size = self.config.recovery_batch_size;
        let mut report = RecoveryReport::default();
        let mut cursor = None;

        loop {
            let page = self
                .runs
                .list_runs_by_status(&RunStatus::STALE_ON_RESTART, cursor, batch_size)
                .await?;
            report.pages += 1;
            let page_len = page.len();

            for run in page {
                cursor = Some(run.id);
                let output = json!({
                    "error": STALE_RUN_MESSAGE,
                    "details": {
                        "previous_status": run.status,
                        "recovered_at": now_utc(),
                    },
                });
                if let Err(err) = self
                    .runs
                    .update_run_status(run.id, RunStatus::Failed, Some(output))
                    .await
                {
                    error!(run_id = %run.id, error = %err, "failed to mark stale run as failed");
                    report.errors.push(run.id);
                    continue;
                }
                match self.reservations.release_all_for_run(run.id).await {
                    Ok(released) => report.released_reservations += released,
                    Err(err) => {
                        warn!(run_id = %run.id, error = %err, "failed to release stale reservations");
                    }
                }
                audit::record(self.audit.as_ref(), run.id, None, AuditAction::Recover, None);
                report.recovered.push(run.id);
            }

            if page_len < batch_size {
                break;
            }
        }

        if report.recovered.is_empty() {
            info!("no stale runs to recover");
        } else {
            warn!(
                recovered = report.recovered.len(),
                pages = report.pages,
                "failed stale runs left over from a previous process"
            );
        }
        Ok(report)
    }

    async fn try_schedule(
        &self,
        run_id: Uuid,
        params: &Value,
        initial_state: Option<&Value>,
    ) -> Result<bool, SchedulerError> {
        let Some(_slot) = self.claim_admission(run_id) else {
            warn!(run_id = %run_id, "run is already scheduled");
            return Ok(false);
        };
        let Some(run) = self.runs.get_run(run_id).await? else {
            warn!(run_id = %run_id, "cannot schedule unknown run");
            return Ok(false);
        };
        let Some(definition) = self
            .runs
            .get_protocol_definition(run.protocol_definition_id)
            .await?
        else {
            warn!(
                run_id = %run_id,
                definition_id = %run.protocol_definition_id,
                "cannot schedule run without protocol definition"
            );
            return Ok(false);
        };

        self.runs
            .update_run_status(run_id, RunStatus::Preparing, None)
            .await?;
        let mut requirements = self
            .analyze_requirements(&definition, params, run.workcell_id)
            .await;

        if self.config.consumables.unresolved_policy == UnresolvedConsumablePolicy::Block {
            let names = unresolved_consumables(&requirements);
            if !names.is_empty() {
                let err = SchedulerError::UnresolvedConsumables { names };
                self.fail_run(run_id, &err).await;
                return Err(err);
            }
        }

        let entry_id = Uuid::new_v4();
        if let Err(err) = self
            .reservations
            .reserve(&mut requirements, run_id, Some(entry_id), None)
            .await
        {
            self.fail_run(run_id, &err).await;
            return Err(err);
        }

        let entry = ScheduleEntry::new(entry_id, run_id, definition.name.clone(), requirements);
        let queued = json!({
            "scheduled_at": entry.scheduled_at,
            "asset_count": entry.required_assets.len(),
            "schedule_entry_id": entry_id,
        });
        self.active.lock().insert(run_id, entry);

        if let Err(err) = self
            .runs
            .update_run_status(run_id, RunStatus::Queued, Some(queued))
            .await
        {
            self.cancel_scheduled_run(run_id).await;
            return Err(err.into());
        }
        audit::record(
            self.audit.as_ref(),
            run_id,
            None,
            AuditAction::Schedule,
            Some(definition.name.clone()),
        );

        let args = json!({
            "protocol_run_id": run_id,
            "schedule_entry_id": entry_id,
            "params": params,
            "initial_state": initial_state,
        });
        match self
            .queue
            .send_task(&self.config.execution_task_name, args)
            .await
        {
            EnqueueOutcome::Enqueued { task_id } => {
                info!(run_id = %run_id, task_id = %task_id, "run queued for execution");
                self.set_entry_status(run_id, ScheduleStatus::Queued, Some(task_id));
                Ok(true)
            }
            EnqueueOutcome::BrokerUnavailable { reason } => {
                warn!(
                    run_id = %run_id,
                    reason = %reason,
                    "task queue unreachable, run will execute directly"
                );
                self.set_entry_status(run_id, ScheduleStatus::RunningDirect, None);
                Ok(true)
            }
            EnqueueOutcome::Rejected { reason } => {
                warn!(run_id = %run_id, reason = %reason, "task queue rejected run");
                self.cancel_scheduled_run(run_id).await;
                let err = SchedulerError::Orchestrator(format!("execution task rejected: {reason}"));
                self.fail_run(run_id, &err).await;
                Ok(false)
            }
        }
    }

    async fn suggest_consumables(
        &self,
        requirements: &mut [RuntimeAssetRequirement],
        workcell_id: Option<Uuid>,
    ) {
        let existing: HashMap<String, Uuid> = requirements
            .iter()
            .filter_map(|r| r.suggested_asset_id.map(|id| (r.name().to_owned(), id)))
            .collect();
        let unbound: Vec<AssetRequirement> = requirements
            .iter()
            .filter(|r| r.kind == AssetKind::Asset && r.suggested_asset_id.is_none())
            .map(|r| r.definition.clone())
            .collect();
        if unbound.is_empty() {
            return;
        }

        let assignments = self
            .consumables
            .auto_assign_consumables(&unbound, &existing, workcell_id)
            .await;
        for requirement in requirements
            .iter_mut()
            .filter(|r| r.kind == AssetKind::Asset && r.suggested_asset_id.is_none())
        {
            requirement.suggested_asset_id = assignments.get(requirement.name()).copied();
        }
    }

    /// Persist FAILED with `{error, details}`. Failures are logged only.
    async fn fail_run(&self, run_id: Uuid, err: &SchedulerError) {
        let details = match err {
            SchedulerError::AssetAcquisition { lock_key, holders } => json!({
                "kind": err.kind(),
                "lock_key": lock_key,
                "holders": holders,
            }),
            SchedulerError::UnresolvedConsumables { names } => json!({
                "kind": err.kind(),
                "requirements": names,
            }),
            SchedulerError::LeaseExpired { lock_keys } => json!({
                "kind": err.kind(),
                "lock_keys": lock_keys,
            }),
            _ => json!({ "kind": err.kind() }),
        };
        let output = json!({ "error": err.to_string(), "details": details });
        if let Err(store_err) = self
            .runs
            .update_run_status(run_id, RunStatus::Failed, Some(output))
            .await
        {
            error!(run_id = %run_id, error = %store_err, "failed to persist run failure");
        }
    }

    /// Reserve the run's admission slot unless it is scheduled or being
    /// scheduled. Checked and taken under one lock, before any await.
    fn claim_admission(&self, run_id: Uuid) -> Option<AdmissionSlot<'_>> {
        let active = self.active.lock();
        let mut in_flight = self.in_flight.lock();
        if active.contains_key(&run_id) || !in_flight.insert(run_id) {
            return None;
        }
        Some(AdmissionSlot {
            in_flight: &self.in_flight,
            run_id,
        })
    }

    fn active_lock_keys(&self, run_id: Uuid) -> Option<Vec<String>> {
        self.active.lock().get(&run_id).map(ScheduleEntry::lock_keys)
    }

    fn set_entry_status(&self, run_id: Uuid, status: ScheduleStatus, task_id: Option<String>) {
        if let Some(entry) = self.active.lock().get_mut(&run_id) {
            entry.status = status;
            entry.task_id = task_id;
        }
    }
}

/// A requirement bound through `params[name] = "<uuid>"`.
fn bound_asset(params: &Value, name: &str) -> Option<Uuid> {
    params
        .get(name)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn unresolved_consumables(requirements: &[RuntimeAssetRequirement]) -> Vec<String> {
    requirements
        .iter()
        .filter(|r| {
            r.kind == AssetKind::Asset
                && !r.definition.optional
                && r.suggested_asset_id.is_none()
                && is_consumable(&r.definition)
        })
        .map(|r| r.name().to_owned())
        .collect()
}
