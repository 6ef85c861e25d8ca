//! Collaborator ports: run persistence, reservation persistence, the resource
//! catalog and the execution task queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::StoreError;
use crate::core::model::{AssetReservation, ProtocolDefinition, ProtocolRun, ResourceRecord, RunStatus};

/// Persistence facade for runs and protocol definitions.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Fetch a run by id.
    async fn get_run(&self, run_id: Uuid) -> Result<Option<ProtocolRun>, StoreError>;

    /// Fetch a protocol definition by id.
    async fn get_protocol_definition(
        &self,
        definition_id: Uuid,
    ) -> Result<Option<ProtocolDefinition>, StoreError>;

    /// Set a run's status and structured output.
    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<serde_json::Value>,
    ) -> Result<(), StoreError>;

    /// Page through runs whose status is in `statuses`, ordered by id, starting
    /// strictly after `after`.
    async fn list_runs_by_status(
        &self,
        statuses: &[RunStatus],
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ProtocolRun>, StoreError>;
}

/// Persistence for reservation rows.
///
/// Implementations must reject an `insert` of a held reservation whose lock key
/// already has a held reservation belonging to a different run, returning
/// [`StoreError::Conflict`]. This is the durable half of the mutual-exclusion
/// guarantee; the in-process half is the per-key mutex in the reservation
/// manager.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Insert a new reservation row.
    async fn insert(&self, reservation: &AssetReservation) -> Result<(), StoreError>;

    /// Hard-delete a reservation row. Only used to roll back a failed batch.
    async fn delete(&self, reservation_id: Uuid) -> Result<(), StoreError>;

    /// Replace a row. Fails with [`StoreError::Conflict`] if the stored
    /// `lock_value` differs from the given one.
    async fn update(&self, reservation: &AssetReservation) -> Result<(), StoreError>;

    /// Held reservations for a lock key, any owner.
    async fn find_held(&self, lock_key: &str) -> Result<Vec<AssetReservation>, StoreError>;

    /// Held reservations for a lock key owned by `run_id`.
    async fn find_held_for_run(
        &self,
        lock_key: &str,
        run_id: Uuid,
    ) -> Result<Vec<AssetReservation>, StoreError>;

    /// Every held reservation owned by `run_id`.
    async fn list_held_by_run(&self, run_id: Uuid) -> Result<Vec<AssetReservation>, StoreError>;

    /// Every held reservation.
    async fn list_held(&self) -> Result<Vec<AssetReservation>, StoreError>;

    /// Push pending writes to the backend without ending the unit of work.
    async fn flush(&self) -> Result<(), StoreError>;

    /// Commit the unit of work.
    async fn commit(&self) -> Result<(), StoreError>;
}

/// Source of candidate resources for consumable matching.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// Resources, optionally restricted to one workcell.
    async fn list_resources(&self, workcell_id: Option<Uuid>) -> Result<Vec<ResourceRecord>, StoreError>;
}

/// Result of handing an execution task to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// Accepted by the broker.
    Enqueued {
        /// Broker-assigned task id.
        task_id: String,
    },
    /// The broker could not be reached.
    BrokerUnavailable {
        /// Connectivity failure detail.
        reason: String,
    },
    /// The broker was reached and refused the task.
    Rejected {
        /// Rejection detail.
        reason: String,
    },
}

/// Execution task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a named task with JSON arguments.
    async fn send_task(&self, name: &str, args: serde_json::Value) -> EnqueueOutcome;
}
