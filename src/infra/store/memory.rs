//! In-memory store for runs, reservations and resources.
//!
//! Enforces the same uniqueness rule a relational backend would through a
//! partial unique index on `lock_key` over held statuses. Clones share state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::core::error::StoreError;
use crate::core::model::{
    AssetReservation, ProtocolDefinition, ProtocolRun, ResourceRecord, RunStatus,
};
use crate::core::store::{ReservationStore, ResourceCatalog, RunRepository};

#[derive(Default)]
struct State {
    runs: BTreeMap<Uuid, ProtocolRun>,
    definitions: HashMap<Uuid, ProtocolDefinition>,
    reservations: Vec<AssetReservation>,
    resources: Vec<ResourceRecord>,
    commits: usize,
    run_page_queries: usize,
    resource_failure: Option<String>,
    run_update_failure: Option<String>,
    duplicate_held_keys: bool,
}

/// Shared in-memory backend for development and tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a run.
    pub fn put_run(&self, run: ProtocolRun) {
        self.state.lock().runs.insert(run.id, run);
    }

    /// Insert or replace a protocol definition.
    pub fn put_definition(&self, definition: ProtocolDefinition) {
        self.state.lock().definitions.insert(definition.id, definition);
    }

    /// Add a resource to the catalog.
    pub fn put_resource(&self, resource: ResourceRecord) {
        self.state.lock().resources.push(resource);
    }

    /// Current copy of a run.
    #[must_use]
    pub fn run(&self, run_id: Uuid) -> Option<ProtocolRun> {
        self.state.lock().runs.get(&run_id).cloned()
    }

    /// All reservation rows in insertion order.
    #[must_use]
    pub fn reservations(&self) -> Vec<AssetReservation> {
        self.state.lock().reservations.clone()
    }

    /// Held reservation rows for a lock key.
    #[must_use]
    pub fn held(&self, lock_key: &str) -> Vec<AssetReservation> {
        self.state
            .lock()
            .reservations
            .iter()
            .filter(|r| r.lock_key == lock_key && r.status.is_held())
            .cloned()
            .collect()
    }

    /// Number of committed units of work.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.state.lock().commits
    }

    /// Number of `list_runs_by_status` calls served.
    #[must_use]
    pub fn run_page_queries(&self) -> usize {
        self.state.lock().run_page_queries
    }

    /// Make `list_resources` fail with a backend error.
    pub fn fail_resource_listing(&self, message: Option<&str>) {
        self.state.lock().resource_failure = message.map(str::to_owned);
    }

    /// Stop rejecting a second held row on a lock key, leaving exclusion to
    /// the reservation manager's key locks alone.
    pub fn allow_duplicate_held_keys(&self, allow: bool) {
        self.state.lock().duplicate_held_keys = allow;
    }

    /// Make `update_run_status` fail with a backend error.
    pub fn fail_run_updates(&self, message: Option<&str>) {
        self.state.lock().run_update_failure = message.map(str::to_owned);
    }
}

#[async_trait]
impl RunRepository for InMemoryStore {
    async fn get_run(&self, run_id: Uuid) -> Result<Option<ProtocolRun>, StoreError> {
        Ok(self.state.lock().runs.get(&run_id).cloned())
    }

    async fn get_protocol_definition(
        &self,
        definition_id: Uuid,
    ) -> Result<Option<ProtocolDefinition>, StoreError> {
        Ok(self.state.lock().definitions.get(&definition_id).cloned())
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.run_update_failure {
            return Err(StoreError::Backend(message.clone()));
        }
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;
        run.status = status;
        run.output = output;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn list_runs_by_status(
        &self,
        statuses: &[RunStatus],
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ProtocolRun>, StoreError> {
        let mut state = self.state.lock();
        state.run_page_queries += 1;
        Ok(state
            .runs
            .values()
            .filter(|run| after.is_none_or(|cursor| run.id > cursor))
            .filter(|run| statuses.contains(&run.status))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn insert(&self, reservation: &AssetReservation) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.reservations.iter().any(|r| r.id == reservation.id) {
            return Err(StoreError::Backend(format!(
                "duplicate reservation id {}",
                reservation.id
            )));
        }
        if reservation.status.is_held() && !state.duplicate_held_keys {
            if let Some(existing) = state.reservations.iter().find(|r| {
                r.status.is_held()
                    && r.lock_key == reservation.lock_key
                    && r.protocol_run_id != reservation.protocol_run_id
            }) {
                return Err(StoreError::Conflict {
                    lock_key: existing.lock_key.clone(),
                    holder: existing.protocol_run_id,
                });
            }
        }
        state.reservations.push(reservation.clone());
        Ok(())
    }

    async fn delete(&self, reservation_id: Uuid) -> Result<(), StoreError> {
        self.state
            .lock()
            .reservations
            .retain(|r| r.id != reservation_id);
        Ok(())
    }

    async fn update(&self, reservation: &AssetReservation) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let stored = state
            .reservations
            .iter_mut()
            .find(|r| r.id == reservation.id)
            .ok_or_else(|| StoreError::NotFound(format!("reservation {}", reservation.id)))?;
        if stored.lock_value != reservation.lock_value {
            return Err(StoreError::Conflict {
                lock_key: stored.lock_key.clone(),
                holder: stored.protocol_run_id,
            });
        }
        *stored = reservation.clone();
        Ok(())
    }

    async fn find_held(&self, lock_key: &str) -> Result<Vec<AssetReservation>, StoreError> {
        Ok(self.held(lock_key))
    }

    async fn find_held_for_run(
        &self,
        lock_key: &str,
        run_id: Uuid,
    ) -> Result<Vec<AssetReservation>, StoreError> {
        Ok(self
            .held(lock_key)
            .into_iter()
            .filter(|r| r.protocol_run_id == run_id)
            .collect())
    }

    async fn list_held_by_run(&self, run_id: Uuid) -> Result<Vec<AssetReservation>, StoreError> {
        Ok(self
            .state
            .lock()
            .reservations
            .iter()
            .filter(|r| r.protocol_run_id == run_id && r.status.is_held())
            .cloned()
            .collect())
    }

    async fn list_held(&self) -> Result<Vec<AssetReservation>, StoreError> {
        Ok(self
            .state
            .lock()
            .reservations
            .iter()
            .filter(|r| r.status.is_held())
            .cloned()
            .collect())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        self.state.lock().commits += 1;
        Ok(())
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryStore {
    async fn list_resources(
        &self,
        workcell_id: Option<Uuid>,
    ) -> Result<Vec<ResourceRecord>, StoreError> {
        let state = self.state.lock();
        if let Some(message) = &state.resource_failure {
            return Err(StoreError::Backend(message.clone()));
        }
        Ok(state
            .resources
            .iter()
            .filter(|r| workcell_id.is_none() || r.workcell_id == workcell_id)
            .cloned()
            .collect())
    }
}
