//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;
use workcell_scheduler::builders::ProtocolSchedulerBuilder;
use workcell_scheduler::config::SchedulerConfig;
use workcell_scheduler::core::{
    shared, AssetKind, AssetRequirement, AssetReservation, InMemoryAuditSink, ProtocolDefinition,
    ProtocolRun, ProtocolScheduler, ReservationStore, RunRepository, RunStatus,
    RuntimeAssetRequirement, StoreError,
};
use workcell_scheduler::infra::{InMemoryStore, InMemoryTaskQueue};
use workcell_scheduler::util::init_tracing;

pub const PLATE: &str = "pylabrobot.resources.Cor_96_wellplate_360ul_Fb";
pub const TIPS: &str = "pylabrobot.resources.opentrons.tip_racks.opentrons_96_tiprack_300ul";
pub const HANDLER: &str = "pylabrobot.liquid_handling.LiquidHandler";

/// Scheduler wired to in-memory collaborators the test can inspect.
pub struct Harness {
    pub store: InMemoryStore,
    pub queue: InMemoryTaskQueue,
    pub audit: InMemoryAuditSink,
    pub scheduler: Arc<ProtocolScheduler>,
}

pub fn harness(config: SchedulerConfig) -> Harness {
    harness_with_queue(config, InMemoryTaskQueue::new(64))
}

pub fn harness_with_queue(config: SchedulerConfig, queue: InMemoryTaskQueue) -> Harness {
    init_tracing();
    let store = InMemoryStore::new();
    let audit = InMemoryAuditSink::new(1_000);
    let scheduler = ProtocolSchedulerBuilder::new(config)
        .with_backend(store.clone())
        .with_queue(Arc::new(queue.clone()))
        .with_audit(shared(audit.clone()))
        .build()
        .expect("valid scheduler");
    Harness {
        store,
        queue,
        audit,
        scheduler: Arc::new(scheduler),
    }
}

pub fn definition(name: &str, assets: Vec<AssetRequirement>) -> ProtocolDefinition {
    ProtocolDefinition {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        version: "1.0.0".to_owned(),
        assets,
        preconfigure_deck: false,
        deck_param_name: None,
    }
}

/// Persist a definition and one PENDING run for it.
pub fn seed_run(store: &InMemoryStore, definition: &ProtocolDefinition) -> Uuid {
    store.put_definition(definition.clone());
    let run = ProtocolRun::new(definition.id);
    let run_id = run.id;
    store.put_run(run);
    run_id
}

pub fn seed_runs_with_status(store: &InMemoryStore, count: usize, status: RunStatus) -> Vec<Uuid> {
    let definition_id = Uuid::new_v4();
    (0..count)
        .map(|_| {
            let mut run = ProtocolRun::new(definition_id);
            run.status = status;
            let id = run.id;
            store.put_run(run);
            id
        })
        .collect()
}

pub fn requirement(kind: AssetKind, name: &str, fqn: &str) -> RuntimeAssetRequirement {
    RuntimeAssetRequirement::new(AssetRequirement::new(name, fqn), kind)
}

/// Store that suspends before the round trips a real database would make, so
/// concurrent callers interleave at every await.
#[derive(Clone)]
pub struct YieldingStore(pub InMemoryStore);

#[async_trait]
impl RunRepository for YieldingStore {
    async fn get_run(&self, run_id: Uuid) -> Result<Option<ProtocolRun>, StoreError> {
        tokio::task::yield_now().await;
        self.0.get_run(run_id).await
    }

    async fn get_protocol_definition(
        &self,
        definition_id: Uuid,
    ) -> Result<Option<ProtocolDefinition>, StoreError> {
        self.0.get_protocol_definition(definition_id).await
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.update_run_status(run_id, status, output).await
    }

    async fn list_runs_by_status(
        &self,
        statuses: &[RunStatus],
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ProtocolRun>, StoreError> {
        self.0.list_runs_by_status(statuses, after, limit).await
    }
}

#[async_trait]
impl ReservationStore for YieldingStore {
    async fn insert(&self, reservation: &AssetReservation) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.insert(reservation).await
    }

    async fn delete(&self, reservation_id: Uuid) -> Result<(), StoreError> {
        self.0.delete(reservation_id).await
    }

    async fn update(&self, reservation: &AssetReservation) -> Result<(), StoreError> {
        self.0.update(reservation).await
    }

    async fn find_held(&self, lock_key: &str) -> Result<Vec<AssetReservation>, StoreError> {
        tokio::task::yield_now().await;
        self.0.find_held(lock_key).await
    }

    async fn find_held_for_run(
        &self,
        lock_key: &str,
        run_id: Uuid,
    ) -> Result<Vec<AssetReservation>, StoreError> {
        self.0.find_held_for_run(lock_key, run_id).await
    }

    async fn list_held_by_run(&self, run_id: Uuid) -> Result<Vec<AssetReservation>, StoreError> {
        self.0.list_held_by_run(run_id).await
    }

    async fn list_held(&self) -> Result<Vec<AssetReservation>, StoreError> {
        self.0.list_held().await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.0.flush().await
    }

    async fn commit(&self) -> Result<(), StoreError> {
        self.0.commit().await
    }
}
