//! Wire a [`ProtocolScheduler`] from configuration and backends.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::{
    AssetReservationManager, ConsumableAssignmentService, ProtocolScheduler, ReservationStore,
    ResourceCatalog, RunRepository, SchedulerError, SharedAuditSink, TaskQueue,
};
use crate::infra::{InMemoryStore, InMemoryTaskQueue};

/// Queue depth used by [`ProtocolSchedulerBuilder::in_memory`].
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Collects backends and builds a scheduler.
pub struct ProtocolSchedulerBuilder {
    config: SchedulerConfig,
    runs: Option<Arc<dyn RunRepository>>,
    reservations: Option<Arc<dyn ReservationStore>>,
    catalog: Option<Arc<dyn ResourceCatalog>>,
    queue: Option<Arc<dyn TaskQueue>>,
    audit: Option<SharedAuditSink>,
}

impl ProtocolSchedulerBuilder {
    /// Builder with no backends set.
    #[must_use]
    pub const fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            runs: None,
            reservations: None,
            catalog: None,
            queue: None,
            audit: None,
        }
    }

    /// Builder over a fresh in-memory store and queue.
    #[must_use]
    pub fn in_memory(config: SchedulerConfig) -> Self {
        Self::new(config)
            .with_backend(InMemoryStore::new())
            .with_queue(Arc::new(InMemoryTaskQueue::new(DEFAULT_QUEUE_DEPTH)))
    }

    /// Use one backend for runs, reservations and the resource catalog.
    #[must_use]
    pub fn with_backend<B>(self, backend: B) -> Self
    where
        B: RunRepository + ReservationStore + ResourceCatalog + 'static,
    {
        let backend = Arc::new(backend);
        self.with_runs(backend.clone())
            .with_reservations(backend.clone())
            .with_catalog(backend)
    }

    /// Run and protocol definition repository.
    #[must_use]
    pub fn with_runs(mut self, runs: Arc<dyn RunRepository>) -> Self {
        self.runs = Some(runs);
        self
    }

    /// Durable reservation store.
    #[must_use]
    pub fn with_reservations(mut self, reservations: Arc<dyn ReservationStore>) -> Self {
        self.reservations = Some(reservations);
        self
    }

    /// Resource catalog for consumable matching.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn ResourceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Execution queue.
    #[must_use]
    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Audit sink shared by the reservation manager and the scheduler.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Validate the configuration and assemble the scheduler.
    pub fn build(self) -> Result<ProtocolScheduler, SchedulerError> {
        self.config
            .validate()
            .map_err(SchedulerError::InvalidConfig)?;

        let runs = self.runs.ok_or_else(|| missing("run repository"))?;
        let reservations = self.reservations.ok_or_else(|| missing("reservation store"))?;
        let catalog = self.catalog.ok_or_else(|| missing("resource catalog"))?;
        let queue = self.queue.ok_or_else(|| missing("task queue"))?;

        let mut manager = AssetReservationManager::new(reservations.clone())
            .with_timeout(self.config.reservation.timeout_secs);
        if let Some(audit) = &self.audit {
            manager = manager.with_audit(audit.clone());
        }
        let consumables = ConsumableAssignmentService::new(
            catalog,
            reservations,
            self.config.consumables.clone(),
        );

        let scheduler = ProtocolScheduler::new(
            runs,
            Arc::new(manager),
            consumables,
            queue,
            self.config,
        );
        Ok(match self.audit {
            Some(audit) => scheduler.with_audit(audit),
            None => scheduler,
        })
    }
}

fn missing(what: &str) -> SchedulerError {
    SchedulerError::InvalidConfig(format!("no {what} configured"))
}
