//! Core scheduling abstractions: reservations, consumable matching and run admission.

pub mod audit;
pub mod consumables;
pub mod error;
pub mod model;
pub mod reservation;
pub mod schedule_entry;
pub mod scheduler;
pub mod store;

pub use audit::{
    build_audit_event, shared, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink,
    SharedAuditSink,
};
pub use consumables::{
    is_consumable, CompatibilityScore, ConsumableAssignmentService, ScoreFactor,
};
pub use error::{AppResult, SchedulerError, StoreError};
pub use model::{
    lock_key, AssetConstraints, AssetKind, AssetRequirement, AssetReservation, ProtocolDefinition,
    ProtocolRun, ReservationStatus, ResourceRecord, RunStatus, RuntimeAssetRequirement,
};
pub use reservation::AssetReservationManager;
pub use schedule_entry::{ScheduleEntry, ScheduleSnapshot, ScheduleStatus};
pub use scheduler::{ProtocolScheduler, RecoveryReport, STALE_RUN_MESSAGE};
pub use store::{EnqueueOutcome, ReservationStore, ResourceCatalog, RunRepository, TaskQueue};
