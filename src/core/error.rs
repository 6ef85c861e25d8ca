//! Error types for scheduling and reservation operations.

use thiserror::Error;
use uuid::Uuid;

/// Errors reported by persistence and catalog collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A held reservation for the lock key already belongs to another run.
    #[error("lock key {lock_key} is held by run {holder}")]
    Conflict {
        /// Contested lock key.
        lock_key: String,
        /// Run currently holding the key.
        holder: Uuid,
    },
    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// An asset is already reserved by one or more other runs.
    #[error("asset {lock_key} is already reserved by run(s) {}", format_holders(.holders))]
    AssetAcquisition {
        /// Lock key that could not be claimed.
        lock_key: String,
        /// Runs holding the key.
        holders: Vec<Uuid>,
    },
    /// Required consumables could not be bound and policy forbids proceeding.
    #[error("unresolved consumables: {}", .names.join(", "))]
    UnresolvedConsumables {
        /// Requirement names left without a binding.
        names: Vec<String>,
    },
    /// A scheduled run's reservation lease ran out before it finished.
    #[error("reservation lease expired for {}", .lock_keys.join(", "))]
    LeaseExpired {
        /// Lock keys whose lease lapsed.
        lock_keys: Vec<String>,
    },
    /// Unexpected failure while scheduling.
    #[error("orchestrator error: {0}")]
    Orchestrator(String),
    /// Collaborator failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Configuration rejected by validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl SchedulerError {
    /// Whether the error is part of the expected scheduling taxonomy and must be
    /// surfaced unchanged.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        matches!(
            self,
            Self::AssetAcquisition { .. } | Self::UnresolvedConsumables { .. } | Self::Orchestrator(_)
        )
    }

    /// Short machine-readable name used in persisted run payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AssetAcquisition { .. } => "asset_acquisition",
            Self::UnresolvedConsumables { .. } => "unresolved_consumables",
            Self::LeaseExpired { .. } => "lease_expired",
            Self::Orchestrator(_) => "orchestrator",
            Self::Store(_) => "store",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

fn format_holders(holders: &[Uuid]) -> String {
    holders
        .iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
