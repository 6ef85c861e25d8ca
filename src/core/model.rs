//! Data model shared by the reservation manager, the consumable matcher and the
//! scheduler.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::Priority;

/// Constraints a protocol places on the asset filling a requirement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetConstraints {
    /// Minimum usable volume in microlitres.
    pub min_volume_ul: Option<f64>,
    /// Required deck location or slot, if any.
    pub location: Option<String>,
}

/// Static asset need declared by a protocol definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRequirement {
    /// Parameter name the protocol uses for the asset.
    pub name: String,
    /// Fully qualified type name of the asset.
    pub fqn: String,
    /// Whether the protocol can run without the asset.
    #[serde(default)]
    pub optional: bool,
    /// Volume and location constraints.
    #[serde(default)]
    pub constraints: AssetConstraints,
}

impl AssetRequirement {
    /// Requirement with no constraints.
    pub fn new(name: impl Into<String>, fqn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fqn: fqn.into(),
            optional: false,
            constraints: AssetConstraints::default(),
        }
    }

    /// Set the minimum volume constraint.
    #[must_use]
    pub fn with_min_volume(mut self, min_volume_ul: f64) -> Self {
        self.constraints.min_volume_ul = Some(min_volume_ul);
        self
    }

    /// Mark the requirement optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Protocol metadata needed to admit a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDefinition {
    /// Definition identifier.
    pub id: Uuid,
    /// Human readable protocol name.
    pub name: String,
    /// Protocol version string.
    pub version: String,
    /// Declared assets, in declaration order.
    pub assets: Vec<AssetRequirement>,
    /// Whether the protocol expects a preconfigured deck.
    #[serde(default)]
    pub preconfigure_deck: bool,
    /// Parameter name under which the deck is passed.
    #[serde(default)]
    pub deck_param_name: Option<String>,
}

/// Lifecycle status of a persisted protocol run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Created, not yet scheduled.
    Pending,
    /// Requirements are being analyzed and reserved.
    Preparing,
    /// Admitted and waiting for execution.
    Queued,
    /// Steps are executing on hardware.
    Executing,
    /// Finished successfully.
    Completed,
    /// Failed to schedule or execute.
    Failed,
    /// Cancelled by an operator.
    Cancelled,
}

impl RunStatus {
    /// Statuses that cannot survive a process restart.
    pub const STALE_ON_RESTART: [Self; 2] = [Self::Queued, Self::Preparing];
}

/// A persisted protocol run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRun {
    /// Run identifier.
    pub id: Uuid,
    /// Definition the run executes.
    pub protocol_definition_id: Uuid,
    /// Workcell the run targets, if pinned.
    pub workcell_id: Option<Uuid>,
    /// Current status.
    pub status: RunStatus,
    /// Structured status payload (errors, scheduling details).
    pub output: Option<serde_json::Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl ProtocolRun {
    /// A fresh PENDING run for a definition.
    #[must_use]
    pub fn new(protocol_definition_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            protocol_definition_id,
            workcell_id: None,
            status: RunStatus::Pending,
            output: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Category used as the lock-key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Machine or labware.
    Asset,
    /// A deck layout.
    Deck,
}

impl AssetKind {
    /// Lowercase prefix used in lock keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Deck => "deck",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the lock key `"{kind}:{name}"`.
#[must_use]
pub fn lock_key(kind: AssetKind, name: &str) -> String {
    format!("{kind}:{name}")
}

/// One scheduling attempt's view of a requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeAssetRequirement {
    /// Static requirement.
    pub definition: AssetRequirement,
    /// Lock-key category.
    pub kind: AssetKind,
    /// Relative importance.
    pub priority: Priority,
    /// Reservation granted during this attempt.
    pub reservation_id: Option<Uuid>,
    /// Concrete resource suggested or bound for the requirement.
    pub suggested_asset_id: Option<Uuid>,
}

impl RuntimeAssetRequirement {
    /// Wrap a static requirement.
    #[must_use]
    pub fn new(definition: AssetRequirement, kind: AssetKind) -> Self {
        let priority = if definition.optional {
            Priority::Normal
        } else {
            Priority::High
        };
        Self {
            definition,
            kind,
            priority,
            reservation_id: None,
            suggested_asset_id: None,
        }
    }

    /// Requirement name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Lock key for this requirement.
    #[must_use]
    pub fn lock_key(&self) -> String {
        lock_key(self.kind, &self.definition.name)
    }
}

/// Status of a persisted reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Requested, not yet confirmed.
    Pending,
    /// Confirmed, not yet in use.
    Reserved,
    /// Held by a scheduled run.
    Active,
    /// Released by its owner.
    Released,
    /// Timed out before release.
    Expired,
    /// Could not be granted.
    Failed,
}

impl ReservationStatus {
    /// Whether the reservation still excludes other runs.
    #[must_use]
    pub const fn is_held(self) -> bool {
        matches!(self, Self::Pending | Self::Reserved | Self::Active)
    }
}

/// A persisted exclusive claim of a run on a lock key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReservation {
    /// Reservation identifier.
    pub id: Uuid,
    /// Owning run.
    pub protocol_run_id: Uuid,
    /// Schedule entry that requested the claim.
    pub schedule_entry_id: Option<Uuid>,
    /// Lock-key category.
    pub asset_kind: AssetKind,
    /// Requirement name.
    pub asset_name: String,
    /// Concrete resource bound to the requirement, if known.
    pub asset_id: Option<Uuid>,
    /// `"{kind}:{name}"`.
    pub lock_key: String,
    /// Random token identifying this claim instance.
    pub lock_value: String,
    /// Current status.
    pub status: ReservationStatus,
    /// Time the claim was granted.
    pub reserved_at: DateTime<Utc>,
    /// Time the claim was released; set iff status is `Released`.
    pub released_at: Option<DateTime<Utc>>,
    /// Lease length; `None` means the claim never expires.
    pub timeout_seconds: Option<u64>,
    /// `reserved_at + timeout_seconds`.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AssetReservation {
    /// A new ACTIVE reservation for a requirement.
    #[must_use]
    pub fn active(
        requirement: &RuntimeAssetRequirement,
        run_id: Uuid,
        schedule_entry_id: Option<Uuid>,
        timeout_seconds: Option<u64>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = timeout_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now + Duration::seconds(secs));
        Self {
            id: Uuid::new_v4(),
            protocol_run_id: run_id,
            schedule_entry_id,
            asset_kind: requirement.kind,
            asset_name: requirement.definition.name.clone(),
            asset_id: requirement.suggested_asset_id,
            lock_key: requirement.lock_key(),
            lock_value: Uuid::new_v4().simple().to_string(),
            status: ReservationStatus::Active,
            reserved_at: now,
            released_at: None,
            timeout_seconds,
            expires_at,
        }
    }

    /// Transition to RELEASED.
    pub fn mark_released(&mut self, now: DateTime<Utc>) {
        self.status = ReservationStatus::Released;
        self.released_at = Some(now);
    }

    /// Transition to EXPIRED; `released_at` stays empty.
    pub fn mark_expired(&mut self) {
        self.status = ReservationStatus::Expired;
        self.released_at = None;
    }

    /// Whether a held claim has outlived its lease at `now`.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_held() && self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A concrete resource instance known to the resource catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource identifier.
    pub id: Uuid,
    /// Instance name.
    pub name: String,
    /// Fully qualified type name.
    pub fqn: String,
    /// Workcell holding the resource.
    pub workcell_id: Option<Uuid>,
    /// Usable volume per well or reservoir in microlitres.
    pub capacity_ul: Option<f64>,
    /// Expiration time, if tracked.
    pub expires_at: Option<DateTime<Utc>>,
    /// Manufacturer lot.
    pub lot_number: Option<String>,
    /// Time the item was received into inventory.
    pub received_at: Option<DateTime<Utc>>,
}

impl ResourceRecord {
    /// An untracked resource with only a name and type.
    pub fn new(name: impl Into<String>, fqn: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            fqn: fqn.into(),
            workcell_id: None,
            capacity_ul: None,
            expires_at: None,
            lot_number: None,
            received_at: None,
        }
    }

    /// Set the capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity_ul: f64) -> Self {
        self.capacity_ul = Some(capacity_ul);
        self
    }

    /// Set the expiration time.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set lot number and received date.
    #[must_use]
    pub fn with_batch(mut self, lot: Option<&str>, received_at: Option<DateTime<Utc>>) -> Self {
        self.lot_number = lot.map(str::to_owned);
        self.received_at = received_at;
        self
    }

    /// Pin to a workcell.
    #[must_use]
    pub fn in_workcell(mut self, workcell_id: Uuid) -> Self {
        self.workcell_id = Some(workcell_id);
        self
    }
}
