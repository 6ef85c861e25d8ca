//! Consumable matching: picks a concrete plate, tip rack, trough or tube for a
//! generic requirement.
//!
//! Candidates are scored on five factors in `[0, 1]` and the mean decides.
//! Only an insufficient volume excludes a candidate outright; expiry and batch
//! tracking just lower its score.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConsumableConfig;
use crate::core::error::SchedulerError;
use crate::core::model::{lock_key, AssetKind, AssetRequirement, ResourceRecord};
use crate::core::store::{ReservationStore, ResourceCatalog};
use crate::util::now_utc;

/// Words that mark a requirement as a consumable.
const CONSUMABLE_KEYWORDS: &[&str] = &[
    "plate", "tip", "trough", "reservoir", "tube", "vial", "well", "lid",
];

/// Type families; a candidate must share the requirement's family.
const TYPE_FAMILIES: &[&[&str]] = &[
    &["plate"],
    &["tip"],
    &["trough", "reservoir"],
    &["tube", "vial"],
];

/// One scoring dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFactor {
    /// Capacity against the volume constraint.
    VolumeMatch,
    /// Type name similarity.
    TypeMatch,
    /// Not reserved by another run.
    Availability,
    /// Remaining shelf life.
    Expiration,
    /// Lot and receipt traceability.
    BatchTracking,
}

/// Per-candidate scoring scratchpad.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityScore {
    /// Candidate resource.
    pub resource_id: Uuid,
    /// Factor scores in evaluation order.
    pub factors: Vec<(ScoreFactor, f64)>,
    /// Human readable caveats.
    pub warnings: Vec<String>,
}

impl CompatibilityScore {
    /// Mean of the present factors, `0.0` when none.
    #[must_use]
    pub fn total(&self) -> f64 {
        if self.factors.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.factors.iter().map(|(_, score)| score).sum();
        #[allow(clippy::cast_precision_loss)]
        let count = self.factors.len() as f64;
        sum / count
    }

    /// Score of one factor.
    #[must_use]
    pub fn factor(&self, factor: ScoreFactor) -> Option<f64> {
        self.factors
            .iter()
            .find(|(f, _)| *f == factor)
            .map(|(_, score)| *score)
    }

    /// Whether the candidate is ruled out regardless of its total.
    #[must_use]
    pub fn is_excluded(&self) -> bool {
        self.factor(ScoreFactor::VolumeMatch) == Some(0.0)
    }
}

/// Whether the requirement names a consumable type.
#[must_use]
pub fn is_consumable(requirement: &AssetRequirement) -> bool {
    let text = format!("{} {}", requirement.fqn, requirement.name).to_lowercase();
    CONSUMABLE_KEYWORDS.iter().any(|kw| text.contains(kw))
}

fn type_family(text: &str) -> Option<&'static [&'static str]> {
    TYPE_FAMILIES
        .iter()
        .copied()
        .find(|family| family.iter().any(|kw| text.contains(kw)))
}

/// Finds and suggests concrete consumables.
pub struct ConsumableAssignmentService {
    catalog: Arc<dyn ResourceCatalog>,
    reservations: Arc<dyn ReservationStore>,
    config: ConsumableConfig,
}

impl ConsumableAssignmentService {
    /// Service over a catalog and the reservation store used for exclusion.
    pub fn new(
        catalog: Arc<dyn ResourceCatalog>,
        reservations: Arc<dyn ReservationStore>,
        config: ConsumableConfig,
    ) -> Self {
        Self {
            catalog,
            reservations,
            config,
        }
    }

    /// Best unreserved candidate for `requirement`, or `None`.
    ///
    /// Ties go to the candidate listed first by the catalog.
    pub async fn find_compatible_consumable(
        &self,
        requirement: &AssetRequirement,
        workcell_id: Option<Uuid>,
        now: Option<DateTime<Utc>>,
    ) -> Result<Option<Uuid>, SchedulerError> {
        self.find_excluding(requirement, workcell_id, now, &HashSet::new())
            .await
    }

    /// Fill in bindings for unbound consumable requirements.
    ///
    /// Returns `existing` plus every new match. Lookup failures are logged and
    /// the requirement is left unassigned. A resource is suggested at most once
    /// per call.
    pub async fn auto_assign_consumables(
        &self,
        requirements: &[AssetRequirement],
        existing: &HashMap<String, Uuid>,
        workcell_id: Option<Uuid>,
    ) -> HashMap<String, Uuid> {
        let mut assignments = existing.clone();
        let mut taken: HashSet<Uuid> = existing.values().copied().collect();
        for requirement in requirements {
            if assignments.contains_key(&requirement.name) || !is_consumable(requirement) {
                continue;
            }
            match self
                .find_excluding(requirement, workcell_id, None, &taken)
                .await
            {
                Ok(Some(resource_id)) => {
                    info!(
                        requirement = %requirement.name,
                        resource_id = %resource_id,
                        "auto-assigned consumable"
                    );
                    taken.insert(resource_id);
                    assignments.insert(requirement.name.clone(), resource_id);
                }
                Ok(None) => {
                    debug!(requirement = %requirement.name, "no compatible consumable found");
                }
                Err(err) => {
                    warn!(
                        requirement = %requirement.name,
                        error = %err,
                        "consumable lookup failed, leaving requirement unassigned"
                    );
                }
            }
        }
        assignments
    }

    /// Score one candidate against a requirement.
    #[must_use]
    pub fn score_candidate(
        &self,
        requirement: &AssetRequirement,
        resource: &ResourceRecord,
        now: DateTime<Utc>,
    ) -> CompatibilityScore {
        let mut warnings = Vec::new();
        let volume = volume_score(
            requirement.constraints.min_volume_ul,
            resource.capacity_ul,
            &mut warnings,
        );
        let expiration = self.expiration_score(resource.expires_at, now, &mut warnings);
        CompatibilityScore {
            resource_id: resource.id,
            factors: vec![
                (ScoreFactor::VolumeMatch, volume),
                (ScoreFactor::TypeMatch, type_score(&requirement.fqn, &resource.fqn)),
                (ScoreFactor::Availability, 1.0),
                (ScoreFactor::Expiration, expiration),
                (ScoreFactor::BatchTracking, batch_score(resource)),
            ],
            warnings,
        }
    }

    async fn find_excluding(
        &self,
        requirement: &AssetRequirement,
        workcell_id: Option<Uuid>,
        now: Option<DateTime<Utc>>,
        skip: &HashSet<Uuid>,
    ) -> Result<Option<Uuid>, SchedulerError> {
        let now = now.unwrap_or_else(now_utc);
        let candidates = self.catalog.list_resources(workcell_id).await?;
        if candidates.is_empty() {
            debug!(requirement = %requirement.name, "no candidate resources");
            return Ok(None);
        }

        let held = self.reservations.list_held().await?;
        let reserved_ids: HashSet<Uuid> = held.iter().filter_map(|r| r.asset_id).collect();
        let reserved_keys: HashSet<String> = held.into_iter().map(|r| r.lock_key).collect();
        let family = type_family(&requirement.fqn.to_lowercase())
            .or_else(|| type_family(&requirement.name.to_lowercase()));

        let mut best: Option<(f64, CompatibilityScore)> = None;
        for resource in &candidates {
            if skip.contains(&resource.id)
                || reserved_ids.contains(&resource.id)
                || reserved_keys.contains(&lock_key(AssetKind::Asset, &resource.name))
            {
                continue;
            }
            if let Some(family) = family {
                let fqn = resource.fqn.to_lowercase();
                if !family.iter().any(|kw| fqn.contains(kw)) {
                    continue;
                }
            }

            let score = self.score_candidate(requirement, resource, now);
            if score.is_excluded() {
                debug!(resource = %resource.name, "candidate below required volume");
                continue;
            }
            let total = score.total();
            if total > 0.0 && best.as_ref().is_none_or(|(top, _)| total > *top) {
                best = Some((total, score));
            }
        }

        Ok(best.map(|(total, score)| {
            for warning in &score.warnings {
                warn!(requirement = %requirement.name, resource_id = %score.resource_id, "{warning}");
            }
            debug!(requirement = %requirement.name, resource_id = %score.resource_id, total, "selected consumable");
            score.resource_id
        }))
    }

    fn expiration_score(
        &self,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> f64 {
        let Some(expires_at) = expires_at else {
            return 1.0;
        };
        if expires_at <= now {
            warnings.push(format!("expired on {}", expires_at.date_naive()));
            return 0.0;
        }
        // Whole days left, so 7 days and some hours is still critical.
        let days_left = (expires_at - now).num_days();
        if days_left > self.config.expiry_warning_days {
            1.0
        } else if days_left > self.config.expiry_critical_days {
            warnings.push(format!("expires within {} days", self.config.expiry_warning_days));
            0.8
        } else {
            warnings.push(format!("expires within {} days", self.config.expiry_critical_days));
            0.5
        }
    }
}

fn volume_score(required: Option<f64>, capacity: Option<f64>, warnings: &mut Vec<String>) -> f64 {
    match (required, capacity) {
        (Some(required), Some(capacity)) => {
            if capacity >= required {
                1.0
            } else {
                0.0
            }
        }
        (None, Some(_)) => 1.0,
        (Some(required), None) => {
            warnings.push(format!("capacity unknown, cannot confirm {required} uL"));
            0.5
        }
        (None, None) => 0.5,
    }
}

fn type_score(required: &str, candidate: &str) -> f64 {
    let required = required.to_lowercase();
    let candidate = candidate.to_lowercase();
    if required == candidate {
        return 1.0;
    }
    if !required.is_empty()
        && !candidate.is_empty()
        && (candidate.contains(&required) || required.contains(&candidate))
    {
        return 0.8;
    }
    let shared = CONSUMABLE_KEYWORDS
        .iter()
        .any(|kw| required.contains(kw) && candidate.contains(kw));
    if shared {
        0.6
    } else {
        0.3
    }
}

fn batch_score(resource: &ResourceRecord) -> f64 {
    let has_lot = resource.lot_number.as_deref().is_some_and(|lot| !lot.is_empty());
    match (has_lot, resource.received_at.is_some()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.7,
        (false, false) => 0.3,
    }
}
