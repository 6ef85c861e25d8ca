//! Exclusive, all-or-nothing asset reservation.
//!
//! A reservation claims a lock key (`"{kind}:{name}"`) for one run. The manager
//! keeps two views of the claims:
//!
//! - the durable rows in a [`ReservationStore`], which are authoritative, and
//! - a process-local claimant cache mapping lock key to the runs holding it,
//!   used as a fast pre-check and for self-healing on completion.
//!
//! Every reserve/release/expire takes a per-lock-key async mutex for the whole
//! check-then-act sequence, so two tasks in this process can never both pass
//! the check for the same key. Keys are locked in sorted order, so batches with
//! overlapping keys cannot deadlock. A key's mutex is dropped from the table
//! once no task holds or awaits it. Across processes the store's uniqueness
//! constraint on held lock keys is the backstop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::audit::{self, AuditAction, SharedAuditSink};
use crate::core::error::{SchedulerError, StoreError};
use crate::core::model::{AssetReservation, RuntimeAssetRequirement};
use crate::core::store::ReservationStore;
use crate::util::now_utc;

/// Row or cache entry created by the current `reserve` call.
struct Claimed {
    reservation_id: Uuid,
    lock_key: String,
    /// Row inserted by this call (as opposed to an existing claim of the same run).
    inserted: bool,
    /// Run added to the claimant cache by this call.
    cached: bool,
}

type KeyLockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Per-key guards held for one check-then-act sequence.
struct KeyGuards<'a> {
    table: &'a KeyLockTable,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuards<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        let mut table = self.table.lock();
        for key in &self.keys {
            // Only the table's own handle left: nobody holds or awaits the key.
            if table.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                table.remove(key);
            }
        }
    }
}

/// Grants and releases exclusive claims on assets.
pub struct AssetReservationManager {
    store: Arc<dyn ReservationStore>,
    /// lock key -> runs holding it.
    cache: Mutex<HashMap<String, HashSet<Uuid>>>,
    key_locks: KeyLockTable,
    timeout_secs: Option<u64>,
    audit: Option<SharedAuditSink>,
}

impl AssetReservationManager {
    /// Manager over a reservation store. Reservations never expire.
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            timeout_secs: None,
            audit: None,
        }
    }

    /// Give new reservations a lease of `timeout_secs`.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Lease length applied to new reservations.
    #[must_use]
    pub const fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    /// Claim every requirement for `run_id`, or none of them.
    ///
    /// On success each requirement carries its `reservation_id`. On failure no
    /// row created by this call remains in the store, no cache entry added by
    /// this call remains, and no requirement is stamped.
    ///
    /// Without a `session` the manager commits its own unit of work; with one,
    /// writes go through the session and are only flushed, leaving the commit
    /// to the caller.
    pub async fn reserve(
        &self,
        requirements: &mut [RuntimeAssetRequirement],
        run_id: Uuid,
        schedule_entry_id: Option<Uuid>,
        session: Option<&dyn ReservationStore>,
    ) -> Result<(), SchedulerError> {
        if requirements.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = requirements
            .iter()
            .map(RuntimeAssetRequirement::lock_key)
            .collect();
        let _guards = self.lock_keys(&keys).await;
        let store: &dyn ReservationStore = match session {
            Some(session) => session,
            None => self.store.as_ref(),
        };
        let now = now_utc();

        let mut claimed: Vec<Claimed> = Vec::with_capacity(requirements.len());
        for (requirement, key) in requirements.iter().zip(&keys) {
            let result = self
                .claim(store, requirement, key, run_id, schedule_entry_id, now)
                .await;
            match result {
                Ok(claim) => claimed.push(claim),
                Err(err) => {
                    self.rollback(store, claimed, run_id).await;
                    return Err(err);
                }
            }
        }

        if let Err(err) = Self::finish(store, session.is_none()).await {
            error!(run_id = %run_id, error = %err, "failed to persist reservations, rolling back");
            self.rollback(store, claimed, run_id).await;
            return Err(err.into());
        }

        for (requirement, claim) in requirements.iter_mut().zip(&claimed) {
            requirement.reservation_id = Some(claim.reservation_id);
        }
        for claim in claimed.iter().filter(|c| c.inserted) {
            audit::record(
                self.audit.as_ref(),
                run_id,
                Some(&claim.lock_key),
                AuditAction::Reserve,
                Some(claim.reservation_id.to_string()),
            );
        }
        info!(run_id = %run_id, assets = claimed.len(), "reserved assets");
        Ok(())
    }

    /// Release the run's held reservations for `lock_keys`.
    ///
    /// Keys the run does not hold are skipped, so releasing twice is a no-op.
    /// Returns the number of reservation rows released.
    pub async fn release(
        &self,
        lock_keys: &[String],
        run_id: Uuid,
        session: Option<&dyn ReservationStore>,
    ) -> Result<usize, SchedulerError> {
        if lock_keys.is_empty() {
            return Ok(0);
        }
        let _guards = self.lock_keys(lock_keys).await;
        let store: &dyn ReservationStore = match session {
            Some(session) => session,
            None => self.store.as_ref(),
        };
        let now = now_utc();

        let mut released = 0;
        let mut seen = HashSet::new();
        for key in lock_keys {
            if !seen.insert(key.as_str()) {
                continue;
            }
            let rows = store.find_held_for_run(key, run_id).await?;
            for mut reservation in rows {
                reservation.mark_released(now);
                store.update(&reservation).await?;
                released += 1;
                audit::record(
                    self.audit.as_ref(),
                    run_id,
                    Some(key),
                    AuditAction::Release,
                    Some(reservation.id.to_string()),
                );
            }
            self.cache_remove(key, run_id);
        }
        Self::finish(store, session.is_none()).await?;

        debug!(run_id = %run_id, keys = lock_keys.len(), released, "released assets");
        Ok(released)
    }

    /// Release every held reservation the store records for `run_id`, plus any
    /// cache-only claims.
    pub async fn release_all_for_run(&self, run_id: Uuid) -> Result<usize, SchedulerError> {
        let mut keys: Vec<String> = self
            .store
            .list_held_by_run(run_id)
            .await?
            .into_iter()
            .map(|r| r.lock_key)
            .collect();
        keys.extend(self.claimed_keys(run_id));
        keys.sort();
        keys.dedup();
        self.release(&keys, run_id, None).await
    }

    /// Mark held reservations whose lease ended at or before `now` as EXPIRED
    /// and drop them from the cache. Returns the expired rows.
    pub async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AssetReservation>, SchedulerError> {
        let mut overdue_keys: Vec<String> = self
            .store
            .list_held()
            .await?
            .into_iter()
            .filter(|r| r.is_overdue(now))
            .map(|r| r.lock_key)
            .collect();
        overdue_keys.sort();
        overdue_keys.dedup();

        let mut expired = Vec::new();
        for key in overdue_keys {
            let _guard = self.lock_keys(std::slice::from_ref(&key)).await;
            // Re-read under the key lock: the owner may have released meanwhile.
            for mut reservation in self.store.find_held(&key).await? {
                if !reservation.is_overdue(now) {
                    continue;
                }
                reservation.mark_expired();
                self.store.update(&reservation).await?;
                self.cache_remove(&key, reservation.protocol_run_id);
                warn!(
                    run_id = %reservation.protocol_run_id,
                    lock_key = %key,
                    "reservation lease expired"
                );
                audit::record(
                    self.audit.as_ref(),
                    reservation.protocol_run_id,
                    Some(&key),
                    AuditAction::Expire,
                    None,
                );
                expired.push(reservation);
            }
        }
        if !expired.is_empty() {
            Self::finish(self.store.as_ref(), true).await?;
        }
        Ok(expired)
    }

    /// Lock keys the cache records as claimed by `run_id`, sorted.
    #[must_use]
    pub fn claimed_keys(&self, run_id: Uuid) -> Vec<String> {
        let cache = self.cache.lock();
        let mut keys: Vec<String> = cache
            .iter()
            .filter(|(_, runs)| runs.contains(&run_id))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Runs the cache records as holding `lock_key`, sorted.
    #[must_use]
    pub fn claimants(&self, lock_key: &str) -> Vec<Uuid> {
        let cache = self.cache.lock();
        let mut runs: Vec<Uuid> = cache
            .get(lock_key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        runs.sort();
        runs
    }

    /// Copy of the claimant cache.
    #[must_use]
    pub fn cache_snapshot(&self) -> HashMap<String, HashSet<Uuid>> {
        self.cache.lock().clone()
    }

    async fn claim(
        &self,
        store: &dyn ReservationStore,
        requirement: &RuntimeAssetRequirement,
        key: &str,
        run_id: Uuid,
        schedule_entry_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Claimed, SchedulerError> {
        let cached_holders = self.cached_conflicts(key, run_id);
        if !cached_holders.is_empty() {
            return Err(self.conflict(key, run_id, cached_holders));
        }

        let held = store.find_held(key).await?;
        let mut holders: Vec<Uuid> = held
            .iter()
            .map(|r| r.protocol_run_id)
            .filter(|holder| *holder != run_id)
            .collect();
        holders.sort();
        holders.dedup();
        if !holders.is_empty() {
            return Err(self.conflict(key, run_id, holders));
        }

        if let Some(existing) = held.into_iter().find(|r| r.protocol_run_id == run_id) {
            debug!(run_id = %run_id, lock_key = key, "run already holds asset");
            // A pre-existing claim is not ours to roll back, so it is never
            // flagged for eviction either.
            self.cache_add(key, run_id);
            return Ok(Claimed {
                reservation_id: existing.id,
                lock_key: key.to_owned(),
                inserted: false,
                cached: false,
            });
        }

        let reservation = AssetReservation::active(
            requirement,
            run_id,
            schedule_entry_id,
            self.timeout_secs,
            now,
        );
        match store.insert(&reservation).await {
            Ok(()) => {}
            Err(StoreError::Conflict { holder, .. }) => {
                return Err(self.conflict(key, run_id, vec![holder]));
            }
            Err(err) => return Err(err.into()),
        }
        let cached = self.cache_add(key, run_id);
        debug!(run_id = %run_id, lock_key = key, reservation_id = %reservation.id, "claimed asset");
        Ok(Claimed {
            reservation_id: reservation.id,
            lock_key: key.to_owned(),
            inserted: true,
            cached,
        })
    }

    /// Undo a partial batch, newest first.
    async fn rollback(&self, store: &dyn ReservationStore, claimed: Vec<Claimed>, run_id: Uuid) {
        let count = claimed.len();
        for claim in claimed.into_iter().rev() {
            if claim.inserted {
                if let Err(err) = store.delete(claim.reservation_id).await {
                    error!(
                        run_id = %run_id,
                        reservation_id = %claim.reservation_id,
                        error = %err,
                        "failed to delete reservation during rollback"
                    );
                }
            }
            if claim.cached {
                self.cache_remove(&claim.lock_key, run_id);
            }
        }
        if count > 0 {
            debug!(run_id = %run_id, count, "rolled back partial reservation");
        }
    }

    fn conflict(&self, key: &str, run_id: Uuid, holders: Vec<Uuid>) -> SchedulerError {
        warn!(run_id = %run_id, lock_key = key, holders = ?holders, "asset already reserved");
        audit::record(
            self.audit.as_ref(),
            run_id,
            Some(key),
            AuditAction::Conflict,
            Some(format!("{holders:?}")),
        );
        SchedulerError::AssetAcquisition {
            lock_key: key.to_owned(),
            holders,
        }
    }

    async fn finish(store: &dyn ReservationStore, commit: bool) -> Result<(), StoreError> {
        store.flush().await?;
        if commit {
            store.commit().await?;
        }
        Ok(())
    }

    async fn lock_keys(&self, keys: &[String]) -> KeyGuards<'_> {
        let mut ordered: Vec<String> = keys.to_vec();
        ordered.sort();
        ordered.dedup();
        let handles: Vec<Arc<AsyncMutex<()>>> = {
            let mut table = self.key_locks.lock();
            ordered
                .iter()
                .map(|key| {
                    Arc::clone(
                        table
                            .entry(key.clone())
                            .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
                    )
                })
                .collect()
        };
        let mut held = KeyGuards {
            table: &self.key_locks,
            keys: ordered,
            guards: Vec::with_capacity(handles.len()),
        };
        for handle in handles {
            held.guards.push(handle.lock_owned().await);
        }
        held
    }

    #[cfg(test)]
    fn tracked_key_locks(&self) -> usize {
        self.key_locks.lock().len()
    }

    fn cached_conflicts(&self, key: &str, run_id: Uuid) -> Vec<Uuid> {
        let cache = self.cache.lock();
        let mut holders: Vec<Uuid> = cache
            .get(key)
            .map(|runs| runs.iter().copied().filter(|r| *r != run_id).collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }

    /// Returns true when the run was not yet cached for the key.
    fn cache_add(&self, key: &str, run_id: Uuid) -> bool {
        self.cache
            .lock()
            .entry(key.to_owned())
            .or_default()
            .insert(run_id)
    }

    fn cache_remove(&self, key: &str, run_id: Uuid) {
        let mut cache = self.cache.lock();
        if let Some(runs) = cache.get_mut(key) {
            runs.remove(&run_id);
            if runs.is_empty() {
                cache.remove(key);
            }
        }
    }
}
