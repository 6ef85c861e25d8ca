//! Integration tests for exclusive asset reservation.
//!
//! Covers:
//! 1. Disjoint keys reserve and release cleanly
//! 2. A conflicting batch leaves nothing behind
//! 3. Concurrent reservations of one key admit exactly one run
//! 4. Release is idempotent
//! 5. Lease expiry frees the key for other runs

mod support;

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use support::{requirement, YieldingStore, HANDLER, PLATE, TIPS};
use uuid::Uuid;
use workcell_scheduler::core::{
    shared, AssetKind, AssetReservationManager, AuditAction, InMemoryAuditSink,
    ReservationStatus, SchedulerError,
};
use workcell_scheduler::infra::InMemoryStore;
use workcell_scheduler::runtime::{force_release, ForceReleaseRequest};

fn manager(store: &InMemoryStore) -> AssetReservationManager {
    AssetReservationManager::new(Arc::new(store.clone()))
}

#[tokio::test]
async fn disjoint_keys_reserve_and_release() {
    let store = InMemoryStore::new();
    let manager = manager(&store);
    let run_a = Uuid::new_v4();
    let mut reqs = vec![
        requirement(AssetKind::Asset, "plate_1", PLATE),
        requirement(AssetKind::Deck, "deck_1", "pylabrobot.resources.Deck"),
    ];

    manager.reserve(&mut reqs, run_a, None, None).await.unwrap();

    assert!(reqs.iter().all(|r| r.reservation_id.is_some()));
    let rows = store.reservations();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == ReservationStatus::Active));
    assert_eq!(manager.claimed_keys(run_a), vec!["asset:plate_1", "deck:deck_1"]);

    let keys = vec!["asset:plate_1".to_string(), "deck:deck_1".to_string()];
    assert_eq!(manager.release(&keys, run_a, None).await.unwrap(), 2);

    assert!(manager.cache_snapshot().is_empty());
    for row in store.reservations() {
        assert_eq!(row.status, ReservationStatus::Released);
        assert!(row.released_at.is_some());
    }
}

#[tokio::test]
async fn conflicting_batch_is_rolled_back() {
    let store = InMemoryStore::new();
    let manager = manager(&store);
    let (run_a, run_b) = (Uuid::new_v4(), Uuid::new_v4());

    manager
        .reserve(&mut [requirement(AssetKind::Asset, "plate_1", PLATE)], run_a, None, None)
        .await
        .unwrap();

    let mut batch = vec![
        requirement(AssetKind::Asset, "tip_1", TIPS),
        requirement(AssetKind::Asset, "plate_1", PLATE),
    ];
    let err = manager.reserve(&mut batch, run_b, None, None).await.unwrap_err();

    match err {
        SchedulerError::AssetAcquisition { lock_key, holders } => {
            assert_eq!(lock_key, "asset:plate_1");
            assert_eq!(holders, vec![run_a]);
        }
        other => panic!("expected acquisition error, got {other:?}"),
    }
    assert!(store.held("asset:tip_1").is_empty());
    assert!(store.reservations().iter().all(|r| r.lock_key != "asset:tip_1"));
    let plate = store.held("asset:plate_1");
    assert_eq!(plate.len(), 1);
    assert_eq!(plate[0].protocol_run_id, run_a);
    assert_eq!(manager.claimants("asset:plate_1"), vec![run_a]);
    assert!(manager.claimed_keys(run_b).is_empty());
    assert!(batch.iter().all(|r| r.reservation_id.is_none()));
}

#[tokio::test]
async fn durable_claim_from_another_process_blocks_reservation() {
    let store = InMemoryStore::new();
    let other_process = manager(&store);
    let this_process = manager(&store);
    let (run_a, run_b) = (Uuid::new_v4(), Uuid::new_v4());

    other_process
        .reserve(&mut [requirement(AssetKind::Asset, "lh_1", HANDLER)], run_a, None, None)
        .await
        .unwrap();

    let err = this_process
        .reserve(&mut [requirement(AssetKind::Asset, "lh_1", HANDLER)], run_b, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::AssetAcquisition { .. }));
    assert!(this_process.cache_snapshot().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_admit_one_run() {
    // Only the manager's key locks stand between the runs: the store accepts
    // duplicate held rows and suspends inside every check and insert.
    let store = InMemoryStore::new();
    store.allow_duplicate_held_keys(true);
    let manager = Arc::new(AssetReservationManager::new(Arc::new(YieldingStore(
        store.clone(),
    ))));

    let attempts = (0..16).map(|_| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let run = Uuid::new_v4();
            let mut reqs = vec![requirement(AssetKind::Asset, "plate_1", PLATE)];
            manager.reserve(&mut reqs, run, None, None).await.map(|()| run)
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<Uuid> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(store.held("asset:plate_1").len(), 1);
    assert_eq!(manager.claimants("asset:plate_1"), winners);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, SchedulerError::AssetAcquisition { .. })));
}

#[tokio::test]
async fn release_twice_is_a_no_op() {
    let store = InMemoryStore::new();
    let manager = manager(&store);
    let run = Uuid::new_v4();
    manager
        .reserve(&mut [requirement(AssetKind::Asset, "plate_1", PLATE)], run, None, None)
        .await
        .unwrap();

    let keys = vec!["asset:plate_1".to_string()];
    assert_eq!(manager.release(&keys, run, None).await.unwrap(), 1);
    let after_first = store.reservations();
    assert_eq!(manager.release(&keys, run, None).await.unwrap(), 0);

    assert_eq!(store.reservations(), after_first);
    assert!(manager.cache_snapshot().is_empty());
}

#[tokio::test]
async fn release_ignores_keys_held_by_other_runs() {
    let store = InMemoryStore::new();
    let manager = manager(&store);
    let (owner, stranger) = (Uuid::new_v4(), Uuid::new_v4());
    manager
        .reserve(&mut [requirement(AssetKind::Asset, "plate_1", PLATE)], owner, None, None)
        .await
        .unwrap();

    let released = manager
        .release(&["asset:plate_1".to_string()], stranger, None)
        .await
        .unwrap();

    assert_eq!(released, 0);
    assert_eq!(store.held("asset:plate_1").len(), 1);
    assert_eq!(manager.claimants("asset:plate_1"), vec![owner]);
}

#[tokio::test]
async fn reserve_then_release_restores_the_cache() {
    let store = InMemoryStore::new();
    let manager = manager(&store);
    let bystander = Uuid::new_v4();
    manager
        .reserve(&mut [requirement(AssetKind::Asset, "shaker", HANDLER)], bystander, None, None)
        .await
        .unwrap();
    let before = manager.cache_snapshot();

    let run = Uuid::new_v4();
    let mut reqs = vec![
        requirement(AssetKind::Asset, "plate_1", PLATE),
        requirement(AssetKind::Asset, "tip_1", TIPS),
    ];
    manager.reserve(&mut reqs, run, None, None).await.unwrap();
    let keys: Vec<String> = reqs.iter().map(|r| r.lock_key()).collect();
    manager.release(&keys, run, None).await.unwrap();

    assert_eq!(manager.cache_snapshot(), before);
}

#[tokio::test]
async fn grants_conflicts_and_releases_are_audited() {
    let store = InMemoryStore::new();
    let audit = InMemoryAuditSink::new(100);
    let manager = manager(&store).with_audit(shared(audit.clone()));
    let (run_a, run_b) = (Uuid::new_v4(), Uuid::new_v4());

    manager
        .reserve(&mut [requirement(AssetKind::Asset, "plate_1", PLATE)], run_a, None, None)
        .await
        .unwrap();
    let _ = manager
        .reserve(&mut [requirement(AssetKind::Asset, "plate_1", PLATE)], run_b, None, None)
        .await;
    manager
        .release(&["asset:plate_1".to_string()], run_a, None)
        .await
        .unwrap();

    let actions: Vec<AuditAction> = audit.events().iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::Reserve, AuditAction::Conflict, AuditAction::Release]
    );
    assert_eq!(audit.events_for(AuditAction::Conflict)[0].run_id, run_b);
}

#[tokio::test]
async fn expired_lease_frees_the_key() {
    let store = InMemoryStore::new();
    let manager = manager(&store).with_timeout(Some(30));
    let (run_a, run_b) = (Uuid::new_v4(), Uuid::new_v4());
    manager
        .reserve(&mut [requirement(AssetKind::Asset, "plate_1", PLATE)], run_a, None, None)
        .await
        .unwrap();

    assert!(manager.expire_overdue(Utc::now()).await.unwrap().is_empty());
    let later = Utc::now() + chrono::Duration::seconds(31);
    let expired = manager.expire_overdue(later).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].status, ReservationStatus::Expired);
    assert!(expired[0].released_at.is_none());

    manager
        .reserve(&mut [requirement(AssetKind::Asset, "plate_1", PLATE)], run_b, None, None)
        .await
        .unwrap();
    assert_eq!(manager.claimants("asset:plate_1"), vec![run_b]);
}

#[tokio::test]
async fn force_release_without_keys_drops_everything_the_run_holds() {
    let store = InMemoryStore::new();
    let manager = manager(&store);
    let run = Uuid::new_v4();
    let mut reqs = vec![
        requirement(AssetKind::Asset, "plate_1", PLATE),
        requirement(AssetKind::Asset, "tip_1", TIPS),
    ];
    manager.reserve(&mut reqs, run, None, None).await.unwrap();

    let response = force_release(
        &manager,
        ForceReleaseRequest {
            run_id: run,
            lock_keys: Vec::new(),
        },
    )
    .await
    .unwrap();

    assert_eq!(response.released, 2);
    assert!(store.reservations().iter().all(|r| !r.status.is_held()));
    assert!(manager.cache_snapshot().is_empty());
}
