//! End-to-end engine scenarios: quota enforcement, tiered cache movement,
//! replication convergence, violation reporting, and restart behavior.

use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;

use strata_core::{
    BackendDescriptor, BackendId, CoreError, ObjectId, Policy, PolicyKind, ReplicationPolicy,
    Severity, StorageQuotaPolicy, ViolationFilter,
};
use strata_engine::{
    BackendAdapter, EngineConfig, InjectedFault, MemoryAdapter, PolicyEngine, ReplicaStatus,
    ReserveLimits, ResourceTracker, TierConfig, TieredCacheManager,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_engine() -> PolicyEngine {
    PolicyEngine::new(EngineConfig::default().with_tiers(vec![
        TierConfig::new("fast", 100).with_promote_threshold(3),
        TierConfig::new("slow", 1000),
    ]))
    .unwrap()
}

fn add_backend(engine: &PolicyEngine, name: &str) -> Arc<MemoryAdapter> {
    let adapter = Arc::new(MemoryAdapter::new(name));
    engine.register_backend(
        BackendDescriptor::new(name).with_replication(),
        Arc::clone(&adapter) as Arc<dyn BackendAdapter>,
    );
    adapter
}

fn storage_quota(max_bytes: u64, warn_threshold: f64) -> Policy {
    Policy::StorageQuota(StorageQuotaPolicy {
        max_bytes,
        max_files: 0,
        warn_threshold,
    })
}

#[tokio::test]
async fn warn_then_reject_scenario() {
    init_tracing();
    let engine = test_engine();
    add_backend(&engine, "local");
    let backend = BackendId::new("local");

    engine.set_policy(&backend, storage_quota(1000, 0.8)).unwrap();

    // 850 bytes: allowed, but the warn threshold is crossed.
    engine
        .store_object(&backend, &ObjectId::new("obj-1"), Bytes::from(vec![0u8; 850]))
        .await
        .unwrap();

    let warns = engine.violations(&ViolationFilter::any().with_severity(Severity::Warn));
    assert_eq!(warns.len(), 1);
    assert_eq!(warns[0].kind, PolicyKind::StorageQuota);
    assert_eq!(warns[0].current_value, 850);
    assert_eq!(warns[0].limit_value, 1000);

    // A further 200 bytes would total 1050: rejected, usage unchanged.
    let err = engine
        .store_object(&backend, &ObjectId::new("obj-2"), Bytes::from(vec![0u8; 200]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::QuotaExceeded { .. }));
    assert_eq!(engine.usage(&backend).bytes_used, 850);
}

#[tokio::test]
async fn replication_selection_and_repair_scenario() {
    init_tracing();
    let engine = test_engine();
    add_backend(&engine, "local");
    let a = add_backend(&engine, "a");
    let b = add_backend(&engine, "b");
    let c = add_backend(&engine, "c");
    let source = BackendId::new("local");
    let object = ObjectId::new("obj-1");

    // "a" cannot fit the object yet.
    engine
        .set_policy(&BackendId::new("a"), storage_quota(3, 0.8))
        .unwrap();
    engine
        .set_policy(
            &source,
            Policy::Replication(ReplicationPolicy::simple(
                2,
                3,
                vec![BackendId::new("a"), BackendId::new("b"), BackendId::new("c")],
            )),
        )
        .unwrap();

    let receipt = engine
        .store_object(&source, &object, Bytes::from("payload"))
        .await
        .unwrap();
    let set = receipt.replicas.unwrap();
    assert_eq!(set.verified_count(), 2);
    assert!(set.replica(&BackendId::new("a")).is_none());
    assert!(!a.contains(&object));
    assert!(b.contains(&object));
    assert!(c.contains(&object));

    // "c" loses its copy; verification notices, repair re-establishes it.
    c.delete(&object).await.unwrap();
    let verified = engine.verify_object(&object).await.unwrap();
    assert_eq!(
        verified.replica(&BackendId::new("c")).unwrap().status,
        ReplicaStatus::Failed
    );

    let repaired = engine.repair_object(&source, &object).await.unwrap();
    assert_eq!(repaired.verified_count(), 2);
    assert!(c.contains(&object));

    // "c" loses its copy again and then fails persistently; with "a" given
    // capacity, repair brings in "a".
    c.delete(&object).await.unwrap();
    engine.verify_object(&object).await.unwrap();
    for _ in 0..4 {
        c.push_fault(InjectedFault::Transient("503"));
    }
    engine
        .set_policy(&BackendId::new("a"), storage_quota(1000, 0.8))
        .unwrap();

    let repaired = engine.repair_object(&source, &object).await.unwrap();
    assert!(repaired.verified_count() >= 2);
    assert_eq!(
        repaired.replica(&BackendId::new("a")).unwrap().status,
        ReplicaStatus::Verified
    );
    assert!(a.contains(&object));
}

#[tokio::test]
async fn replication_converges_and_repair_is_idempotent() {
    init_tracing();
    let engine = test_engine();
    add_backend(&engine, "local");
    for name in ["a", "b", "c"] {
        add_backend(&engine, name);
    }
    let source = BackendId::new("local");
    let object = ObjectId::new("obj-1");

    engine
        .set_policy(
            &source,
            Policy::Replication(ReplicationPolicy::simple(
                2,
                3,
                vec![BackendId::new("a"), BackendId::new("b"), BackendId::new("c")],
            )),
        )
        .unwrap();
    engine
        .store_object(&source, &object, Bytes::from("payload"))
        .await
        .unwrap();

    // Any number of repairs converges to >= 2 verified, zero pending.
    for _ in 0..3 {
        let set = engine.repair_object(&source, &object).await.unwrap();
        assert!(set.verified_count() >= 2);
        assert_eq!(set.pending_count(), 0);
    }
}

#[tokio::test]
async fn concurrent_ensures_for_same_object_are_sequenced() {
    init_tracing();
    let engine = Arc::new(test_engine());
    add_backend(&engine, "local");
    for name in ["a", "b"] {
        add_backend(&engine, name);
    }
    let source = BackendId::new("local");

    engine
        .set_policy(
            &source,
            Policy::Replication(ReplicationPolicy::simple(
                2,
                2,
                vec![BackendId::new("a"), BackendId::new("b")],
            )),
        )
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let engine = Arc::clone(&engine);
        let source = source.clone();
        handles.push(tokio::spawn(async move {
            engine
                .store_object(
                    &source,
                    &ObjectId::new("shared-obj"),
                    Bytes::from("payload"),
                )
                .await
                .map(|_| i)
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let set = engine.replica_status(&ObjectId::new("shared-obj")).unwrap();
    assert_eq!(set.verified_count(), 2);
    assert_eq!(set.pending_count(), 0);
    assert_eq!(set.replicas.len(), 2);
}

#[test]
fn cache_promotion_evicts_least_recently_accessed() {
    init_tracing();
    let cache = TieredCacheManager::new(vec![
        TierConfig::new("fast", 100).with_promote_threshold(3),
        TierConfig::new("slow", 1000),
    ])
    .unwrap();

    // Five 30-byte objects with ascending access counts; the first three
    // promotions fill the 100-byte fast tier.
    for (i, accesses) in [3u32, 4, 5, 6, 7].iter().enumerate() {
        let object = ObjectId::new(format!("obj-{i}"));
        for _ in 0..*accesses {
            cache.access(&object, 30).unwrap();
        }
    }

    // A sixth object accessed past the threshold promotes and evicts the
    // least recently accessed entry from "fast".
    let sixth = ObjectId::new("obj-5");
    let mut promoted = false;
    for _ in 0..3 {
        let outcome = cache.access(&sixth, 30).unwrap();
        promoted = outcome.promoted;
    }
    assert!(promoted);
    assert_eq!(cache.location(&sixth).unwrap(), "fast");

    // Capacity and single-tier invariants hold throughout.
    let (fast_used, fast_cap) = cache.tier_usage("fast").unwrap();
    let (slow_used, _) = cache.tier_usage("slow").unwrap();
    assert!(fast_used <= fast_cap);
    assert_eq!(fast_used + slow_used, 6 * 30);

    // Idempotent eviction: already within capacity, nothing moves.
    assert!(cache.evict("fast").unwrap().is_empty());
    assert!(cache.evict("slow").unwrap().is_empty());
}

#[tokio::test]
async fn violation_dedup_keeps_one_live_record() {
    init_tracing();
    let engine = test_engine();
    add_backend(&engine, "local");
    let backend = BackendId::new("local");

    engine.set_policy(&backend, storage_quota(1000, 0.5)).unwrap();

    engine
        .store_object(&backend, &ObjectId::new("obj-1"), Bytes::from(vec![0u8; 600]))
        .await
        .unwrap();
    engine
        .store_object(&backend, &ObjectId::new("obj-2"), Bytes::from(vec![0u8; 100]))
        .await
        .unwrap();

    let warns = engine.violations(
        &ViolationFilter::any()
            .with_severity(Severity::Warn)
            .with_resolved(false),
    );
    assert_eq!(warns.len(), 1);
    assert_eq!(warns[0].current_value, 700);
}

/// Live usage never exceeds the hard limit, under randomized concurrent
/// reserve/commit/release traffic.
#[test]
fn reserved_usage_never_exceeds_quota() {
    init_tracing();
    let tracker = Arc::new(ResourceTracker::new());
    let backend = BackendId::new("local");
    let limits = ReserveLimits {
        max_bytes: Some(10_000),
        max_files: None,
    };

    let mut workers: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            let backend = backend.clone();
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..200 {
                    let size = rng.gen_range(1..500);
                    match tracker.reserve(&backend, size, 1, limits) {
                        Ok(reservation) => {
                            if rng.gen_bool(0.6) {
                                tracker.commit(reservation);
                            } else {
                                tracker.release(reservation);
                            }
                        }
                        Err(CoreError::QuotaExceeded { .. }) => {}
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            })
        })
        .collect();

    // Sample the invariant while the workers run.
    {
        let tracker = Arc::clone(&tracker);
        let backend = backend.clone();
        workers.push(std::thread::spawn(move || {
            for _ in 0..50 {
                let usage = tracker.snapshot(&backend, None);
                assert!(usage.bytes_used <= 10_000);
                assert!(usage.projected_bytes() <= 10_000);
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }));
    }

    for worker in workers {
        worker.join().unwrap();
    }

    let usage = tracker.snapshot(&backend, None);
    assert!(usage.bytes_used <= 10_000);
    assert_eq!(usage.pending_bytes, 0);
}

#[tokio::test]
async fn disabled_policy_keeps_usage_history() {
    init_tracing();
    let engine = test_engine();
    add_backend(&engine, "local");
    let backend = BackendId::new("local");

    engine.set_policy(&backend, storage_quota(1000, 0.8)).unwrap();
    engine
        .store_object(&backend, &ObjectId::new("obj-1"), Bytes::from(vec![0u8; 400]))
        .await
        .unwrap();

    engine
        .disable_policy(&backend, PolicyKind::StorageQuota)
        .unwrap();

    // The quota no longer applies, but the counters survived.
    assert_eq!(engine.usage(&backend).bytes_used, 400);
    engine
        .store_object(&backend, &ObjectId::new("obj-2"), Bytes::from(vec![0u8; 900]))
        .await
        .unwrap();
    assert_eq!(engine.usage(&backend).bytes_used, 1300);
}

#[tokio::test]
async fn violation_log_survives_restart() {
    init_tracing();
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");
    let backend = BackendId::new("local");

    {
        let engine =
            PolicyEngine::new(EngineConfig::default().with_state_path(&state_path)).unwrap();
        add_backend(&engine, "local");
        engine.set_policy(&backend, storage_quota(1000, 0.5)).unwrap();
        engine
            .store_object(&backend, &ObjectId::new("obj-1"), Bytes::from(vec![0u8; 600]))
            .await
            .unwrap();
        engine.persist().unwrap();
    }

    let restarted =
        PolicyEngine::new(EngineConfig::default().with_state_path(&state_path)).unwrap();
    let warns = restarted.violations(&ViolationFilter::any().with_severity(Severity::Warn));
    assert_eq!(warns.len(), 1);
    assert_eq!(warns[0].backend_id, backend);

    // Policies also survive; usage counters intentionally start empty.
    assert!(restarted.get_policy(&backend, PolicyKind::StorageQuota).is_some());
    assert_eq!(restarted.usage(&backend).bytes_used, 0);
}
