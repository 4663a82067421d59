//! Capacity enforcement through promotion and the eviction job

mod support;

use time::OffsetDateTime;

use common::capacity::CacheLimit;
use common::topology::Topology;
use common::types::CacheReason;

use tiercache_daemon::pool::{Job, JobOutput};
use tiercache_daemon::tiering::{PromoteRequest, TierError};

use support::{playing, Harness};

const FORTY: &[u8] = &[7u8; 40];

#[tokio::test]
async fn test_promotion_evicts_lowest_priority_entry() {
    let h = Harness::with_limit(Topology::unified(), CacheLimit::Bytes(100)).await;
    let ondeck = h.media("tv/A.mkv", FORTY);
    let manual = h.media("tv/B.mkv", FORTY);
    let incoming = h.media("tv/C.mkv", FORTY);
    let operator = h.state.operator();

    operator
        .promote(PromoteRequest::new(&ondeck, CacheReason::OnDeck, "test").for_user("alice"))
        .await
        .unwrap();
    operator
        .promote(PromoteRequest::new(&manual, CacheReason::Manual, "test").for_user("admin"))
        .await
        .unwrap();
    operator
        .promote(PromoteRequest::new(&incoming, CacheReason::Watchlist, "test").for_user("bob"))
        .await
        .unwrap();

    let registry = h.state.registry();
    assert!(registry.get(&ondeck).is_some());
    assert!(registry.get(&manual).is_none());
    assert!(registry.get(&incoming).is_some());
    assert!(registry.active_bytes() <= 100);
    assert_eq!(std::fs::read(&manual).unwrap(), FORTY);
    h.stop().await;
}

#[tokio::test]
async fn test_watched_entry_is_never_evicted() {
    let h = Harness::with_limit(Topology::unified(), CacheLimit::Bytes(100)).await;
    let ondeck = h.media("tv/A.mkv", FORTY);
    let watched = h.media("tv/B.mkv", FORTY);
    let incoming = h.media("tv/C.mkv", FORTY);
    let operator = h.state.operator();

    operator
        .promote(PromoteRequest::new(&ondeck, CacheReason::OnDeck, "test"))
        .await
        .unwrap();
    operator
        .promote(PromoteRequest::new(&watched, CacheReason::Manual, "test"))
        .await
        .unwrap();
    let mut monitor = h.monitor();
    monitor.observe(&[playing("alice", &watched)], OffsetDateTime::now_utc());

    operator
        .promote(PromoteRequest::new(&incoming, CacheReason::Watchlist, "test"))
        .await
        .unwrap();

    let registry = h.state.registry();
    assert!(registry.get(&watched).is_some());
    assert!(registry.get(&ondeck).is_none());
    h.stop().await;
}

#[tokio::test]
async fn test_promotion_refused_when_nothing_can_be_evicted() {
    let h = Harness::with_limit(Topology::unified(), CacheLimit::Bytes(60)).await;
    let watched = h.media("tv/A.mkv", FORTY);
    let incoming = h.media("tv/B.mkv", FORTY);
    let operator = h.state.operator();

    operator
        .promote(PromoteRequest::new(&watched, CacheReason::OnDeck, "test"))
        .await
        .unwrap();
    let mut monitor = h.monitor();
    monitor.observe(&[playing("alice", &watched)], OffsetDateTime::now_utc());

    let err = operator
        .promote(PromoteRequest::new(&incoming, CacheReason::Manual, "test"))
        .await
        .unwrap_err();
    assert!(matches!(err, TierError::CapacityExceeded { needed: 40, .. }));
    assert_eq!(operator.failures().get("capacity_exceeded"), 1);
    assert!(h.state.registry().get(&incoming).is_none());
    assert!(!h.cached_path(&incoming).exists());
    h.stop().await;
}

#[tokio::test]
async fn test_enforce_capacity_job_under_limit_is_a_no_op() {
    let h = Harness::with_limit(Topology::unified(), CacheLimit::Bytes(100)).await;
    let path = h.media("tv/A.mkv", FORTY);
    h.state
        .operator()
        .promote(PromoteRequest::new(&path, CacheReason::OnDeck, "test"))
        .await
        .unwrap();

    let handle = h
        .state
        .jobs()
        .submit(Job::EnforceCapacity {
            actor: "test".to_string(),
        })
        .await
        .unwrap();
    match handle.wait().await.unwrap() {
        JobOutput::Evicted(report) => assert_eq!(report.evicted, 0),
        other => panic!("unexpected output {:?}", other),
    }
    assert!(h.state.registry().get(&path).is_some());
    h.stop().await;
}
