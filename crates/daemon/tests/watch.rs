//! Watch monitor driving promotions and grace-period demotions

mod support;

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use common::path_map::PathMapper;
use common::topology::Topology;
use common::types::{CacheReason, LinkKind};

use tiercache_daemon::pool::JobOutput;
use tiercache_daemon::tiering::{DemoteOutcome, PromoteOutcome, PromoteRequest};
use tiercache_daemon::watch::{WatchService, WatchState};

use support::{after_grace, monitor_config, playing, Harness, ScriptedSessions};

const BYTES: &[u8] = b"episode";

fn service(h: &Harness, provider: Arc<ScriptedSessions>) -> WatchService {
    WatchService::new(
        h.monitor(),
        provider,
        PathMapper::default(),
        h.state.registry().clone(),
        h.state.jobs().clone(),
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn test_playback_promotes_then_grace_expiry_demotes() {
    let h = Harness::new(Topology::unified()).await;
    let path = h.media("tv/Show/S01E01.mkv", BYTES);
    let provider = ScriptedSessions::new();
    let mut watch = service(&h, provider.clone());
    let now = OffsetDateTime::now_utc();

    provider.report(vec![playing("alice", &path)]);
    let jobs = watch.poll_once(now).await.unwrap();
    assert_eq!(jobs.len(), 1);
    let promoted = match jobs.into_iter().next().unwrap().wait().await.unwrap() {
        JobOutput::Promoted(PromoteOutcome::Promoted { entry }) => entry,
        other => panic!("unexpected output {:?}", other),
    };
    assert_eq!(promoted.link_kind, LinkKind::Copy);
    let attributions = h.state.registry().attributions(&path).await.unwrap();
    assert_eq!(attributions[0].attribution_reason, CacheReason::ActiveWatching);

    // Stop playing: grace period starts, nothing happens yet
    provider.report(Vec::new());
    assert!(watch.poll_once(now + Duration::from_secs(5)).await.unwrap().is_empty());
    let session = h.state.sessions().get("alice", &path).unwrap();
    assert_eq!(session.state, WatchState::GracePeriod);
    assert!(watch.expire_due(now + Duration::from_secs(10)).await.is_empty());

    let jobs = watch.expire_due(after_grace(now + Duration::from_secs(5))).await;
    assert_eq!(jobs.len(), 1);
    let outcome = jobs.into_iter().next().unwrap().wait().await.unwrap();
    assert!(matches!(
        outcome,
        JobOutput::Demoted(DemoteOutcome::Demoted { .. })
    ));
    assert!(h.state.registry().get(&path).is_none());
    assert!(h.state.sessions().is_empty());
    assert_eq!(std::fs::read(&path).unwrap(), BYTES);
    h.stop().await;
}

#[tokio::test]
async fn test_resuming_within_grace_keeps_the_entry() {
    let h = Harness::new(Topology::unified()).await;
    let path = h.media("tv/Show/S01E02.mkv", BYTES);
    let provider = ScriptedSessions::new();
    let mut watch = service(&h, provider.clone());
    let now = OffsetDateTime::now_utc();

    provider.report(vec![playing("alice", &path)]);
    for job in watch.poll_once(now).await.unwrap() {
        job.wait().await.unwrap();
    }
    provider.report(Vec::new());
    watch.poll_once(now + Duration::from_secs(5)).await.unwrap();
    provider.report(vec![playing("alice", &path)]);
    assert!(watch
        .poll_once(now + Duration::from_secs(30))
        .await
        .unwrap()
        .is_empty());

    assert!(watch.expire_due(after_grace(now)).await.is_empty());
    assert_eq!(
        h.state.sessions().get("alice", &path).unwrap().state,
        WatchState::Watching
    );
    assert!(h.state.registry().get(&path).is_some());
    h.stop().await;
}

#[tokio::test]
async fn test_watching_cached_file_only_attributes() {
    let h = Harness::new(Topology::unified()).await;
    let path = h.media("tv/Show/S01E03.mkv", BYTES);
    h.state
        .operator()
        .promote(PromoteRequest::new(&path, CacheReason::OnDeck, "test").for_user("alice"))
        .await
        .unwrap();

    let provider = ScriptedSessions::new();
    let mut watch = service(&h, provider.clone());
    let now = OffsetDateTime::now_utc();
    provider.report(vec![playing("bob", &path)]);
    assert!(watch.poll_once(now).await.unwrap().is_empty());
    assert_eq!(h.state.registry().attributions(&path).await.unwrap().len(), 2);

    // bob's session ends; alice's OnDeck attribution keeps the file cached
    provider.report(Vec::new());
    watch.poll_once(now + Duration::from_secs(1)).await.unwrap();
    assert!(watch
        .expire_due(after_grace(now + Duration::from_secs(1)))
        .await
        .is_empty());
    let attributions = h.state.registry().attributions(&path).await.unwrap();
    assert_eq!(attributions.len(), 1);
    assert_eq!(attributions[0].user_id, "alice");
    assert!(h.state.registry().get(&path).is_some());
    h.stop().await;
}

#[tokio::test]
async fn test_provider_outage_marks_sessions_unknown_without_demoting() {
    let h = Harness::new(Topology::unified()).await;
    let path = h.media("tv/Show/S01E04.mkv", BYTES);
    let provider = ScriptedSessions::new();
    let mut watch = service(&h, provider.clone());
    let now = OffsetDateTime::now_utc();

    provider.report(vec![playing("alice", &path)]);
    for job in watch.poll_once(now).await.unwrap() {
        job.wait().await.unwrap();
    }

    provider.fail("server restarting");
    for attempt in 1..=monitor_config().failure_threshold {
        assert!(watch.poll_once(now).await.is_err());
        assert_eq!(watch.monitor().consecutive_failures(), attempt);
    }
    assert_eq!(
        h.state.sessions().get("alice", &path).unwrap().state,
        WatchState::Unknown
    );
    assert!(watch
        .expire_due(now + Duration::from_secs(24 * 3600))
        .await
        .is_empty());
    assert!(h.state.registry().get(&path).is_some());

    provider.report(vec![playing("alice", &path)]);
    watch.poll_once(now + Duration::from_secs(60)).await.unwrap();
    assert_eq!(watch.monitor().consecutive_failures(), 0);
    assert_eq!(
        h.state.sessions().get("alice", &path).unwrap().state,
        WatchState::Watching
    );
    h.stop().await;
}
