//! The v0 API served on a loopback port and driven through `ApiClient`

mod support;

use std::path::Path;

use reqwest::StatusCode;
use tokio::net::TcpListener;
use url::Url;

use common::topology::{Topology, TopologyKind};
use common::types::{CacheReason, EntryStatus, OperationKind};

use tiercache_daemon::http_server;
use tiercache_daemon::http_server::api::client::ApiClient;
use tiercache_daemon::http_server::api::v0::entries::{
    DemoteEntryRequest, EvictEntryRequest, ListEntriesRequest, PromoteEntryRequest, StatsRequest,
    DEFAULT_MANUAL_USER,
};
use tiercache_daemon::http_server::api::v0::operations::OperationsRequest;
use tiercache_daemon::http_server::api::v0::sweep::SweepRequest;
use tiercache_daemon::http_server::api::v0::topology::{RecheckTopologyRequest, TopologyRequest};
use tiercache_daemon::http_server::api::v0::users::UserStatsRequest;
use tiercache_daemon::http_server::health::liveness::LivezRequest;
use tiercache_daemon::tiering::PromoteOutcome;

use support::Harness;

const BYTES: &[u8] = b"movie bytes";

async fn serve(h: &Harness) -> ApiClient {
    ApiClient::new(&serve_at(h).await).unwrap()
}

async fn serve_at(h: &Harness) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = http_server::router(h.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{}", addr)).unwrap()
}

fn promote(path: &Path) -> PromoteEntryRequest {
    PromoteEntryRequest {
        path: path.to_path_buf(),
        user: None,
    }
}

#[tokio::test]
async fn test_promote_list_and_demote_over_http() {
    let h = Harness::new(Topology::unified()).await;
    let path = h.media("movies/Film.mkv", BYTES);
    let mut client = serve(&h).await;

    let promoted = client.call(promote(&path)).await.unwrap();
    assert!(matches!(promoted.outcome, PromoteOutcome::Promoted { .. }));
    assert_eq!(promoted.outcome.entry().triggered_by_reason, CacheReason::Manual);

    let listed = client
        .call(ListEntriesRequest {
            status: Some(EntryStatus::Active),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(listed.entries.len(), 1);
    assert_eq!(listed.entries[0].canonical_path, path);

    let usage = client
        .call(UserStatsRequest {
            user: DEFAULT_MANUAL_USER.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(usage.usage.entry_count, 1);
    assert_eq!(usage.usage.total_bytes, BYTES.len() as u64);

    let stats = client.call(StatsRequest {}).await.unwrap();
    assert_eq!(stats.statistics.active_count, 1);
    assert_eq!(stats.statistics.total_bytes, BYTES.len() as u64);

    let demoted = client
        .call(DemoteEntryRequest { path: path.clone() })
        .await
        .unwrap();
    assert_eq!(demoted.entry.canonical_path, path);
    assert!(h.state.registry().get(&path).is_none());

    let history = client
        .call(OperationsRequest {
            path: Some(path.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    let kinds: Vec<OperationKind> = history.operations.iter().map(|op| op.operation).collect();
    assert!(kinds.contains(&OperationKind::Promote));
    assert!(kinds.contains(&OperationKind::Demote));
    h.stop().await;
}

#[tokio::test]
async fn test_errors_map_to_status_codes() {
    let h = Harness::new(Topology::unified()).await;
    let mut client = serve(&h).await;

    let missing = h.source.join("movies/Missing.mkv");
    let err = client.call(promote(&missing)).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));

    let untracked = h.media("movies/Untracked.mkv", BYTES);
    let err = client
        .call(EvictEntryRequest { path: untracked })
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    h.stop().await;
}

#[tokio::test]
async fn test_sweep_endpoint_reports() {
    let h = Harness::new(Topology::unified()).await;
    let stray = h.cache.join("stray.mkv");
    std::fs::write(&stray, BYTES).unwrap();
    let mut client = serve(&h).await;

    let swept = client.call(SweepRequest {}).await.unwrap();
    assert_eq!(swept.report.strays_deleted, 1);
    assert!(!stray.exists());
    h.stop().await;
}

#[tokio::test]
async fn test_liveness_probe() {
    let h = Harness::new(Topology::unified()).await;
    let mut client = serve(&h).await;

    let response = client.call(LivezRequest {}).await.unwrap();
    assert_eq!(response.status, "ok");
    h.stop().await;
}

#[tokio::test]
async fn test_topology_recheck_detects_actual_layout() {
    // Injected split layout; both roots really share the temp filesystem
    let h = Harness::new(Topology::split(true)).await;
    let mut client = serve(&h).await;

    let current = client.call(TopologyRequest {}).await.unwrap();
    assert_eq!(current.topology.kind, TopologyKind::Split);

    let rechecked = client.call(RecheckTopologyRequest {}).await.unwrap();
    assert!(rechecked.changed);
    assert_eq!(rechecked.topology.kind, TopologyKind::Unified);
    assert_eq!(h.state.operator().topology().kind, TopologyKind::Unified);
    h.stop().await;
}

#[tokio::test]
async fn test_event_stream_reports_promotion() {
    let h = Harness::new(Topology::unified()).await;
    let path = h.media("movies/Film.mkv", BYTES);
    let base = serve_at(&h).await;
    let mut client = ApiClient::new(&base).unwrap();

    let mut events = reqwest::get(base.join("/api/v0/events").unwrap())
        .await
        .unwrap();
    assert_eq!(events.status(), StatusCode::OK);

    client.call(promote(&path)).await.unwrap();

    let mut received = String::new();
    while !received.contains("event: entry_added") {
        let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), events.chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        received.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(received.contains("Film.mkv"));
    h.stop().await;
}
