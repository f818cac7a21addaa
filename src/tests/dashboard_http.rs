// Dashboard scenarios - the HTTP surface against a live node

use super::{eventually, TestNode};
use crate::dashboard::server::{Broadcaster, DashboardServer, DashboardState};
use crate::dashboard::{HistoryLog, StatsSnapshot};
use crate::geo::GeoState;
use crate::identity::ID_HEX_LEN;
use std::sync::Arc;
use std::time::Duration;

fn dashboard_for(node: &TestNode) -> DashboardState {
    DashboardState {
        registry: node.registry.clone(),
        diagnostics: node.diagnostics.clone(),
        relay: node.swarm.clone(),
        geo: Arc::new(GeoState::new(false)),
        history: Arc::new(HistoryLog::default()),
        broadcaster: Arc::new(Broadcaster::default()),
        geo_api_url: "http://127.0.0.1:9/json".to_string(),
        local_id: node.identity.id().to_string(),
    }
}

#[tokio::test]
async fn test_single_node_stats() {
    let node = TestNode::spawn().await;
    let handle = DashboardServer::new(0)
        .start_background(dashboard_for(&node))
        .unwrap();

    let url = format!("http://{}/api/stats", handle.address());
    let stats: StatsSnapshot = reqwest::get(&url).await.unwrap().json().await.unwrap();

    assert_eq!(stats.count, 1);
    assert_eq!(stats.direct, 0);
    assert_eq!(stats.id.len(), ID_HEX_LEN);
    assert_eq!(stats.id, node.identity.id());

    handle.shutdown();
}

#[tokio::test]
async fn test_two_node_stats_converge() {
    let a = TestNode::spawn().await;
    let b = TestNode::spawn().await;
    let handle = DashboardServer::new(0)
        .start_background(dashboard_for(&a))
        .unwrap();
    let url = format!("http://{}/api/stats", handle.address());

    b.connect_to(&a).await;

    let converged = eventually(Duration::from_secs(3), || async {
        let Ok(response) = reqwest::get(&url).await else {
            return false;
        };
        let Ok(stats) = response.json::<StatsSnapshot>().await else {
            return false;
        };
        stats.count == 2 && stats.direct == 1
    })
    .await;
    assert!(converged);

    handle.shutdown();
}

#[tokio::test]
async fn test_landing_page_serves_live_count() {
    let node = TestNode::spawn().await;
    let handle = DashboardServer::new(0)
        .start_background(dashboard_for(&node))
        .unwrap();

    let url = format!("http://{}/", handle.address());
    let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
    assert!(body.contains("<div id=\"count\">1</div>"));
    assert!(body.contains("/events"));

    handle.shutdown();
}
