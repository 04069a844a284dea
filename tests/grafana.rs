use std::sync::Arc;

use axum_test::TestServer;
use benchtrack::server::config::AppConfig;
use benchtrack::server::{build_router, AppState};
use benchtrack::storage::memory::InMemoryStorage;
use benchtrack::storage::Storage;
use benchtrack::ws::Hub;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

fn test_server() -> TestServer {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let (hub, runner) = Hub::new(Default::default());
    tokio::spawn(runner.run());
    let config = AppConfig {
        bind_addr: "127.0.0.1:0".into(),
        max_ws_clients: 100,
        ws_ping_interval_secs: 54,
        ws_pong_timeout_secs: 60,
        retention_days: 90,
    };
    TestServer::new(build_router(AppState::new(storage, hub, config))).unwrap()
}

fn sample_result(id: &str, p95: f64) -> Value {
    let now = Utc::now();
    json!({
        "id": id,
        "test_name": "bench",
        "description": "",
        "git_commit": "",
        "git_branch": "main",
        "start_time": now,
        "end_time": now,
        "target_rps": 100.0,
        "full_results": {
            "clients": {
                "reqwest": {
                    "total_requests": 1000,
                    "total_errors": 5,
                    "error_rate": 0.5,
                    "success_rate": 99.5,
                    "methods": {
                        "get": {
                            "count": 1000,
                            "avg": p95 * 0.7,
                            "min": p95 * 0.2,
                            "max": p95 * 1.3,
                            "p50": p95 * 0.6,
                            "p90": p95 * 0.9,
                            "p95": p95,
                            "p99": p95 * 1.1,
                            "std_dev": 20.0,
                            "coeff_var": 15.0,
                            "throughput": 500.0,
                            "success_rate": 99.5,
                            "error_rate": 0.5
                        }
                    },
                    "connections_opened": 10,
                    "connections_closed": 10,
                    "error_types": {}
                }
            }
        }
    })
}

#[tokio::test]
async fn connection_test_succeeds_against_reachable_storage() {
    let server = test_server();
    let resp = server.get("/grafana/").await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["status"], "success");
}

#[tokio::test]
async fn search_returns_metric_identifiers_matching_the_target() {
    let server = test_server();
    server
        .post("/api/runs")
        .json(&sample_result("run-1", 50.0))
        .await
        .assert_status_ok();

    let resp = server
        .post("/grafana/search")
        .json(&json!({ "target": "bench.overall.p95" }))
        .await;
    resp.assert_status_ok();
    let names = resp.json::<Vec<String>>();
    assert!(names.contains(&"bench.overall.p95_latency".to_string()));
    assert!(names.iter().all(|n| n.contains("p95")));
}

#[tokio::test]
async fn query_returns_ascending_timeserie_datapoints() {
    let server = test_server();
    server
        .post("/api/runs")
        .json(&sample_result("run-1", 50.0))
        .await
        .assert_status_ok();
    server
        .post("/api/runs")
        .json(&sample_result("run-2", 60.0))
        .await
        .assert_status_ok();

    let from = (Utc::now() - Duration::days(1)).to_rfc3339();
    let to = (Utc::now() + Duration::hours(1)).to_rfc3339();

    let resp = server
        .post("/grafana/query")
        .json(&json!({
            "range": { "from": from, "to": to },
            "targets": [{ "target": "bench.overall.p95_latency", "refId": "A", "type": "timeserie" }],
        }))
        .await;
    resp.assert_status_ok();
    let body = resp.json::<Value>();
    let datapoints = body[0]["datapoints"].as_array().unwrap();
    assert_eq!(datapoints.len(), 2);
    let t0 = datapoints[0][1].as_i64().unwrap();
    let t1 = datapoints[1][1].as_i64().unwrap();
    assert!(t0 <= t1, "datapoints must be in ascending timestamp order");
}

#[tokio::test]
async fn tag_keys_lists_the_static_taxonomy() {
    let server = test_server();
    let resp = server.post("/grafana/tag-keys").json(&json!({})).await;
    resp.assert_status_ok();
    let keys: Vec<Value> = resp.json();
    let texts: Vec<String> = keys
        .iter()
        .map(|k| k["text"].as_str().unwrap().to_string())
        .collect();
    assert!(texts.contains(&"test_name".to_string()));
    assert!(texts.contains(&"client".to_string()));
    assert!(texts.contains(&"metric_type".to_string()));
}

#[tokio::test]
async fn tag_values_for_test_name_lists_ingested_tests() {
    let server = test_server();
    server
        .post("/api/runs")
        .json(&sample_result("run-1", 50.0))
        .await
        .assert_status_ok();

    let resp = server
        .post("/grafana/tag-values")
        .json(&json!({ "key": "test_name" }))
        .await;
    resp.assert_status_ok();
    let values: Vec<Value> = resp.json();
    assert!(values.iter().any(|v| v["text"] == "bench"));
}
