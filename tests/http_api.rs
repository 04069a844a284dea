use std::sync::Arc;

use axum_test::TestServer;
use benchtrack::server::config::AppConfig;
use benchtrack::server::{build_router, AppState};
use benchtrack::storage::memory::InMemoryStorage;
use benchtrack::storage::Storage;
use benchtrack::ws::Hub;
use chrono::Utc;
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

fn sample_result(id: &str) -> Value {
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
                            "avg": 50.0,
                            "min": 10.0,
                            "max": 200.0,
                            "p50": 45.0,
                            "p90": 90.0,
                            "p95": 100.0,
                            "p99": 150.0,
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

fn method_summary(p95: f64) -> Value {
    json!({
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
    })
}

fn multi_client_result(id: &str) -> Value {
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
                        "get": method_summary(100.0),
                        "post": method_summary(300.0)
                    },
                    "connections_opened": 10,
                    "connections_closed": 10,
                    "error_types": {}
                },
                "hyper": {
                    "total_requests": 1000,
                    "total_errors": 5,
                    "error_rate": 0.5,
                    "success_rate": 99.5,
                    "methods": {
                        "get": method_summary(500.0)
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
async fn client_and_method_trends_scope_to_their_own_data() {
    let server = test_server();
    server
        .post("/api/runs")
        .json(&multi_client_result("run-1"))
        .await
        .assert_status_ok();

    let reqwest_trend = server
        .get("/api/tests/bench/clients/reqwest/trends")
        .await;
    reqwest_trend.assert_status_ok();
    let reqwest_points = reqwest_trend.json::<Value>()["points"].as_array().unwrap().clone();
    assert_eq!(reqwest_points[0]["value"], 200.0);

    let hyper_trend = server.get("/api/tests/bench/clients/hyper/trends").await;
    hyper_trend.assert_status_ok();
    let hyper_points = hyper_trend.json::<Value>()["points"].as_array().unwrap().clone();
    assert_eq!(hyper_points[0]["value"], 500.0);

    let get_trend = server.get("/api/tests/bench/methods/get/trends").await;
    get_trend.assert_status_ok();
    let get_points = get_trend.json::<Value>()["points"].as_array().unwrap().clone();
    assert_eq!(get_points[0]["value"], 300.0);

    let post_trend = server.get("/api/tests/bench/methods/post/trends").await;
    post_trend.assert_status_ok();
    let post_points = post_trend.json::<Value>()["points"].as_array().unwrap().clone();
    assert_eq!(post_points[0]["value"], 300.0);
}

#[tokio::test]
async fn ingest_then_list_returns_the_run() {
    let server = test_server();

    let ingested = server.post("/api/runs").json(&sample_result("run-1")).await;
    ingested.assert_status_ok();
    let body = ingested.json::<Value>();
    assert_eq!(body["id"], "run-1");
    assert_eq!(body["test_name"], "bench");
    assert_eq!(body["best_client"], "reqwest");

    let list = server.get("/api/runs").add_query_param("test", "bench").await;
    list.assert_status_ok();
    assert_eq!(list.json::<Value>()["count"], 1);
}

#[tokio::test]
async fn get_missing_run_returns_the_standard_error_envelope() {
    let server = test_server();

    let resp = server.get("/api/runs/missing").await;
    resp.assert_status_not_found();
    let body = resp.json::<Value>();
    assert_eq!(body["error"], true);
    assert_eq!(body["status"], 404);
    assert!(body["message"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn delete_run_is_idempotent_second_call_404s() {
    let server = test_server();
    server.post("/api/runs").json(&sample_result("run-1")).await.assert_status_ok();

    server.delete("/api/runs/run-1").await.assert_status_ok();
    server.delete("/api/runs/run-1").await.assert_status_not_found();
}

#[tokio::test]
async fn compare_runs_reports_direction_from_path_order() {
    let server = test_server();
    server.post("/api/runs").json(&sample_result("base")).await.assert_status_ok();
    server.post("/api/runs").json(&sample_result("cur")).await.assert_status_ok();

    let resp = server.get("/api/runs/base/compare/cur").await;
    resp.assert_status_ok();
    let body = resp.json::<Value>();
    assert_eq!(body["run_id"], "cur");
    assert_eq!(body["baseline_run_id"], "base");
}

#[tokio::test]
async fn baseline_lifecycle_create_get_delete() {
    let server = test_server();
    server.post("/api/runs").json(&sample_result("run-1")).await.assert_status_ok();

    let created = server
        .post("/api/baselines")
        .json(&json!({ "run_id": "run-1", "name": "nightly", "description": "nightly baseline" }))
        .await;
    created.assert_status_ok();
    assert_eq!(created.json::<Value>()["name"], "nightly");

    let fetched = server.get("/api/baselines/nightly").await;
    fetched.assert_status_ok();
    assert_eq!(fetched.json::<Value>()["run_id"], "run-1");

    server.delete("/api/baselines/nightly").await.assert_status_ok();
    server.get("/api/baselines/nightly").await.assert_status_not_found();
}

#[tokio::test]
async fn detect_regressions_against_sequential_baseline() {
    let server = test_server();
    server.post("/api/runs").json(&sample_result("base")).await.assert_status_ok();
    server.post("/api/runs").json(&sample_result("cur")).await.assert_status_ok();

    let resp = server.post("/api/runs/cur/regressions").await;
    resp.assert_status_ok();
    let body = resp.json::<Value>();
    assert_eq!(body["run_id"], "cur");
    assert_eq!(body["baseline_run_id"], "base");
}

#[tokio::test]
async fn health_reports_healthy() {
    let server = test_server();
    server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn api_status_reports_counters() {
    let server = test_server();
    server.post("/api/runs").json(&sample_result("run-1")).await.assert_status_ok();

    let resp = server.get("/api/status").await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["total_runs"], 1);
}
