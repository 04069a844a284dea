//! HTTP dispatcher: router assembly, cross-cutting middleware (CORS, access
//! logging, panic recovery), and the shared [`AppState`] every handler
//! closes over. Mounts the `/api`, `/grafana`, and `/health` trees.

pub mod config;
pub mod grafana;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::ConnectInfo,
    http::{header, HeaderName, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::analysis::{BaselineManager, PerformanceAnalyzer, RegressionDetector, TrendAnalyzer};
use crate::storage::Storage;
use crate::ws::Hub;
use config::AppConfig;

/// Shared state handed to every handler. Cheap to clone — every field is
/// either an `Arc` or already `Clone`; the analyzers hold no cross-call
/// in-process state beyond what the storage port caches.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub hub: Hub,
    pub baselines: Arc<BaselineManager>,
    pub trends: Arc<TrendAnalyzer>,
    pub regressions: Arc<RegressionDetector>,
    pub analyzer: Arc<PerformanceAnalyzer>,
    pub config: Arc<AppConfig>,
    pub started_at: chrono::DateTime<Utc>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, hub: Hub, config: AppConfig) -> Self {
        Self {
            baselines: Arc::new(BaselineManager::new(storage.clone())),
            trends: Arc::new(TrendAnalyzer::new(storage.clone())),
            regressions: Arc::new(RegressionDetector::new(storage.clone())),
            analyzer: Arc::new(PerformanceAnalyzer::new()),
            storage,
            hub,
            config: Arc::new(config),
            started_at: Utc::now(),
        }
    }
}

/// Assembles the full route table and the cross-cutting layers every
/// request passes through: panic recovery, access logging, CORS.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(handlers::status::api_status))
        .route(
            "/runs",
            get(handlers::runs::list_runs).post(handlers::runs::ingest_run),
        )
        .route(
            "/runs/:id",
            get(handlers::runs::get_run).delete(handlers::runs::delete_run),
        )
        .route("/runs/:id/methods", get(handlers::runs::run_methods))
        .route("/runs/:id/report", get(handlers::runs::run_report))
        .route(
            "/runs/:id/compare/:other",
            get(handlers::runs::compare_runs),
        )
        .route("/runs/:id/analysis", get(handlers::runs::analyze_run))
        .route(
            "/runs/:id/regressions",
            get(handlers::regressions::get_regressions)
                .post(handlers::regressions::detect_regressions),
        )
        .route(
            "/regressions/:id/acknowledge",
            post(handlers::regressions::acknowledge_regression),
        )
        .route("/tests", get(handlers::trends::list_tests))
        .route("/tests/:test/summary", get(handlers::trends::test_summary))
        .route("/tests/:test/trends", get(handlers::trends::test_trends))
        .route(
            "/tests/:test/methods/:name/trends",
            get(handlers::trends::method_trends),
        )
        .route(
            "/tests/:test/clients/:name/trends",
            get(handlers::trends::client_trends),
        )
        .route(
            "/baselines",
            get(handlers::baselines::list_baselines).post(handlers::baselines::create_baseline),
        )
        .route(
            "/baselines/:name",
            get(handlers::baselines::get_baseline)
                .put(handlers::baselines::update_baseline)
                .delete(handlers::baselines::delete_baseline),
        )
        .route("/ws", get(handlers::ws::ws_upgrade));

    let grafana = Router::new()
        .route("/", get(grafana::connection_test))
        .route("/search", post(grafana::search))
        .route("/query", post(grafana::query))
        .route("/annotations", post(grafana::annotations))
        .route("/tag-keys", post(grafana::tag_keys))
        .route("/tag-values", post(grafana::tag_values));

    Router::new()
        .route("/health", get(handlers::status::health))
        .nest("/api", api)
        .nest("/grafana", grafana)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(request_span)
                        .on_response(access_log),
                )
                .layer(cors_layer()),
        )
}

const X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");

/// `Access-Control-Allow-Origin: *`, no auth — the service runs behind a
/// private perimeter. Revisit before exposing it otherwise.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, X_REQUESTED_WITH])
        .max_age(std::time::Duration::from_secs(86400))
}

/// Builds the per-request span carrying `method`, `path`, `remote_addr`, and
/// `user_agent` — populated once up front so every event logged while
/// handling the request (including this span's own close) inherits them.
fn request_span(req: &Request<axum::body::Body>) -> tracing::Span {
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.to_string())
        .unwrap_or_else(|| "-".to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        remote_addr = %remote_addr,
        user_agent = %user_agent,
    )
}

/// Structured access log: `{method, path, remote_addr, user_agent}` come
/// from the enclosing span built by [`request_span`]; this callback adds
/// `status` and `duration_ms` once the response is ready.
fn access_log(response: &Response, latency: std::time::Duration, _span: &tracing::Span) {
    info!(
        status = response.status().as_u16(),
        duration_ms = latency.as_secs_f64() * 1000.0,
        "request completed"
    );
}

/// Recovers a panic inside any handler, logs it with its payload, and
/// returns the standard error body instead of letting tower-http's default
/// plaintext 500 escape.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %message, "request handler panicked");

    let body = json!({
        "error": true,
        "message": "an internal error occurred",
        "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        "timestamp": Utc::now().to_rfc3339(),
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
