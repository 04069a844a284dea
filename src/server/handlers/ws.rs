use std::net::SocketAddr;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use uuid::Uuid;

use crate::server::AppState;

/// `GET /api/ws` — upgrades into a hub-managed client, tagged with the
/// caller's address and user agent for the connected-clients listing.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    let remote_addr = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let id = Uuid::new_v4().to_string();

    ws.on_upgrade(move |socket| async move {
        state.hub.register_client(socket, id, remote_addr, user_agent).await;
    })
}
