use crate::hub::BroadcastHub;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::header::USER_AGENT,
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

/// HTTP surface of the hub: the WebSocket endpoint plus the two liveness
/// routes the deployment probes hit.
pub fn router(hub: Arc<BroadcastHub>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(hub)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<BroadcastHub>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, addr, user_agent).await;
    })
}

async fn health_handler(State(hub): State<Arc<BroadcastHub>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "wsClients": hub.registry().len().await,
        "uptime": hub.uptime().as_secs(),
        "timestamp": Utc::now(),
    }))
}

async fn metrics_handler(State(hub): State<Arc<BroadcastHub>>) -> impl IntoResponse {
    Json(hub.metrics().await)
}
