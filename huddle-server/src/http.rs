//! HTTP API endpoint handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderValue,
    routing::{get, post},
    Json, Router,
};
use huddle_relay::server::RelayServer;
use serde::Serialize;
use tower_http::cors::CorsLayer;

/// Stats payload for dashboards.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDto {
    pub active_connections: usize,
    pub active_meetings: usize,
    pub messages_per_second: f64,
    pub total_messages: u64,
    pub last_activity: Option<String>,
    pub meeting_details: HashMap<String, usize>,
}

/// Build the router with all routes.
pub fn build_router(relay: Arc<RelayServer>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/stats/reset", post(reset_stats))
        .route("/health", get(health_check))
        .with_state(relay)
        .layer(cors_layer(allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new().allow_origin(origins)
}

/// Current relay statistics.
async fn get_stats(State(relay): State<Arc<RelayServer>>) -> Json<StatsDto> {
    let stats = relay.stats().await;
    Json(StatsDto {
        active_connections: stats.active_connections,
        active_meetings: stats.active_meetings,
        messages_per_second: stats.messages_per_second,
        total_messages: stats.total_messages,
        last_activity: stats.last_activity,
        meeting_details: stats.meeting_counts,
    })
}

/// Zero the usage counters.
async fn reset_stats(State(relay): State<Arc<RelayServer>>) -> Json<serde_json::Value> {
    relay.reset_stats().await;
    Json(serde_json::json!({"status": "reset"}))
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
