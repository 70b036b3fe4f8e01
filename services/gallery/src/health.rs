use crate::config::HealthConfig;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Health flag owned by the binary and shared with the HTTP layer
#[derive(Debug, Clone)]
pub struct HealthState {
    healthy: Arc<AtomicBool>,
    region: Arc<str>,
}

impl HealthState {
    pub fn new(initially_healthy: bool, region: impl Into<String>) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(initially_healthy)),
            region: Arc::from(region.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

pub fn create_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/toggle/:status", post(toggle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_health_server(state: HealthState, config: &HealthConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint on {addr}"))?;

    info!(addr = %addr, "Health endpoint listening");

    axum::serve(listener, create_router(state))
        .await
        .context("Health server failed")
}

async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    if state.is_healthy() {
        (StatusCode::OK, Json(serde_json::json!({ "status": "UP" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "DOWN",
                "region": state.region()
            })),
        )
    }
}

async fn toggle_health(
    State(state): State<HealthState>,
    Path(status): Path<bool>,
) -> impl IntoResponse {
    state.set_healthy(status);
    info!(healthy = status, "Health flag changed");
    Json(serde_json::json!({ "healthy": status }))
}
