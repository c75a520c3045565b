use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use sysinfo::System;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::state::{SharedState, StatusResponse};

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    /// Override records for the control loop; parsed there, not here.
    pub overrides: mpsc::Sender<String>,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HostStats {
    uptime_secs: u64,
    load_one: f64,
    memory_used_bytes: u64,
    memory_total_bytes: u64,
}

impl HostStats {
    fn sample() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            uptime_secs: System::uptime(),
            load_one: System::load_average().one,
            memory_used_bytes: sys.used_memory(),
            memory_total_bytes: sys.total_memory(),
        }
    }
}

#[derive(Serialize)]
struct StatusBody {
    #[serde(flatten)]
    status: StatusResponse,
    host: HostStats,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub command: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/override", post(api_override))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.shared.read().await.to_status();
    Json(StatusBody {
        status,
        host: HostStats::sample(),
    })
}

async fn api_override(
    State(state): State<AppState>,
    Json(req): Json<OverrideRequest>,
) -> impl IntoResponse {
    match state.overrides.try_send(req.command) {
        Ok(()) => (StatusCode::ACCEPTED, "queued"),
        Err(TrySendError::Full(_)) => (StatusCode::SERVICE_UNAVAILABLE, "override queue full"),
        Err(TrySendError::Closed(_)) => (StatusCode::SERVICE_UNAVAILABLE, "control loop stopped"),
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {addr}"))?;

    tracing::info!(%addr, "status api listening");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(capacity: usize) -> (Router, mpsc::Receiver<String>, SharedState) {
        let shared = SystemState::shared();
        let (tx, rx) = mpsc::channel(capacity);
        let state = AppState {
            shared: shared.clone(),
            overrides: tx,
        };
        (router(state), rx, shared)
    }

    fn override_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/override")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_returns_snapshot_and_host() {
        let (app, _rx, shared) = app(1);
        shared.write().await.record_system("booted".into());

        let resp = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["events"][0]["detail"], "booted");
        assert!(json["host"]["memory_total_bytes"].is_u64());
        assert!(json["actuators"].is_array());
    }

    #[tokio::test]
    async fn override_is_forwarded_to_loop() {
        let (app, mut rx, _shared) = app(1);
        let resp = app
            .oneshot(override_request(r#"{"command":"101"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.try_recv().unwrap(), "101");
    }

    #[tokio::test]
    async fn override_queue_full_is_503() {
        let (app, _rx, _shared) = app(1);
        let first = app
            .clone()
            .oneshot(override_request(r#"{"command":"101"}"#))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = app
            .oneshot(override_request(r#"{"command":"100"}"#))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn override_without_command_is_rejected() {
        let (app, mut rx, _shared) = app(1);
        let resp = app.oneshot(override_request(r#"{"cmd":"101"}"#)).await.unwrap();
        assert!(resp.status().is_client_error());
        assert!(rx.try_recv().is_err());
    }
}
