//! Local HTTP control surface for the supervisor.
//!
//! Bound to localhost only; this is an operator/tooling API, not a public
//! endpoint. The workload API of the children (`POST /run`) is deliberately
//! not proxied here — callers address a server's port directly via
//! `GET /api/server/:module/port`.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::supervisor::error::SupervisorError;
use crate::supervisor::{ServerStatus, Supervisor};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerListResponse {
    pub servers: Vec<ServerStatus>,
}

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub supervisor: Arc<Supervisor>,
    pub listen_addr: String,
}

impl IPCServer {
    pub fn new(supervisor: Arc<Supervisor>, listen_addr: &str) -> Self {
        Self {
            supervisor,
            listen_addr: listen_addr.to_string(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/servers", get(list_servers))
            .route("/api/server/:module/status", get(get_server_status))
            .route("/api/server/:module/port", get(get_server_port))
            .route("/api/server/:module/start", post(start_server_handler))
            .route("/api/server/:module/stop", post(stop_server_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start(self) -> Result<()> {
        tracing::info!("IPC HTTP server starting on {}", self.listen_addr);

        let listen_addr = self.listen_addr.clone();
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
        tracing::info!("IPC listening on http://{}", listen_addr);

        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// GET /api/servers - 설정된 모든 서버의 상태
async fn list_servers(State(state): State<IPCServer>) -> impl IntoResponse {
    Json(ServerListResponse {
        servers: state.supervisor.statuses().await,
    })
}

/// GET /api/server/:module/status
async fn get_server_status(
    State(state): State<IPCServer>,
    Path(module): Path<String>,
) -> Result<Json<ServerStatus>, SupervisorError> {
    let status = state
        .supervisor
        .statuses()
        .await
        .into_iter()
        .find(|s| s.module == module)
        .ok_or(SupervisorError::ModuleNotFound(module))?;
    Ok(Json(status))
}

/// GET /api/server/:module/port - 레지스트리 포트 조회
async fn get_server_port(
    State(state): State<IPCServer>,
    Path(module): Path<String>,
) -> Result<Json<serde_json::Value>, SupervisorError> {
    let port = state
        .supervisor
        .port_for(&module)
        .ok_or_else(|| SupervisorError::ModuleNotFound(module.clone()))?;
    Ok(Json(json!({ "module": module, "port": port })))
}

/// POST /api/server/:module/start - 이미 실행 중이면 no-op
async fn start_server_handler(
    State(state): State<IPCServer>,
    Path(module): Path<String>,
) -> Result<Json<serde_json::Value>, SupervisorError> {
    let config = state
        .supervisor
        .registry()
        .config_for(&module)
        .cloned()
        .ok_or_else(|| SupervisorError::ModuleNotFound(module.clone()))?;

    state.supervisor.start_server(&config).await?;

    let running = state.supervisor.running_modules().await.contains(&module);
    Ok(Json(json!({
        "success": true,
        "module": module,
        "running": running,
    })))
}

/// POST /api/server/:module/stop
async fn stop_server_handler(
    State(state): State<IPCServer>,
    Path(module): Path<String>,
) -> Result<Json<serde_json::Value>, SupervisorError> {
    state.supervisor.stop_server(&module).await?;
    Ok(Json(json!({
        "success": true,
        "module": module,
    })))
}
