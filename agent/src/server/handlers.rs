//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::errors::AgentError;
use crate::heartbeat::scheduler::JobStatus;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::server::state::ServerState;
use crate::storage::memory::StorageStats;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "phoenix".to_string(),
        version: state.version.clone(),
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Keeper status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub providers: Vec<String>,
    pub active_provider: String,
    pub deployment: Option<Deployment>,
    pub status: Option<DeploymentStatus>,
    pub heal_retries: u32,
    pub heal_max_retries: u32,
    pub storage: Option<StorageStats>,
    pub jobs: Vec<JobStatus>,
}

/// Status handler
pub async fn status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let deployment = state.manager.active_deployment();
    let status = match &deployment {
        Some(_) => Some(state.manager.status().await.unwrap_or(DeploymentStatus::Unknown)),
        None => None,
    };

    Json(StatusResponse {
        providers: state.manager.provider_names(),
        active_provider: state.manager.active_provider().name().to_string(),
        deployment,
        status,
        heal_retries: state.healer.retry_count(),
        heal_max_retries: state.healer.max_retries(),
        storage: state.storage.stats().await.ok(),
        jobs: state.scheduler.status(),
    })
}

/// Manual job run response
#[derive(Debug, Serialize)]
pub struct RunJobResponse {
    pub job: String,
    pub success: bool,
    pub message: String,
}

/// Run a heartbeat job now
pub async fn run_job_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<RunJobResponse>) {
    let (code, success, message) = match state.scheduler.run_now(&name).await {
        Ok(()) => (StatusCode::OK, true, "Job completed".to_string()),
        Err(e @ AgentError::UnknownJob(_)) => (StatusCode::NOT_FOUND, false, e.to_string()),
        Err(e @ AgentError::SchedulerError(_)) => (StatusCode::CONFLICT, false, e.to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, false, format!("Job failed: {}", e)),
    };

    (
        code,
        Json(RunJobResponse {
            job: name,
            success,
            message,
        }),
    )
}
