//! Thin JSON adapter over the orchestrator's public operations.
//!
//! Transport concerns stop here: handlers validate nothing beyond what
//! deserialization gives them and delegate straight to the core, mapping
//! [`GridError`] variants onto HTTP status codes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::GridError;
use crate::orchestrator::Orchestrator;
use crate::scheduler::{CompletionReport, JobFilter, Priority, SubmitRequest, Target};

#[derive(Serialize)]
struct SubmitResponse {
    job: crate::scheduler::Job,
    queue_position: u64,
}

#[derive(Deserialize)]
struct RegisterAgentRequest {
    name: String,
    capabilities: Vec<Target>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ClaimRequest {
    agent_id: String,
    job_id: String,
}

#[derive(Deserialize)]
struct CompleteRequest {
    agent_id: String,
    job_id: String,
    #[serde(flatten)]
    report: CompletionReport,
}

#[derive(Serialize)]
struct QueueDepthsResponse {
    high: u64,
    medium: u64,
    low: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(err: GridError) -> Response {
    let status = match &err {
        GridError::Validation(_) => StatusCode::BAD_REQUEST,
        GridError::NotFound(_) => StatusCode::NOT_FOUND,
        GridError::Conflict(_) => StatusCode::CONFLICT,
        GridError::IllegalState(_) => StatusCode::CONFLICT,
        GridError::Forbidden(_) => StatusCode::FORBIDDEN,
        GridError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        GridError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn json_or_error<T: Serialize>(result: crate::error::Result<T>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(err) => error_response(err),
    }
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/jobs", get(list_jobs_handler).post(submit_job_handler))
        .route("/api/jobs/:id", get(get_job_handler))
        .route("/api/jobs/:id/cancel", post(cancel_job_handler))
        .route(
            "/api/agents",
            get(list_agents_handler).post(register_agent_handler),
        )
        .route("/api/agents/:id/heartbeat", post(heartbeat_handler))
        .route("/api/claims", post(claim_handler))
        .route("/api/completions", post(complete_handler))
        .route("/api/queues", get(queue_depths_handler))
        .route("/api/queues/:priority", get(queue_snapshot_handler))
        .route("/healthz", get(health_handler))
        .layer(cors)
        .with_state(orchestrator)
}

pub async fn run_dashboard(
    addr: SocketAddr,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
) {
    let app = router(orchestrator);

    tracing::info!(addr = %addr, "Starting dashboard server");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(addr = %addr, error = %err, "Failed to bind dashboard server");
            return;
        }
    };

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    if let Err(err) = serve.await {
        tracing::error!(error = %err, "Dashboard server failed");
    }
}

async fn health_handler(State(state): State<Arc<Orchestrator>>) -> Response {
    match state.ping_store().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}

async fn submit_job_handler(
    State(state): State<Arc<Orchestrator>>,
    Json(req): Json<SubmitRequest>,
) -> Response {
    match state.submit(req).await {
        Ok((job, queue_position)) => Json(SubmitResponse {
            job,
            queue_position,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_jobs_handler(
    State(state): State<Arc<Orchestrator>>,
    Query(filter): Query<JobFilter>,
) -> Response {
    json_or_error(state.list_jobs(&filter).await)
}

async fn get_job_handler(
    State(state): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Response {
    json_or_error(state.get_job(&id).await)
}

async fn cancel_job_handler(
    State(state): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Response {
    json_or_error(state.cancel_job(&id).await)
}

async fn register_agent_handler(
    State(state): State<Arc<Orchestrator>>,
    Json(req): Json<RegisterAgentRequest>,
) -> Response {
    json_or_error(
        state
            .register_agent(&req.name, req.capabilities, req.metadata)
            .await,
    )
}

async fn list_agents_handler(State(state): State<Arc<Orchestrator>>) -> Response {
    json_or_error(state.list_agents().await)
}

async fn heartbeat_handler(
    State(state): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Response {
    json_or_error(state.heartbeat_agent(&id).await)
}

async fn claim_handler(
    State(state): State<Arc<Orchestrator>>,
    Json(req): Json<ClaimRequest>,
) -> Response {
    json_or_error(state.claim_job(&req.agent_id, &req.job_id).await)
}

async fn complete_handler(
    State(state): State<Arc<Orchestrator>>,
    Json(req): Json<CompleteRequest>,
) -> Response {
    json_or_error(
        state
            .complete_job(&req.agent_id, &req.job_id, req.report)
            .await,
    )
}

async fn queue_depths_handler(State(state): State<Arc<Orchestrator>>) -> Response {
    match state.queue_depths().await {
        Ok(depths) => {
            let mut response = QueueDepthsResponse {
                high: 0,
                medium: 0,
                low: 0,
            };
            for (priority, depth) in depths {
                match priority {
                    Priority::High => response.high = depth,
                    Priority::Medium => response.medium = depth,
                    Priority::Low => response.low = depth,
                }
            }
            Json(response).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn queue_snapshot_handler(
    State(state): State<Arc<Orchestrator>>,
    Path(priority): Path<String>,
) -> Response {
    let priority: Priority = match priority.parse() {
        Ok(priority) => priority,
        Err(err) => return error_response(err),
    };
    json_or_error(state.queue_snapshot(priority).await)
}
