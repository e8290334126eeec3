//! REST endpoints for producers and operators.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::QueueError;
use crate::orchestrator::StatusHandle;
use crate::work::{NewWorkItem, WorkContext, WorkQueue, WorkStatus};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<WorkQueue>,
    pub status: StatusHandle,
}

/// Build the Axum router for the queue and status endpoints.
pub fn api_routes(queue: Arc<WorkQueue>, status: StatusHandle) -> Router {
    let state = ApiState { queue, status };

    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(orchestrator_status))
        .route("/api/work", get(list_work).post(create_work))
        .route("/api/work/summary", get(queue_summary))
        .route("/api/work/{id}", get(get_work))
        .route("/api/work/{id}/cancel", post(cancel_work))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_body(message: impl Into<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": message.into() }))
}

fn parse_id(id: &str) -> Result<Uuid, (StatusCode, Json<serde_json::Value>)> {
    Uuid::parse_str(id).map_err(|_| (StatusCode::BAD_REQUEST, error_body("Invalid work item ID")))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "agent-dispatch"
    }))
}

async fn orchestrator_status(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    Json(status)
}

// ── Work items ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<WorkStatus>,
    project: Option<String>,
}

async fn list_work(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let mut items = match query.status {
        Some(status) => state.queue.by_status(status).await,
        None => state.queue.all().await,
    };
    if let Some(project) = query.project.as_deref() {
        items.retain(|item| item.project.as_deref() == Some(project));
    }

    Json(items)
}

async fn create_work(
    State(state): State<ApiState>,
    Json(new): Json<NewWorkItem>,
) -> impl IntoResponse {
    if new.description.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            error_body(QueueError::EmptyDescription.to_string()),
        );
    }

    if new
        .context
        .as_ref()
        .is_some_and(WorkContext::is_system_generated)
    {
        return (
            StatusCode::BAD_REQUEST,
            error_body("Optimization work can only be generated by the orchestrator"),
        );
    }

    let item = state.queue.add_item(new).await;
    info!(work_id = %item.id, "Work item submitted over HTTP");
    (StatusCode::CREATED, Json(serde_json::json!(item)))
}

async fn queue_summary(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.queue.summary().await)
}

async fn get_work(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    match state.queue.get(id).await {
        Some(item) => (StatusCode::OK, Json(serde_json::json!(item))),
        None => (StatusCode::NOT_FOUND, error_body("Work item not found")),
    }
}

async fn cancel_work(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    match state.queue.cancel(id).await {
        Ok(item) => (StatusCode::OK, Json(serde_json::json!(item))),
        Err(e @ QueueError::NotFound { .. }) => (StatusCode::NOT_FOUND, error_body(e.to_string())),
        Err(e @ QueueError::Terminal { .. }) => (StatusCode::CONFLICT, error_body(e.to_string())),
        Err(e) => (StatusCode::BAD_REQUEST, error_body(e.to_string())),
    }
}
