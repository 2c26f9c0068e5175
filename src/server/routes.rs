//! Axum route handlers for the governance HTTP server.
//!
//! # Routes
//!
//! - `GET  /health`                — liveness probe
//! - `POST /v1/decide`             — evaluate an `Intent`, returns a `Decision`
//! - `POST /v1/bundles/{tenant}`   — install a policy bundle (YAML or JSON body)
//! - `GET  /v1/audit/records`      — filtered audit query
//! - `GET  /v1/audit/verify`       — chain verification for a tenant
//! - `GET  /v1/audit/root`         — signed chain-head export

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::audit::AuditQuery;
use crate::errors::GovernanceError;
use crate::orchestrator::Orchestrator;
use crate::types::Intent;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/decide", post(decide_handler))
        .route("/v1/bundles/:tenant", post(install_bundle_handler))
        .route("/v1/audit/records", get(audit_records_handler))
        .route("/v1/audit/verify", get(audit_verify_handler))
        .route("/v1/audit/root", get(audit_root_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "basis-governance",
    }))
}

fn error_response(err: &GovernanceError) -> (StatusCode, Json<Value>) {
    let status = match err {
        GovernanceError::Validation { .. } => StatusCode::BAD_REQUEST,
        GovernanceError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        GovernanceError::TransientStorage(_) | GovernanceError::AuditWriteFailed(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "error": err.denial_code(),
            "message": err.to_string(),
        })),
    )
}

/// POST /v1/decide — evaluate one intent.
async fn decide_handler(
    State(state): State<AppState>,
    Json(intent): Json<Intent>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    tracing::info!(
        intent_id = %intent.id,
        tenant = %intent.tenant_id,
        goal = %intent.goal,
        "evaluating intent"
    );
    let decision = state
        .orchestrator
        .decide(&intent)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(serde_json::to_value(&decision).unwrap_or(Value::Null)))
}

/// POST /v1/bundles/{tenant} — install a policy bundle.
async fn install_bundle_handler(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    body: String,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.orchestrator.install_bundle(&tenant, body.as_bytes()) {
        Ok(bundle) => Ok(Json(json!({
            "policy_id": bundle.policy_id,
            "version": bundle.metadata.version,
        }))),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "validation_error", "message": e.to_string()})),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct AuditRecordsParams {
    tenant_id: String,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    trace_id: Option<String>,
    #[serde(default)]
    actor_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

/// GET /v1/audit/records — filtered audit query.
async fn audit_records_handler(
    State(state): State<AppState>,
    Query(params): Query<AuditRecordsParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let query = AuditQuery {
        event_type: params.event_type,
        trace_id: params.trace_id,
        actor_id: params.actor_id,
        limit: params.limit.unwrap_or(100),
        offset: params.offset.unwrap_or(0),
        ..AuditQuery::for_tenant(params.tenant_id)
    };
    let page = state
        .orchestrator
        .audit()
        .query_async(query)
        .await
        .map_err(|e| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "transient_storage_error", "message": e.to_string()})),
            )
        })?;
    Ok(Json(json!({
        "records": page.records,
        "total": page.total,
        "hasMore": page.has_more,
    })))
}

#[derive(Debug, Deserialize)]
struct VerifyParams {
    tenant_id: String,
    #[serde(default)]
    start_sequence: Option<i64>,
    #[serde(default)]
    limit: Option<usize>,
}

/// GET /v1/audit/verify — walk and verify a tenant's chain.
async fn audit_verify_handler(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let verification = state
        .orchestrator
        .verify_chain(&params.tenant_id, params.start_sequence, params.limit)
        .map_err(|e| error_response(&e))?;
    Ok(Json(serde_json::to_value(&verification).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
struct RootParams {
    tenant_id: String,
}

/// GET /v1/audit/root — signed chain-head export for anchoring elsewhere.
async fn audit_root_handler(
    State(state): State<AppState>,
    Query(params): Query<RootParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let root = state
        .orchestrator
        .export_chain_root(&params.tenant_id)
        .map_err(|e| error_response(&e))?;
    match root {
        Some(root) => Ok(Json(serde_json::to_value(&root).unwrap_or(Value::Null))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "not_found", "message": "tenant has no audit records"})),
        )),
    }
}
