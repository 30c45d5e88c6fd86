//! REST API for the sync daemon.
//!
//! JSON endpoints under `/api` plus the Prometheus exposition at
//! `/metrics`. Authentication is left to the fronting proxy; the daemon
//! itself trusts its callers. Responses use a uniform envelope with a
//! success flag and an optional error object.

use crate::metrics::SyncMetrics;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router as AxumRouter};
use chrono::{DateTime, Utc};
use pppsync_core::{
    Customer, CustomerId, CustomerStatus, Plan, PlanId, Router, RouterId, RosterError, SyncError,
    SyncOrchestrator, SyncResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

/// JSON response wrapper.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Success flag.
    pub success: bool,
    /// Response data.
    pub data: Option<T>,
    /// Error info if failed.
    pub error: Option<ApiErrorResponse>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create successful response.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create error response.
    pub fn error(error: ApiErrorResponse) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiErrorResponse {
    /// Error code (mirrors the HTTP status).
    pub code: u32,
    /// Error message.
    pub message: String,
}

/// Router as exposed over the API. Credentials stay server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterView {
    pub id: RouterId,
    pub host: String,
    pub port: u16,
    pub label: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub customer_count: u64,
}

impl From<Router> for RouterView {
    fn from(r: Router) -> Self {
        Self {
            id: r.id,
            host: r.host,
            port: r.port,
            label: r.label,
            last_sync: r.last_sync,
            customer_count: r.customer_count,
        }
    }
}

/// Customer as exposed over the API. The mirrored secret stays server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerView {
    pub id: CustomerId,
    pub router_id: RouterId,
    pub username: String,
    pub status: CustomerStatus,
    pub plan_id: Option<PlanId>,
    pub external_profile: String,
    pub last_seen_at: DateTime<Utc>,
}

impl From<Customer> for CustomerView {
    fn from(c: Customer) -> Self {
        Self {
            id: c.id,
            router_id: c.router_id,
            username: c.username,
            status: c.status,
            plan_id: c.plan_id,
            external_profile: c.external_profile,
            last_seen_at: c.last_seen_at,
        }
    }
}

/// Health payload for `/api/health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthInfo {
    pub status: String,
    pub message: String,
}

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub orch: SyncOrchestrator,
    pub plans: Arc<Vec<Plan>>,
    pub metrics: Arc<SyncMetrics>,
}

/// Builds the daemon's HTTP router.
pub fn build_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/api/health", get(get_health))
        .route("/api/routers", get(get_routers))
        .route("/api/routers/{id}", delete(delete_router))
        .route("/api/routers/{id}/sync", post(post_sync))
        .route("/api/routers/{id}/customers", get(get_router_customers))
        .route("/api/customers", get(get_customers))
        .route("/api/plans", get(get_plans))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

fn error_response<T: Serialize>(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ApiResponse<T>>) {
    (
        status,
        Json(ApiResponse::error(ApiErrorResponse {
            code: status.as_u16() as u32,
            message: message.into(),
        })),
    )
}

fn sync_error_status(err: &SyncError) -> StatusCode {
    match err {
        SyncError::RouterNotFound(_) => StatusCode::NOT_FOUND,
        SyncError::SyncInProgress(_) => StatusCode::CONFLICT,
        SyncError::Roster(RosterError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        SyncError::Roster(_) => StatusCode::BAD_GATEWAY,
        SyncError::StorageUnavailable(_) | SyncError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `POST /api/routers/{id}/sync`
#[instrument(skip(state))]
async fn post_sync(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<SyncResult>>) {
    let router_id = RouterId(id);
    let started = Instant::now();

    match state.orch.sync_router(&router_id).await {
        Ok(result) => {
            state.metrics.syncs_total.inc();
            state
                .metrics
                .customers_created_total
                .inc_by(result.created_count);
            state
                .metrics
                .customers_updated_total
                .inc_by(result.updated_count);
            state
                .metrics
                .sync_duration_seconds
                .observe(started.elapsed().as_secs_f64());
            info!(router_id = %router_id, synced = result.synced_count, "Sync requested via REST API");
            (StatusCode::OK, Json(ApiResponse::success(result)))
        }
        Err(e) => {
            state.metrics.sync_failures_total.inc();
            let status = sync_error_status(&e);
            error!(router_id = %router_id, error = %e, "Sync failed");
            error_response(status, e.to_string())
        }
    }
}

/// `GET /api/health`
async fn get_health() -> Json<ApiResponse<HealthInfo>> {
    Json(ApiResponse::success(HealthInfo {
        status: "healthy".to_string(),
        message: "pppsyncd is running".to_string(),
    }))
}

/// `GET /api/routers`
async fn get_routers(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<Vec<RouterView>>>) {
    match state.orch.registry().list().await {
        Ok(routers) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                routers.into_iter().map(RouterView::from).collect(),
            )),
        ),
        Err(e) => {
            error!(error = %e, "Failed to list routers");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `DELETE /api/routers/{id}`
///
/// Takes the router's sync lock for the duration of the remove: a sync
/// in flight means 409, and no sync can start mid-deletion and record
/// metadata onto the removed entry.
#[instrument(skip(state))]
async fn delete_router(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let router_id = RouterId(id);

    let Some(_guard) = state.orch.locks().try_acquire(&router_id) else {
        return error_response::<()>(
            StatusCode::CONFLICT,
            format!("sync in progress for router {router_id}"),
        )
        .into_response();
    };

    match state.orch.registry().remove(&router_id).await {
        Ok(true) => {
            info!(router_id = %router_id, "Router deleted via REST API");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error_response::<()>(
            StatusCode::NOT_FOUND,
            format!("router not found: {router_id}"),
        )
        .into_response(),
        Err(e) => {
            error!(router_id = %router_id, error = %e, "Failed to delete router");
            error_response::<()>(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// `GET /api/routers/{id}/customers`
async fn get_router_customers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<Vec<CustomerView>>>) {
    let router_id = RouterId(id);

    match state.orch.registry().get(&router_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("router not found: {router_id}"),
            )
        }
        Err(e) => {
            error!(error = %e, "Failed to look up router");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    }

    match state.orch.directory().list_by_router(&router_id).await {
        Ok(customers) => {
            let mut views: Vec<CustomerView> =
                customers.into_iter().map(CustomerView::from).collect();
            views.sort_by(|a, b| a.username.cmp(&b.username));
            (StatusCode::OK, Json(ApiResponse::success(views)))
        }
        Err(e) => {
            error!(router_id = %router_id, error = %e, "Failed to list customers");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `GET /api/customers`
async fn get_customers(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<Vec<CustomerView>>>) {
    let routers = match state.orch.registry().list().await {
        Ok(routers) => routers,
        Err(e) => {
            error!(error = %e, "Failed to list routers");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let mut views = Vec::new();
    for router in routers {
        match state.orch.directory().list_by_router(&router.id).await {
            Ok(customers) => views.extend(customers.into_iter().map(CustomerView::from)),
            Err(e) => {
                error!(router_id = %router.id, error = %e, "Failed to list customers");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        }
    }
    views.sort_by(|a, b| {
        (a.router_id.0.as_str(), a.username.as_str())
            .cmp(&(b.router_id.0.as_str(), b.username.as_str()))
    });
    (StatusCode::OK, Json(ApiResponse::success(views)))
}

/// `GET /api/plans`
async fn get_plans(State(state): State<AppState>) -> Json<ApiResponse<Vec<Plan>>> {
    Json(ApiResponse::success(state.plans.as_ref().clone()))
}

/// `GET /metrics`
async fn get_metrics(State(state): State<AppState>) -> axum::response::Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.gather(),
    )
        .into_response()
}
