use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::delivery::{DeliveryEvent, TRACKING_PIXEL};
use super::domain::{DebtorId, WorkflowId};
use super::lifecycle::LifecycleError;
use super::repository::CollectionsRepository;
use super::service::{CollectionsError, CollectionsService};

type SharedService<R> = Arc<CollectionsService<R>>;

/// Router exposing the engine's trigger, enrollment, and delivery-tracking endpoints.
pub fn collections_router<R>(service: Arc<CollectionsService<R>>) -> Router
where
    R: CollectionsRepository + 'static,
{
    Router::new()
        .route("/execute-workflows", post(execute_handler::<R>))
        .route("/api/v1/workflows/start", post(start_handler::<R>))
        .route("/api/v1/workflows/stop", post(stop_handler::<R>))
        .route("/api/v1/workflows/retry", post(retry_handler::<R>))
        .route(
            "/api/v1/debtors/:debtor_id/enrollment",
            get(timeline_handler::<R>),
        )
        .route("/delivery-events", post(delivery_events_handler::<R>))
        .route("/open", get(open_handler::<R>))
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ExecuteParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartRequest {
    debtor_id: String,
    #[serde(default)]
    workflow_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StopRequest {
    debtor_id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RetryRequest {
    debtor_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenParams {
    id: Option<String>,
}

pub(crate) async fn execute_handler<R>(
    State(service): State<SharedService<R>>,
    params: Option<Query<ExecuteParams>>,
) -> Response
where
    R: CollectionsRepository + 'static,
{
    let limit = params.and_then(|Query(params)| params.limit);
    match service.execute_workflows(Utc::now(), limit).await {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(error) => {
            warn!(%error, "poll cycle could not load due executions");
            let payload = json!({
                "executed": 0,
                "errors": [error.to_string()],
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn start_handler<R>(
    State(service): State<SharedService<R>>,
    axum::Json(request): axum::Json<StartRequest>,
) -> Response
where
    R: CollectionsRepository + 'static,
{
    let debtor_id = DebtorId::new(request.debtor_id);
    let workflow_id = request.workflow_id.map(WorkflowId::new);
    match service.start_workflow(&debtor_id, workflow_id.as_ref(), Utc::now()) {
        Ok(enrollment) => {
            let payload = json!({
                "success": true,
                "enrollment_id": enrollment.id,
                "workflow_id": enrollment.workflow_id,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => failure(error),
    }
}

pub(crate) async fn stop_handler<R>(
    State(service): State<SharedService<R>>,
    axum::Json(request): axum::Json<StopRequest>,
) -> Response
where
    R: CollectionsRepository + 'static,
{
    let debtor_id = DebtorId::new(request.debtor_id);
    let reason = request
        .reason
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| "stopped by operator".to_string());
    match service.stop_workflow(&debtor_id, &reason, Utc::now()) {
        Ok(stopped) => {
            let payload = json!({
                "success": true,
                "enrollment_id": stopped.map(|enrollment| enrollment.id),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => failure(error),
    }
}

pub(crate) async fn retry_handler<R>(
    State(service): State<SharedService<R>>,
    axum::Json(request): axum::Json<RetryRequest>,
) -> Response
where
    R: CollectionsRepository + 'static,
{
    let debtor_id = DebtorId::new(request.debtor_id);
    match service.retry_workflow(&debtor_id, Utc::now()) {
        Ok(execution) => {
            let payload = json!({
                "success": true,
                "execution_id": execution.id,
                "attempt": execution.attempt,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => failure(error),
    }
}

pub(crate) async fn timeline_handler<R>(
    State(service): State<SharedService<R>>,
    Path(debtor_id): Path<String>,
) -> Response
where
    R: CollectionsRepository + 'static,
{
    let debtor_id = DebtorId::new(debtor_id);
    match service.enrollment_timeline(&debtor_id) {
        Ok(timeline) => (StatusCode::OK, axum::Json(timeline)).into_response(),
        Err(error) => {
            let status = status_for(&error);
            let payload = json!({ "error": error.to_string() });
            (status, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn delivery_events_handler<R>(
    State(service): State<SharedService<R>>,
    axum::Json(events): axum::Json<Vec<DeliveryEvent>>,
) -> Response
where
    R: CollectionsRepository + 'static,
{
    match service.ingest_delivery_events(&events) {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(error) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response()
        }
    }
}

/// Always answers with the pixel; tracking failures are logged only.
pub(crate) async fn open_handler<R>(
    State(service): State<SharedService<R>>,
    params: Option<Query<OpenParams>>,
) -> Response
where
    R: CollectionsRepository + 'static,
{
    let correlation_id = params
        .and_then(|Query(params)| params.id)
        .filter(|id| !id.trim().is_empty());
    if let Some(correlation_id) = correlation_id {
        if let Err(error) = service.record_open(&correlation_id, Utc::now()) {
            warn!(%correlation_id, %error, "open beacon not recorded");
        }
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime::IMAGE_GIF.essence_str()),
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
        ],
        TRACKING_PIXEL,
    )
        .into_response()
}

fn failure(error: CollectionsError) -> Response {
    let status = status_for(&error);
    let payload = json!({
        "success": false,
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

fn status_for(error: &CollectionsError) -> StatusCode {
    match error {
        CollectionsError::Lifecycle(LifecycleError::AlreadyEnrolled(_)) => StatusCode::CONFLICT,
        CollectionsError::Lifecycle(
            LifecycleError::DebtorNotFound(_)
            | LifecycleError::WorkflowNotFound(_)
            | LifecycleError::EnrollmentNotFound(_),
        )
        | CollectionsError::NeverEnrolled(_) => StatusCode::NOT_FOUND,
        CollectionsError::Lifecycle(
            LifecycleError::WorkflowInactive(_)
            | LifecycleError::WorkflowTenantMismatch(_)
            | LifecycleError::EmptyWorkflow(_)
            | LifecycleError::NoDefaultWorkflow
            | LifecycleError::NothingToRetry(_),
        ) => StatusCode::UNPROCESSABLE_ENTITY,
        CollectionsError::Lifecycle(LifecycleError::Repository(_))
        | CollectionsError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
