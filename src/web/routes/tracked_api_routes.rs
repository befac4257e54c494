use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

use crate::web::{
    AppError, AppState,
    models::tracked_api_models::{
        CheckNowResponse, CreateTrackedApiRequest, HealthCheckResponse, TrackedApiResponse,
        UpdateTrackedApiRequest,
    },
    models::{AuthenticatedUser, PageQuery, PageResponse},
};

pub fn create_tracked_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_tracked_api_handler).get(list_tracked_apis_handler))
        .route(
            "/{id}",
            get(get_tracked_api_handler)
                .put(update_tracked_api_handler)
                .delete(delete_tracked_api_handler),
        )
        .route("/{id}/check-now", post(check_now_handler))
        .route("/{id}/health-history", get(health_history_handler))
}

async fn create_tracked_api_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateTrackedApiRequest>,
) -> Result<(StatusCode, Json<TrackedApiResponse>), AppError> {
    let api = app_state
        .monitor_service
        .register(authenticated_user.id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(api.into())))
}

async fn list_tracked_apis_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<TrackedApiResponse>>, AppError> {
    let apis = app_state.monitor_service.list(authenticated_user.id).await?;
    Ok(Json(apis.into_iter().map(Into::into).collect()))
}

async fn get_tracked_api_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<TrackedApiResponse>, AppError> {
    let api = app_state.monitor_service.get(authenticated_user.id, id).await?;
    Ok(Json(api.into()))
}

async fn update_tracked_api_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateTrackedApiRequest>,
) -> Result<Json<TrackedApiResponse>, AppError> {
    let api = app_state
        .monitor_service
        .update(authenticated_user.id, id, payload)
        .await?;
    Ok(Json(api.into()))
}

async fn delete_tracked_api_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    app_state
        .monitor_service
        .delete(authenticated_user.id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn check_now_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<CheckNowResponse>, AppError> {
    let outcome = app_state
        .monitor_service
        .check_now(authenticated_user.id, id)
        .await?;
    Ok(Json(outcome.into()))
}

async fn health_history_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageResponse<HealthCheckResponse>>, AppError> {
    let page = query.page_request();
    let history = app_state
        .monitor_service
        .health_history(authenticated_user.id, id, page)
        .await?;
    let content = history.items.into_iter().map(Into::into).collect();
    Ok(Json(PageResponse::new(content, history.total, page)))
}
