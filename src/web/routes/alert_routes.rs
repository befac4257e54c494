use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    routing::{get, patch},
};
use std::sync::Arc;

use crate::web::{
    AppError, AppState,
    models::AuthenticatedUser,
    models::alert_models::{AlertListQuery, AlertListResponse, AlertResponse, UnreadCountResponse},
};

pub fn create_alert_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_alerts_handler))
        .route("/unread-count", get(unread_count_handler))
        .route("/{id}/resolve", patch(resolve_alert_handler))
}

async fn list_alerts_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Query(query): Query<AlertListQuery>,
) -> Result<Json<AlertListResponse>, AppError> {
    let alerts = app_state
        .monitor_service
        .list_alerts(authenticated_user.id, &query)
        .await?;
    Ok(Json(alerts))
}

async fn unread_count_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
) -> Result<Json<UnreadCountResponse>, AppError> {
    let unread_count = app_state
        .monitor_service
        .unread_alert_count(authenticated_user.id)
        .await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

async fn resolve_alert_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<AlertResponse>, AppError> {
    let alert = app_state
        .monitor_service
        .resolve_alert(authenticated_user.id, id)
        .await?;
    Ok(Json(alert))
}
