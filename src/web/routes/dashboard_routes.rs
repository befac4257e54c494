use axum::{
    Json, Router,
    extract::{Extension, State},
    routing::get,
};
use std::sync::Arc;

use crate::web::{
    AppError, AppState,
    models::AuthenticatedUser,
    models::dashboard_models::DashboardSummary,
};

pub fn create_dashboard_router() -> Router<Arc<AppState>> {
    Router::new().route("/summary", get(dashboard_summary_handler))
}

async fn dashboard_summary_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
) -> Result<Json<DashboardSummary>, AppError> {
    let summary = app_state
        .monitor_service
        .dashboard_summary(authenticated_user.id)
        .await?;
    Ok(Json(summary))
}
