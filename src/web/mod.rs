use axum::{
    Router, middleware as axum_middleware,
    http::Method,
    routing::get,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::monitoring::MonitorService;
use crate::web::routes::*;

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub monitor_service: Arc<MonitorService>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(monitor_service: Arc<MonitorService>) -> Router {
    let app_state = Arc::new(AppState { monitor_service });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let identity = || axum_middleware::from_fn(middleware::identity::gateway_identity);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest(
            "/api/v1/tracked-apis",
            tracked_api_routes::create_tracked_api_router().route_layer(identity()),
        )
        .nest(
            "/api/v1/alerts",
            alert_routes::create_alert_router().route_layer(identity()),
        )
        .nest(
            "/api/v1/dashboard",
            dashboard_routes::create_dashboard_router().route_layer(identity()),
        )
        .with_state(app_state)
        .layer(cors)
}
