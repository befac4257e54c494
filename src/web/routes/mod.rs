pub mod alert_routes;
pub mod dashboard_routes;
pub mod tracked_api_routes;
