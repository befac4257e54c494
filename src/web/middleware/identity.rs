use axum::{
    body::Body as AxumBody,
    http::{HeaderName, Request},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::web::error::AppError;
use crate::web::models::AuthenticatedUser;

/// Set by the upstream gateway after it has authenticated the caller.
pub const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

pub async fn gateway_identity(mut req: Request<AxumBody>, next: Next) -> Result<Response, AppError> {
    let raw = req
        .headers()
        .get(&USER_ID_HEADER)
        .ok_or_else(|| AppError::Unauthorized("Missing X-User-Id header".to_string()))?;

    let id = raw
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            warn!(header = ?raw, "Rejected request with malformed X-User-Id header.");
            AppError::Unauthorized("Invalid X-User-Id header".to_string())
        })?;

    req.extensions_mut().insert(AuthenticatedUser { id });
    Ok(next.run(req).await)
}
