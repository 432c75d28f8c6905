//! services/api/src/web/middleware.rs
//!
//! Resolves the calling user for protected routes.
//!
//! Authentication happens upstream; by the time a request reaches this service the
//! caller's id travels in the `x-user-id` header.

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::warn;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Middleware that reads the `x-user-id` header and inserts the user id into the
/// request extensions for handlers to use.
///
/// A missing header is 401 Unauthorized; a header that is not a UUID is 400 Bad Request.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, (StatusCode, String)> {
    let raw = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                format!("{} header is required", USER_ID_HEADER),
            )
        })?;

    let user_id = Uuid::parse_str(raw.trim()).map_err(|_| {
        warn!("Rejected malformed {} header", USER_ID_HEADER);
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid {} format", USER_ID_HEADER),
        )
    })?;

    req.extensions_mut().insert(user_id);
    Ok(next.run(req).await)
}
