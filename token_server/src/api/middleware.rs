//! Caller identity middleware.
//!
//! Authentication happens upstream (API gateway or session service). It
//! forwards the authenticated user in the `x-user-id` header, and this
//! middleware turns that header into a request extension that handlers
//! extract with `Extension<UserId>`.
//!
//! # Example
//!
//! ```rust,no_run
//! use axum::{Extension, Router, routing::get, middleware};
//! use token_ledger::ledger::UserId;
//! use token_server::api::middleware::user_id_middleware;
//!
//! async fn protected_handler(Extension(user_id): Extension<UserId>) -> String {
//!     format!("user {user_id}")
//! }
//!
//! let app: Router = Router::new()
//!     .route("/me", get(protected_handler))
//!     .layer(middleware::from_fn(user_id_middleware));
//! # let _ = app;
//! ```

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use token_ledger::ledger::UserId;

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Parse the user id header; ids are positive integers
fn user_id_from_headers(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<UserId>().ok())
        .filter(|user_id| *user_id > 0)
}

/// Reject requests without a valid `x-user-id` header
///
/// - **Success**: Injects `user_id: UserId` into request extensions
/// - **Missing or malformed header**: Returns `401 Unauthorized`
pub async fn user_id_middleware(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(user_id) = user_id_from_headers(request.headers()) else {
        tracing::debug!(uri = %request.uri(), "Missing or invalid user id header");
        return Err(StatusCode::UNAUTHORIZED);
    };

    request.extensions_mut().insert(user_id);
    Ok(next.run(request).await)
}
