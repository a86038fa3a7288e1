//! Authentication middleware.
//!
//! Resolves an opaque session token into a [`Principal`] and inserts it (and
//! the raw [`SessionToken`]) into request extensions. Applied to protected
//! routes only.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;

use rf_core::Error;
use rf_db::pool::DbPool;

use crate::authz::Principal;
use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Cookie name for browser sessions.
pub const SESSION_COOKIE: &str = "reelforged_session";

/// The token the current request authenticated with.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Find a session token in the request.
///
/// Resolution order:
/// 1. `Authorization: Bearer <token>`
/// 2. Cookie `reelforged_session=<token>`
/// 3. `?access_token=<token>` (EventSource clients cannot set headers)
pub fn extract_token(headers: &HeaderMap, uri: &axum::http::Uri) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for part in cookies.split(';') {
            if let Some(value) = part.trim().strip_prefix(&format!("{SESSION_COOKIE}=")) {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }

    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.access_token)
        .filter(|t| !t.is_empty())
}

/// Look up an unexpired session and its user.
pub fn resolve_principal(db: &DbPool, token: &str) -> rf_core::Result<Option<Principal>> {
    let conn = rf_db::pool::get_conn(db)?;
    let now = Utc::now().to_rfc3339();

    let Some(session) = rf_db::queries::auth::get_valid_token(&conn, token, &now)? else {
        return Ok(None);
    };
    let Some(user) = rf_db::queries::users::get_user(&conn, session.user_id)? else {
        return Ok(None);
    };

    Ok(Some(Principal {
        user_id: user.id,
        tenant_id: user.tenant_id,
        role: user.role,
    }))
}

/// Authentication middleware. Rejects with 401 when no valid session is
/// presented.
pub async fn auth_middleware(
    State(ctx): State<AppContext>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let request_id = request.extensions().get::<RequestId>().map(|r| r.0.clone());
    let reject = |e: Error| match &request_id {
        Some(id) => AppError::new(e).with_request_id(id.clone()),
        None => AppError::new(e),
    };

    let token = extract_token(request.headers(), request.uri())
        .ok_or_else(|| reject(Error::Unauthorized("Authentication required".into())))?;

    let principal = resolve_principal(&ctx.db, &token)
        .map_err(&reject)?
        .ok_or_else(|| reject(Error::Unauthorized("Invalid or expired session".into())))?;

    tracing::trace!(user_id = %principal.user_id, "Authenticated request");

    request.extensions_mut().insert(principal);
    request.extensions_mut().insert(SessionToken(token));
    Ok(next.run(request).await)
}
