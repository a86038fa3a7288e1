//! Authentication route handlers: register, login, logout, me.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use rf_core::{Error, Role, TenantId};
use rf_db::models::User;
use rf_db::queries::{auth, organizations, users};

use crate::authz::Principal;
use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::auth::SessionToken;

const MIN_PASSWORD_LEN: usize = 6;

/// Registration payload. Fields are optional so that missing ones produce a
/// 400 with a readable message.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Join an existing organization instead of creating one.
    pub organization_id: Option<String>,
    /// Requested role when joining an existing organization.
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub organization_id: String,
}

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.to_string(),
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
            organization_id: u.tenant_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MeResponse {
    pub user_id: String,
    pub organization_id: String,
    pub role: Role,
}

fn required(value: Option<String>, field: &str) -> Result<String, Error> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Validation(format!("{field} is required")))
}

fn new_session_expiry(ctx: &AppContext) -> String {
    let hours = ctx.config.auth.session_timeout_hours.max(1) as i64;
    (Utc::now() + Duration::hours(hours)).to_rfc3339()
}

/// POST /api/auth/register
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Missing or invalid fields"),
        (status = 403, description = "Registration disabled"),
        (status = 404, description = "Organization not found"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    State(ctx): State<AppContext>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !ctx.config.auth.allow_registration {
        return Err(Error::Forbidden("Registration is disabled".into()).into());
    }

    let name = required(payload.name, "name")?;
    let email = required(payload.email, "email")?.to_lowercase();
    let password = payload
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::Validation("password is required".into()))?;

    if !email.contains('@') {
        return Err(Error::Validation("email is not valid".into()).into());
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        ))
        .into());
    }

    let conn = rf_db::pool::get_conn(&ctx.db)?;

    if users::get_user_by_email(&conn, &email)?.is_some() {
        return Err(Error::Conflict("User already exists".into()).into());
    }

    let existing_org = match payload.organization_id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            let id: TenantId = raw
                .parse()
                .map_err(|_| Error::Validation("organization_id is not a valid id".into()))?;
            let org = organizations::get_organization(&conn, id)?
                .ok_or_else(|| Error::not_found("organization", id))?;
            Some(org)
        }
        _ => None,
    };

    let hash = bcrypt::hash(&password, ctx.config.auth.bcrypt_cost)
        .map_err(|e| Error::Internal(format!("bcrypt error: {e}")))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let (tenant_id, role) = match existing_org {
        Some(org) => (org.id, payload.role.unwrap_or(Role::Viewer)),
        None => {
            let org = organizations::create_organization(&tx, &format!("{name}'s Organization"), None)?;
            (org.id, Role::Admin)
        }
    };

    let user = users::create_user(&tx, tenant_id, &name, &email, &hash, role)?;
    let token = uuid::Uuid::new_v4().to_string();
    auth::create_token(&tx, user.id, &token, &new_session_expiry(&ctx))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    tracing::info!(user_id = %user.id, tenant_id = %tenant_id, role = %role, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: UserResponse::from(&user),
        }),
    ))
}

/// POST /api/auth/login
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Missing fields"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(ctx): State<AppContext>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = required(payload.email, "email")?;
    let password = payload
        .password
        .ok_or_else(|| Error::Validation("password is required".into()))?;

    let conn = rf_db::pool::get_conn(&ctx.db)?;

    let Some(user) = users::get_user_by_email(&conn, &email)? else {
        return Err(Error::Unauthorized("Invalid credentials".into()).into());
    };

    if !bcrypt::verify(&password, &user.password_hash).unwrap_or(false) {
        return Err(Error::Unauthorized("Invalid credentials".into()).into());
    }

    let token = uuid::Uuid::new_v4().to_string();
    auth::create_token(&conn, user.id, &token, &new_session_expiry(&ctx))?;

    // Opportunistic sweep so the table does not grow without bound.
    if let Err(e) = auth::delete_expired_tokens(&conn, &Utc::now().to_rfc3339()) {
        tracing::debug!("Expired token sweep failed: {e}");
    }

    Ok((
        StatusCode::OK,
        Json(AuthResponse {
            token,
            user: UserResponse::from(&user),
        }),
    ))
}

/// POST /api/auth/logout
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 204, description = "Session ended"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout(
    State(ctx): State<AppContext>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> Result<impl IntoResponse, AppError> {
    let conn = rf_db::pool::get_conn(&ctx.db)?;
    auth::delete_token(&conn, &token)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/me
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current principal", body = MeResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me(Extension(principal): Extension<Principal>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: principal.user_id.to_string(),
        organization_id: principal.tenant_id.to_string(),
        role: principal.role,
    })
}
