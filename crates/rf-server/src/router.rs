//! Axum router construction.
//!
//! Builds the full application router with all route groups and middleware
//! layers.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::context::AppContext;
use crate::middleware::auth::auth_middleware;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::auth::logout,
        routes::auth::me,
        routes::videos::upload_video,
        routes::videos::list_videos,
        routes::videos::get_video,
        routes::stream::stream_video,
        routes::events::video_events,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::auth::RegisterRequest,
        routes::auth::LoginRequest,
        routes::auth::UserResponse,
        routes::auth::AuthResponse,
        routes::auth::MeResponse,
        routes::videos::VideoResponse,
        routes::videos::VideoListResponse,
        routes::videos::UploadForm,
        rf_core::VideoStatus,
        rf_core::Sensitivity,
        rf_core::Role,
        rf_core::events::VideoEventPayload,
    ))
)]
struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Auth routes -- always accessible.
    let public_routes = Router::new()
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login));

    let upload_limit = routes::videos::upload_body_limit(ctx.config.storage.max_upload_bytes);

    // Protected API routes.
    let protected_routes = Router::new()
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/me", get(routes::auth::me))
        .route(
            "/videos",
            get(routes::videos::list_videos)
                .post(routes::videos::upload_video)
                .layer(upload_limit),
        )
        .route("/videos/{id}", get(routes::videos::get_video))
        .route("/videos/{id}/stream", get(routes::stream::stream_video))
        .route("/videos/{id}/events", get(routes::events::video_events))
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    let api = public_routes.merge(protected_routes);

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api", api)
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
