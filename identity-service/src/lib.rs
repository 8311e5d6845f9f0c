pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;

use service_core::axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    rate_limit::ip_rate_limit_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::IdentityConfig;
use crate::services::{OtpEngine, SessionManager};
use crate::store::IdentityStore;
use service_core::error::AppError;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::otp::send_otp,
        handlers::otp::resend_otp,
        handlers::otp::verify_otp,
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::refresh_token,
        handlers::auth::me,
        handlers::auth::logout,
        handlers::auth::forgot_password,
        handlers::auth::reset_password,
        handlers::admin::revoke_user_sessions,
    ),
    components(
        schemas(
            handlers::ErrorResponse,
            handlers::MessageResponse,
            handlers::otp::SendOtpRequest,
            handlers::otp::SendOtpResponse,
            handlers::otp::VerifyOtpRequest,
            handlers::otp::VerifyOtpResponse,
            handlers::otp::VerifiedResponse,
            handlers::otp::VerifiedLoginResponse,
            handlers::auth::RegisterRequest,
            handlers::auth::RegisterResponse,
            handlers::auth::LoginRequest,
            handlers::auth::RefreshRequest,
            handlers::auth::LogoutRequest,
            handlers::auth::ForgotPasswordRequest,
            handlers::auth::ResetPasswordRequest,
            handlers::auth::AuthResponse,
            handlers::admin::RevokeSessionsResponse,
            models::Role,
            models::OtpPurpose,
            models::UserResponse,
            models::TokenResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "OTP", description = "One-time code challenges"),
        (name = "Auth", description = "Accounts, sessions and tokens"),
        (name = "Admin", description = "Administrative operations"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub store: Arc<dyn IdentityStore>,
    pub otp: OtpEngine,
    pub sessions: SessionManager,
    pub otp_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
    pub ip_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    // OTP routes carry their own, tighter IP limit on top of the per-key
    // cooldown the engine enforces.
    let otp_limiter = state.otp_rate_limiter.clone();
    let otp_routes = Router::new()
        .route("/otp/send", post(handlers::otp::send_otp))
        .route("/otp/resend", post(handlers::otp::resend_otp))
        .route("/otp/verify", post(handlers::otp::verify_otp))
        .layer(from_fn_with_state(otp_limiter, ip_rate_limit_middleware));

    let login_limiter = state.otp_rate_limiter.clone();
    let credential_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/forgot-password", post(handlers::auth::forgot_password))
        .route("/auth/reset-password", post(handlers::auth::reset_password))
        .layer(from_fn_with_state(login_limiter, ip_rate_limit_middleware));

    let authed_routes = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/logout", post(handlers::auth::logout))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/users/:user_id/revoke-sessions",
            post(handlers::admin::revoke_user_sessions),
        )
        .layer(from_fn(middleware::require_admin))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let mut app = Router::new().route("/health", get(health_check));

    let swagger_enabled = match state.config.environment {
        config::Environment::Dev => true,
        config::Environment::Prod => state.config.swagger.enabled == config::SwaggerMode::Public,
    };
    if swagger_enabled {
        app = app
            .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    let ip_limiter = state.ip_rate_limiter.clone();
    let allowed_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse::<service_core::axum::http::HeaderValue>().ok())
        .collect::<Vec<_>>();

    app.route("/auth/refresh-token", post(handlers::auth::refresh_token))
        .merge(otp_routes)
        .merge(credential_routes)
        .merge(authed_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(service_core::middleware::tracing::REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    service_core::axum::http::Method::GET,
                    service_core::axum::http::Method::POST,
                    service_core::axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    service_core::axum::http::header::AUTHORIZATION,
                    service_core::axum::http::header::CONTENT_TYPE,
                ]),
        )
}

/// Service health check, including the store.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<service_core::axum::Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        e
    })?;

    Ok(service_core::axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
    })))
}
