//! Account and session handlers: register, login, refresh, logout,
//! password reset and the current-identity endpoint.

use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use service_core::error::AppError;

use crate::middleware::AuthUser;
use crate::models::{OtpPurpose, Role, User, UserResponse};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString, ValidatedJson};
use crate::AppState;

use super::{ErrorResponse, MessageResponse};

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Registration request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    /// CANDIDATE (default) or RECRUITER. ADMIN cannot be self-assigned.
    pub role: Option<Role>,
}

/// Login request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Token refresh request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

/// Logout request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LogoutRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

/// Forgot-password request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

/// Reset-password request, authorized by a PASSWORD_RESET code.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(equal = 6))]
    pub otp_code: String,
    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
}

/// Registration acknowledgement. No session until the email is verified
/// or the user logs in.
#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user: UserResponse,
    pub message: String,
}

/// Authentication response with tokens.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a new account.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Account already exists", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let role = req.role.unwrap_or(Role::Candidate);
    if role == Role::Admin {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Role must be CANDIDATE or RECRUITER"
        )));
    }

    if state.store.find_user_by_email(&req.email).await?.is_some() {
        return Err(AppError::AccountExists);
    }

    let password_hash = hash_password(&Password::new(req.password))?;
    let user = User::new(
        req.email,
        password_hash.into_string(),
        req.full_name,
        role,
    );
    state.store.insert_user(&user).await?;

    tracing::info!(user_id = %user.user_id, role = %user.role_code, "Account registered");

    // Verification is a follow-up step; a mail outage must not lose the
    // freshly created account.
    if let Err(e) = state
        .otp
        .send(&user.email, OtpPurpose::EmailVerification)
        .await
    {
        tracing::warn!(user_id = %user.user_id, error = %e, "Could not send verification code");
    }

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: user.sanitized(),
            message: "Account created. Check your email for a verification code.".to_string(),
        }),
    ))
}

/// Password login.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account deactivated", body = ErrorResponse),
        (status = 404, description = "No account for this email", body = ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let user = state
        .store
        .find_user_by_email(&req.email)
        .await?
        .ok_or(AppError::UnknownAccount)?;

    if !user.is_active {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Account is deactivated"
        )));
    }

    let password = Password::new(req.password);
    let hash = PasswordHashString::new(user.password_hash.clone());
    if verify_password(&password, &hash).is_err() {
        tracing::warn!(user_id = %user.user_id, "Failed login attempt");
        return Err(AppError::Unauthenticated(anyhow::anyhow!(
            "Invalid credentials"
        )));
    }

    if !user.email_verified {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Email address is not verified"
        )));
    }

    let tokens = state.sessions.issue(&user).await?;
    tracing::info!(user_id = %user.user_id, "Login succeeded");

    Ok(Json(AuthResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: tokens.token_type,
        expires_in: tokens.expires_in,
        user: user.sanitized(),
    }))
}

/// Rotate a refresh token into a new token pair.
#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = AuthResponse),
        (status = 401, description = "Invalid, expired or reused token", body = ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let tokens = state.sessions.refresh(&req.refresh_token).await?;

    // The rotation already authenticated the session owner.
    let claims = state
        .sessions
        .tokens()
        .validate_access_token(&tokens.access_token)?;
    let user = state
        .store
        .find_user_by_id(claims.user_id()?)
        .await?
        .ok_or(AppError::UnknownAccount)?;

    Ok(Json(AuthResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: tokens.token_type,
        expires_in: tokens.expires_in,
        user: user.sanitized(),
    }))
}

/// Current authenticated identity.
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current identity", body = UserResponse),
        (status = 401, description = "Unauthenticated", body = ErrorResponse)
    ),
    tag = "Auth",
    security(("bearer_auth" = []))
)]
pub async fn me(AuthUser(current): AuthUser) -> Json<UserResponse> {
    Json(current.user.sanitized())
}

/// Revoke the presented refresh session.
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Session revoked", body = MessageResponse),
        (status = 401, description = "Unauthenticated", body = ErrorResponse)
    ),
    tag = "Auth",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(_current): AuthUser,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.sessions.revoke(&req.refresh_token).await?;
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

/// Start a password reset by emailing a PASSWORD_RESET code.
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset code sent", body = MessageResponse),
        (status = 404, description = "No account for this email", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .otp
        .send(&req.email, OtpPurpose::PasswordReset)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password reset code sent".to_string(),
    }))
}

/// Complete a password reset. Consumes the PASSWORD_RESET challenge,
/// rehashes the password and signs the user out everywhere.
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Wrong, expired or exhausted code", body = ErrorResponse),
        (status = 404, description = "No pending challenge", body = ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let outcome = state
        .otp
        .verify(&req.email, OtpPurpose::PasswordReset, &req.otp_code)
        .await?;

    let user = state
        .store
        .find_user_by_email(&outcome.email)
        .await?
        .ok_or(AppError::UnknownAccount)?;

    let password_hash = hash_password(&Password::new(req.new_password))?;
    state
        .store
        .set_password_hash(user.user_id, password_hash.as_str())
        .await?;
    state.sessions.revoke_all_for_user(user.user_id).await?;

    tracing::info!(user_id = %user.user_id, "Password reset completed");

    Ok(Json(MessageResponse {
        message: "Password updated. Please log in again.".to_string(),
    }))
}
