//! OTP challenge handlers: send, resend and verify.

use axum::extract::{Json, State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use service_core::error::AppError;

use crate::models::{OtpPurpose, UserResponse};
use crate::utils::ValidatedJson;
use crate::AppState;

use super::ErrorResponse;

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Request to send or resend a verification code.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SendOtpRequest {
    #[validate(email)]
    pub email: String,
    #[serde(rename = "type")]
    pub purpose: OtpPurpose,
}

/// Issued challenge parameters.
#[derive(Debug, Serialize, ToSchema)]
pub struct SendOtpResponse {
    pub cooldown_seconds: i64,
    pub expires_in: i64,
}

/// Request to verify a code.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyOtpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(equal = 6))]
    pub otp_code: String,
    #[serde(rename = "type")]
    pub purpose: OtpPurpose,
}

/// Verification acknowledgement for non-login purposes.
#[derive(Debug, Serialize, ToSchema)]
pub struct VerifiedResponse {
    pub verified: bool,
    #[serde(rename = "type")]
    pub purpose: OtpPurpose,
}

/// Login verification returns a full token payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct VerifiedLoginResponse {
    pub verified: bool,
    #[serde(rename = "type")]
    pub purpose: OtpPurpose,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

/// Verify response, shape depends on the challenge purpose.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum VerifyOtpResponse {
    Login(Box<VerifiedLoginResponse>),
    Verified(VerifiedResponse),
}

// ============================================================================
// Handlers
// ============================================================================

/// Issue a verification code.
#[utoipa::path(
    post,
    path = "/otp/send",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "Code sent", body = SendOtpResponse),
        (status = 400, description = "Account already exists", body = ErrorResponse),
        (status = 404, description = "No account for this email", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = ErrorResponse),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    ),
    tag = "OTP"
)]
pub async fn send_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendOtpRequest>,
) -> Result<Json<SendOtpResponse>, AppError> {
    let ticket = state.otp.send(&req.email, req.purpose).await?;
    Ok(Json(SendOtpResponse {
        cooldown_seconds: ticket.cooldown_seconds,
        expires_in: ticket.expires_in,
    }))
}

/// Resend a verification code, superseding the previous one.
#[utoipa::path(
    post,
    path = "/otp/resend",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "Code resent", body = SendOtpResponse),
        (status = 429, description = "Cooldown active", body = ErrorResponse)
    ),
    tag = "OTP"
)]
pub async fn resend_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendOtpRequest>,
) -> Result<Json<SendOtpResponse>, AppError> {
    let ticket = state.otp.resend(&req.email, req.purpose).await?;
    Ok(Json(SendOtpResponse {
        cooldown_seconds: ticket.cooldown_seconds,
        expires_in: ticket.expires_in,
    }))
}

/// Verify a code. LOGIN challenges answer with a token pair.
#[utoipa::path(
    post,
    path = "/otp/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Code verified", body = VerifyOtpResponse),
        (status = 400, description = "Wrong, expired or exhausted code", body = ErrorResponse),
        (status = 404, description = "No pending challenge", body = ErrorResponse)
    ),
    tag = "OTP"
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<Json<VerifyOtpResponse>, AppError> {
    let outcome = state
        .otp
        .verify(&req.email, req.purpose, &req.otp_code)
        .await?;

    if outcome.purpose == OtpPurpose::Login {
        let user = state
            .store
            .find_user_by_email(&outcome.email)
            .await?
            .ok_or(AppError::UnknownAccount)?;
        if !user.is_active {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Account is deactivated"
            )));
        }

        let tokens = state.sessions.issue(&user).await?;
        return Ok(Json(VerifyOtpResponse::Login(Box::new(
            VerifiedLoginResponse {
                verified: true,
                purpose: outcome.purpose,
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                token_type: tokens.token_type,
                expires_in: tokens.expires_in,
                user: user.sanitized(),
            },
        ))));
    }

    Ok(Json(VerifyOtpResponse::Verified(VerifiedResponse {
        verified: true,
        purpose: outcome.purpose,
    })))
}
