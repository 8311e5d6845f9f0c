use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application error taxonomy shared by the platform services.
///
/// Every variant maps to a machine-readable `code` in the response body,
/// separate from the human-readable message, so clients can branch on the
/// kind without parsing text.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("No account exists for this email")]
    UnknownAccount,

    #[error("An account with this email already exists")]
    AccountExists,

    #[error("No verification code is pending for this email")]
    OtpNotFound,

    #[error("Verification code has expired")]
    OtpExpired,

    #[error("Invalid verification code")]
    OtpInvalid { attempts_remaining: i32 },

    #[error("Verification attempts exhausted, request a new code")]
    OtpAttemptsExhausted,

    #[error("Please wait {0} seconds before requesting another code")]
    OtpCooldown(u64),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Refresh token reuse detected")]
    TokenReused,

    #[error("Unauthenticated: {0}")]
    Unauthenticated(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Service unavailable")]
    ServiceUnavailable,

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Machine-readable error code carried in every error response.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::UnknownAccount => "USER_NOT_FOUND",
            AppError::AccountExists => "USER_EXISTS",
            AppError::OtpNotFound => "OTP_NOT_FOUND",
            AppError::OtpExpired => "OTP_EXPIRED",
            AppError::OtpInvalid { .. } => "OTP_INVALID",
            AppError::OtpAttemptsExhausted => "OTP_ATTEMPTS_EXHAUSTED",
            AppError::OtpCooldown(_) => "OTP_COOLDOWN",
            AppError::TooManyRequests(..) => "RATE_LIMITED",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::TokenReused => "TOKEN_REUSED",
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::EmailError(_) => "EMAIL_ERROR",
            AppError::DatabaseError(_) | AppError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            AppError::InternalError(_) => "INTERNAL_ERROR",
            AppError::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_)
            | AppError::AccountExists
            | AppError::OtpExpired
            | AppError::OtpInvalid { .. }
            | AppError::OtpAttemptsExhausted => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::UnknownAccount | AppError::OtpNotFound => {
                StatusCode::NOT_FOUND
            }
            AppError::OtpCooldown(_) | AppError::TooManyRequests(..) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::TokenExpired | AppError::TokenReused | AppError::Unauthenticated(_) => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::DatabaseError(_) | AppError::ServiceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::EmailError(_)
            | AppError::InternalError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<lettre::error::Error> for AppError {
    fn from(err: lettre::error::Error) -> Self {
        AppError::EmailError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts_remaining: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Internal details never leak to the caller; they go to the log.
        let message = match &self {
            AppError::InternalError(err)
            | AppError::DatabaseError(err)
            | AppError::ConfigError(err) => {
                tracing::error!(code, error = %err, "request failed");
                match &self {
                    AppError::DatabaseError(_) => "Service temporarily unavailable".to_string(),
                    _ => "Internal server error".to_string(),
                }
            }
            other => other.to_string(),
        };

        let attempts_remaining = match &self {
            AppError::OtpInvalid { attempts_remaining } => Some(*attempts_remaining),
            _ => None,
        };

        let retry_after = match &self {
            AppError::OtpCooldown(secs) => Some(*secs),
            AppError::TooManyRequests(_, retry) => *retry,
            _ => None,
        };

        let mut res = (
            status,
            Json(ErrorBody {
                error: message,
                code,
                attempts_remaining,
                retry_after,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}
