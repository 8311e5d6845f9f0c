pub mod admin;
pub mod auth;
pub mod otp;

use serde::Serialize;
use utoipa::ToSchema;

/// Error envelope, documented here for the OpenAPI schema. Actual error
/// serialization lives in the shared error type.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Message response for simple operations.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}
