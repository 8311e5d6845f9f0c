//! OTP challenge model - one-time codes keyed by (email, purpose).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Purpose of an OTP challenge. Matches the `type` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpPurpose {
    Registration,
    Login,
    PasswordReset,
    EmailVerification,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Registration => "REGISTRATION",
            OtpPurpose::Login => "LOGIN",
            OtpPurpose::PasswordReset => "PASSWORD_RESET",
            OtpPurpose::EmailVerification => "EMAIL_VERIFICATION",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "REGISTRATION" => Some(OtpPurpose::Registration),
            "LOGIN" => Some(OtpPurpose::Login),
            "PASSWORD_RESET" => Some(OtpPurpose::PasswordReset),
            "EMAIL_VERIFICATION" => Some(OtpPurpose::EmailVerification),
            _ => None,
        }
    }

    /// Whether sending for this purpose requires an existing account.
    /// Registration codes prove email ownership before the account exists.
    pub fn requires_account(&self) -> bool {
        !matches!(self, OtpPurpose::Registration)
    }
}

/// OTP challenge entity. At most one row exists per (email, purpose);
/// sending a new code replaces the previous challenge for the key.
#[derive(Debug, Clone, FromRow)]
pub struct OtpChallenge {
    pub challenge_id: Uuid,
    pub email: String,
    pub purpose_code: String,
    pub code_hash: String,
    pub attempts_remaining: i32,
    pub cooldown_until_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl OtpChallenge {
    /// Create a fresh challenge. Only the code's hash is ever stored.
    pub fn new(
        email: &str,
        purpose: OtpPurpose,
        code_hash: String,
        expiry_seconds: i64,
        cooldown_seconds: i64,
        max_attempts: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            challenge_id: Uuid::new_v4(),
            email: email.to_lowercase(),
            purpose_code: purpose.as_str().to_string(),
            code_hash,
            attempts_remaining: max_attempts,
            cooldown_until_utc: now + Duration::seconds(cooldown_seconds),
            expiry_utc: now + Duration::seconds(expiry_seconds),
            consumed_utc: None,
            created_utc: now,
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry_utc
    }

    /// A live challenge can still be verified.
    pub fn is_live(&self) -> bool {
        !self.is_consumed() && !self.is_expired() && self.attempts_remaining > 0
    }

    /// Seconds until a resend is allowed, zero if the cooldown has elapsed.
    pub fn cooldown_remaining(&self) -> i64 {
        (self.cooldown_until_utc - Utc::now()).num_seconds().max(0)
    }
}
