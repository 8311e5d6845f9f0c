//! Stateless token issuance and validation.
//!
//! Access and refresh tokens are HS256 JWTs signed with separate secrets,
//! each carrying a `typ` claim so one kind can never be presented as the
//! other. Access token validation touches no storage; revocation lives
//! entirely in the refresh session rows.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{Role, User};

const TYP_ACCESS: &str = "access";
const TYP_REFRESH: &str = "refresh";

/// Claims for access tokens (short-lived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    pub jti: String,
    /// Token kind discriminator
    pub typ: String,
}

impl AccessTokenClaims {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::Unauthenticated(anyhow::anyhow!("Malformed subject claim")))
    }
}

/// Claims for refresh tokens (long-lived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Session ID (matches the session row)
    pub jti: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Token kind discriminator
    pub typ: String,
}

impl RefreshTokenClaims {
    pub fn session_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.jti)
            .map_err(|_| AppError::Unauthenticated(anyhow::anyhow!("Malformed session claim")))
    }
}

/// HS256 token service with separate access and refresh secrets.
#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        }
    }

    /// Generate an access token for a user.
    pub fn generate_access_token(&self, user: &User) -> Result<String, AppError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user.user_id.to_string(),
            email: user.email.clone(),
            role: user.role(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            typ: TYP_ACCESS.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    /// Generate a refresh token whose `jti` is the backing session id.
    pub fn generate_refresh_token(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let exp = now + Duration::days(self.refresh_token_expiry_days);

        let claims = RefreshTokenClaims {
            sub: user_id.to_string(),
            jti: session_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            typ: TYP_REFRESH.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to encode refresh token: {}", e)))
    }

    /// Validate an access token. Pure signature and claim checks, no storage.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, AppError> {
        let claims: AccessTokenClaims = self.decode_claims(token, &self.access_decoding)?;
        if claims.typ != TYP_ACCESS {
            return Err(AppError::Unauthenticated(anyhow::anyhow!(
                "Not an access token"
            )));
        }
        Ok(claims)
    }

    /// Validate a refresh token's signature and claims. Session liveness is
    /// checked separately against the store.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, AppError> {
        let claims: RefreshTokenClaims = self.decode_claims(token, &self.refresh_decoding)?;
        if claims.typ != TYP_REFRESH {
            return Err(AppError::Unauthenticated(anyhow::anyhow!(
                "Not a refresh token"
            )));
        }
        Ok(claims)
    }

    fn decode_claims<C: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        key: &DecodingKey,
    ) -> Result<C, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        decode::<C>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => AppError::Unauthenticated(anyhow::anyhow!("Invalid token: {}", e)),
            })
    }

    /// Access token expiry in seconds, reported to clients.
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    pub fn refresh_token_expiry_days(&self) -> i64 {
        self.refresh_token_expiry_days
    }
}
