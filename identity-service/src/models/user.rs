//! User model - platform accounts with a single role each.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// User roles. Closed set; every account has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Candidate,
    Recruiter,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Candidate => "CANDIDATE",
            Role::Recruiter => "RECRUITER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "CANDIDATE" => Some(Role::Candidate),
            "RECRUITER" => Some(Role::Recruiter),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// User entity.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role_code: String,
    pub email_verified: bool,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    /// Create a new, unverified user. Emails are stored lowercased so the
    /// unique index enforces case-insensitive uniqueness.
    pub fn new(email: String, password_hash: String, full_name: String, role: Role) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            email: email.to_lowercase(),
            password_hash,
            full_name,
            role_code: role.as_str().to_string(),
            email_verified: false,
            is_active: true,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn role(&self) -> Role {
        Role::parse(&self.role_code).unwrap_or(Role::Candidate)
    }

    /// Convert to sanitized response (no password hash).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

/// User response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub email_verified: bool,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        let role = u.role();
        Self {
            user_id: u.user_id,
            email: u.email,
            full_name: u.full_name,
            role,
            email_verified: u.email_verified,
            is_active: u.is_active,
            created_utc: u.created_utc,
        }
    }
}

/// Token pair response after successful auth.
#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl TokenResponse {
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_codes_round_trip() {
        for role in [Role::Candidate, Role::Recruiter, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("SUPERUSER"), None);
    }

    #[test]
    fn new_user_is_unverified_and_active() {
        let user = User::new(
            "Person@Example.COM".to_string(),
            "$argon2id$fake".to_string(),
            "Test Person".to_string(),
            Role::Candidate,
        );
        assert_eq!(user.email, "person@example.com");
        assert!(!user.email_verified);
        assert!(user.is_active);
    }

    #[test]
    fn sanitized_user_has_no_password_hash() {
        let user = User::new(
            "a@x.com".to_string(),
            "$argon2id$fake".to_string(),
            "A".to_string(),
            Role::Recruiter,
        );
        let json = serde_json::to_value(user.sanitized()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "RECRUITER");
    }
}
