//! Persistence boundary for users, OTP challenges and refresh sessions.
//!
//! Two backends implement [`IdentityStore`]: [`PgStore`] for production and
//! [`MemoryStore`] for local development and tests. All attempt accounting
//! and rotation is done with conditional writes so concurrent callers race
//! safely in either backend.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{OtpChallenge, OtpPurpose, Session, User};

/// Result of a compare-and-swap rotation of a refresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// This caller won the race; the successor session was inserted.
    Rotated,
    /// Another caller rotated or revoked the session first.
    AlreadyRotated,
    /// No live session with that id.
    NotFound,
}

/// Storage operations needed by the OTP engine and session manager.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Ping the backend.
    async fn health_check(&self) -> Result<(), AppError>;

    // ==================== Users ====================

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    async fn insert_user(&self, user: &User) -> Result<(), AppError>;

    /// Mark the account's email as verified. Returns false when no account
    /// with that email exists.
    async fn mark_email_verified(&self, email: &str) -> Result<bool, AppError>;

    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<(), AppError>;

    // ==================== OTP challenges ====================

    /// Fetch the single challenge row for `(email, purpose)`, live or not.
    async fn find_challenge(
        &self,
        email: &str,
        purpose: OtpPurpose,
    ) -> Result<Option<OtpChallenge>, AppError>;

    /// Upsert the challenge for its `(email, purpose)` key, replacing any
    /// previous challenge for that key.
    async fn supersede_challenge(&self, challenge: &OtpChallenge) -> Result<(), AppError>;

    /// Atomically decrement the attempt budget of a live challenge. Returns
    /// the remaining budget, or `None` when the challenge was already
    /// consumed, expired or exhausted.
    async fn fail_attempt(&self, challenge_id: Uuid) -> Result<Option<i32>, AppError>;

    /// Atomically consume a challenge. Returns false when it was already
    /// consumed or exhausted. Expiry is the caller's check; consuming an
    /// expired challenge is how it gets retired.
    async fn consume_challenge(&self, challenge_id: Uuid) -> Result<bool, AppError>;

    // ==================== Sessions ====================

    async fn insert_session(&self, session: &Session) -> Result<(), AppError>;

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, AppError>;

    /// Rotate `session_id`: mark it revoked with `successor.session_id` as
    /// its replacement and insert the successor, but only if it is still
    /// live. Exactly one concurrent caller observes [`RotateOutcome::Rotated`].
    async fn rotate_session(
        &self,
        session_id: Uuid,
        successor: &Session,
    ) -> Result<RotateOutcome, AppError>;

    /// Revoke a single session. Returns false when it was not live.
    async fn revoke_session(&self, session_id: Uuid) -> Result<bool, AppError>;

    /// Revoke every live session in a rotation lineage. Returns the number
    /// of sessions revoked.
    async fn revoke_lineage(&self, lineage_id: Uuid) -> Result<u64, AppError>;

    /// Revoke every live session belonging to a user. Returns the number of
    /// sessions revoked.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError>;
}
