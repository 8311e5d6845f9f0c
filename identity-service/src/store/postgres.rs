//! PostgreSQL backend.
//!
//! Attempt accounting and rotation use conditional `UPDATE .. RETURNING`
//! statements so concurrent callers cannot double-spend a challenge or
//! rotate the same session twice.

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::models::{OtpChallenge, OtpPurpose, Session, User};

use super::{IdentityStore, RotateOutcome};

/// PostgreSQL-backed [`IdentityStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, password_hash, full_name, role_code,
                               email_verified, is_active, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(&user.role_code)
        .bind(user.email_verified)
        .bind(user.is_active)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_email_verified(&self, email: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE users SET email_verified = TRUE, updated_utc = NOW() WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_utc = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_challenge(
        &self,
        email: &str,
        purpose: OtpPurpose,
    ) -> Result<Option<OtpChallenge>, AppError> {
        let challenge = sqlx::query_as::<_, OtpChallenge>(
            "SELECT * FROM otp_challenges WHERE LOWER(email) = LOWER($1) AND purpose_code = $2",
        )
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(challenge)
    }

    async fn supersede_challenge(&self, challenge: &OtpChallenge) -> Result<(), AppError> {
        // One row per (email, purpose): replacing overwrites the previous
        // challenge's code, budget and expiry in place.
        sqlx::query(
            r#"
            INSERT INTO otp_challenges
                (challenge_id, email, purpose_code, code_hash, attempts_remaining,
                 cooldown_until_utc, expiry_utc, consumed_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8)
            ON CONFLICT (email, purpose_code) DO UPDATE SET
                challenge_id = EXCLUDED.challenge_id,
                code_hash = EXCLUDED.code_hash,
                attempts_remaining = EXCLUDED.attempts_remaining,
                cooldown_until_utc = EXCLUDED.cooldown_until_utc,
                expiry_utc = EXCLUDED.expiry_utc,
                consumed_utc = NULL,
                created_utc = EXCLUDED.created_utc
            "#,
        )
        .bind(challenge.challenge_id)
        .bind(&challenge.email)
        .bind(&challenge.purpose_code)
        .bind(&challenge.code_hash)
        .bind(challenge.attempts_remaining)
        .bind(challenge.cooldown_until_utc)
        .bind(challenge.expiry_utc)
        .bind(challenge.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_attempt(&self, challenge_id: Uuid) -> Result<Option<i32>, AppError> {
        let remaining: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE otp_challenges
            SET attempts_remaining = attempts_remaining - 1
            WHERE challenge_id = $1
              AND consumed_utc IS NULL
              AND attempts_remaining > 0
              AND expiry_utc > NOW()
            RETURNING attempts_remaining
            "#,
        )
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(remaining.map(|(n,)| n))
    }

    async fn consume_challenge(&self, challenge_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE otp_challenges
            SET consumed_utc = NOW()
            WHERE challenge_id = $1
              AND consumed_utc IS NULL
              AND attempts_remaining > 0
            "#,
        )
        .bind(challenge_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_session(&self, session: &Session) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (session_id, user_id, token_hash, lineage_id, parent_id, replaced_by,
                 expiry_utc, revoked_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(session.lineage_id)
        .bind(session.parent_id)
        .bind(session.replaced_by)
        .bind(session.expiry_utc)
        .bind(session.revoked_utc)
        .bind(session.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, AppError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        successor: &Session,
    ) -> Result<RotateOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let won = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked_utc = NOW(), replaced_by = $2
            WHERE session_id = $1 AND revoked_utc IS NULL
            "#,
        )
        .bind(session_id)
        .bind(successor.session_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !won {
            tx.rollback().await?;
            let exists: Option<(Uuid,)> =
                sqlx::query_as("SELECT session_id FROM sessions WHERE session_id = $1")
                    .bind(session_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return Ok(match exists {
                Some(_) => RotateOutcome::AlreadyRotated,
                None => RotateOutcome::NotFound,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO sessions
                (session_id, user_id, token_hash, lineage_id, parent_id, replaced_by,
                 expiry_utc, revoked_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(successor.session_id)
        .bind(successor.user_id)
        .bind(&successor.token_hash)
        .bind(successor.lineage_id)
        .bind(successor.parent_id)
        .bind(successor.replaced_by)
        .bind(successor.expiry_utc)
        .bind(successor.revoked_utc)
        .bind(successor.created_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_utc = NOW() WHERE session_id = $1 AND revoked_utc IS NULL",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_lineage(&self, lineage_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_utc = NOW() WHERE lineage_id = $1 AND revoked_utc IS NULL",
        )
        .bind(lineage_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_utc = NOW() WHERE user_id = $1 AND revoked_utc IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
