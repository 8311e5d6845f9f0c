//! Session manager: token pair issuance, refresh rotation and revocation.
//!
//! Every refresh token is single use. Rotation revokes the presented
//! session and inserts its successor in the same lineage; presenting an
//! already-rotated token revokes the entire lineage before failing the
//! request.

use std::sync::Arc;

use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{Session, TokenResponse, User};
use crate::store::{IdentityStore, RotateOutcome};

use super::token::TokenService;

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn IdentityStore>,
    tokens: TokenService,
}

impl SessionManager {
    pub fn new(store: Arc<dyn IdentityStore>, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Issue a fresh token pair and start a new session lineage.
    pub async fn issue(&self, user: &User) -> Result<TokenResponse, AppError> {
        let session_id = Uuid::new_v4();
        let access_token = self.tokens.generate_access_token(user)?;
        let refresh_token = self
            .tokens
            .generate_refresh_token(user.user_id, session_id)?;

        let session = Session::root(
            session_id,
            user.user_id,
            &refresh_token,
            self.tokens.refresh_token_expiry_days(),
        );
        self.store.insert_session(&session).await?;

        tracing::info!(user_id = %user.user_id, session_id = %session_id, "Session issued");

        Ok(TokenResponse::new(
            access_token,
            refresh_token,
            self.tokens.access_token_expiry_seconds(),
        ))
    }

    /// Rotate a refresh token: revoke the presented session and issue a
    /// successor pair. Reuse of a rotated token kills the whole lineage.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        let claims = self.tokens.validate_refresh_token(refresh_token)?;
        let session_id = claims.session_id()?;

        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| AppError::Unauthenticated(anyhow::anyhow!("Unknown session")))?;

        // The token must be the one this session was created with.
        if session.token_hash != Session::hash_token(refresh_token) {
            return Err(AppError::Unauthenticated(anyhow::anyhow!(
                "Refresh token does not match session"
            )));
        }

        if session.was_rotated() {
            let revoked = self.store.revoke_lineage(session.lineage_id).await?;
            tracing::warn!(
                user_id = %session.user_id,
                lineage_id = %session.lineage_id,
                sessions_revoked = revoked,
                "Refresh token reuse detected, lineage revoked"
            );
            return Err(AppError::TokenReused);
        }
        if session.is_revoked() {
            return Err(AppError::Unauthenticated(anyhow::anyhow!(
                "Session has been revoked"
            )));
        }
        if session.is_expired() {
            return Err(AppError::TokenExpired);
        }

        let user = self
            .store
            .find_user_by_id(session.user_id)
            .await?
            .ok_or_else(|| AppError::Unauthenticated(anyhow::anyhow!("Account no longer exists")))?;
        if !user.is_active {
            return Err(AppError::Forbidden(anyhow::anyhow!("Account is deactivated")));
        }

        let successor_id = Uuid::new_v4();
        let access_token = self.tokens.generate_access_token(&user)?;
        let new_refresh_token = self
            .tokens
            .generate_refresh_token(user.user_id, successor_id)?;
        let successor = session.successor(
            successor_id,
            &new_refresh_token,
            self.tokens.refresh_token_expiry_days(),
        );

        match self.store.rotate_session(session_id, &successor).await? {
            RotateOutcome::Rotated => {}
            // Lost the race to a concurrent refresh of the same token.
            RotateOutcome::AlreadyRotated => {
                let revoked = self.store.revoke_lineage(session.lineage_id).await?;
                tracing::warn!(
                    user_id = %session.user_id,
                    lineage_id = %session.lineage_id,
                    sessions_revoked = revoked,
                    "Concurrent refresh of one token, lineage revoked"
                );
                return Err(AppError::TokenReused);
            }
            RotateOutcome::NotFound => {
                return Err(AppError::Unauthenticated(anyhow::anyhow!(
                    "Unknown session"
                )));
            }
        }

        tracing::info!(
            user_id = %user.user_id,
            session_id = %successor_id,
            lineage_id = %session.lineage_id,
            "Session rotated"
        );

        Ok(TokenResponse::new(
            access_token,
            new_refresh_token,
            self.tokens.access_token_expiry_seconds(),
        ))
    }

    /// Revoke the session behind a refresh token (logout). Idempotent:
    /// unknown or already-revoked tokens succeed quietly.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), AppError> {
        let claims = match self.tokens.validate_refresh_token(refresh_token) {
            Ok(claims) => claims,
            Err(_) => return Ok(()),
        };
        let session_id = claims.session_id()?;

        if let Some(session) = self.store.find_session(session_id).await? {
            if session.token_hash == Session::hash_token(refresh_token) {
                self.store.revoke_session(session_id).await?;
                tracing::info!(user_id = %session.user_id, session_id = %session_id, "Session revoked");
            }
        }
        Ok(())
    }

    /// Revoke every live session a user holds. Used by password reset and
    /// administrative lockout.
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let revoked = self.store.revoke_all_for_user(user_id).await?;
        tracing::info!(user_id = %user_id, sessions_revoked = revoked, "All sessions revoked");
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::models::Role;
    use crate::store::MemoryStore;

    fn manager(store: Arc<dyn IdentityStore>) -> SessionManager {
        let tokens = TokenService::new(&JwtConfig {
            access_secret: "access-secret".to_string(),
            refresh_secret: "refresh-secret".to_string(),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 7,
        });
        SessionManager::new(store, tokens)
    }

    async fn seeded_user(store: &Arc<dyn IdentityStore>) -> User {
        let user = User::new(
            "session@example.com".into(),
            "hash".into(),
            "Session Tester".into(),
            Role::Candidate,
        );
        store.insert_user(&user).await.unwrap();
        user
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_token_reuse_kills_lineage() {
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());
        let user = seeded_user(&store).await;

        let first = manager.issue(&user).await.unwrap();
        let second = manager.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);

        // Replaying the rotated token is reuse and revokes the lineage.
        let err = manager.refresh(&first.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::TokenReused));

        // The successor is collateral damage of the lineage revocation.
        let err = manager.refresh(&second.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn revoked_session_cannot_refresh() {
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());
        let user = seeded_user(&store).await;

        let pair = manager.issue(&user).await.unwrap();
        manager.revoke(&pair.refresh_token).await.unwrap();

        let err = manager.refresh(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());
        let user = seeded_user(&store).await;

        let pair = manager.issue(&user).await.unwrap();
        manager.revoke(&pair.refresh_token).await.unwrap();
        manager.revoke(&pair.refresh_token).await.unwrap();
        manager.revoke("not-even-a-jwt").await.unwrap();
    }

    #[tokio::test]
    async fn deactivated_account_cannot_refresh() {
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());
        let mut user = seeded_user(&store).await;

        let pair = manager.issue(&user).await.unwrap();
        user.is_active = false;
        store.insert_user(&user).await.unwrap();

        let err = manager.refresh(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn revoke_all_sweeps_every_lineage() {
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());
        let user = seeded_user(&store).await;

        let a = manager.issue(&user).await.unwrap();
        let b = manager.issue(&user).await.unwrap();
        assert_eq!(manager.revoke_all_for_user(user.user_id).await.unwrap(), 2);

        assert!(manager.refresh(&a.refresh_token).await.is_err());
        assert!(manager.refresh(&b.refresh_token).await.is_err());
    }
}
