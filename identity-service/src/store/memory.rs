//! In-memory backend for local development and tests.
//!
//! Mirrors the conditional-write semantics of the PostgreSQL backend: every
//! decrement, consume and rotation happens under a single write lock so the
//! same one-winner guarantees hold.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{OtpChallenge, OtpPurpose, Session, User};

use super::{IdentityStore, RotateOutcome};

/// In-memory [`IdentityStore`].
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    // Keyed by (lowercased email, purpose code); one live challenge per key.
    challenges: RwLock<HashMap<(String, String), OtpChallenge>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let users = self.users.read().await;
        let email = email.to_lowercase();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        self.users.write().await.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn mark_email_verified(&self, email: &str) -> Result<bool, AppError> {
        let mut users = self.users.write().await;
        let email = email.to_lowercase();
        match users.values_mut().find(|u| u.email == email) {
            Some(user) => {
                user.email_verified = true;
                user.updated_utc = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(&user_id) {
            user.password_hash = password_hash.to_string();
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn find_challenge(
        &self,
        email: &str,
        purpose: OtpPurpose,
    ) -> Result<Option<OtpChallenge>, AppError> {
        let key = (email.to_lowercase(), purpose.as_str().to_string());
        Ok(self.challenges.read().await.get(&key).cloned())
    }

    async fn supersede_challenge(&self, challenge: &OtpChallenge) -> Result<(), AppError> {
        let key = (
            challenge.email.to_lowercase(),
            challenge.purpose_code.clone(),
        );
        self.challenges.write().await.insert(key, challenge.clone());
        Ok(())
    }

    async fn fail_attempt(&self, challenge_id: Uuid) -> Result<Option<i32>, AppError> {
        let mut challenges = self.challenges.write().await;
        let challenge = challenges
            .values_mut()
            .find(|c| c.challenge_id == challenge_id);
        match challenge {
            Some(c) if c.is_live() => {
                c.attempts_remaining -= 1;
                Ok(Some(c.attempts_remaining))
            }
            _ => Ok(None),
        }
    }

    async fn consume_challenge(&self, challenge_id: Uuid) -> Result<bool, AppError> {
        let mut challenges = self.challenges.write().await;
        let challenge = challenges
            .values_mut()
            .find(|c| c.challenge_id == challenge_id);
        match challenge {
            Some(c) if !c.is_consumed() && c.attempts_remaining > 0 => {
                c.consumed_utc = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_session(&self, session: &Session) -> Result<(), AppError> {
        self.sessions
            .write()
            .await
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        successor: &Session,
    ) -> Result<RotateOutcome, AppError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) if session.revoked_utc.is_none() => {
                session.revoked_utc = Some(Utc::now());
                session.replaced_by = Some(successor.session_id);
                sessions.insert(successor.session_id, successor.clone());
                Ok(RotateOutcome::Rotated)
            }
            Some(_) => Ok(RotateOutcome::AlreadyRotated),
            None => Ok(RotateOutcome::NotFound),
        }
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<bool, AppError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) if session.revoked_utc.is_none() => {
                session.revoked_utc = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_lineage(&self, lineage_id: Uuid) -> Result<u64, AppError> {
        let mut sessions = self.sessions.write().await;
        let mut revoked = 0;
        for session in sessions.values_mut() {
            if session.lineage_id == lineage_id && session.revoked_utc.is_none() {
                session.revoked_utc = Some(Utc::now());
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut sessions = self.sessions.write().await;
        let mut revoked = 0;
        for session in sessions.values_mut() {
            if session.user_id == user_id && session.revoked_utc.is_none() {
                session.revoked_utc = Some(Utc::now());
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OtpPurpose, Session, User};

    fn challenge(email: &str, attempts: i32) -> OtpChallenge {
        OtpChallenge::new(email, OtpPurpose::Login, "hash".into(), 600, 0, attempts)
    }

    #[tokio::test]
    async fn supersede_keeps_one_challenge_per_key() {
        let store = MemoryStore::new();
        let first = challenge("a@example.com", 5);
        let second = challenge("a@example.com", 5);
        store.supersede_challenge(&first).await.unwrap();
        store.supersede_challenge(&second).await.unwrap();

        let found = store
            .find_challenge("A@Example.com", OtpPurpose::Login)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.challenge_id, second.challenge_id);
        assert!(store.fail_attempt(first.challenge_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fail_attempt_stops_at_zero() {
        let store = MemoryStore::new();
        let c = challenge("a@example.com", 2);
        store.supersede_challenge(&c).await.unwrap();

        assert_eq!(store.fail_attempt(c.challenge_id).await.unwrap(), Some(1));
        assert_eq!(store.fail_attempt(c.challenge_id).await.unwrap(), Some(0));
        assert_eq!(store.fail_attempt(c.challenge_id).await.unwrap(), None);
        assert!(!store.consume_challenge(c.challenge_id).await.unwrap());
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let store = MemoryStore::new();
        let c = challenge("a@example.com", 5);
        store.supersede_challenge(&c).await.unwrap();

        assert!(store.consume_challenge(c.challenge_id).await.unwrap());
        assert!(!store.consume_challenge(c.challenge_id).await.unwrap());
    }

    #[tokio::test]
    async fn rotate_session_has_one_winner() {
        let store = MemoryStore::new();
        let root = Session::root(Uuid::new_v4(), Uuid::new_v4(), "t1", 7);
        store.insert_session(&root).await.unwrap();

        let succ_a = root.successor(Uuid::new_v4(), "t2", 7);
        let succ_b = root.successor(Uuid::new_v4(), "t3", 7);
        assert_eq!(
            store.rotate_session(root.session_id, &succ_a).await.unwrap(),
            RotateOutcome::Rotated
        );
        assert_eq!(
            store.rotate_session(root.session_id, &succ_b).await.unwrap(),
            RotateOutcome::AlreadyRotated
        );

        let rotated = store.find_session(root.session_id).await.unwrap().unwrap();
        assert_eq!(rotated.replaced_by, Some(succ_a.session_id));
        assert!(store
            .find_session(succ_b.session_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn revoke_lineage_sweeps_live_sessions() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let root = Session::root(Uuid::new_v4(), user_id, "t1", 7);
        store.insert_session(&root).await.unwrap();
        let succ = root.successor(Uuid::new_v4(), "t2", 7);
        store.rotate_session(root.session_id, &succ).await.unwrap();

        // Root is already revoked by rotation; only the successor is live.
        assert_eq!(store.revoke_lineage(root.lineage_id).await.unwrap(), 1);
        let succ = store.find_session(succ.session_id).await.unwrap().unwrap();
        assert!(succ.is_revoked());
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let store = MemoryStore::new();
        let user = User::new(
            "Someone@Example.COM".into(),
            "hash".into(),
            "Someone".into(),
            crate::models::Role::Candidate,
        );
        store.insert_user(&user).await.unwrap();

        let found = store
            .find_user_by_email("someone@example.com")
            .await
            .unwrap();
        assert!(found.is_some());
        assert!(store.mark_email_verified("SOMEONE@example.com").await.unwrap());
        let found = store.find_user_by_id(user.user_id).await.unwrap().unwrap();
        assert!(found.email_verified);
    }
}
