//! Refresh session model with rotation lineage.
//!
//! A session row backs exactly one refresh token. Rotation marks the row
//! revoked, records its successor, and inserts a new row in the same
//! lineage; presenting a rotated token again is treated as theft and kills
//! the whole lineage.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh session entity.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    /// Also the `jti` claim of the refresh token it backs.
    pub session_id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 of the refresh token; the token itself is never stored.
    pub token_hash: String,
    /// Root of the rotation chain this session belongs to.
    pub lineage_id: Uuid,
    /// Session this one replaced, if any.
    pub parent_id: Option<Uuid>,
    /// Successor created by rotation; set together with `revoked_utc`.
    pub replaced_by: Option<Uuid>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Session {
    /// Create a lineage root at login/registration completion.
    pub fn root(session_id: Uuid, user_id: Uuid, token: &str, expiry_days: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            token_hash: Self::hash_token(token),
            lineage_id: session_id,
            parent_id: None,
            replaced_by: None,
            expiry_utc: now + Duration::days(expiry_days),
            revoked_utc: None,
            created_utc: now,
        }
    }

    /// Create the successor session for a rotation of `self`.
    pub fn successor(&self, session_id: Uuid, token: &str, expiry_days: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id: self.user_id,
            token_hash: Self::hash_token(token),
            lineage_id: self.lineage_id,
            parent_id: Some(self.session_id),
            replaced_by: None,
            expiry_utc: now + Duration::days(expiry_days),
            revoked_utc: None,
            created_utc: now,
        }
    }

    /// Hash a refresh token for storage.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry_utc
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    /// Revoked with a recorded successor means the token was rotated away;
    /// seeing it again is a replay.
    pub fn was_rotated(&self) -> bool {
        self.is_revoked() && self.replaced_by.is_some()
    }

    pub fn is_valid(&self) -> bool {
        !self.is_expired() && !self.is_revoked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_session_is_its_own_lineage() {
        let id = Uuid::new_v4();
        let session = Session::root(id, Uuid::new_v4(), "token_abc", 7);
        assert_eq!(session.lineage_id, id);
        assert!(session.parent_id.is_none());
        assert!(session.is_valid());
        assert_ne!(session.token_hash, "token_abc");
    }

    #[test]
    fn successor_keeps_lineage_and_points_back() {
        let root = Session::root(Uuid::new_v4(), Uuid::new_v4(), "token_a", 7);
        let succ = root.successor(Uuid::new_v4(), "token_b", 7);
        assert_eq!(succ.lineage_id, root.lineage_id);
        assert_eq!(succ.parent_id, Some(root.session_id));
        assert_eq!(succ.user_id, root.user_id);
        assert_ne!(succ.token_hash, root.token_hash);
    }

    #[test]
    fn rotation_and_plain_revocation_are_distinguishable() {
        let mut session = Session::root(Uuid::new_v4(), Uuid::new_v4(), "token_a", 7);

        // Plain logout: revoked, no successor.
        session.revoked_utc = Some(Utc::now());
        assert!(session.is_revoked());
        assert!(!session.was_rotated());

        // Rotation: revoked with a successor.
        session.replaced_by = Some(Uuid::new_v4());
        assert!(session.was_rotated());
    }

    #[test]
    fn expired_session_is_invalid() {
        let mut session = Session::root(Uuid::new_v4(), Uuid::new_v4(), "token_a", 7);
        assert!(session.is_valid());
        session.expiry_utc = Utc::now() - Duration::seconds(1);
        assert!(!session.is_valid());
    }
}
