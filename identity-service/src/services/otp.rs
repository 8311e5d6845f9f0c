//! OTP challenge engine.
//!
//! One live challenge per (email, purpose): issuing a new code supersedes
//! the previous one. Codes are stored only as SHA-256 hashes and compared
//! in constant time. A challenge dies by being consumed, expiring, or
//! running out of attempts, and every failure path reports which.

use std::sync::Arc;

use rand::{rngs::OsRng, Rng};
use service_core::error::AppError;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::models::{OtpChallenge, OtpPurpose};
use crate::services::email::EmailProvider;
use crate::store::IdentityStore;

/// Challenge parameters. Defaults match production; tests shrink them.
#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub expiry_seconds: i64,
    pub cooldown_seconds: i64,
    pub max_attempts: i32,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            expiry_seconds: 600,
            cooldown_seconds: 60,
            max_attempts: 5,
        }
    }
}

/// Issued challenge parameters, echoed to the caller.
#[derive(Debug, Clone, Copy)]
pub struct OtpTicket {
    pub cooldown_seconds: i64,
    pub expires_in: i64,
}

/// Successful verification, reported to the caller for the follow-up step.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub email: String,
    pub purpose: OtpPurpose,
}

#[derive(Clone)]
pub struct OtpEngine {
    store: Arc<dyn IdentityStore>,
    mailer: Arc<dyn EmailProvider>,
    config: OtpConfig,
}

impl OtpEngine {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        mailer: Arc<dyn EmailProvider>,
        config: OtpConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    /// Issue a challenge and email the code. Supersedes any previous
    /// challenge for the same (email, purpose), subject to the cooldown.
    pub async fn send(&self, email: &str, purpose: OtpPurpose) -> Result<OtpTicket, AppError> {
        self.check_account(email, purpose).await?;

        if let Some(existing) = self.store.find_challenge(email, purpose).await? {
            let wait = existing.cooldown_remaining();
            if wait > 0 {
                return Err(AppError::OtpCooldown(wait as u64));
            }
        }

        let code = generate_code();
        let challenge = OtpChallenge::new(
            email,
            purpose,
            hash_code(&code),
            self.config.expiry_seconds,
            self.config.cooldown_seconds,
            self.config.max_attempts,
        );
        self.store.supersede_challenge(&challenge).await?;

        self.mailer.send_otp_email(email, &code, purpose).await?;

        tracing::info!(
            email = %challenge.email,
            purpose = %purpose.as_str(),
            "OTP challenge issued"
        );
        Ok(OtpTicket {
            cooldown_seconds: self.config.cooldown_seconds,
            expires_in: self.config.expiry_seconds,
        })
    }

    /// Resend a code. Same semantics as `send`: the fresh code replaces the
    /// old one and the cooldown still applies.
    pub async fn resend(&self, email: &str, purpose: OtpPurpose) -> Result<OtpTicket, AppError> {
        tracing::info!(email = %email.to_lowercase(), purpose = %purpose.as_str(), "OTP resend requested");
        self.send(email, purpose).await
    }

    /// Verify a submitted code against the live challenge.
    pub async fn verify(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<VerifyOutcome, AppError> {
        let challenge = self
            .store
            .find_challenge(email, purpose)
            .await?
            .ok_or(AppError::OtpNotFound)?;

        // A consumed challenge no longer exists as far as callers can tell.
        if challenge.is_consumed() {
            return Err(AppError::OtpNotFound);
        }
        if challenge.is_expired() {
            // Dead challenge; consume it so later attempts read as missing.
            let _ = self.store.consume_challenge(challenge.challenge_id).await?;
            return Err(AppError::OtpExpired);
        }
        if challenge.attempts_remaining <= 0 {
            return Err(AppError::OtpAttemptsExhausted);
        }

        let submitted = hash_code(code);
        let matches: bool = submitted
            .as_bytes()
            .ct_eq(challenge.code_hash.as_bytes())
            .into();

        if !matches {
            // The decrement is conditional so racing failures cannot push
            // the budget below zero.
            return match self.store.fail_attempt(challenge.challenge_id).await? {
                Some(remaining) => {
                    tracing::warn!(
                        email = %challenge.email,
                        purpose = %purpose.as_str(),
                        attempts_remaining = remaining,
                        "OTP verification failed"
                    );
                    Err(AppError::OtpInvalid {
                        attempts_remaining: remaining,
                    })
                }
                None => Err(AppError::OtpAttemptsExhausted),
            };
        }

        // Single use: exactly one matching submission can consume it.
        if !self.store.consume_challenge(challenge.challenge_id).await? {
            return Err(AppError::OtpNotFound);
        }

        // A delivered code proves control of the mailbox, so LOGIN also
        // counts as verification. For REGISTRATION the account may not
        // exist yet; the flip is then a no-op.
        if matches!(
            purpose,
            OtpPurpose::Registration | OtpPurpose::EmailVerification | OtpPurpose::Login
        ) {
            self.store.mark_email_verified(email).await?;
        }

        tracing::info!(
            email = %challenge.email,
            purpose = %purpose.as_str(),
            "OTP challenge verified"
        );

        Ok(VerifyOutcome {
            email: challenge.email,
            purpose,
        })
    }

    /// Account preconditions per purpose: registration proves an email that
    /// must not have an account yet, every other purpose requires one.
    async fn check_account(&self, email: &str, purpose: OtpPurpose) -> Result<(), AppError> {
        let user = self.store.find_user_by_email(email).await?;
        if purpose.requires_account() {
            match user {
                None => return Err(AppError::UnknownAccount),
                Some(user) if !user.is_active => {
                    return Err(AppError::Forbidden(anyhow::anyhow!(
                        "Account is deactivated"
                    )));
                }
                Some(_) => {}
            }
        } else if user.is_some() {
            return Err(AppError::AccountExists);
        }
        Ok(())
    }
}

/// Six decimal digits from the OS entropy source, leading zeros kept.
fn generate_code() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}
