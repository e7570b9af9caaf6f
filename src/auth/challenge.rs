//! One-time challenge issuance and validation.
//!
//! A challenge lives on the identity itself (`challenge_code` and
//! `challenge_expiry`). This module only edits those fields; persisting the
//! identity and deciding activation are left to the caller.

use super::code::CodeGenerator;
use super::error::AuthError;
use super::models::Identity;
use super::policy::AuthPolicy;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub struct ChallengeManager {
    generator: Arc<dyn CodeGenerator>,
    otp_expiry: bool,
    ttl: Duration,
}

impl ChallengeManager {
    #[must_use]
    pub fn new(generator: Arc<dyn CodeGenerator>, policy: &AuthPolicy) -> Self {
        Self {
            generator,
            otp_expiry: policy.otp_expiry(),
            ttl: Duration::seconds(policy.challenge_ttl_seconds()),
        }
    }

    /// Open a fresh challenge on `identity`, replacing any previous one.
    ///
    /// # Errors
    /// Returns `AuthError::CodeGeneration` if the code generator fails.
    pub fn issue(&self, identity: &mut Identity, now: DateTime<Utc>) -> Result<String, AuthError> {
        let code = self.draw()?;
        self.open(identity, &code, now);
        Ok(code)
    }

    /// Next code from the generator, not yet attached to any identity.
    ///
    /// # Errors
    /// Returns `AuthError::CodeGeneration` if the code generator fails.
    pub fn draw(&self) -> Result<String, AuthError> {
        self.generator
            .next()
            .map_err(AuthError::code_generation)
    }

    /// Attach an already drawn `code` to `identity`.
    pub fn open(&self, identity: &mut Identity, code: &str, now: DateTime<Utc>) {
        identity.challenge_code = Some(code.to_string());
        identity.challenge_expiry = self.otp_expiry.then(|| now + self.ttl);
    }

    /// Check `submitted` against the open challenge. Nothing is mutated; a
    /// failed attempt leaves the challenge open for a retry.
    ///
    /// # Errors
    /// `InvalidCode` when no code is open or the codes differ, `Expired` when
    /// the window has passed.
    pub fn validate(
        &self,
        identity: &Identity,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let Some(expected) = identity.challenge_code.as_deref() else {
            return Err(AuthError::InvalidCode);
        };

        if expected != submitted.trim() {
            return Err(AuthError::InvalidCode);
        }

        if self.otp_expiry {
            match identity.challenge_expiry {
                Some(expiry) if now > expiry => return Err(AuthError::Expired),
                Some(_) => {}
                // issued while expiry was disabled; treat as already stale
                None => return Err(AuthError::Expired),
            }
        }

        Ok(())
    }
}
