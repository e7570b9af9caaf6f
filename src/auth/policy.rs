//! Policy switches for the authentication core.
//!
//! Earlier generations of the login flow disagreed on three points: whether a
//! device id may be bound to more than one mobile number, whether challenge
//! codes expire, and whether a code is cleared once it has been used. Each is
//! an explicit switch here so a deployment picks one consistent behavior.

use std::time::Duration;

pub const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 30;
pub const DEFAULT_PUSH_TTL_SECONDS: i64 = 60;
pub const DEFAULT_PUSH_TIMEOUT_MILLIS: u64 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthPolicy {
    device_uniqueness: bool,
    otp_expiry: bool,
    clear_otp_on_success: bool,
    challenge_ttl_seconds: i64,
    push_ttl_seconds: i64,
    push_timeout: Duration,
}

impl AuthPolicy {
    /// Defaults: mobile-keyed identities, 30s expiring codes cleared on use,
    /// 60s push confirmation window and a 5s push delivery timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            device_uniqueness: false,
            otp_expiry: true,
            clear_otp_on_success: true,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
            push_ttl_seconds: DEFAULT_PUSH_TTL_SECONDS,
            push_timeout: Duration::from_millis(DEFAULT_PUSH_TIMEOUT_MILLIS),
        }
    }

    #[must_use]
    pub const fn with_device_uniqueness(mut self, enabled: bool) -> Self {
        self.device_uniqueness = enabled;
        self
    }

    #[must_use]
    pub const fn with_otp_expiry(mut self, enabled: bool) -> Self {
        self.otp_expiry = enabled;
        self
    }

    #[must_use]
    pub const fn with_clear_otp_on_success(mut self, enabled: bool) -> Self {
        self.clear_otp_on_success = enabled;
        self
    }

    #[must_use]
    pub const fn with_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_push_ttl_seconds(mut self, seconds: i64) -> Self {
        self.push_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_push_timeout_millis(mut self, millis: u64) -> Self {
        self.push_timeout = Duration::from_millis(millis);
        self
    }

    /// Clamp values that would make the flow unusable.
    #[must_use]
    pub fn normalize(self) -> Self {
        Self {
            challenge_ttl_seconds: self.challenge_ttl_seconds.max(1),
            push_ttl_seconds: self.push_ttl_seconds.max(1),
            push_timeout: if self.push_timeout.is_zero() {
                Duration::from_millis(DEFAULT_PUSH_TIMEOUT_MILLIS)
            } else {
                self.push_timeout
            },
            ..self
        }
    }

    #[must_use]
    pub const fn device_uniqueness(&self) -> bool {
        self.device_uniqueness
    }

    #[must_use]
    pub const fn otp_expiry(&self) -> bool {
        self.otp_expiry
    }

    #[must_use]
    pub const fn clear_otp_on_success(&self) -> bool {
        self.clear_otp_on_success
    }

    #[must_use]
    pub const fn challenge_ttl_seconds(&self) -> i64 {
        self.challenge_ttl_seconds
    }

    #[must_use]
    pub const fn push_ttl_seconds(&self) -> i64 {
        self.push_ttl_seconds
    }

    #[must_use]
    pub const fn push_timeout(&self) -> Duration {
        self.push_timeout
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_and_overrides() {
        let policy = AuthPolicy::new();
        assert!(!policy.device_uniqueness());
        assert!(policy.otp_expiry());
        assert!(policy.clear_otp_on_success());
        assert_eq!(policy.challenge_ttl_seconds(), DEFAULT_CHALLENGE_TTL_SECONDS);
        assert_eq!(policy.push_ttl_seconds(), DEFAULT_PUSH_TTL_SECONDS);
        assert_eq!(
            policy.push_timeout(),
            Duration::from_millis(DEFAULT_PUSH_TIMEOUT_MILLIS)
        );

        let policy = policy
            .with_device_uniqueness(true)
            .with_otp_expiry(false)
            .with_clear_otp_on_success(false)
            .with_challenge_ttl_seconds(120)
            .with_push_ttl_seconds(90)
            .with_push_timeout_millis(250);

        assert!(policy.device_uniqueness());
        assert!(!policy.otp_expiry());
        assert!(!policy.clear_otp_on_success());
        assert_eq!(policy.challenge_ttl_seconds(), 120);
        assert_eq!(policy.push_ttl_seconds(), 90);
        assert_eq!(policy.push_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn normalize_clamps_zero_values() {
        let policy = AuthPolicy::new()
            .with_challenge_ttl_seconds(0)
            .with_push_ttl_seconds(-5)
            .with_push_timeout_millis(0)
            .normalize();

        assert_eq!(policy.challenge_ttl_seconds(), 1);
        assert_eq!(policy.push_ttl_seconds(), 1);
        assert_eq!(
            policy.push_timeout(),
            Duration::from_millis(DEFAULT_PUSH_TIMEOUT_MILLIS)
        );
    }
}
