//! Identity registration, device rebinding and lookups.

use super::challenge::ChallengeManager;
use super::error::AuthError;
use super::models::{Identity, Registration, RegistrationOutcome};
use super::store::IdentityStore;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

/// Mobile numbers are exactly ten ASCII digits.
pub fn valid_mobile_number(mobile_number: &str) -> bool {
    Regex::new(r"^[0-9]{10}$").is_ok_and(|re| re.is_match(mobile_number))
}

/// Normalize an email for storage and comparison.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input. ASCII only.
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_\-.]+@([A-Za-z0-9_-]+\.)+[A-Za-z0-9_-]{2,4}$")
        .is_ok_and(|re| re.is_match(email_normalized))
}

/// Trimmed, non-empty value or a validation error naming `field`.
pub(crate) fn required(field: &'static str, value: &str) -> Result<String, AuthError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AuthError::validation(field, "is required"));
    }
    Ok(trimmed.to_string())
}

/// Trimmed mobile number, or a validation error.
pub(crate) fn checked_mobile_number(mobile_number: &str) -> Result<String, AuthError> {
    let mobile_number = mobile_number.trim();
    if !valid_mobile_number(mobile_number) {
        return Err(AuthError::validation(
            "mobileNumber",
            format!("{mobile_number} is not a valid mobile number"),
        ));
    }
    Ok(mobile_number.to_string())
}

impl Registration {
    /// Trim and validate raw registration input.
    ///
    /// # Errors
    /// `Validation` naming the first offending field.
    pub fn parse(
        mobile_number: &str,
        email: Option<&str>,
        device_id: &str,
        device_name: &str,
        push_address: &str,
    ) -> Result<Self, AuthError> {
        let mobile_number = checked_mobile_number(mobile_number)?;

        let email = match email.map(normalize_email) {
            Some(email) if email.is_empty() => None,
            Some(email) if !valid_email(&email) => {
                return Err(AuthError::validation(
                    "email",
                    format!("{email} is not a valid email"),
                ));
            }
            other => other,
        };

        Ok(Self {
            mobile_number,
            email,
            device_id: required("deviceId", device_id)?,
            device_name: required("deviceName", device_name)?,
            push_address: required("pushAddress", push_address)?,
        })
    }
}

pub struct IdentityRegistry {
    store: Arc<dyn IdentityStore>,
    challenges: Arc<ChallengeManager>,
    device_uniqueness: bool,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        challenges: Arc<ChallengeManager>,
        device_uniqueness: bool,
    ) -> Self {
        Self {
            store,
            challenges,
            device_uniqueness,
        }
    }

    /// Create the identity for a mobile number, or rebind the existing one to
    /// the new device, and open a fresh challenge either way.
    ///
    /// # Errors
    /// `DuplicateDevice` when device uniqueness is enforced and the device is
    /// bound to another number, `Store` on storage failure.
    pub async fn register_or_rebind(
        &self,
        registration: &Registration,
        now: DateTime<Utc>,
    ) -> Result<RegistrationOutcome, AuthError> {
        if self.device_uniqueness {
            let holder = self
                .store
                .find_by_device(&registration.device_id)
                .await
                .map_err(AuthError::store)?;
            if let Some(holder) = holder {
                if holder.mobile_number != registration.mobile_number {
                    return Err(AuthError::DuplicateDevice(registration.device_id.clone()));
                }
            }
        }

        let otp = self.challenges.draw()?;

        let bind = |existing: Option<Identity>| {
            let mut identity = match existing {
                Some(mut identity) => {
                    debug!(
                        mobile_number = %identity.mobile_number,
                        previous_device = %identity.device_id,
                        device_id = %registration.device_id,
                        "rebinding identity"
                    );
                    identity.rebind(registration, now);
                    identity
                }
                None => Identity::new(registration, now),
            };
            self.challenges.open(&mut identity, &otp, now);
            identity
        };

        let (identity, created) = self
            .store
            .bind_mobile(&registration.mobile_number, &bind)
            .await
            .map_err(AuthError::store)?;

        info!(
            mobile_number = %identity.mobile_number,
            device_id = %identity.device_id,
            created,
            "challenge issued"
        );

        Ok(RegistrationOutcome {
            identity,
            otp,
            created,
        })
    }

    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    pub async fn find_by_mobile(&self, mobile_number: &str) -> Result<Option<Identity>, AuthError> {
        self.store
            .find_by_mobile(mobile_number)
            .await
            .map_err(AuthError::store)
    }

    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    pub async fn find_by_device(&self, device_id: &str) -> Result<Option<Identity>, AuthError> {
        self.store
            .find_by_device(device_id)
            .await
            .map_err(AuthError::store)
    }

    /// The identity only when it is both verified and active.
    ///
    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    pub async fn find_active_verified(
        &self,
        mobile_number: &str,
    ) -> Result<Option<Identity>, AuthError> {
        let rows = self
            .store
            .find_all_by_mobile(mobile_number)
            .await
            .map_err(AuthError::store)?;
        Ok(rows.into_iter().find(Identity::is_active_verified))
    }

    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    pub async fn list(&self) -> Result<Vec<Identity>, AuthError> {
        self.store.list().await.map_err(AuthError::store)
    }

    /// Replace the push address on the row `holder` was read from, provided
    /// that row still binds the same device and the caller knows the old
    /// address.
    ///
    /// # Errors
    /// `NotFound` when the row is gone or now binds another device,
    /// `TokenMismatch` when the old address differs, `Store` on storage
    /// failure.
    pub async fn update_push_address(
        &self,
        holder: &Identity,
        old_push_address: &str,
        new_push_address: &str,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthError> {
        let device_id = holder.device_id.as_str();
        let swapped = self
            .store
            .swap_push_address(holder.id, device_id, old_push_address, new_push_address, now)
            .await
            .map_err(AuthError::store)?;

        if let Some(identity) = swapped {
            info!(device_id = %identity.device_id, "push address updated");
            return Ok(identity);
        }

        match self
            .store
            .find_by_id(holder.id)
            .await
            .map_err(AuthError::store)?
        {
            Some(current) if current.device_id == device_id => Err(AuthError::TokenMismatch),
            _ => Err(AuthError::NotFound(format!("device {device_id}"))),
        }
    }

    /// Persist an already-modified identity.
    ///
    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    pub async fn save(&self, identity: &Identity) -> Result<(), AuthError> {
        self.store.upsert(identity).await.map_err(AuthError::store)
    }

    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    pub async fn purge_all(&self) -> Result<u64, AuthError> {
        let count = self.store.delete_all().await.map_err(AuthError::store)?;
        info!(count, "identities purged");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::code::FixedCodeGenerator;
    use crate::auth::policy::AuthPolicy;
    use crate::auth::store::MemoryStore;
    use anyhow::Result;

    fn build_registry(device_uniqueness: bool) -> (Arc<MemoryStore>, IdentityRegistry) {
        let store = Arc::new(MemoryStore::new());
        let challenges = Arc::new(ChallengeManager::new(
            Arc::new(FixedCodeGenerator::default()),
            &AuthPolicy::new(),
        ));
        let registry = IdentityRegistry::new(store.clone(), challenges, device_uniqueness);
        (store, registry)
    }

    fn registration(mobile: &str, device: &str) -> Result<Registration, AuthError> {
        Registration::parse(mobile, None, device, "Pixel 8", &format!("push-{device}"))
    }

    #[test]
    fn mobile_number_format() {
        assert!(valid_mobile_number("9876543210"));
        assert!(!valid_mobile_number("987654321"));
        assert!(!valid_mobile_number("98765432100"));
        assert!(!valid_mobile_number("98765abcde"));
        assert!(!valid_mobile_number(""));
        // non-ASCII digits
        assert!(!valid_mobile_number("١٢٣٤٥٦٧٨٩٠"));
        assert!(!valid_mobile_number("१२३४५६७८९०"));
        assert!(!valid_mobile_number("９８７６５４３２１０"));
        assert!(matches!(
            Registration::parse("١٢٣٤٥٦٧٨٩٠", None, "D1", "phone", "push"),
            Err(AuthError::Validation {
                field: "mobileNumber",
                ..
            })
        ));
    }

    #[test]
    fn email_format() {
        assert!(valid_email("user@example.com"));
        assert!(valid_email("first.last-1@mail.example.org"));
        assert!(!valid_email("user@"));
        assert!(!valid_email("user.example.com"));
        assert!(!valid_email("user@example.toolongtld"));
        assert!(!valid_email("пользователь@example.com"));
        assert!(!valid_email("user@exämple.com"));
    }

    #[test]
    fn parse_reports_offending_field() {
        let err = Registration::parse("12345", None, "D1", "phone", "push");
        assert!(matches!(
            err,
            Err(AuthError::Validation {
                field: "mobileNumber",
                ..
            })
        ));

        let err = Registration::parse("9876543210", Some("nope"), "D1", "phone", "push");
        assert!(matches!(
            err,
            Err(AuthError::Validation { field: "email", .. })
        ));

        let err = Registration::parse("9876543210", None, " ", "phone", "push");
        assert!(matches!(
            err,
            Err(AuthError::Validation {
                field: "deviceId",
                ..
            })
        ));

        let err = Registration::parse("9876543210", None, "D1", "phone", "");
        assert!(matches!(
            err,
            Err(AuthError::Validation {
                field: "pushAddress",
                ..
            })
        ));
    }

    #[test]
    fn parse_normalizes_input() -> Result<()> {
        let registration = Registration::parse(
            " 9876543210 ",
            Some(" User@Example.COM "),
            " D1 ",
            "Pixel",
            "push",
        )?;
        assert_eq!(registration.mobile_number, "9876543210");
        assert_eq!(registration.email.as_deref(), Some("user@example.com"));
        assert_eq!(registration.device_id, "D1");

        let registration = Registration::parse("9876543210", Some("  "), "D1", "Pixel", "push")?;
        assert_eq!(registration.email, None);
        Ok(())
    }

    #[tokio::test]
    async fn rebind_reuses_identity() -> Result<()> {
        let (store, registry) = build_registry(false);
        let now = Utc::now();

        let first = registry
            .register_or_rebind(&registration("9876543210", "D1")?, now)
            .await?;
        assert!(first.created);
        assert_eq!(first.otp, "9999");

        let second = registry
            .register_or_rebind(&registration("9876543210", "D2")?, now)
            .await?;
        assert!(!second.created);
        assert_eq!(second.identity.id, first.identity.id);
        assert_eq!(second.identity.device_id, "D2");

        assert_eq!(store.find_all_by_mobile("9876543210").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_device_only_under_uniqueness() -> Result<()> {
        let now = Utc::now();

        let (_store, registry) = build_registry(true);
        registry
            .register_or_rebind(&registration("9876543210", "D1")?, now)
            .await?;
        let result = registry
            .register_or_rebind(&registration("1234567890", "D1")?, now)
            .await;
        assert!(matches!(result, Err(AuthError::DuplicateDevice(ref id)) if id == "D1"));
        // same number, same device is a plain rebind
        registry
            .register_or_rebind(&registration("9876543210", "D1")?, now)
            .await?;

        let (_store, registry) = build_registry(false);
        registry
            .register_or_rebind(&registration("9876543210", "D1")?, now)
            .await?;
        registry
            .register_or_rebind(&registration("1234567890", "D1")?, now)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn update_push_address_requires_old_value() -> Result<()> {
        let (_store, registry) = build_registry(false);
        let now = Utc::now();
        let holder = registry
            .register_or_rebind(&registration("9876543210", "D1")?, now)
            .await?
            .identity;

        let result = registry
            .update_push_address(&holder, "stale", "fresh", now)
            .await;
        assert!(matches!(result, Err(AuthError::TokenMismatch)));

        let updated = registry
            .update_push_address(&holder, "push-D1", "fresh", now)
            .await?;
        assert_eq!(updated.id, holder.id);
        assert_eq!(updated.push_address.as_deref(), Some("fresh"));
        Ok(())
    }

    #[tokio::test]
    async fn update_push_address_targets_the_holder_row() -> Result<()> {
        let (store, registry) = build_registry(false);
        let now = Utc::now();
        let holder = registry
            .register_or_rebind(&registration("9876543210", "D1")?, now)
            .await?
            .identity;

        // a second number claims D1 with a later timestamp
        let later = now + chrono::Duration::seconds(5);
        let other = registry
            .register_or_rebind(&registration("1234567890", "D1")?, later)
            .await?
            .identity;

        registry
            .update_push_address(&holder, "push-D1", "fresh", later)
            .await?;

        let untouched = store
            .find_by_id(other.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("other row should exist"))?;
        assert_eq!(untouched.push_address.as_deref(), Some("push-D1"));

        // rebinding the holder row away from D1 makes it unknown
        registry
            .register_or_rebind(&registration("9876543210", "D2")?, later)
            .await?;
        let result = registry
            .update_push_address(&holder, "fresh", "fresher", later)
            .await;
        assert!(matches!(result, Err(AuthError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn failed_code_generation_writes_nothing() -> Result<()> {
        struct BrokenGenerator;

        impl crate::auth::code::CodeGenerator for BrokenGenerator {
            fn next(&self) -> Result<String> {
                Err(anyhow::anyhow!("entropy source unavailable"))
            }
        }

        let store = Arc::new(MemoryStore::new());
        let challenges = Arc::new(ChallengeManager::new(
            Arc::new(BrokenGenerator),
            &AuthPolicy::new(),
        ));
        let registry = IdentityRegistry::new(store.clone(), challenges, false);

        let result = registry
            .register_or_rebind(&registration("9876543210", "D1")?, Utc::now())
            .await;
        assert!(matches!(result, Err(AuthError::CodeGeneration(_))));
        assert!(store.list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn find_active_verified_filters_pending() -> Result<()> {
        let (_store, registry) = build_registry(false);
        registry
            .register_or_rebind(&registration("9876543210", "D1")?, Utc::now())
            .await?;
        assert!(registry.find_by_mobile("9876543210").await?.is_some());
        assert!(registry.find_active_verified("9876543210").await?.is_none());
        Ok(())
    }
}
