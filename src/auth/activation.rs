//! Single-active-device enforcement.
//!
//! Two devices verifying the same mobile number at the same time must not
//! both end up active. Every identity mutation first takes the per-number
//! `MobileGuard`, and the store applies "deactivate siblings, activate
//! target" as one atomic operation. The last writer wins.

use super::error::AuthError;
use super::models::Identity;
use super::store::IdentityStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Proof that the caller holds the activation lock for one mobile number.
#[derive(Debug)]
pub struct MobileGuard {
    mobile_number: String,
    _guard: OwnedMutexGuard<()>,
}

impl MobileGuard {
    #[must_use]
    pub fn mobile_number(&self) -> &str {
        &self.mobile_number
    }
}

#[derive(Debug, Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // drop entries nobody is holding or waiting on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct ActivationAuthority {
    store: Arc<dyn IdentityStore>,
    locks: KeyedLocks,
    clear_challenge: bool,
}

impl ActivationAuthority {
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>, clear_challenge: bool) -> Self {
        Self {
            store,
            locks: KeyedLocks::default(),
            clear_challenge,
        }
    }

    /// Wait for exclusive access to `mobile_number`.
    pub async fn lock(&self, mobile_number: &str) -> MobileGuard {
        let guard = self.locks.handle(mobile_number).lock_owned().await;
        MobileGuard {
            mobile_number: mobile_number.to_string(),
            _guard: guard,
        }
    }

    /// Make `device_id` the only active, verified row for the guarded number.
    /// A `push_address` given here replaces the bound one in the same write.
    ///
    /// # Errors
    /// `NotFound` if no row binds that device to the number, `Store` on
    /// storage failure.
    pub async fn activate(
        &self,
        guard: &MobileGuard,
        device_id: &str,
        push_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthError> {
        let identity = self
            .store
            .activate(
                guard.mobile_number(),
                device_id,
                self.clear_challenge,
                push_address,
                now,
            )
            .await
            .map_err(AuthError::store)?
            .ok_or_else(|| AuthError::NotFound(format!("device {device_id}")))?;

        info!(
            mobile_number = %identity.mobile_number,
            device_id = %identity.device_id,
            "identity activated"
        );

        Ok(identity)
    }

    /// Administrative set-inactive for every row of the guarded number.
    ///
    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    pub async fn deactivate(
        &self,
        guard: &MobileGuard,
        now: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        let count = self
            .store
            .deactivate_all(guard.mobile_number(), now)
            .await
            .map_err(AuthError::store)?;
        debug!(mobile_number = %guard.mobile_number(), count, "identities deactivated");
        Ok(count)
    }
}
