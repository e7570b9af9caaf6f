//! Relying-site accept/deny decisions.
//!
//! One record per device: a later decision for the same device overwrites the
//! earlier one, whichever website it was for.

use super::error::AuthError;
use super::models::TrustRecord;
use super::store::TrustStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

pub struct TrustLedger {
    store: Arc<dyn TrustStore>,
}

impl TrustLedger {
    #[must_use]
    pub fn new(store: Arc<dyn TrustStore>) -> Self {
        Self { store }
    }

    /// Upsert the decision keyed by `device_id`.
    ///
    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    pub async fn record_decision(
        &self,
        device_id: &str,
        mobile_number: &str,
        website_id: &str,
        accepted: bool,
        now: DateTime<Utc>,
    ) -> Result<TrustRecord, AuthError> {
        let previous = self
            .store
            .find_record_by_device(device_id)
            .await
            .map_err(AuthError::store)?;

        let record = TrustRecord {
            website_id: website_id.to_string(),
            mobile_number: mobile_number.to_string(),
            device_id: device_id.to_string(),
            is_authenticate: accepted,
            timestamp: now,
        };

        self.store
            .upsert_record(&record)
            .await
            .map_err(AuthError::store)?;

        info!(
            device_id,
            website_id,
            accepted,
            replaced = previous.is_some(),
            "site decision recorded"
        );

        Ok(record)
    }

    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    pub async fn query_status(
        &self,
        mobile_number: &str,
        website_id: &str,
    ) -> Result<Option<TrustRecord>, AuthError> {
        self.store
            .find_record_by_mobile_and_site(mobile_number, website_id)
            .await
            .map_err(AuthError::store)
    }
}
