//! In-process store used for development and tests.
//!
//! Each table sits behind its own `RwLock`. Compound writes (`bind_mobile`,
//! `activate`, `swap_push_address`) hold the identity write lock from read
//! to write, so readers never see two active rows.

use super::{BindIdentity, IdentityStore, TrustStore};
use crate::auth::models::{Identity, TrustRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: RwLock<HashMap<Uuid, Identity>>,
    // keyed by device id
    trust: RwLock<HashMap<String, TrustRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn latest<'a>(rows: impl Iterator<Item = &'a Identity>) -> Option<Identity> {
    rows.max_by_key(|row| (row.updated_at, row.registered_at))
        .cloned()
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_by_mobile(&self, mobile_number: &str) -> Result<Option<Identity>> {
        let identities = self.identities.read().await;
        Ok(latest(
            identities
                .values()
                .filter(|row| row.mobile_number == mobile_number),
        ))
    }

    async fn find_all_by_mobile(&self, mobile_number: &str) -> Result<Vec<Identity>> {
        let identities = self.identities.read().await;
        let mut rows: Vec<Identity> = identities
            .values()
            .filter(|row| row.mobile_number == mobile_number)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.registered_at);
        Ok(rows)
    }

    async fn find_by_device(&self, device_id: &str) -> Result<Option<Identity>> {
        let identities = self.identities.read().await;
        Ok(latest(
            identities.values().filter(|row| row.device_id == device_id),
        ))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        Ok(self.identities.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Identity>> {
        let identities = self.identities.read().await;
        let mut rows: Vec<Identity> = identities.values().cloned().collect();
        rows.sort_by_key(|row| row.registered_at);
        Ok(rows)
    }

    async fn upsert(&self, identity: &Identity) -> Result<()> {
        self.identities
            .write()
            .await
            .insert(identity.id, identity.clone());
        Ok(())
    }

    async fn bind_mobile(
        &self,
        mobile_number: &str,
        bind: BindIdentity<'_>,
    ) -> Result<(Identity, bool)> {
        let mut identities = self.identities.write().await;
        let existing = latest(
            identities
                .values()
                .filter(|row| row.mobile_number == mobile_number),
        );
        let created = existing.is_none();
        let identity = bind(existing);
        identities.insert(identity.id, identity.clone());
        Ok((identity, created))
    }

    async fn swap_push_address(
        &self,
        id: Uuid,
        device_id: &str,
        old_push_address: &str,
        new_push_address: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>> {
        let mut identities = self.identities.write().await;
        let Some(row) = identities.get_mut(&id).filter(|row| {
            row.device_id == device_id && row.push_address.as_deref() == Some(old_push_address)
        }) else {
            return Ok(None);
        };
        row.push_address = Some(new_push_address.to_string());
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn activate(
        &self,
        mobile_number: &str,
        device_id: &str,
        clear_challenge: bool,
        push_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>> {
        let mut identities = self.identities.write().await;

        let Some(target_id) = latest(identities.values().filter(|row| {
            row.mobile_number == mobile_number && row.device_id == device_id
        }))
        .map(|row| row.id) else {
            return Ok(None);
        };

        for row in identities.values_mut() {
            if row.mobile_number != mobile_number {
                continue;
            }
            if row.id == target_id {
                row.is_verified = true;
                row.is_active = true;
                if clear_challenge {
                    row.challenge_code = None;
                    row.challenge_expiry = None;
                }
                if let Some(address) = push_address {
                    row.push_address = Some(address.to_string());
                }
                row.updated_at = now;
            } else if row.is_active {
                row.is_active = false;
                row.updated_at = now;
            }
        }

        Ok(identities.get(&target_id).cloned())
    }

    async fn deactivate_all(&self, mobile_number: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut identities = self.identities.write().await;
        let mut count = 0;
        for row in identities
            .values_mut()
            .filter(|row| row.mobile_number == mobile_number && row.is_active)
        {
            row.is_active = false;
            row.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut identities = self.identities.write().await;
        let count = identities.len() as u64;
        identities.clear();
        Ok(count)
    }
}

#[async_trait]
impl TrustStore for MemoryStore {
    async fn find_record_by_device(&self, device_id: &str) -> Result<Option<TrustRecord>> {
        Ok(self.trust.read().await.get(device_id).cloned())
    }

    async fn find_record_by_mobile_and_site(
        &self,
        mobile_number: &str,
        website_id: &str,
    ) -> Result<Option<TrustRecord>> {
        let trust = self.trust.read().await;
        Ok(trust
            .values()
            .filter(|record| {
                record.mobile_number == mobile_number && record.website_id == website_id
            })
            .max_by_key(|record| record.timestamp)
            .cloned())
    }

    async fn upsert_record(&self, record: &TrustRecord) -> Result<()> {
        self.trust
            .write()
            .await
            .insert(record.device_id.clone(), record.clone());
        Ok(())
    }
}
