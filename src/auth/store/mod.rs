//! Storage seams for identities and trust records.
//!
//! The core only needs field-equality lookups, upserts and bulk updates, so
//! the traits stay small. `MemoryStore` backs development and tests;
//! `PgStore` is the durable implementation.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::auth::models::{Identity, TrustRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Builds the row to persist for a mobile number from its current row.
pub type BindIdentity<'a> = &'a (dyn Fn(Option<Identity>) -> Identity + Send + Sync);

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Most recently updated identity for the mobile number.
    async fn find_by_mobile(&self, mobile_number: &str) -> Result<Option<Identity>>;

    async fn find_all_by_mobile(&self, mobile_number: &str) -> Result<Vec<Identity>>;

    async fn find_by_device(&self, device_id: &str) -> Result<Option<Identity>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>>;

    async fn list(&self) -> Result<Vec<Identity>>;

    /// Insert or replace the row with the same `id`.
    async fn upsert(&self, identity: &Identity) -> Result<()>;

    /// Read the most recent row for `mobile_number`, build its replacement
    /// with `bind` and write it. Concurrent calls for the same number are
    /// serialized, so two registrations never both see "no row" and insert
    /// twice. Returns the stored row and whether it was newly created.
    async fn bind_mobile(
        &self,
        mobile_number: &str,
        bind: BindIdentity<'_>,
    ) -> Result<(Identity, bool)>;

    /// Replace the push address of row `id` only while it still binds
    /// `device_id` to `old_push_address`. Returns `None` when nothing matched.
    async fn swap_push_address(
        &self,
        id: Uuid,
        device_id: &str,
        old_push_address: &str,
        new_push_address: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>>;

    /// Deactivate every row for `mobile_number` except the `device_id` one,
    /// then mark that row verified and active, replacing its push address
    /// when one is given. All writes are applied as a single atomic
    /// operation. Returns `None` when no row matches.
    async fn activate(
        &self,
        mobile_number: &str,
        device_id: &str,
        clear_challenge: bool,
        push_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>>;

    /// Set `is_active = false` on every row for the mobile number.
    async fn deactivate_all(&self, mobile_number: &str, now: DateTime<Utc>) -> Result<u64>;

    async fn delete_all(&self) -> Result<u64>;
}

#[async_trait]
pub trait TrustStore: Send + Sync {
    async fn find_record_by_device(&self, device_id: &str) -> Result<Option<TrustRecord>>;

    async fn find_record_by_mobile_and_site(
        &self,
        mobile_number: &str,
        website_id: &str,
    ) -> Result<Option<TrustRecord>>;

    /// Insert or overwrite the record keyed by `record.device_id`.
    async fn upsert_record(&self, record: &TrustRecord) -> Result<()>;
}
