//! Postgres-backed store.

use super::{BindIdentity, IdentityStore, TrustStore};
use crate::auth::models::{Identity, TrustRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor, PgPool, Row};
use tracing::{warn, Instrument, Span};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/db/sql/01_nopass.sql"
));

const IDENTITY_COLUMNS: &str = "id, mobile_number, email, device_id, device_name, push_address, \
     challenge_code, challenge_expiry, is_verified, is_active, is_authenticated, \
     registered_at, updated_at";

fn db_span(operation: &'static str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// Serialize writers for one mobile number until the transaction ends,
/// across every instance sharing the database.
async fn lock_mobile_number(conn: &mut PgConnection, mobile_number: &str) -> Result<()> {
    let query = "SELECT pg_advisory_xact_lock(hashtext($1))";
    sqlx::query(query)
        .bind(mobile_number)
        .execute(conn)
        .instrument(db_span("SELECT", query))
        .await
        .context("failed to take mobile number lock")?;
    Ok(())
}

async fn upsert_identity<'e, E>(executor: E, identity: &Identity) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let query = r"
        INSERT INTO identities
            (id, mobile_number, email, device_id, device_name, push_address,
             challenge_code, challenge_expiry, is_verified, is_active, is_authenticated,
             registered_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO UPDATE SET
            mobile_number = EXCLUDED.mobile_number,
            email = EXCLUDED.email,
            device_id = EXCLUDED.device_id,
            device_name = EXCLUDED.device_name,
            push_address = EXCLUDED.push_address,
            challenge_code = EXCLUDED.challenge_code,
            challenge_expiry = EXCLUDED.challenge_expiry,
            is_verified = EXCLUDED.is_verified,
            is_active = EXCLUDED.is_active,
            is_authenticated = EXCLUDED.is_authenticated,
            updated_at = EXCLUDED.updated_at
    ";
    sqlx::query(query)
        .bind(identity.id)
        .bind(&identity.mobile_number)
        .bind(&identity.email)
        .bind(&identity.device_id)
        .bind(&identity.device_name)
        .bind(&identity.push_address)
        .bind(&identity.challenge_code)
        .bind(identity.challenge_expiry)
        .bind(identity.is_verified)
        .bind(identity.is_active)
        .bind(identity.is_authenticated)
        .bind(identity.registered_at)
        .bind(identity.updated_at)
        .execute(executor)
        .instrument(db_span("INSERT", query))
        .await
        .context("failed to upsert identity")?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet.
    ///
    /// # Errors
    /// Returns an error if the schema statements fail.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .instrument(db_span("CREATE", "01_nopass.sql"))
            .await
            .context("failed to apply schema")?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn find_by_mobile(&self, mobile_number: &str) -> Result<Option<Identity>> {
        let query = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE mobile_number = $1 \
             ORDER BY updated_at DESC, registered_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, Identity>(&query)
            .bind(mobile_number)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to find identity by mobile number")
    }

    async fn find_all_by_mobile(&self, mobile_number: &str) -> Result<Vec<Identity>> {
        let query = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE mobile_number = $1 \
             ORDER BY registered_at"
        );
        sqlx::query_as::<_, Identity>(&query)
            .bind(mobile_number)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list identities by mobile number")
    }

    async fn find_by_device(&self, device_id: &str) -> Result<Option<Identity>> {
        let query = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE device_id = $1 \
             ORDER BY updated_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, Identity>(&query)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to find identity by device id")
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1");
        sqlx::query_as::<_, Identity>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to find identity by id")
    }

    async fn list(&self) -> Result<Vec<Identity>> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY registered_at");
        sqlx::query_as::<_, Identity>(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list identities")
    }

    async fn upsert(&self, identity: &Identity) -> Result<()> {
        upsert_identity(&self.pool, identity).await
    }

    async fn bind_mobile(
        &self,
        mobile_number: &str,
        bind: BindIdentity<'_>,
    ) -> Result<(Identity, bool)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin registration transaction")?;
        lock_mobile_number(&mut tx, mobile_number).await?;

        let query = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE mobile_number = $1 \
             ORDER BY updated_at DESC, registered_at DESC LIMIT 1"
        );
        let existing = sqlx::query_as::<_, Identity>(&query)
            .bind(mobile_number)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to find identity by mobile number")?;

        let created = existing.is_none();
        let identity = bind(existing);
        upsert_identity(&mut *tx, &identity).await?;

        tx.commit()
            .await
            .context("commit registration transaction")?;

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
        let query = format!(
            "UPDATE identities SET push_address = $4, updated_at = $5 \
             WHERE id = $1 AND device_id = $2 AND push_address = $3 \
             RETURNING {IDENTITY_COLUMNS}"
        );
        sqlx::query_as::<_, Identity>(&query)
            .bind(id)
            .bind(device_id)
            .bind(old_push_address)
            .bind(new_push_address)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update push address")
    }

    async fn activate(
        &self,
        mobile_number: &str,
        device_id: &str,
        clear_challenge: bool,
        push_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>> {
        // sibling deactivation and target activation commit together
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin activation transaction")?;
        lock_mobile_number(&mut tx, mobile_number).await?;

        let query = r"
            SELECT id FROM identities
            WHERE mobile_number = $1 AND device_id = $2
            ORDER BY updated_at DESC
            LIMIT 1
        ";
        let target: Option<Uuid> = sqlx::query(query)
            .bind(mobile_number)
            .bind(device_id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to find activation target")?
            .map(|row| row.get("id"));

        let Some(target) = target else {
            if let Err(err) = tx.rollback().await {
                warn!(mobile_number, "failed to roll back activation: {err}");
            }
            return Ok(None);
        };

        let query = r"
            UPDATE identities
            SET is_active = FALSE, updated_at = $3
            WHERE mobile_number = $1 AND id <> $2 AND is_active
        ";
        sqlx::query(query)
            .bind(mobile_number)
            .bind(target)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to deactivate sibling identities")?;

        let query = format!(
            "UPDATE identities SET \
                 is_verified = TRUE, \
                 is_active = TRUE, \
                 challenge_code = CASE WHEN $2 THEN NULL ELSE challenge_code END, \
                 challenge_expiry = CASE WHEN $2 THEN NULL ELSE challenge_expiry END, \
                 push_address = COALESCE($4, push_address), \
                 updated_at = $3 \
             WHERE id = $1 \
             RETURNING {IDENTITY_COLUMNS}"
        );
        let identity = sqlx::query_as::<_, Identity>(&query)
            .bind(target)
            .bind(clear_challenge)
            .bind(now)
            .bind(push_address)
            .fetch_one(&mut *tx)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to activate identity")?;

        tx.commit()
            .await
            .context("commit activation transaction")?;

        Ok(Some(identity))
    }

    async fn deactivate_all(&self, mobile_number: &str, now: DateTime<Utc>) -> Result<u64> {
        let query = r"
            UPDATE identities
            SET is_active = FALSE, updated_at = $2
            WHERE mobile_number = $1 AND is_active
        ";
        let result = sqlx::query(query)
            .bind(mobile_number)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to deactivate identities")?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64> {
        let query = "DELETE FROM identities";
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete identities")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TrustStore for PgStore {
    async fn find_record_by_device(&self, device_id: &str) -> Result<Option<TrustRecord>> {
        let query = r"
            SELECT website_id, mobile_number, device_id, is_authenticate, decided_at
            FROM trust_records
            WHERE device_id = $1
        ";
        sqlx::query_as::<_, TrustRecord>(query)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to find trust record by device")
    }

    async fn find_record_by_mobile_and_site(
        &self,
        mobile_number: &str,
        website_id: &str,
    ) -> Result<Option<TrustRecord>> {
        let query = r"
            SELECT website_id, mobile_number, device_id, is_authenticate, decided_at
            FROM trust_records
            WHERE mobile_number = $1 AND website_id = $2
            ORDER BY decided_at DESC
            LIMIT 1
        ";
        sqlx::query_as::<_, TrustRecord>(query)
            .bind(mobile_number)
            .bind(website_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to find trust record by site")
    }

    async fn upsert_record(&self, record: &TrustRecord) -> Result<()> {
        let query = r"
            INSERT INTO trust_records
                (device_id, website_id, mobile_number, is_authenticate, decided_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (device_id) DO UPDATE SET
                website_id = EXCLUDED.website_id,
                mobile_number = EXCLUDED.mobile_number,
                is_authenticate = EXCLUDED.is_authenticate,
                decided_at = EXCLUDED.decided_at
        ";
        sqlx::query(query)
            .bind(&record.device_id)
            .bind(&record.website_id)
            .bind(&record.mobile_number)
            .bind(record.is_authenticate)
            .bind(record.timestamp)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to upsert trust record")?;
        Ok(())
    }
}
