//! `PgStore` against a real database, with several store instances standing
//! in for several service replicas.
//!
//! Set `NOPASS_TEST_DSN` (e.g. `postgres://postgres@localhost/nopass_test`)
//! to run; without it every test is skipped.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use nopass::auth::{
    code::FixedCodeGenerator,
    push::LogPushProvider,
    store::{IdentityStore, PgStore},
    AuthPolicy, AuthService, Identity, Registration,
};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};
use tokio::sync::OnceCell;

const DSN_ENV: &str = "NOPASS_TEST_DSN";
const REPLICAS: usize = 3;

static SCHEMA: OnceCell<()> = OnceCell::const_new();

async fn replicas() -> Result<Option<Vec<Arc<PgStore>>>> {
    let Ok(dsn) = env::var(DSN_ENV) else {
        eprintln!("Skipping postgres test: {DSN_ENV} is not set");
        return Ok(None);
    };

    let mut stores = Vec::new();
    for _ in 0..REPLICAS {
        // one pool per replica, nothing shared in process
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&dsn)
            .await
            .context("Failed to connect to test database")?;
        let store = Arc::new(PgStore::new(pool));
        SCHEMA
            .get_or_try_init(|| store.ensure_schema())
            .await?;
        stores.push(store);
    }
    Ok(Some(stores))
}

/// A ten digit number unlikely to collide with other runs.
fn fresh_mobile_number() -> String {
    let digits: String = uuid::Uuid::new_v4()
        .as_u128()
        .to_string()
        .chars()
        .take(9)
        .collect();
    format!("9{digits:0>9}")
}

fn registration(mobile_number: &str, device_id: &str) -> Result<Registration> {
    Ok(Registration::parse(
        mobile_number,
        None,
        device_id,
        "Pixel",
        &format!("push-{device_id}"),
    )?)
}

fn service(store: Arc<PgStore>) -> Arc<AuthService> {
    Arc::new(AuthService::new(
        AuthPolicy::new(),
        store.clone(),
        store,
        Arc::new(FixedCodeGenerator::default()),
        Arc::new(LogPushProvider),
    ))
}

#[tokio::test]
async fn registrations_across_replicas_share_one_row() -> Result<()> {
    let Some(stores) = replicas().await? else {
        return Ok(());
    };
    let mobile_number = fresh_mobile_number();

    let mut tasks = Vec::new();
    for (index, store) in stores.iter().cycle().take(REPLICAS * 3).enumerate() {
        let service = service(store.clone());
        let registration = registration(&mobile_number, &format!("D{index}"))?;
        tasks.push(tokio::spawn(async move {
            service.register_or_rebind(registration).await
        }));
    }

    let mut created = 0;
    for task in tasks {
        created += usize::from(task.await??.created);
    }

    assert_eq!(created, 1);
    assert_eq!(stores[0].find_all_by_mobile(&mobile_number).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn activations_across_replicas_leave_one_active_row() -> Result<()> {
    let Some(stores) = replicas().await? else {
        return Ok(());
    };
    let mobile_number = fresh_mobile_number();
    let base = Utc::now() - Duration::minutes(1);

    let devices: Vec<String> = (0..REPLICAS * 2).map(|i| format!("D{i}")).collect();
    for (offset, device) in devices.iter().enumerate() {
        let offset = i64::try_from(offset)?;
        let row = Identity::new(
            &registration(&mobile_number, device)?,
            base + Duration::seconds(offset),
        );
        stores[0].upsert(&row).await?;
    }

    let mut tasks = Vec::new();
    for (device, store) in devices.iter().zip(stores.iter().cycle()) {
        let store = store.clone();
        let device = device.clone();
        let mobile_number = mobile_number.clone();
        tasks.push(tokio::spawn(async move {
            store
                .activate(&mobile_number, &device, true, None, Utc::now())
                .await
        }));
    }

    let mut activated = Vec::new();
    for task in tasks {
        // a unique index violation here would mean the lock did not serialize
        let identity = task.await??.context("seeded row should be found")?;
        activated.push(identity);
    }

    let rows = stores[0].find_all_by_mobile(&mobile_number).await?;
    assert_eq!(rows.len(), devices.len());
    let active: Vec<_> = rows.iter().filter(|row| row.is_active).collect();
    assert_eq!(active.len(), 1);
    assert!(active[0].is_verified);
    assert!(activated
        .iter()
        .any(|identity| identity.id == active[0].id));
    Ok(())
}

#[tokio::test]
async fn verify_with_push_address_is_stored() -> Result<()> {
    let Some(stores) = replicas().await? else {
        return Ok(());
    };
    let mobile_number = fresh_mobile_number();
    let service = service(stores[0].clone());

    let outcome = service
        .register_or_rebind(registration(&mobile_number, "D1")?)
        .await?;
    let identity = service
        .verify_otp(&mobile_number, &outcome.otp, Some("push-D1-rotated"))
        .await?;
    assert_eq!(identity.push_address.as_deref(), Some("push-D1-rotated"));

    let stored = stores[1]
        .find_by_id(identity.id)
        .await?
        .context("identity should be stored")?;
    assert!(stored.is_active_verified());
    assert_eq!(stored.push_address.as_deref(), Some("push-D1-rotated"));
    assert_eq!(stored.challenge_code, None);
    Ok(())
}
