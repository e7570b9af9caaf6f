//! End-to-end flows through `AuthService` on the in-memory store.
//!
//! Covers registration, challenge verification, the single active device
//! rule under concurrency, login pushes and the trust ledger.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use nopass::auth::{
    clock::{Clock, ManualClock},
    code::FixedCodeGenerator,
    push::{DeliveryReceipt, LogPushProvider, PushError, PushMessage, PushProvider},
    store::{IdentityStore, MemoryStore},
    AuthError, AuthPolicy, AuthService, Identity, IdentityState, Registration,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Barrier;

const MOBILE: &str = "9876543210";

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    service: Arc<AuthService>,
}

fn harness_with(policy: AuthPolicy, provider: Arc<dyn PushProvider>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = AuthService::new(
        policy,
        store.clone(),
        store.clone(),
        Arc::new(FixedCodeGenerator::default()),
        provider,
    )
    .with_clock(clock.clone());
    Harness {
        store,
        clock,
        service: Arc::new(service),
    }
}

fn harness() -> Harness {
    harness_with(AuthPolicy::new(), Arc::new(LogPushProvider))
}

fn registration(device_id: &str) -> Result<Registration> {
    Ok(Registration::parse(
        MOBILE,
        Some("User@Example.com"),
        device_id,
        "Pixel",
        &format!("push-{device_id}"),
    )?)
}

async fn activated(harness: &Harness, device_id: &str) -> Result<Identity> {
    let outcome = harness.service.register_or_rebind(registration(device_id)?).await?;
    Ok(harness.service.verify_otp(MOBILE, &outcome.otp, None).await?)
}

#[derive(Clone, Copy)]
enum Behavior {
    Deliver,
    Reject,
    Fail,
}

struct RecordingProvider {
    behavior: Behavior,
    sent: Mutex<Vec<(String, PushMessage)>>,
}

impl RecordingProvider {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<(String, PushMessage)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PushProvider for RecordingProvider {
    async fn send(
        &self,
        address: &str,
        message: &PushMessage,
    ) -> Result<DeliveryReceipt, PushError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((address.to_string(), message.clone()));
        match self.behavior {
            Behavior::Deliver => Ok(DeliveryReceipt {
                message_id: "projects/nopass/messages/1".to_string(),
                sent_at: Utc::now(),
            }),
            Behavior::Reject => Err(PushError::InvalidAddress("UNREGISTERED".to_string())),
            Behavior::Fail => Err(PushError::Provider("503 unavailable".to_string())),
        }
    }
}

#[tokio::test]
async fn register_verify_and_login() -> Result<()> {
    let provider = Arc::new(RecordingProvider::new(Behavior::Deliver));
    let h = harness_with(AuthPolicy::new(), provider.clone());

    let outcome = h.service.register_or_rebind(registration("D1")?).await?;
    assert!(outcome.created);
    assert_eq!(outcome.otp, "9999");
    assert_eq!(outcome.identity.state(), IdentityState::PendingVerification);
    assert_eq!(outcome.identity.email.as_deref(), Some("user@example.com"));

    // not active yet, so no login push
    let early = h.service.request_login_push(MOBILE, "site-1", "Shop").await;
    assert!(matches!(early, Err(AuthError::NotFound(_))));

    let identity = h.service.verify_otp(MOBILE, "9999", None).await?;
    assert_eq!(identity.state(), IdentityState::VerifiedActive);
    assert_eq!(identity.challenge_code, None);

    let push = h.service.request_login_push(MOBILE, "site-1", "Shop").await?;
    assert_eq!(push.receipt.message_id, "projects/nopass/messages/1");
    assert_eq!(push.expires_in_seconds, h.service.policy().push_ttl_seconds());

    let sent = provider.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "push-D1");
    assert_eq!(sent[0].1.data.get("relyingSiteId").map(String::as_str), Some("site-1"));
    assert_eq!(sent[0].1.data.get("relyingSiteName").map(String::as_str), Some("Shop"));

    let record = h.service.record_site_decision(MOBILE, "site-1", true).await?;
    assert!(record.is_authenticate);
    assert_eq!(record.device_id, "D1");

    let status = h.service.get_trust_status(MOBILE, "site-1").await?;
    assert_eq!(status, record);

    let identity = h.service.find_identity(MOBILE).await?;
    assert_eq!(identity.is_authenticated, Some(true));
    Ok(())
}

#[tokio::test]
async fn reused_code_is_rejected_after_success() -> Result<()> {
    let h = harness();
    activated(&h, "D1").await?;

    let again = h.service.verify_otp(MOBILE, "9999", None).await;
    assert!(matches!(again, Err(AuthError::InvalidCode)));
    Ok(())
}

#[tokio::test]
async fn rebind_is_idempotent_and_resets_verification() -> Result<()> {
    let h = harness();
    activated(&h, "D1").await?;

    let first = h.service.register_or_rebind(registration("D2")?).await?;
    let second = h.service.register_or_rebind(registration("D2")?).await?;
    assert!(!first.created);
    assert!(!second.created);
    assert_eq!(first.identity.id, second.identity.id);
    assert_eq!(second.identity.device_id, "D2");
    assert_eq!(second.identity.state(), IdentityState::PendingVerification);

    assert_eq!(h.service.list_identities().await?.len(), 1);

    let identity = h.service.verify_otp(MOBILE, &second.otp, None).await?;
    assert_eq!(identity.device_id, "D2");
    assert!(identity.is_active_verified());
    Ok(())
}

#[tokio::test]
async fn challenge_expiry_window() -> Result<()> {
    let h = harness();
    let ttl = h.service.policy().challenge_ttl_seconds();

    h.service.register_or_rebind(registration("D1")?).await?;
    h.clock.advance(Duration::seconds(ttl - 1));
    assert!(h.service.verify_otp(MOBILE, "9999", None).await.is_ok());

    h.service.register_or_rebind(registration("D1")?).await?;
    h.clock.advance(Duration::seconds(ttl + 1));
    let late = h.service.verify_otp(MOBILE, "9999", None).await;
    assert!(matches!(late, Err(AuthError::Expired)));

    // a wrong code is reported as wrong, not expired
    let wrong = h.service.verify_otp(MOBILE, "0000", None).await;
    assert!(matches!(wrong, Err(AuthError::InvalidCode)));
    Ok(())
}

#[tokio::test]
async fn expiry_disabled_accepts_late_codes() -> Result<()> {
    let h = harness_with(
        AuthPolicy::new().with_otp_expiry(false),
        Arc::new(LogPushProvider),
    );
    h.service.register_or_rebind(registration("D1")?).await?;
    h.clock.advance(Duration::hours(2));
    assert!(h.service.verify_otp(MOBILE, "9999", None).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn device_uniqueness_rejects_second_number() -> Result<()> {
    let h = harness_with(
        AuthPolicy::new().with_device_uniqueness(true),
        Arc::new(LogPushProvider),
    );
    h.service.register_or_rebind(registration("D1")?).await?;

    let other = Registration::parse("9000000001", None, "D1", "Pixel", "push-D1")?;
    let result = h.service.register_or_rebind(other).await;
    assert!(matches!(result, Err(AuthError::DuplicateDevice(_))));
    Ok(())
}

#[tokio::test]
async fn verify_deactivates_every_other_row() -> Result<()> {
    let h = harness();
    let outcome = h.service.register_or_rebind(registration("D1")?).await?;

    // an older row for the same number, left active by an earlier binding
    let mut stale = Identity::new(&registration("D0")?, h.clock.now() - Duration::minutes(5));
    stale.is_verified = true;
    stale.is_active = true;
    h.store.upsert(&stale).await?;

    h.service.verify_otp(MOBILE, &outcome.otp, None).await?;

    let rows = h.store.find_all_by_mobile(MOBILE).await?;
    let active: Vec<_> = rows.iter().filter(|row| row.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].device_id, "D1");
    Ok(())
}

/// Moves forward one millisecond on every read, so writes made under the
/// per-number lock carry strictly increasing timestamps.
struct TickingClock {
    now: Mutex<DateTime<Utc>>,
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += Duration::milliseconds(1);
        *now
    }
}

fn ticking_service(policy: AuthPolicy) -> (Arc<MemoryStore>, Arc<AuthService>) {
    let store = Arc::new(MemoryStore::new());
    let service = AuthService::new(
        policy,
        store.clone(),
        store.clone(),
        Arc::new(FixedCodeGenerator::default()),
        Arc::new(LogPushProvider),
    )
    .with_clock(Arc::new(TickingClock {
        now: Mutex::new(Utc::now()),
    }));
    (store, Arc::new(service))
}

#[tokio::test]
async fn concurrent_activation_leaves_one_active_device() -> Result<()> {
    let (store, service) = ticking_service(AuthPolicy::new().with_clear_otp_on_success(false));

    // rows left active by bindings made before the single-row rule
    for device in ["L1", "L2", "L3"] {
        let mut legacy = Identity::new(&registration(device)?, Utc::now() - Duration::days(1));
        legacy.is_verified = true;
        legacy.is_active = true;
        store.upsert(&legacy).await?;
    }

    let devices = ["D1", "D2", "D3", "D4", "D5", "D6"];
    let barrier = Arc::new(Barrier::new(devices.len()));
    let mut tasks = Vec::new();
    for device in devices {
        let service = service.clone();
        let barrier = barrier.clone();
        let registration = registration(device)?;
        tasks.push(tokio::spawn(async move {
            service.register_or_rebind(registration).await?;
            barrier.wait().await;
            service.verify_otp(MOBILE, "9999", None).await
        }));
    }

    let mut successes = Vec::new();
    for task in tasks {
        if let Ok(identity) = task.await? {
            successes.push(identity);
        }
    }
    assert!(!successes.is_empty());
    let last = successes
        .iter()
        .max_by_key(|identity| identity.updated_at)
        .context("at least one verification succeeds")?;

    let rows = store.find_all_by_mobile(MOBILE).await?;
    let active: Vec<_> = rows.iter().filter(|row| row.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].device_id, last.device_id);
    assert_eq!(active[0].updated_at, last.updated_at);
    Ok(())
}

#[tokio::test]
async fn interleaved_rebind_and_verify_keep_last_writer() -> Result<()> {
    let (store, service) = ticking_service(AuthPolicy::new());

    let mut tasks = Vec::new();
    for device in ["D1", "D2", "D3", "D4"] {
        let service = service.clone();
        let registration = registration(device)?;
        tasks.push(tokio::spawn(async move {
            let outcome = service.register_or_rebind(registration).await?;
            service.verify_otp(MOBILE, &outcome.otp, None).await
        }));
    }

    let mut successes = Vec::new();
    for task in tasks {
        // a later rebind may clear the code another task was about to use
        if let Ok(identity) = task.await? {
            successes.push(identity);
        }
    }
    // the first verify to take the lock always finds its own code
    let last = successes
        .iter()
        .max_by_key(|identity| identity.updated_at)
        .context("at least one verification succeeds")?;

    let rows = store.find_all_by_mobile(MOBILE).await?;
    assert_eq!(rows.len(), 1);
    let active: Vec<_> = rows.iter().filter(|row| row.is_active).collect();
    if let Some(row) = active.first() {
        assert_eq!(active.len(), 1);
        assert_eq!(row.device_id, last.device_id);
        assert_eq!(row.updated_at, last.updated_at);
    } else {
        // only a rebind after the last verification may leave nothing active
        assert!(rows[0].updated_at > last.updated_at);
        assert_eq!(rows[0].state(), IdentityState::PendingVerification);
    }
    Ok(())
}

#[tokio::test]
async fn verify_applies_rotated_push_address() -> Result<()> {
    let h = harness();
    let outcome = h.service.register_or_rebind(registration("D1")?).await?;

    let identity = h
        .service
        .verify_otp(MOBILE, &outcome.otp, Some(" push-D1-rotated "))
        .await?;
    assert_eq!(identity.push_address.as_deref(), Some("push-D1-rotated"));
    assert!(identity.is_active);

    // blank means keep the bound address
    h.service.register_or_rebind(registration("D1")?).await?;
    let identity = h.service.verify_otp(MOBILE, "9999", Some("  ")).await?;
    assert_eq!(identity.push_address.as_deref(), Some("push-D1"));

    // a failed attempt leaves the address alone
    h.service.register_or_rebind(registration("D1")?).await?;
    let wrong = h.service.verify_otp(MOBILE, "0000", Some("other")).await;
    assert!(matches!(wrong, Err(AuthError::InvalidCode)));
    let stored = h.service.find_identity(MOBILE).await?;
    assert_eq!(stored.push_address.as_deref(), Some("push-D1"));
    Ok(())
}

#[tokio::test]
async fn concurrent_registrations_share_one_identity() -> Result<()> {
    let (store, service) = ticking_service(AuthPolicy::new());

    let mut tasks = Vec::new();
    for device in ["D1", "D2", "D3", "D4", "D5"] {
        let service = service.clone();
        let registration = registration(device)?;
        tasks.push(tokio::spawn(async move {
            service.register_or_rebind(registration).await
        }));
    }

    let mut created = 0;
    for task in tasks {
        created += usize::from(task.await??.created);
    }
    assert_eq!(created, 1);
    assert_eq!(store.find_all_by_mobile(MOBILE).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn deactivate_keeps_verification() -> Result<()> {
    let h = harness();
    activated(&h, "D1").await?;

    assert_eq!(h.service.deactivate(MOBILE).await?, 1);
    let identity = h.service.find_identity(MOBILE).await?;
    assert_eq!(identity.state(), IdentityState::VerifiedInactive);

    let push = h.service.request_login_push(MOBILE, "site-1", "Shop").await;
    assert!(matches!(push, Err(AuthError::NotFound(_))));

    let unknown = h.service.deactivate("9000000001").await;
    assert!(matches!(unknown, Err(AuthError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn push_failures_are_classified() -> Result<()> {
    let rejecting = harness_with(
        AuthPolicy::new(),
        Arc::new(RecordingProvider::new(Behavior::Reject)),
    );
    activated(&rejecting, "D1").await?;
    let result = rejecting
        .service
        .request_login_push(MOBILE, "site-1", "Shop")
        .await;
    assert!(matches!(result, Err(AuthError::InvalidToken(_))));

    let failing = harness_with(
        AuthPolicy::new(),
        Arc::new(RecordingProvider::new(Behavior::Fail)),
    );
    activated(&failing, "D1").await?;
    let result = failing
        .service
        .send_notification(MOBILE, "Hello", "World")
        .await;
    assert!(matches!(result, Err(AuthError::Provider(_))));
    Ok(())
}

#[tokio::test]
async fn missing_push_address_is_no_token() -> Result<()> {
    let h = harness();
    let mut identity = activated(&h, "D1").await?;
    identity.push_address = None;
    h.store.upsert(&identity).await?;

    let result = h.service.request_login_push(MOBILE, "site-1", "Shop").await;
    assert!(matches!(result, Err(AuthError::NoToken)));
    Ok(())
}

#[tokio::test]
async fn trust_ledger_keeps_latest_decision_per_device() -> Result<()> {
    let h = harness();
    activated(&h, "D1").await?;

    h.service.record_site_decision(MOBILE, "site-1", true).await?;
    h.clock.advance(Duration::seconds(5));
    let denied = h.service.record_site_decision(MOBILE, "site-2", false).await?;
    assert!(!denied.is_authenticate);

    // one record per device, so the earlier site is overwritten
    let first = h.service.get_trust_status(MOBILE, "site-1").await;
    assert!(matches!(first, Err(AuthError::NotFound(_))));
    assert_eq!(h.service.get_trust_status(MOBILE, "site-2").await?, denied);

    let identity = h.service.find_identity(MOBILE).await?;
    assert_eq!(identity.is_authenticated, Some(false));
    Ok(())
}

#[tokio::test]
async fn update_push_address_requires_current_one() -> Result<()> {
    let h = harness();
    activated(&h, "D1").await?;

    let stale = h.service.update_push_address("D1", "wrong", "push-new").await;
    assert!(matches!(stale, Err(AuthError::TokenMismatch)));

    let updated = h
        .service
        .update_push_address("D1", "push-D1", "push-new")
        .await?;
    assert_eq!(updated.push_address.as_deref(), Some("push-new"));

    let unknown = h.service.update_push_address("D9", "a", "b").await;
    assert!(matches!(unknown, Err(AuthError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn purge_keeps_trust_records() -> Result<()> {
    let h = harness();
    activated(&h, "D1").await?;
    let record = h.service.record_site_decision(MOBILE, "site-1", true).await?;

    assert_eq!(h.service.purge_all_identities().await?, 1);
    assert!(h.service.list_identities().await?.is_empty());
    assert_eq!(h.service.get_trust_status(MOBILE, "site-1").await?, record);
    Ok(())
}
