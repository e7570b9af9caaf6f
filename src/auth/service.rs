use super::activation::ActivationAuthority;
use super::challenge::ChallengeManager;
use super::clock::{Clock, SystemClock};
use super::code::CodeGenerator;
use super::error::AuthError;
use super::identity::{checked_mobile_number, required, IdentityRegistry};
use super::ledger::TrustLedger;
use super::models::{Identity, Registration, RegistrationOutcome, TrustRecord};
use super::policy::AuthPolicy;
use super::push::{DeliveryReceipt, LoginPush, PushDispatcher, PushProvider};
use super::store::{IdentityStore, TrustStore};
use std::sync::Arc;
use tracing::{info, instrument};

/// Entry point for every authentication operation.
///
/// Mutations of an identity run while holding the per-number `MobileGuard`.
/// Read paths go straight to the store.
pub struct AuthService {
    policy: AuthPolicy,
    clock: Arc<dyn Clock>,
    registry: IdentityRegistry,
    challenges: Arc<ChallengeManager>,
    activation: ActivationAuthority,
    push: PushDispatcher,
    ledger: TrustLedger,
}

impl AuthService {
    #[must_use]
    pub fn new(
        policy: AuthPolicy,
        identities: Arc<dyn IdentityStore>,
        trust: Arc<dyn TrustStore>,
        codes: Arc<dyn CodeGenerator>,
        provider: Arc<dyn PushProvider>,
    ) -> Self {
        let policy = policy.normalize();
        let challenges = Arc::new(ChallengeManager::new(codes, &policy));
        Self {
            registry: IdentityRegistry::new(
                identities.clone(),
                challenges.clone(),
                policy.device_uniqueness(),
            ),
            activation: ActivationAuthority::new(identities, policy.clear_otp_on_success()),
            push: PushDispatcher::new(provider, &policy),
            ledger: TrustLedger::new(trust),
            challenges,
            clock: Arc::new(SystemClock),
            policy,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Bind the mobile number to the device in `registration` and open a new
    /// challenge. Any earlier verification is discarded.
    ///
    /// # Errors
    /// `DuplicateDevice` under device uniqueness, `Store` on storage failure.
    #[instrument(skip(self, registration), fields(mobile_number = %registration.mobile_number, device_id = %registration.device_id))]
    pub async fn register_or_rebind(
        &self,
        registration: Registration,
    ) -> Result<RegistrationOutcome, AuthError> {
        let _guard = self.activation.lock(&registration.mobile_number).await;
        self.registry
            .register_or_rebind(&registration, self.clock.now())
            .await
    }

    /// Check the code and, on success, make this device the only active one.
    /// A non-blank `push_address` replaces the bound address as part of the
    /// activation.
    ///
    /// # Errors
    /// `NotFound` for an unknown number, `InvalidCode` or `Expired` when the
    /// challenge does not match. A failed attempt changes nothing.
    #[instrument(skip(self, otp, push_address))]
    pub async fn verify_otp(
        &self,
        mobile_number: &str,
        otp: &str,
        push_address: Option<&str>,
    ) -> Result<Identity, AuthError> {
        let mobile_number = checked_mobile_number(mobile_number)?;
        let otp = required("otp", otp)?;
        let push_address = push_address
            .map(str::trim)
            .filter(|address| !address.is_empty());

        let guard = self.activation.lock(&mobile_number).await;
        let now = self.clock.now();

        let identity = self
            .registry
            .find_by_mobile(&mobile_number)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("identity {mobile_number}")))?;

        self.challenges.validate(&identity, &otp, now)?;

        self.activation
            .activate(&guard, &identity.device_id, push_address, now)
            .await
    }

    /// Push a login confirmation to the active device for the number.
    ///
    /// # Errors
    /// `NotFound` unless the identity is verified and active, then whatever
    /// the dispatcher reports.
    #[instrument(skip(self))]
    pub async fn request_login_push(
        &self,
        mobile_number: &str,
        website_id: &str,
        website_name: &str,
    ) -> Result<LoginPush, AuthError> {
        let mobile_number = checked_mobile_number(mobile_number)?;
        let website_id = required("websiteId", website_id)?;
        let website_name = required("websiteName", website_name)?;

        let identity = self.active_identity(&mobile_number).await?;

        self.push
            .notify_login(&identity, &website_id, &website_name, self.clock.now())
            .await
    }

    /// Echo the device's accept/deny answer onto the identity, then store it
    /// in the ledger. A failed identity write leaves the ledger untouched.
    ///
    /// # Errors
    /// `NotFound` unless the identity is verified and active, `Store` on
    /// storage failure.
    #[instrument(skip(self))]
    pub async fn record_site_decision(
        &self,
        mobile_number: &str,
        website_id: &str,
        accepted: bool,
    ) -> Result<TrustRecord, AuthError> {
        let mobile_number = checked_mobile_number(mobile_number)?;
        let website_id = required("websiteId", website_id)?;

        let _guard = self.activation.lock(&mobile_number).await;
        let now = self.clock.now();

        let mut identity = self.active_identity(&mobile_number).await?;

        identity.is_authenticated = Some(accepted);
        identity.updated_at = now;
        self.registry.save(&identity).await?;

        self.ledger
            .record_decision(&identity.device_id, &mobile_number, &website_id, accepted, now)
            .await
    }

    /// # Errors
    /// `NotFound` when no decision exists for the pair.
    #[instrument(skip(self))]
    pub async fn get_trust_status(
        &self,
        mobile_number: &str,
        website_id: &str,
    ) -> Result<TrustRecord, AuthError> {
        let mobile_number = checked_mobile_number(mobile_number)?;
        let website_id = required("websiteId", website_id)?;
        self.ledger
            .query_status(&mobile_number, &website_id)
            .await?
            .ok_or_else(|| {
                AuthError::NotFound(format!("trust record for {mobile_number} on {website_id}"))
            })
    }

    /// Delete every identity. Trust records are kept.
    ///
    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    #[instrument(skip(self))]
    pub async fn purge_all_identities(&self) -> Result<u64, AuthError> {
        self.registry.purge_all().await
    }

    /// # Errors
    /// `NotFound` for an unknown number.
    #[instrument(skip(self))]
    pub async fn find_identity(&self, mobile_number: &str) -> Result<Identity, AuthError> {
        let mobile_number = checked_mobile_number(mobile_number)?;
        self.registry
            .find_by_mobile(&mobile_number)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("identity {mobile_number}")))
    }

    /// # Errors
    /// Returns `AuthError::Store` on storage failure.
    #[instrument(skip(self))]
    pub async fn list_identities(&self) -> Result<Vec<Identity>, AuthError> {
        self.registry.list().await
    }

    /// Swap the push address of a device, given the one it replaces.
    ///
    /// # Errors
    /// `NotFound` for an unknown device, `TokenMismatch` when the old address
    /// is stale.
    #[instrument(skip(self, old_push_address, new_push_address))]
    pub async fn update_push_address(
        &self,
        device_id: &str,
        old_push_address: &str,
        new_push_address: &str,
    ) -> Result<Identity, AuthError> {
        let device_id = required("deviceId", device_id)?;
        let old_push_address = required("oldPushAddress", old_push_address)?;
        let new_push_address = required("newPushAddress", new_push_address)?;

        let holder = self
            .registry
            .find_by_device(&device_id)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("device {device_id}")))?;

        let _guard = self.activation.lock(&holder.mobile_number).await;
        self.registry
            .update_push_address(
                &holder,
                &old_push_address,
                &new_push_address,
                self.clock.now(),
            )
            .await
    }

    /// Free-form notification to the device currently bound to the number.
    ///
    /// # Errors
    /// `NotFound` for an unknown number, then whatever the dispatcher reports.
    #[instrument(skip(self, body))]
    pub async fn send_notification(
        &self,
        mobile_number: &str,
        title: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, AuthError> {
        let title = required("title", title)?;
        let body = required("body", body)?;
        let identity = self.find_identity(mobile_number).await?;
        self.push.notify(&identity, &title, &body).await
    }

    /// Set every row for the number inactive. Verification is kept, so the
    /// next successful challenge reactivates without a new registration.
    ///
    /// # Errors
    /// `NotFound` for an unknown number.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, mobile_number: &str) -> Result<u64, AuthError> {
        let mobile_number = checked_mobile_number(mobile_number)?;
        let guard = self.activation.lock(&mobile_number).await;

        if self.registry.find_by_mobile(&mobile_number).await?.is_none() {
            return Err(AuthError::NotFound(format!("identity {mobile_number}")));
        }

        let count = self.activation.deactivate(&guard, self.clock.now()).await?;
        info!(count, "identity deactivated");
        Ok(count)
    }

    async fn active_identity(&self, mobile_number: &str) -> Result<Identity, AuthError> {
        self.registry
            .find_active_verified(mobile_number)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("active identity {mobile_number}")))
    }
}
