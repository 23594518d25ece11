//! Credential lifecycle manager
//!
//! Drives the platform credential store and the relying party through
//! enrollment, challenge-response authentication and revocation. Both
//! collaborators are injected at construction, so tests can substitute
//! scripted doubles.
//!
//! Platform outcomes (cancelled prompt, missing key, locked device) come back
//! as [`EnrollResult`] / [`AuthOutcome`] values. `Err` is reserved for relying
//! party and storage faults.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::attestation::{Attestation, AttestationRetryStatus};
use crate::config::PassportConfig;
use crate::device::resolve_device_id;
use crate::error::{PassportError, Result};
use crate::platform::{
    KeyHandle, PlatformCredentialStore, PlatformStatus, SoftwareCredentialStore, UserVerification,
};
use crate::registry::Registry;
use crate::relying_party::{LocalRelyingParty, RelyingParty};
use crate::types::{DeviceId, SignedResponse, UserAccount, UserId};

/// Re-enrollments `authenticate` may attempt when the local key is missing.
const MAX_REENROLLMENTS: u32 = 1;

/// Outcome of [`CredentialManager::enroll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollResult {
    /// Key created and registered with the relying party
    Success,
    /// User dismissed the verification prompt
    UserCancelled,
    /// Secure credentials are not set up on this machine
    NotFound,
    /// Platform store locked or failing
    DeviceUnavailable,
    /// Key created locally but the relying party refused the registration
    RegistrationFailed,
}

impl EnrollResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Convert a non-success outcome into the matching error.
    pub fn into_result(self, user_id: &UserId) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::UserCancelled => Err(PassportError::UserDeclined),
            Self::NotFound => Err(PassportError::NotConfigured),
            Self::DeviceUnavailable => Err(PassportError::DeviceUnavailable(
                "platform credential store unavailable".into(),
            )),
            Self::RegistrationFailed => Err(PassportError::RegistrationFailed {
                user_id: user_id.to_string(),
            }),
        }
    }

    fn from_status(status: PlatformStatus) -> Self {
        match status {
            PlatformStatus::UserCancelled => Self::UserCancelled,
            PlatformStatus::NotFound => Self::NotFound,
            PlatformStatus::DeviceLocked | PlatformStatus::UnknownError => Self::DeviceUnavailable,
        }
    }
}

/// Outcome of [`CredentialManager::authenticate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The relying party accepted the signed challenge
    Verified,
    /// The relying party rejected the signed challenge
    Rejected,
    /// User dismissed a verification prompt
    UserDeclined,
    /// No local key, and re-enrollment was exhausted
    KeyMissing,
    /// Secure credentials are not set up on this machine
    NotConfigured,
    /// Platform store locked or failing
    DeviceUnavailable,
    /// Re-enrollment created a key but the relying party refused it
    RegistrationFailed,
}

impl AuthOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }

    /// Convert a non-verified outcome into the matching error.
    pub fn into_result(self, account: &UserAccount) -> Result<()> {
        match self {
            Self::Verified => Ok(()),
            Self::Rejected => Err(PassportError::AuthenticationRejected),
            Self::UserDeclined => Err(PassportError::UserDeclined),
            Self::KeyMissing => Err(PassportError::KeyMissing {
                username: account.username.clone(),
            }),
            Self::NotConfigured => Err(PassportError::NotConfigured),
            Self::DeviceUnavailable => Err(PassportError::DeviceUnavailable(
                "platform credential store unavailable".into(),
            )),
            Self::RegistrationFailed => Err(PassportError::RegistrationFailed {
                user_id: account.user_id.to_string(),
            }),
        }
    }

    fn from_status(status: PlatformStatus) -> Self {
        match status {
            PlatformStatus::UserCancelled => Self::UserDeclined,
            PlatformStatus::NotFound => Self::KeyMissing,
            PlatformStatus::DeviceLocked | PlatformStatus::UnknownError => Self::DeviceUnavailable,
        }
    }

    fn from_enroll(result: EnrollResult) -> Self {
        match result {
            EnrollResult::Success => Self::Verified,
            EnrollResult::UserCancelled => Self::UserDeclined,
            EnrollResult::NotFound => Self::NotConfigured,
            EnrollResult::DeviceUnavailable => Self::DeviceUnavailable,
            EnrollResult::RegistrationFailed => Self::RegistrationFailed,
        }
    }
}

/// Credential lifecycle manager for one physical device.
pub struct CredentialManager {
    platform: Arc<dyn PlatformCredentialStore>,
    relying_party: Arc<dyn RelyingParty>,
    device_id: DeviceId,
    relying_party_timeout: Option<Duration>,
}

impl CredentialManager {
    pub fn new(
        platform: Arc<dyn PlatformCredentialStore>,
        relying_party: Arc<dyn RelyingParty>,
        device_id: DeviceId,
    ) -> Self {
        Self {
            platform,
            relying_party,
            device_id,
            relying_party_timeout: None,
        }
    }

    /// Bound every relying party call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.relying_party_timeout = Some(timeout);
        self
    }

    /// Build a manager over the software store and the local relying party,
    /// both persisted under `config.data_dir`.
    pub fn from_config(
        config: &PassportConfig,
        verifier: Arc<dyn UserVerification>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let device_id = match config.device_id {
            Some(id) => id,
            None => resolve_device_id(&config.data_dir)?,
        };

        let platform = SoftwareCredentialStore::with_directory(config.keys_dir())?
            .with_verifier(verifier)
            .with_attestation_mode(config.attestation_mode);

        let registry = Registry::open(config.registry_path())?
            .with_duplicate_usernames(config.allow_duplicate_usernames);
        let relying_party = LocalRelyingParty::new(Arc::new(registry), config.challenge_ttl);

        debug!(device_id = %device_id, data_dir = %config.data_dir.display(), "Credential manager ready");

        Ok(Self::new(Arc::new(platform), Arc::new(relying_party), device_id)
            .with_timeout(config.relying_party_timeout))
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Whether key enrollment is possible on this machine.
    pub async fn check_availability(&self) -> bool {
        self.platform.is_supported().await
    }

    // ==================== Enrollment ====================

    /// Create (or replace) the key for `username` and register it for `user_id`.
    ///
    /// Attestation is best-effort. A relying party refusal leaves the new local
    /// key in place and returns [`EnrollResult::RegistrationFailed`].
    #[instrument(level = "info", skip(self), fields(device_id = %self.device_id))]
    pub async fn enroll(&self, user_id: UserId, username: &str) -> Result<EnrollResult> {
        let handle = match self.platform.create_or_replace(username).await {
            Ok(handle) => handle,
            Err(status) => {
                info!(status = ?status, "Key creation did not complete");
                return Ok(EnrollResult::from_status(status));
            }
        };

        let public_key = self.platform.retrieve_public_key(&handle);
        let attestation = Attestation::from_result(self.platform.get_attestation(&handle).await);
        if !attestation.included {
            info!(retry_status = ?attestation.retry_status, "Enrolling without attestation");
        }

        let registered = self
            .call(self.relying_party.register_device(
                &user_id,
                &self.device_id,
                &public_key,
                Some(attestation),
            ))
            .await?;

        if !registered {
            warn!("Relying party refused device registration, local key kept");
            return Ok(EnrollResult::RegistrationFailed);
        }

        info!(generation = handle.generation(), "Enrolled");
        Ok(EnrollResult::Success)
    }

    // ==================== Authentication ====================

    /// Prove possession of the local key for `account`.
    ///
    /// A missing key triggers at most one re-enrollment followed by one
    /// more attempt.
    #[instrument(
        level = "info",
        skip(self, account),
        fields(user_id = %account.user_id, device_id = %self.device_id)
    )]
    pub async fn authenticate(&self, account: &UserAccount) -> Result<AuthOutcome> {
        let mut reenrollments = 0;

        loop {
            let outcome = match self.platform.open(&account.username).await {
                Ok(handle) => self.sign_challenge(&account.user_id, &handle).await?,
                Err(status) => AuthOutcome::from_status(status),
            };

            if outcome != AuthOutcome::KeyMissing || reenrollments >= MAX_REENROLLMENTS {
                info!(outcome = ?outcome, reenrollments, "Authentication finished");
                return Ok(outcome);
            }

            reenrollments += 1;
            info!("Local key missing, re-enrolling");
            let enrolled = self.enroll(account.user_id, &account.username).await?;
            if !enrolled.is_success() {
                let outcome = AuthOutcome::from_enroll(enrolled);
                info!(outcome = ?outcome, "Re-enrollment did not complete");
                return Ok(outcome);
            }
        }
    }

    async fn sign_challenge(&self, user_id: &UserId, handle: &KeyHandle) -> Result<AuthOutcome> {
        let challenge = self
            .call(self.relying_party.request_challenge(user_id, &self.device_id))
            .await?;

        let signature = match self.platform.sign(handle, challenge.as_bytes()).await {
            Ok(signature) => signature,
            Err(status) => {
                // The outstanding challenge simply expires on the relying party.
                debug!(status = ?status, "Signing did not complete");
                return Ok(AuthOutcome::from_status(status));
            }
        };

        let response = SignedResponse {
            user_id: *user_id,
            device_id: self.device_id,
            signature,
        };
        let verified = self
            .call(self.relying_party.verify_signed_challenge(&response))
            .await?;

        Ok(if verified {
            AuthOutcome::Verified
        } else {
            AuthOutcome::Rejected
        })
    }

    // ==================== Revocation ====================

    /// Drop `device_id` from the account.
    ///
    /// When it is this machine, the local key is deleted afterwards. Keys on
    /// other devices are out of reach and stay until that device enrolls again.
    #[instrument(level = "info", skip(self, account), fields(user_id = %account.user_id))]
    pub async fn revoke_device(&self, account: &UserAccount, device_id: DeviceId) -> Result<()> {
        self.call(self.relying_party.remove_device(&account.user_id, &device_id))
            .await?;

        if device_id == self.device_id {
            if let Err(e) = self.platform.delete(&account.username).await {
                warn!(error = %e, "Device removed but local key could not be deleted");
            }
        }
        info!(device_id = %device_id, "Device revoked");
        Ok(())
    }

    /// Drop the account on the relying party, then delete the local key.
    #[instrument(level = "info", skip(self, account), fields(user_id = %account.user_id))]
    pub async fn revoke_account(&self, account: &UserAccount) -> Result<()> {
        self.call(self.relying_party.remove_user(&account.user_id))
            .await?;

        if let Err(e) = self.platform.delete(&account.username).await {
            warn!(error = %e, "Account removed but local key could not be deleted");
        }
        info!("Account revoked");
        Ok(())
    }

    // ==================== Account flows ====================

    /// Create a relying party account for `username` and enroll this device.
    ///
    /// The new account is removed again when enrollment does not succeed.
    #[instrument(level = "info", skip(self))]
    pub async fn register_account(&self, username: &str) -> Result<UserAccount> {
        let username = username.trim();
        let user_id = self.call(self.relying_party.register(username)).await?;
        self.enroll_new_account(user_id, username).await
    }

    /// Like [`register_account`](Self::register_account), but the account also
    /// accepts `password` for signing in on devices not yet enrolled.
    #[instrument(level = "info", skip(self, password))]
    pub async fn register_account_with_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserAccount> {
        let username = username.trim();
        let user_id = self
            .call(self.relying_party.register_with_password(username, password))
            .await?;
        self.enroll_new_account(user_id, username).await
    }

    async fn enroll_new_account(&self, user_id: UserId, username: &str) -> Result<UserAccount> {
        let enrolled = match self.enroll(user_id, username).await {
            Ok(result) => result,
            Err(e) => {
                self.discard_new_account(&user_id).await;
                return Err(e);
            }
        };
        if !enrolled.is_success() {
            self.discard_new_account(&user_id).await;
            enrolled.into_result(&user_id)?;
        }

        self.refresh_account(&user_id)
            .await?
            .ok_or_else(|| PassportError::AccountNotFound(user_id.to_string()))
    }

    async fn discard_new_account(&self, user_id: &UserId) {
        if let Err(e) = self.call(self.relying_party.remove_user(user_id)).await {
            warn!(user_id = %user_id, error = %e, "Could not remove account after failed enrollment");
        }
    }

    /// Sign in with a legacy password and enroll this device for the account.
    #[instrument(level = "info", skip(self, password))]
    pub async fn sign_in_with_password(&self, username: &str, password: &str) -> Result<UserAccount> {
        let username = username.trim();
        let valid = self
            .call(self.relying_party.validate_credentials(username, password))
            .await?;
        if !valid {
            return Err(PassportError::InvalidCredentials);
        }

        let user_id = self
            .call(self.relying_party.lookup_user_id(username))
            .await?
            .ok_or_else(|| PassportError::AccountNotFound(username.to_string()))?;

        self.enroll(user_id, username).await?.into_result(&user_id)?;

        self.refresh_account(&user_id)
            .await?
            .ok_or_else(|| PassportError::AccountNotFound(user_id.to_string()))
    }

    /// Accounts with a live device entry for this machine.
    pub async fn accounts_on_this_device(&self) -> Result<Vec<UserAccount>> {
        self.call(self.relying_party.accounts_for_device(&self.device_id))
            .await
    }

    /// Re-read an account from the relying party.
    pub async fn refresh_account(&self, user_id: &UserId) -> Result<Option<UserAccount>> {
        self.call(self.relying_party.get_account(user_id)).await
    }

    /// Fetch attestation again for this device's key if it previously failed
    /// temporarily, and re-register the device with the new record.
    ///
    /// Returns `None` when this device has nothing to retry.
    #[instrument(level = "info", skip(self, account), fields(user_id = %account.user_id))]
    pub async fn retry_attestation(&self, account: &UserAccount) -> Result<Option<Attestation>> {
        let Some(device) = account.device(&self.device_id) else {
            debug!("No device entry for this machine");
            return Ok(None);
        };
        if !device.attestation_retryable() {
            debug!("Attestation not retryable");
            return Ok(None);
        }

        let handle = match self.platform.open(&account.username).await {
            Ok(handle) => handle,
            Err(PlatformStatus::UserCancelled) => return Err(PassportError::UserDeclined),
            Err(PlatformStatus::NotFound) => {
                return Err(PassportError::KeyMissing {
                    username: account.username.clone(),
                })
            }
            Err(status) => return Err(PassportError::DeviceUnavailable(status.to_string())),
        };

        let public_key = self.platform.retrieve_public_key(&handle);
        if public_key != device.public_key {
            warn!("Local key no longer matches the registered key");
            return Err(PassportError::KeyMissing {
                username: account.username.clone(),
            });
        }

        let attestation = Attestation::from_result(self.platform.get_attestation(&handle).await);
        if attestation.retry_status == AttestationRetryStatus::TemporaryFailure {
            info!("Attestation still unavailable");
            return Ok(Some(attestation));
        }

        let registered = self
            .call(self.relying_party.register_device(
                &account.user_id,
                &self.device_id,
                &public_key,
                Some(attestation.clone()),
            ))
            .await?;
        if !registered {
            return Err(PassportError::RegistrationFailed {
                user_id: account.user_id.to_string(),
            });
        }

        info!(included = attestation.included, "Attestation updated");
        Ok(Some(attestation))
    }

    async fn call<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.relying_party_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| PassportError::Timeout(limit))?,
            None => request.await,
        }
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("device_id", &self.device_id)
            .field("relying_party_timeout", &self.relying_party_timeout)
            .finish()
    }
}
