//! Relying party contract
//!
//! The relying party issues user identifiers and challenges, verifies signed
//! challenges and owns the account/device records. A challenge moves through
//! `Idle -> ChallengeIssued -> SignatureSubmitted -> Verified | Rejected`;
//! verification succeeds only when the signature is valid over the exact bytes
//! issued and was produced by the public key registered for the submitting
//! (account, device) pair.
//!
//! ## Implementations
//!
//! - [`LocalRelyingParty`] - in-process stand-in backed by a [`Registry`](crate::Registry)

mod challenge;
mod local;

pub use challenge::{ChallengeStore, CHALLENGE_LEN, DEFAULT_CHALLENGE_TTL};
pub use local::LocalRelyingParty;

use async_trait::async_trait;

use crate::attestation::Attestation;
use crate::error::Result;
use crate::types::{Challenge, DeviceId, SignedResponse, UserAccount, UserId};

/// Relying party operations consumed by the credential manager.
///
/// Implementations must be thread-safe (`Send + Sync`). Rejections are
/// reported as `Ok(false)`; `Err` is reserved for transport or storage faults.
#[async_trait]
pub trait RelyingParty: Send + Sync {
    /// Create an account and return its identifier.
    async fn register(&self, username: &str) -> Result<UserId>;

    /// Create an account that also accepts the legacy password sign-in.
    async fn register_with_password(&self, username: &str, password: &str) -> Result<UserId>;

    async fn lookup_user_id(&self, username: &str) -> Result<Option<UserId>>;

    async fn get_account(&self, user_id: &UserId) -> Result<Option<UserAccount>>;

    /// Accounts with a live device entry for `device_id`.
    async fn accounts_for_device(&self, device_id: &DeviceId) -> Result<Vec<UserAccount>>;

    /// Legacy password check for accounts without an enrolled key.
    async fn validate_credentials(&self, username: &str, password: &str) -> Result<bool>;

    /// Register a device key. Re-registering the same device replaces its key.
    async fn register_device(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        public_key: &[u8],
        attestation: Option<Attestation>,
    ) -> Result<bool>;

    /// Issue a single-use challenge for the (account, device) pair.
    async fn request_challenge(&self, user_id: &UserId, device_id: &DeviceId) -> Result<Challenge>;

    /// Verify a signature over the outstanding challenge for the response's pair.
    async fn verify_signed_challenge(&self, response: &SignedResponse) -> Result<bool>;

    /// Drop a device registration. Removing an unknown device is a no-op.
    async fn remove_device(&self, user_id: &UserId, device_id: &DeviceId) -> Result<()>;

    /// Drop an account and all of its devices.
    async fn remove_user(&self, user_id: &UserId) -> Result<()>;
}
