//! In-process relying party backed by a [`Registry`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ChallengeStore, RelyingParty};
use crate::attestation::Attestation;
use crate::error::Result;
use crate::registry::Registry;
use crate::signature::{self, MLDSA65_PUBLIC_KEY_BYTES};
use crate::types::{Challenge, DeviceId, SignedResponse, UserAccount, UserId};

/// Relying party that keeps its records in a local [`Registry`].
pub struct LocalRelyingParty {
    registry: Arc<Registry>,
    challenges: ChallengeStore,
}

impl LocalRelyingParty {
    pub fn new(registry: Arc<Registry>, challenge_ttl: Duration) -> Self {
        Self {
            registry,
            challenges: ChallengeStore::new(challenge_ttl),
        }
    }

    /// Relying party over a fresh in-memory registry (tests).
    pub fn in_memory() -> Self {
        Self {
            registry: Arc::new(Registry::in_memory()),
            challenges: ChallengeStore::default(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }
}

impl std::fmt::Debug for LocalRelyingParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRelyingParty")
            .field("registry", &self.registry)
            .field("challenges", &self.challenges)
            .finish()
    }
}

#[async_trait]
impl RelyingParty for LocalRelyingParty {
    async fn register(&self, username: &str) -> Result<UserId> {
        self.registry.register(username).await
    }

    async fn register_with_password(&self, username: &str, password: &str) -> Result<UserId> {
        self.registry.register_with_password(username, password).await
    }

    async fn lookup_user_id(&self, username: &str) -> Result<Option<UserId>> {
        Ok(self.registry.lookup_user_id(username))
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<UserAccount>> {
        Ok(self.registry.lookup_account(user_id))
    }

    async fn accounts_for_device(&self, device_id: &DeviceId) -> Result<Vec<UserAccount>> {
        Ok(self.registry.accounts_for_device(device_id))
    }

    async fn validate_credentials(&self, username: &str, password: &str) -> Result<bool> {
        Ok(self.registry.validate_credentials(username, password))
    }

    async fn register_device(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        public_key: &[u8],
        attestation: Option<Attestation>,
    ) -> Result<bool> {
        if self.registry.lookup_account(user_id).is_none() {
            warn!(user_id = %user_id, "Device registration for unknown account");
            return Ok(false);
        }

        if public_key.len() != MLDSA65_PUBLIC_KEY_BYTES {
            warn!(len = public_key.len(), "Rejecting public key of unexpected size");
            return Ok(false);
        }

        if let Some(attestation) = &attestation {
            if !attestation.is_well_formed() {
                warn!(user_id = %user_id, "Rejecting malformed attestation");
                return Ok(false);
            }
            if attestation.included && !attestation.verify(public_key).unwrap_or(false) {
                warn!(user_id = %user_id, "Rejecting attestation that does not verify");
                return Ok(false);
            }
        }

        self.registry
            .add_device(user_id, *device_id, public_key.to_vec(), attestation)
            .await?;

        info!(
            user_id = %user_id,
            device_id = %device_id,
            key_digest = %hex::encode(signature::key_digest(public_key)),
            "Device registered"
        );
        Ok(true)
    }

    async fn request_challenge(&self, user_id: &UserId, device_id: &DeviceId) -> Result<Challenge> {
        let challenge = self.challenges.issue(*user_id, *device_id)?;
        debug!(user_id = %user_id, device_id = %device_id, "Challenge issued");
        Ok(challenge)
    }

    async fn verify_signed_challenge(&self, response: &SignedResponse) -> Result<bool> {
        let Some(challenge) = self
            .challenges
            .take(&response.user_id, &response.device_id)
        else {
            warn!(user_id = %response.user_id, "No outstanding challenge");
            return Ok(false);
        };

        let Some(account) = self.registry.lookup_account(&response.user_id) else {
            warn!(user_id = %response.user_id, "Signed challenge for unknown account");
            return Ok(false);
        };

        let Some(device) = account.device(&response.device_id) else {
            warn!(
                user_id = %response.user_id,
                device_id = %response.device_id,
                "Signed challenge from unregistered device"
            );
            return Ok(false);
        };

        let verified = match signature::verify(
            &device.public_key,
            challenge.as_bytes(),
            &response.signature,
        ) {
            Ok(verified) => verified,
            Err(e) => {
                warn!(error = %e, "Registered key could not be used for verification");
                false
            }
        };

        info!(
            user_id = %response.user_id,
            device_id = %response.device_id,
            verified,
            "Signed challenge checked"
        );
        Ok(verified)
    }

    async fn remove_device(&self, user_id: &UserId, device_id: &DeviceId) -> Result<()> {
        self.challenges.discard(user_id, device_id);
        let removed = self.registry.remove_device(user_id, device_id).await?;
        info!(user_id = %user_id, device_id = %device_id, removed, "Device removed");
        Ok(())
    }

    async fn remove_user(&self, user_id: &UserId) -> Result<()> {
        self.challenges.discard_user(user_id);
        let removed = self.registry.remove_account(user_id).await?;
        info!(user_id = %user_id, removed, "User removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::generate_keypair;
    use uuid::Uuid;

    fn device() -> DeviceId {
        DeviceId::from(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_verify_signed_challenge() {
        let rp = LocalRelyingParty::in_memory();
        let user_id = rp.register("alice").await.unwrap();
        let device_id = device();
        let (public_key, secret_key) = generate_keypair();

        assert!(rp
            .register_device(&user_id, &device_id, &public_key, None)
            .await
            .unwrap());

        let challenge = rp.request_challenge(&user_id, &device_id).await.unwrap();
        let response = SignedResponse {
            user_id,
            device_id,
            signature: signature::sign(&secret_key, challenge.as_bytes()).unwrap(),
        };
        assert!(rp.verify_signed_challenge(&response).await.unwrap());

        // single use
        assert!(!rp.verify_signed_challenge(&response).await.unwrap());
    }

    #[tokio::test]
    async fn test_signature_from_other_key_rejected() {
        let rp = LocalRelyingParty::in_memory();
        let user_id = rp.register("alice").await.unwrap();
        let device_id = device();
        let (public_key, _) = generate_keypair();
        let (_, attacker_key) = generate_keypair();
        rp.register_device(&user_id, &device_id, &public_key, None)
            .await
            .unwrap();

        let challenge = rp.request_challenge(&user_id, &device_id).await.unwrap();
        let response = SignedResponse {
            user_id,
            device_id,
            signature: signature::sign(&attacker_key, challenge.as_bytes()).unwrap(),
        };
        assert!(!rp.verify_signed_challenge(&response).await.unwrap());
    }

    #[tokio::test]
    async fn test_signature_bound_to_device() {
        let rp = LocalRelyingParty::in_memory();
        let user_id = rp.register("alice").await.unwrap();
        let (laptop, phone) = (device(), device());
        let (public_key, secret_key) = generate_keypair();
        rp.register_device(&user_id, &laptop, &public_key, None)
            .await
            .unwrap();

        let challenge = rp.request_challenge(&user_id, &phone).await.unwrap();
        let response = SignedResponse {
            user_id,
            device_id: phone,
            signature: signature::sign(&secret_key, challenge.as_bytes()).unwrap(),
        };
        assert!(!rp.verify_signed_challenge(&response).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_challenge_rejected() {
        let rp = LocalRelyingParty::new(Arc::new(Registry::in_memory()), Duration::ZERO);
        let user_id = rp.register("alice").await.unwrap();
        let device_id = device();
        let (public_key, secret_key) = generate_keypair();
        rp.register_device(&user_id, &device_id, &public_key, None)
            .await
            .unwrap();

        let challenge = rp.request_challenge(&user_id, &device_id).await.unwrap();
        let response = SignedResponse {
            user_id,
            device_id,
            signature: signature::sign(&secret_key, challenge.as_bytes()).unwrap(),
        };
        assert!(!rp.verify_signed_challenge(&response).await.unwrap());
    }

    #[tokio::test]
    async fn test_register_device_rejects_unknown_account_and_bad_key() {
        let rp = LocalRelyingParty::in_memory();
        let (public_key, _) = generate_keypair();
        assert!(!rp
            .register_device(&UserId::new_random(), &device(), &public_key, None)
            .await
            .unwrap());

        let user_id = rp.register("alice").await.unwrap();
        assert!(!rp
            .register_device(&user_id, &device(), &[1, 2, 3], None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_register_device_rejects_malformed_attestation() {
        let rp = LocalRelyingParty::in_memory();
        let user_id = rp.register("alice").await.unwrap();
        let (public_key, _) = generate_keypair();

        let malformed = Attestation {
            included: true,
            key_buffer: None,
            certificate_chain_buffer: None,
            retry_status: Default::default(),
        };
        assert!(!rp
            .register_device(&user_id, &device(), &public_key, Some(malformed))
            .await
            .unwrap());
        assert!(rp.get_account(&user_id).await.unwrap().unwrap().devices.is_empty());
    }

    #[tokio::test]
    async fn test_remove_user_drops_challenges() {
        let rp = LocalRelyingParty::in_memory();
        let user_id = rp.register("alice").await.unwrap();
        rp.request_challenge(&user_id, &device()).await.unwrap();
        assert_eq!(rp.challenges().pending_count(), 1);

        rp.remove_user(&user_id).await.unwrap();
        assert_eq!(rp.challenges().pending_count(), 0);
        assert!(rp.lookup_user_id("alice").await.unwrap().is_none());
    }
}
