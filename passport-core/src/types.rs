//! Account, device and challenge records shared by the registry, the relying
//! party and the credential manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attestation::{Attestation, AttestationRetryStatus};

/// Opaque account identifier issued by the relying party at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Stable identifier of a physical machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DeviceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One enrolled key on one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassportDevice {
    pub device_id: DeviceId,
    /// Raw public key bytes as returned by the platform store
    pub public_key: Vec<u8>,
    pub attestation: Option<Attestation>,
    pub registered_at: DateTime<Utc>,
}

impl PassportDevice {
    /// Whether the attestation for this key can be fetched again later.
    pub fn attestation_retryable(&self) -> bool {
        matches!(
            self.attestation.as_ref().map(|a| a.retry_status),
            Some(AttestationRetryStatus::TemporaryFailure)
        )
    }
}

/// Identity record owned by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    pub username: String,
    pub devices: Vec<PassportDevice>,
    pub created_at: DateTime<Utc>,
    /// SHA3-256 digest for the legacy password path, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_digest: Option<String>,
}

impl UserAccount {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            devices: Vec::new(),
            created_at: Utc::now(),
            password_digest: None,
        }
    }

    pub fn device(&self, device_id: &DeviceId) -> Option<&PassportDevice> {
        self.devices.iter().find(|d| &d.device_id == device_id)
    }

    pub fn has_device(&self, device_id: &DeviceId) -> bool {
        self.device(device_id).is_some()
    }
}

/// Single-use payload issued by the relying party.
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge(Vec<u8>);

impl Challenge {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Challenge").field("len", &self.0.len()).finish()
    }
}

/// Signature over a challenge, bound to the account and device submitting it.
#[derive(Clone)]
pub struct SignedResponse {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub signature: Vec<u8>,
}

impl std::fmt::Debug for SignedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedResponse")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("signature_len", &self.signature.len())
            .finish()
    }
}
