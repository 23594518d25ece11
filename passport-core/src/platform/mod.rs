//! Platform credential store capability.
//!
//! The platform store holds per-username asymmetric keys gated by local user
//! verification (PIN or biometric). The core never sees private key material:
//! only public key bytes, attestation buffers and signatures cross this
//! boundary.
//!
//! Every operation may block on a user prompt, so the trait is async. Outcomes
//! such as a cancelled prompt are ordinary [`PlatformStatus`] values rather
//! than errors.
//!
//! ## Implementations
//!
//! - [`SoftwareCredentialStore`] - ML-DSA-65 keys in memory or on disk,
//!   gated by a pluggable [`UserVerification`]

mod key_file;
mod software;

pub use software::{AttestationMode, SoftwareCredentialStore};

use async_trait::async_trait;

use crate::attestation::AttestationResult;

/// Non-success outcome of a platform operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformStatus {
    /// The user dismissed the verification prompt
    UserCancelled,
    /// No key exists for the username, or credentials are not set up
    NotFound,
    /// The security device is locked out
    DeviceLocked,
    /// Any other platform failure
    UnknownError,
}

impl std::fmt::Display for PlatformStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserCancelled => write!(f, "user cancelled"),
            Self::NotFound => write!(f, "not found"),
            Self::DeviceLocked => write!(f, "security device locked"),
            Self::UnknownError => write!(f, "unknown error"),
        }
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformStatus>;

/// Open reference to a platform key.
///
/// Holds the public key and a generation number; a handle becomes stale once
/// its key is replaced or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    username: String,
    public_key: Vec<u8>,
    generation: u64,
}

impl KeyHandle {
    pub fn new(username: impl Into<String>, public_key: Vec<u8>, generation: u64) -> Self {
        Self {
            username: username.into(),
            public_key,
            generation,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

/// Local user verification (PIN entry, biometric prompt).
#[async_trait]
pub trait UserVerification: Send + Sync {
    /// Ask the user to confirm `reason` for `username`.
    async fn verify(&self, username: &str, reason: &str) -> VerificationOutcome;
}

/// Result of a verification prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    Cancelled,
    DeviceLocked,
}

impl VerificationOutcome {
    pub fn into_result(self) -> PlatformResult<()> {
        match self {
            VerificationOutcome::Verified => Ok(()),
            VerificationOutcome::Cancelled => Err(PlatformStatus::UserCancelled),
            VerificationOutcome::DeviceLocked => Err(PlatformStatus::DeviceLocked),
        }
    }
}

/// Verifier that approves every prompt. For tests and unattended runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysVerify;

#[async_trait]
impl UserVerification for AlwaysVerify {
    async fn verify(&self, _username: &str, _reason: &str) -> VerificationOutcome {
        VerificationOutcome::Verified
    }
}

/// Capability interface required from the platform credential store.
///
/// Access to a single username's key is serialised by the store.
#[async_trait]
pub trait PlatformCredentialStore: Send + Sync {
    /// Whether key enrollment is possible on this machine.
    async fn is_supported(&self) -> bool;

    /// Create a key for `username`, replacing any existing one.
    async fn create_or_replace(&self, username: &str) -> PlatformResult<KeyHandle>;

    /// Open the existing key for `username`.
    async fn open(&self, username: &str) -> PlatformResult<KeyHandle>;

    /// Public key bytes of an open key.
    fn retrieve_public_key(&self, handle: &KeyHandle) -> Vec<u8> {
        handle.public_key().to_vec()
    }

    /// Attestation for an open key.
    async fn get_attestation(&self, handle: &KeyHandle) -> AttestationResult;

    /// Sign `challenge` with the key behind `handle`, prompting the user.
    async fn sign(&self, handle: &KeyHandle, challenge: &[u8]) -> PlatformResult<Vec<u8>>;

    /// Delete the key for `username`. Deleting a missing key is not an error.
    async fn delete(&self, username: &str) -> crate::Result<()>;
}
