//! Passport Core - key-based local sign-in library
//!
//! This crate manages per-user, per-device asymmetric keys held by a platform
//! credential store and gated by local user verification (PIN or biometric).
//! A relying party registers the public keys and verifies signed challenges.
//!
//! # Features
//!
//! - Enrollment with replace-existing semantics and best-effort attestation
//! - Challenge-response sign-in with a single bounded re-enrollment
//! - Multi-device account bookkeeping with serialised registry mutations
//! - Post-quantum signatures using ML-DSA-65 (FIPS 204)
//! - Secure key zeroization on drop
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use passport_core::{CredentialManager, DeviceId, LocalRelyingParty, SoftwareCredentialStore};
//!
//! # async fn example() -> passport_core::Result<()> {
//! let manager = CredentialManager::new(
//!     Arc::new(SoftwareCredentialStore::in_memory()),
//!     Arc::new(LocalRelyingParty::in_memory()),
//!     DeviceId::derive(b"example-machine"),
//! );
//!
//! // Create the account and enroll this device
//! let account = manager.register_account("alice").await?;
//!
//! // Later: prove possession of the device key
//! assert!(manager.authenticate(&account).await?.is_verified());
//! # Ok(())
//! # }
//! ```

pub mod attestation;
pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod platform;
pub mod registry;
pub mod relying_party;
pub mod signature;
pub mod types;

// Re-export main types for convenience
pub use attestation::{Attestation, AttestationResult, AttestationRetryStatus, AttestationStatus};
pub use config::PassportConfig;
pub use device::resolve_device_id;
pub use error::{PassportError, Result};
pub use manager::{AuthOutcome, CredentialManager, EnrollResult};
pub use platform::{
    AlwaysVerify, AttestationMode, KeyHandle, PlatformCredentialStore, PlatformResult,
    PlatformStatus, SoftwareCredentialStore, UserVerification, VerificationOutcome,
};
pub use registry::Registry;
pub use relying_party::{ChallengeStore, LocalRelyingParty, RelyingParty};
pub use signature::{
    generate_keypair, ZeroizingSecretKey, MLDSA65_PUBLIC_KEY_BYTES, MLDSA65_SIGNATURE_BYTES,
};
pub use types::{Challenge, DeviceId, PassportDevice, SignedResponse, UserAccount, UserId};
