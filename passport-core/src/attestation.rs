//! Key attestation: proof that a device key lives inside a trusted boundary.
//!
//! The platform store reports an [`AttestationResult`]; the credential manager
//! folds it into the [`Attestation`] record that is registered alongside the
//! public key. Attestation is always best-effort and never fails enrollment.
//!
//! ## Statement format
//!
//! `key_buffer` holds a CBOR [`AttestationEnvelope`]: a statement binding the
//! SHA3-256 digest of the attested public key, signed with ML-DSA-65 by the
//! attesting key. `certificate_chain_buffer` holds a CBOR array of public keys,
//! attesting key first.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{PassportError, Result};
use crate::signature::{self, key_digest, ZeroizingSecretKey};

/// Outcome reported by the platform store when asked for attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationStatus {
    Success,
    /// Attestation could not be produced now but may succeed later for the same key
    TemporaryFailure,
    /// This key can never be attested
    NotSupported,
}

/// Raw attestation result from the platform store.
#[derive(Debug, Clone)]
pub struct AttestationResult {
    pub status: AttestationStatus,
    pub attestation: Option<Vec<u8>>,
    pub certificate_chain: Option<Vec<u8>>,
}

impl AttestationResult {
    pub fn success(attestation: Vec<u8>, certificate_chain: Vec<u8>) -> Self {
        Self {
            status: AttestationStatus::Success,
            attestation: Some(attestation),
            certificate_chain: Some(certificate_chain),
        }
    }

    pub fn failed(status: AttestationStatus) -> Self {
        Self {
            status,
            attestation: None,
            certificate_chain: None,
        }
    }
}

/// Whether a missing attestation may be fetched again later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationRetryStatus {
    #[default]
    None,
    TemporaryFailure,
    NotSupported,
}

/// Attestation as registered with the relying party.
///
/// `included == true` implies both buffers are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub included: bool,
    pub key_buffer: Option<Vec<u8>>,
    pub certificate_chain_buffer: Option<Vec<u8>>,
    pub retry_status: AttestationRetryStatus,
}

impl Attestation {
    pub fn temporary_failure() -> Self {
        Self::missing(AttestationRetryStatus::TemporaryFailure)
    }

    pub fn not_supported() -> Self {
        Self::missing(AttestationRetryStatus::NotSupported)
    }

    fn missing(retry_status: AttestationRetryStatus) -> Self {
        Self {
            included: false,
            key_buffer: None,
            certificate_chain_buffer: None,
            retry_status,
        }
    }

    /// Fold a platform result into a registrable record.
    ///
    /// A `Success` missing either buffer is downgraded to a temporary failure.
    pub fn from_result(result: AttestationResult) -> Self {
        match (result.status, result.attestation, result.certificate_chain) {
            (AttestationStatus::Success, Some(key_buffer), Some(chain)) => Self {
                included: true,
                key_buffer: Some(key_buffer),
                certificate_chain_buffer: Some(chain),
                retry_status: AttestationRetryStatus::None,
            },
            (AttestationStatus::Success, _, _) => {
                tracing::warn!("Attestation reported success without both buffers");
                Self::temporary_failure()
            }
            (AttestationStatus::TemporaryFailure, _, _) => Self::temporary_failure(),
            (AttestationStatus::NotSupported, _, _) => Self::not_supported(),
        }
    }

    /// Structural invariant: included attestations carry both buffers.
    pub fn is_well_formed(&self) -> bool {
        !self.included || (self.key_buffer.is_some() && self.certificate_chain_buffer.is_some())
    }

    /// Verify the statement was signed by the chain's leaf key over `public_key`.
    ///
    /// Returns `Ok(false)` for attestations that are not included.
    pub fn verify(&self, public_key: &[u8]) -> Result<bool> {
        let (Some(key_buffer), Some(chain_buffer)) =
            (&self.key_buffer, &self.certificate_chain_buffer)
        else {
            return Ok(false);
        };
        if !self.included {
            return Ok(false);
        }

        let envelope: AttestationEnvelope = ciborium::from_reader(key_buffer.as_slice())
            .map_err(|e| PassportError::SerializationError(e.to_string()))?;
        let chain: Vec<Vec<u8>> = ciborium::from_reader(chain_buffer.as_slice())
            .map_err(|e| PassportError::SerializationError(e.to_string()))?;

        let Some(attesting_key) = chain.first() else {
            return Ok(false);
        };

        if envelope.statement.key_digest != key_digest(public_key) {
            return Ok(false);
        }

        let statement_bytes = envelope.statement.to_cbor()?;
        signature::verify(attesting_key, &statement_bytes, &envelope.signature)
    }
}

/// Statement signed by the attesting key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationStatement {
    /// SHA3-256 of the attested public key
    pub key_digest: [u8; 32],
    /// Unix timestamp (seconds) when the statement was issued
    pub issued_at: i64,
    /// Kind of boundary holding the key, e.g. "software" or "tpm"
    pub boundary: String,
}

impl AttestationStatement {
    fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| PassportError::SerializationError(e.to_string()))?;
        Ok(bytes)
    }
}

/// Statement plus detached signature, the content of `key_buffer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationEnvelope {
    pub statement: AttestationStatement,
    pub signature: Vec<u8>,
}

/// Issue an attestation for `public_key` with the given attesting keypair.
///
/// Returns `(key_buffer, certificate_chain_buffer)`.
pub fn issue(
    public_key: &[u8],
    boundary: &str,
    attesting_public_key: &[u8],
    attesting_secret_key: &ZeroizingSecretKey,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let statement = AttestationStatement {
        key_digest: key_digest(public_key),
        issued_at: Utc::now().timestamp(),
        boundary: boundary.to_string(),
    };
    let signature = signature::sign(attesting_secret_key, &statement.to_cbor()?)?;

    let mut key_buffer = Vec::new();
    ciborium::into_writer(
        &AttestationEnvelope {
            statement,
            signature,
        },
        &mut key_buffer,
    )
    .map_err(|e| PassportError::SerializationError(e.to_string()))?;

    let mut chain_buffer = Vec::new();
    ciborium::into_writer(&vec![attesting_public_key.to_vec()], &mut chain_buffer)
        .map_err(|e| PassportError::SerializationError(e.to_string()))?;

    Ok((key_buffer, chain_buffer))
}
