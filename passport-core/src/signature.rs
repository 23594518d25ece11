//! ML-DSA-65 (FIPS 204) detached signatures.
//!
//! Device keys held by the software credential store and the attestation
//! statements it issues both use ML-DSA-65. The relying party only ever sees
//! public key bytes and detached signatures.

use pqcrypto_mldsa::mldsa65;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey, SecretKey};
use sha3::{Digest, Sha3_256};
use zeroize::Zeroizing;

use crate::error::{PassportError, Result};

/// ML-DSA-65 public key size in bytes.
pub const MLDSA65_PUBLIC_KEY_BYTES: usize = 1952;

/// ML-DSA-65 detached signature size in bytes.
pub const MLDSA65_SIGNATURE_BYTES: usize = 3309;

/// Secret key bytes, wiped when dropped.
pub struct ZeroizingSecretKey(Zeroizing<Vec<u8>>);

impl ZeroizingSecretKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn to_mldsa(&self) -> Result<mldsa65::SecretKey> {
        mldsa65::SecretKey::from_bytes(&self.0)
            .map_err(|_| PassportError::SignatureError("Invalid secret key".into()))
    }
}

impl std::fmt::Debug for ZeroizingSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ZeroizingSecretKey([REDACTED])")
    }
}

/// Generate a fresh keypair, returning raw public key bytes and the wrapped secret key.
pub fn generate_keypair() -> (Vec<u8>, ZeroizingSecretKey) {
    let (public_key, secret_key) = mldsa65::keypair();
    (
        public_key.as_bytes().to_vec(),
        ZeroizingSecretKey::from_bytes(secret_key.as_bytes().to_vec()),
    )
}

/// Produce a detached signature over `message`.
pub fn sign(secret_key: &ZeroizingSecretKey, message: &[u8]) -> Result<Vec<u8>> {
    let secret_key = secret_key.to_mldsa()?;
    let signature = mldsa65::detached_sign(message, &secret_key);
    Ok(signature.as_bytes().to_vec())
}

/// Check a detached signature. Malformed keys are an error, a bad signature is `Ok(false)`.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool> {
    let public_key = mldsa65::PublicKey::from_bytes(public_key)
        .map_err(|_| PassportError::SignatureError("Invalid public key".into()))?;

    let signature = match mldsa65::DetachedSignature::from_bytes(signature) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };

    Ok(mldsa65::verify_detached_signature(&signature, message, &public_key).is_ok())
}

/// SHA3-256 digest of a public key, used to name and bind keys without exposing them.
pub fn key_digest(public_key: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(public_key);
    hasher.finalize().into()
}
