//! Software credential store backed by ML-DSA-65 keys.
//!
//! Stands in for an OS-level secure credential service. Keys live in memory and,
//! when a directory is configured, are persisted as one CBOR file per username.
//! Every key creation and signature goes through a [`UserVerification`] prompt.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::key_file::{self, KeyRecord};
use super::{
    AlwaysVerify, KeyHandle, PlatformCredentialStore, PlatformResult, PlatformStatus,
    UserVerification,
};
use crate::attestation::{self, AttestationResult, AttestationStatus};
use crate::error::{PassportError, Result};
use crate::signature::{self, ZeroizingSecretKey};

/// Boundary name written into attestation statements issued by this store.
const ATTESTATION_BOUNDARY: &str = "software";

/// How the store answers attestation requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttestationMode {
    /// Issue a signed attestation statement
    #[default]
    Supported,
    /// Report a transient failure
    TemporaryFailure,
    /// Report that attestation is unavailable for these keys
    NotSupported,
}

impl std::str::FromStr for AttestationMode {
    type Err = PassportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "supported" => Ok(Self::Supported),
            "temporary" | "temporary_failure" => Ok(Self::TemporaryFailure),
            "unsupported" | "not_supported" => Ok(Self::NotSupported),
            other => Err(PassportError::InvalidConfig(format!(
                "Unknown attestation mode: {other}"
            ))),
        }
    }
}

struct SoftwareKey {
    public_key: Vec<u8>,
    secret_key: ZeroizingSecretKey,
    generation: u64,
    created_at: DateTime<Utc>,
}

/// ML-DSA-65 credential store with optional on-disk persistence.
pub struct SoftwareCredentialStore {
    supported: bool,
    attestation_mode: RwLock<AttestationMode>,
    verifier: Arc<dyn UserVerification>,
    keys: DashMap<String, Arc<SoftwareKey>>,
    /// Per-username locks serialising operations on the same key
    locks: DashMap<String, Arc<Mutex<()>>>,
    next_generation: AtomicU64,
    key_dir: Option<PathBuf>,
    attesting_public_key: Vec<u8>,
    attesting_secret_key: ZeroizingSecretKey,
}

impl SoftwareCredentialStore {
    /// Create a store that keeps keys in memory only.
    pub fn in_memory() -> Self {
        let (attesting_public_key, attesting_secret_key) = signature::generate_keypair();
        Self {
            supported: true,
            attestation_mode: RwLock::new(AttestationMode::default()),
            verifier: Arc::new(AlwaysVerify),
            keys: DashMap::new(),
            locks: DashMap::new(),
            next_generation: AtomicU64::new(1),
            key_dir: None,
            attesting_public_key,
            attesting_secret_key,
        }
    }

    /// Create a store persisting keys under `dir`, loading any keys already there.
    pub fn with_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        key_file::create_dir(dir)?;

        let mut store = Self::in_memory();
        let mut max_generation = 0;
        for mut record in key_file::load_all(dir)? {
            max_generation = max_generation.max(record.generation);
            let secret_key = std::mem::take(&mut record.secret_key);
            store.keys.insert(
                record.username.clone(),
                Arc::new(SoftwareKey {
                    public_key: std::mem::take(&mut record.public_key),
                    secret_key: ZeroizingSecretKey::from_bytes(secret_key),
                    generation: record.generation,
                    created_at: record.created_at,
                }),
            );
        }
        store.next_generation = AtomicU64::new(max_generation + 1);
        store.key_dir = Some(dir.to_path_buf());

        info!(path = %dir.display(), keys = store.keys.len(), "Loaded software credential store");
        Ok(store)
    }

    /// Create a store reporting that secure credentials are not set up.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::in_memory()
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn UserVerification>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_attestation_mode(self, mode: AttestationMode) -> Self {
        self.set_attestation_mode(mode);
        self
    }

    pub fn set_attestation_mode(&self, mode: AttestationMode) {
        if let Ok(mut current) = self.attestation_mode.write() {
            *current = mode;
        }
    }

    fn attestation_mode(&self) -> AttestationMode {
        self.attestation_mode
            .read()
            .map(|mode| *mode)
            .unwrap_or(AttestationMode::NotSupported)
    }

    pub fn has_key(&self, username: &str) -> bool {
        self.keys.contains_key(username)
    }

    fn lock_for(&self, username: &str) -> Arc<Mutex<()>> {
        self.locks.entry(username.to_string()).or_default().clone()
    }

    fn current_key(&self, handle: &KeyHandle) -> Option<Arc<SoftwareKey>> {
        self.keys
            .get(handle.username())
            .filter(|key| key.generation == handle.generation())
            .map(|key| key.value().clone())
    }

    fn persist(&self, username: &str, key: &SoftwareKey) -> Result<()> {
        let Some(dir) = &self.key_dir else {
            return Ok(());
        };
        key_file::write_record(
            dir,
            &KeyRecord {
                username: username.to_string(),
                public_key: key.public_key.clone(),
                secret_key: key.secret_key.as_bytes().to_vec(),
                generation: key.generation,
                created_at: key.created_at,
            },
        )
    }
}

impl Default for SoftwareCredentialStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for SoftwareCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareCredentialStore")
            .field("supported", &self.supported)
            .field("keys", &self.keys.len())
            .field("key_dir", &self.key_dir)
            .field("attestation_mode", &self.attestation_mode())
            .finish()
    }
}

#[async_trait]
impl PlatformCredentialStore for SoftwareCredentialStore {
    async fn is_supported(&self) -> bool {
        self.supported
    }

    async fn create_or_replace(&self, username: &str) -> PlatformResult<KeyHandle> {
        if !self.supported {
            return Err(PlatformStatus::NotFound);
        }

        let lock = self.lock_for(username);
        let _guard = lock.lock().await;

        self.verifier
            .verify(username, "Create a sign-in key")
            .await
            .into_result()?;

        let (public_key, secret_key) = signature::generate_keypair();
        let key = SoftwareKey {
            public_key,
            secret_key,
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
            created_at: Utc::now(),
        };

        if let Err(e) = self.persist(username, &key) {
            warn!(error = %e, "Failed to persist key");
            return Err(PlatformStatus::UnknownError);
        }

        let handle = KeyHandle::new(username, key.public_key.clone(), key.generation);
        let replaced = self.keys.insert(username.to_string(), Arc::new(key)).is_some();
        debug!(generation = handle.generation(), replaced, "Created key");

        Ok(handle)
    }

    async fn open(&self, username: &str) -> PlatformResult<KeyHandle> {
        if !self.supported {
            return Err(PlatformStatus::NotFound);
        }

        let key = self.keys.get(username).ok_or(PlatformStatus::NotFound)?;
        Ok(KeyHandle::new(username, key.public_key.clone(), key.generation))
    }

    async fn get_attestation(&self, handle: &KeyHandle) -> AttestationResult {
        match self.attestation_mode() {
            AttestationMode::TemporaryFailure => {
                AttestationResult::failed(AttestationStatus::TemporaryFailure)
            }
            AttestationMode::NotSupported => {
                AttestationResult::failed(AttestationStatus::NotSupported)
            }
            AttestationMode::Supported => {
                if self.current_key(handle).is_none() {
                    return AttestationResult::failed(AttestationStatus::TemporaryFailure);
                }
                match attestation::issue(
                    handle.public_key(),
                    ATTESTATION_BOUNDARY,
                    &self.attesting_public_key,
                    &self.attesting_secret_key,
                ) {
                    Ok((key_buffer, chain)) => AttestationResult::success(key_buffer, chain),
                    Err(e) => {
                        warn!(error = %e, "Failed to issue attestation");
                        AttestationResult::failed(AttestationStatus::TemporaryFailure)
                    }
                }
            }
        }
    }

    async fn sign(&self, handle: &KeyHandle, challenge: &[u8]) -> PlatformResult<Vec<u8>> {
        let lock = self.lock_for(handle.username());
        let _guard = lock.lock().await;

        let key = self.current_key(handle).ok_or(PlatformStatus::NotFound)?;

        self.verifier
            .verify(handle.username(), "Sign in")
            .await
            .into_result()?;

        signature::sign(&key.secret_key, challenge).map_err(|e| {
            warn!(error = %e, "Signing failed");
            PlatformStatus::UnknownError
        })
    }

    async fn delete(&self, username: &str) -> Result<()> {
        let lock = self.lock_for(username);
        let removed = {
            let _guard = lock.lock().await;
            let removed = self.keys.remove(username).is_some();
            if let Some(dir) = &self.key_dir {
                key_file::delete_record(dir, username)?;
            }
            removed
        };
        drop(lock);
        // Only drop the lock entry when no other task holds it.
        self.locks
            .remove_if(username, |_, lock| Arc::strong_count(lock) == 1);

        debug!(removed, "Deleted key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::VerificationOutcome;

    struct Deny(VerificationOutcome);

    #[async_trait]
    impl UserVerification for Deny {
        async fn verify(&self, _username: &str, _reason: &str) -> VerificationOutcome {
            self.0
        }
    }

    #[tokio::test]
    async fn test_create_open_sign() {
        let store = SoftwareCredentialStore::in_memory();
        let created = store.create_or_replace("alice").await.unwrap();
        let opened = store.open("alice").await.unwrap();
        assert_eq!(created, opened);

        let signature = store.sign(&opened, b"challenge").await.unwrap();
        assert!(signature::verify(&store.retrieve_public_key(&opened), b"challenge", &signature).unwrap());
    }

    #[tokio::test]
    async fn test_open_missing_key() {
        let store = SoftwareCredentialStore::in_memory();
        assert_eq!(store.open("nobody").await, Err(PlatformStatus::NotFound));
    }

    #[tokio::test]
    async fn test_replace_invalidates_old_handle() {
        let store = SoftwareCredentialStore::in_memory();
        let old = store.create_or_replace("alice").await.unwrap();
        let new = store.create_or_replace("alice").await.unwrap();

        assert_ne!(old.public_key(), new.public_key());
        assert_eq!(
            store.sign(&old, b"challenge").await,
            Err(PlatformStatus::NotFound)
        );
        assert!(store.sign(&new, b"challenge").await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_prompt() {
        let store = SoftwareCredentialStore::in_memory()
            .with_verifier(Arc::new(Deny(VerificationOutcome::Cancelled)));
        assert_eq!(
            store.create_or_replace("alice").await,
            Err(PlatformStatus::UserCancelled)
        );
        assert!(!store.has_key("alice"));
    }

    #[tokio::test]
    async fn test_locked_device() {
        let store = SoftwareCredentialStore::in_memory();
        let handle = store.create_or_replace("alice").await.unwrap();

        let store = SoftwareCredentialStore {
            verifier: Arc::new(Deny(VerificationOutcome::DeviceLocked)),
            ..store
        };
        assert_eq!(
            store.sign(&handle, b"challenge").await,
            Err(PlatformStatus::DeviceLocked)
        );
    }

    #[tokio::test]
    async fn test_unsupported_store() {
        let store = SoftwareCredentialStore::unsupported();
        assert!(!store.is_supported().await);
        assert_eq!(
            store.create_or_replace("alice").await,
            Err(PlatformStatus::NotFound)
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = SoftwareCredentialStore::in_memory();
        store.create_or_replace("alice").await.unwrap();
        store.delete("alice").await.unwrap();
        store.delete("alice").await.unwrap();
        assert_eq!(store.open("alice").await, Err(PlatformStatus::NotFound));
    }

    #[tokio::test]
    async fn test_delete_releases_lock_entry() {
        let store = SoftwareCredentialStore::in_memory();
        let handle = store.create_or_replace("alice").await.unwrap();
        store.sign(&handle, b"challenge").await.unwrap();
        assert!(store.locks.contains_key("alice"));

        store.delete("alice").await.unwrap();
        assert!(store.locks.is_empty());

        // still usable after the entry is gone
        store.create_or_replace("alice").await.unwrap();
        assert!(store.has_key("alice"));
    }

    #[tokio::test]
    async fn test_attestation_modes() {
        let store = SoftwareCredentialStore::in_memory();
        let handle = store.create_or_replace("alice").await.unwrap();

        let result = store.get_attestation(&handle).await;
        assert_eq!(result.status, AttestationStatus::Success);

        store.set_attestation_mode(AttestationMode::TemporaryFailure);
        let result = store.get_attestation(&handle).await;
        assert_eq!(result.status, AttestationStatus::TemporaryFailure);
        assert!(result.attestation.is_none());

        store.set_attestation_mode(AttestationMode::NotSupported);
        let result = store.get_attestation(&handle).await;
        assert_eq!(result.status, AttestationStatus::NotSupported);
    }

    #[tokio::test]
    async fn test_keys_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let handle = {
            let store = SoftwareCredentialStore::with_directory(dir.path()).unwrap();
            store.create_or_replace("alice").await.unwrap()
        };

        let store = SoftwareCredentialStore::with_directory(dir.path()).unwrap();
        let reopened = store.open("alice").await.unwrap();
        assert_eq!(reopened.public_key(), handle.public_key());

        let next = store.create_or_replace("bob").await.unwrap();
        assert!(next.generation() > handle.generation());
    }

    #[test]
    fn test_attestation_mode_parsing() {
        assert_eq!(
            "temporary".parse::<AttestationMode>().unwrap(),
            AttestationMode::TemporaryFailure
        );
        assert_eq!(
            "UNSUPPORTED".parse::<AttestationMode>().unwrap(),
            AttestationMode::NotSupported
        );
        assert!("sometimes".parse::<AttestationMode>().is_err());
    }
}
