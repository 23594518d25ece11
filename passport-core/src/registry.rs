//! Account/device registry
//!
//! Owns every [`UserAccount`] and its [`PassportDevice`] entries. Reads are
//! lock-free; mutations (register, add/remove device, remove account) are
//! serialised behind a single writer lock so that two devices acting on the
//! same account cannot lose each other's updates.
//!
//! Storage backends:
//! - **Memory**: nothing survives the process (tests, throwaway runs)
//! - **File**: JSON snapshot rewritten atomically after every mutation
//!
//! A mutation whose snapshot cannot be written is rolled back in memory and
//! reported as [`PassportError::Storage`].

use std::path::{Path, PathBuf};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::attestation::Attestation;
use crate::error::{PassportError, Result};
use crate::types::{DeviceId, PassportDevice, UserAccount, UserId};

const SNAPSHOT_VERSION: u32 = 1;

/// Registry storage backend
enum RegistryBackend {
    /// JSON snapshot on disk
    File(PathBuf),
    /// In-memory only
    Memory,
}

#[derive(Serialize, Deserialize)]
struct RegistrySnapshot {
    version: u32,
    accounts: Vec<UserAccount>,
}

/// Account/device registry
pub struct Registry {
    accounts: DashMap<UserId, UserAccount>,
    /// username -> user ids in registration order
    usernames: DashMap<String, Vec<UserId>>,
    write_lock: Mutex<()>,
    backend: RegistryBackend,
    allow_duplicate_usernames: bool,
}

impl Registry {
    /// Create an empty in-memory registry.
    pub fn in_memory() -> Self {
        Self {
            accounts: DashMap::new(),
            usernames: DashMap::new(),
            write_lock: Mutex::new(()),
            backend: RegistryBackend::Memory,
            allow_duplicate_usernames: false,
        }
    }

    /// Open (or create) a registry persisted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut registry = Self::in_memory();
        registry.backend = RegistryBackend::File(path.to_path_buf());

        match std::fs::read(path) {
            Ok(bytes) => {
                let snapshot: RegistrySnapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| PassportError::SerializationError(e.to_string()))?;
                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(PassportError::Storage(format!(
                        "Unsupported registry version {}",
                        snapshot.version
                    )));
                }
                for account in snapshot.accounts {
                    registry.index(&account);
                    registry.accounts.insert(account.user_id, account);
                }
                info!(path = %path.display(), accounts = registry.accounts.len(), "Loaded registry");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                info!(path = %path.display(), "Starting new registry");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(registry)
    }

    /// Permit several accounts to share one username.
    pub fn with_duplicate_usernames(mut self, allow: bool) -> Self {
        self.allow_duplicate_usernames = allow;
        self
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, RegistryBackend::File(_))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    // ==================== Accounts ====================

    /// Create an account and return its new identifier.
    pub async fn register(&self, username: &str) -> Result<UserId> {
        self.insert_account(username, None).await
    }

    /// Create an account that can also sign in with a password.
    pub async fn register_with_password(&self, username: &str, password: &str) -> Result<UserId> {
        if password.is_empty() {
            return Err(PassportError::InvalidCredentials);
        }
        self.insert_account(username, Some(password)).await
    }

    async fn insert_account(&self, username: &str, password: Option<&str>) -> Result<UserId> {
        let username = username.trim();
        if username.is_empty() {
            return Err(PassportError::InvalidUsername(
                "username must not be empty".into(),
            ));
        }

        let _guard = self.write_lock.lock().await;

        if !self.allow_duplicate_usernames && self.usernames.contains_key(username) {
            return Err(PassportError::DuplicateUsername(username.to_string()));
        }

        let user_id = UserId::new_random();
        let mut account = UserAccount::new(user_id, username);
        account.password_digest = password.map(|p| password_digest(&user_id, p));

        self.index(&account);
        self.accounts.insert(user_id, account);

        if let Err(e) = self.persist() {
            self.accounts.remove(&user_id);
            self.unindex(username, &user_id);
            return Err(e);
        }

        debug!(user_id = %user_id, "Registered account");
        Ok(user_id)
    }

    /// First account registered under `username`.
    pub fn lookup_user_id(&self, username: &str) -> Option<UserId> {
        self.usernames
            .get(username.trim())
            .and_then(|ids| ids.first().copied())
    }

    pub fn lookup_account(&self, user_id: &UserId) -> Option<UserAccount> {
        self.accounts.get(user_id).map(|entry| entry.value().clone())
    }

    /// Legacy password check for accounts not yet enrolled in key sign-in.
    ///
    /// Accounts registered without a password never match.
    pub fn validate_credentials(&self, username: &str, password: &str) -> bool {
        if username.trim().is_empty() || password.is_empty() {
            return false;
        }
        let Some(user_id) = self.lookup_user_id(username) else {
            return false;
        };
        match self.accounts.get(&user_id) {
            Some(account) => match &account.password_digest {
                Some(digest) => *digest == password_digest(&user_id, password),
                None => false,
            },
            None => false,
        }
    }

    /// Remove an account and all its devices. Returns whether it existed.
    pub async fn remove_account(&self, user_id: &UserId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let Some((_, account)) = self.accounts.remove(user_id) else {
            return Ok(false);
        };
        self.unindex(&account.username, user_id);

        if let Err(e) = self.persist() {
            self.index(&account);
            self.accounts.insert(*user_id, account);
            return Err(e);
        }

        debug!(user_id = %user_id, "Removed account");
        Ok(true)
    }

    // ==================== Devices ====================

    /// All accounts with a live device entry for `device_id`, oldest first.
    pub fn accounts_for_device(&self, device_id: &DeviceId) -> Vec<UserAccount> {
        let mut accounts: Vec<UserAccount> = self
            .accounts
            .iter()
            .filter(|entry| entry.has_device(device_id))
            .map(|entry| entry.value().clone())
            .collect();
        accounts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        accounts
    }

    /// Record `public_key` for (`user_id`, `device_id`), replacing any entry for that device.
    pub async fn add_device(
        &self,
        user_id: &UserId,
        device_id: DeviceId,
        public_key: Vec<u8>,
        attestation: Option<Attestation>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let previous = {
            let mut account = self
                .accounts
                .get_mut(user_id)
                .ok_or_else(|| PassportError::AccountNotFound(user_id.to_string()))?;
            let previous = account.devices.clone();

            let device = PassportDevice {
                device_id,
                public_key,
                attestation,
                registered_at: Utc::now(),
            };
            match account.devices.iter_mut().find(|d| d.device_id == device_id) {
                Some(existing) => *existing = device,
                None => account.devices.push(device),
            }
            previous
        };

        if let Err(e) = self.persist() {
            self.restore_devices(user_id, previous);
            return Err(e);
        }

        debug!(user_id = %user_id, device_id = %device_id, "Added device");
        Ok(())
    }

    /// Drop the entry for (`user_id`, `device_id`). Returns whether one existed.
    pub async fn remove_device(&self, user_id: &UserId, device_id: &DeviceId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let previous = {
            let Some(mut account) = self.accounts.get_mut(user_id) else {
                return Ok(false);
            };
            if !account.has_device(device_id) {
                return Ok(false);
            }
            let previous = account.devices.clone();
            account.devices.retain(|d| &d.device_id != device_id);
            previous
        };

        if let Err(e) = self.persist() {
            self.restore_devices(user_id, previous);
            return Err(e);
        }

        debug!(user_id = %user_id, device_id = %device_id, "Removed device");
        Ok(true)
    }

    // ==================== Internals ====================

    fn index(&self, account: &UserAccount) {
        self.usernames
            .entry(account.username.clone())
            .or_default()
            .push(account.user_id);
    }

    fn unindex(&self, username: &str, user_id: &UserId) {
        if let Some(mut ids) = self.usernames.get_mut(username) {
            ids.retain(|id| id != user_id);
        }
        self.usernames.remove_if(username, |_, ids| ids.is_empty());
    }

    fn restore_devices(&self, user_id: &UserId, devices: Vec<PassportDevice>) {
        if let Some(mut account) = self.accounts.get_mut(user_id) {
            account.devices = devices;
        }
    }

    /// Write the snapshot. Callers hold the writer lock.
    fn persist(&self) -> Result<()> {
        let RegistryBackend::File(path) = &self.backend else {
            return Ok(());
        };

        let mut accounts: Vec<UserAccount> =
            self.accounts.iter().map(|e| e.value().clone()).collect();
        accounts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        let bytes = serde_json::to_vec_pretty(&RegistrySnapshot {
            version: SNAPSHOT_VERSION,
            accounts,
        })
        .map_err(|e| PassportError::SerializationError(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)
            .and_then(|_| std::fs::rename(&tmp, path))
            .map_err(|e| PassportError::Storage(format!("Failed to write registry: {e}")))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            RegistryBackend::File(_) => "File",
            RegistryBackend::Memory => "Memory",
        };
        f.debug_struct("Registry")
            .field("backend", &backend)
            .field("accounts", &self.accounts.len())
            .finish()
    }
}

fn password_digest(user_id: &UserId, password: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(user_id.as_uuid().as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn device() -> DeviceId {
        DeviceId::from(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = Registry::in_memory();
        let user_id = registry.register("alice").await.unwrap();

        assert_eq!(registry.lookup_user_id("alice"), Some(user_id));
        let account = registry.lookup_account(&user_id).unwrap();
        assert_eq!(account.username, "alice");
        assert!(account.devices.is_empty());
        assert_eq!(registry.lookup_user_id("bob"), None);
    }

    #[tokio::test]
    async fn test_empty_username_rejected() {
        let registry = Registry::in_memory();
        assert!(matches!(
            registry.register("   ").await,
            Err(PassportError::InvalidUsername(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_password_rejected() {
        let registry = Registry::in_memory();
        assert!(matches!(
            registry.register_with_password("bob", "").await,
            Err(PassportError::InvalidCredentials)
        ));
        assert_eq!(registry.lookup_user_id("bob"), None);
    }

    #[tokio::test]
    async fn test_duplicate_username_policy() {
        let registry = Registry::in_memory();
        registry.register("alice").await.unwrap();
        assert!(matches!(
            registry.register("alice").await,
            Err(PassportError::DuplicateUsername(_))
        ));

        let permissive = Registry::in_memory().with_duplicate_usernames(true);
        let first = permissive.register("alice").await.unwrap();
        let second = permissive.register("alice").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(permissive.lookup_user_id("alice"), Some(first));
    }

    #[tokio::test]
    async fn test_accounts_for_device_tracks_add_and_remove() {
        let registry = Registry::in_memory();
        let alice = registry.register("alice").await.unwrap();
        let bob = registry.register("bob").await.unwrap();
        let laptop = device();

        registry.add_device(&alice, laptop, vec![1], None).await.unwrap();
        registry.add_device(&bob, laptop, vec![2], None).await.unwrap();
        let names: Vec<_> = registry
            .accounts_for_device(&laptop)
            .into_iter()
            .map(|a| a.username)
            .collect();
        assert_eq!(names, vec!["alice", "bob"]);

        assert!(registry.remove_device(&alice, &laptop).await.unwrap());
        let accounts = registry.accounts_for_device(&laptop);
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].user_id, bob);
    }

    #[tokio::test]
    async fn test_add_device_replaces_same_device() {
        let registry = Registry::in_memory();
        let alice = registry.register("alice").await.unwrap();
        let laptop = device();

        registry.add_device(&alice, laptop, vec![1], None).await.unwrap();
        registry.add_device(&alice, laptop, vec![2], None).await.unwrap();

        let account = registry.lookup_account(&alice).unwrap();
        assert_eq!(account.devices.len(), 1);
        assert_eq!(account.devices[0].public_key, vec![2]);
    }

    #[tokio::test]
    async fn test_add_device_unknown_account() {
        let registry = Registry::in_memory();
        let result = registry
            .add_device(&UserId::new_random(), device(), vec![1], None)
            .await;
        assert!(matches!(result, Err(PassportError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_missing_device_is_noop() {
        let registry = Registry::in_memory();
        let alice = registry.register("alice").await.unwrap();
        assert!(!registry.remove_device(&alice, &device()).await.unwrap());
        assert!(!registry
            .remove_device(&UserId::new_random(), &device())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_remove_account_cascades() {
        let registry = Registry::in_memory();
        let alice = registry.register("alice").await.unwrap();
        let laptop = device();
        registry.add_device(&alice, laptop, vec![1], None).await.unwrap();

        assert!(registry.remove_account(&alice).await.unwrap());
        assert!(registry.accounts_for_device(&laptop).is_empty());
        assert_eq!(registry.lookup_user_id("alice"), None);
        assert!(!registry.remove_account(&alice).await.unwrap());

        // username is free again
        registry.register("alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_credentials() {
        let registry = Registry::in_memory();
        registry.register("alice").await.unwrap();
        registry
            .register_with_password("bob", "hunter2")
            .await
            .unwrap();

        assert!(!registry.validate_credentials("alice", "anything"));
        assert!(!registry.validate_credentials("alice", ""));
        assert!(registry.validate_credentials("bob", "hunter2"));
        assert!(!registry.validate_credentials("bob", "hunter3"));
        assert!(!registry.validate_credentials("carol", "pw"));
    }

    #[tokio::test]
    async fn test_file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let laptop = device();

        let alice = {
            let registry = Registry::open(&path).unwrap();
            assert!(registry.is_persistent());
            let alice = registry.register("alice").await.unwrap();
            registry.add_device(&alice, laptop, vec![9], None).await.unwrap();
            alice
        };

        let registry = Registry::open(&path).unwrap();
        assert_eq!(registry.lookup_user_id("alice"), Some(alice));
        assert_eq!(registry.accounts_for_device(&laptop).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_device_additions_are_not_lost() {
        let registry = std::sync::Arc::new(Registry::in_memory());
        let alice = registry.register("alice").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.add_device(&alice, device(), vec![i], None).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.lookup_account(&alice).unwrap().devices.len(), 16);
    }
}
