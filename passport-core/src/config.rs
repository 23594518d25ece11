//! Configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PassportError, Result};
use crate::platform::AttestationMode;
use crate::types::DeviceId;

/// Registry file name inside the data directory
pub const REGISTRY_FILE: &str = "registry.json";

/// Key directory name inside the data directory
pub const KEYS_DIR: &str = "keys";

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct PassportConfig {
    /// Where the registry and software keys live (default: $HOME/.passport)
    pub data_dir: PathBuf,
    /// Override of the derived local device id
    pub device_id: Option<DeviceId>,
    /// Lifetime of an issued challenge (default: 300s)
    pub challenge_ttl: Duration,
    /// Caller-side timeout for each relying party call (default: 30s)
    pub relying_party_timeout: Duration,
    /// Allow several accounts to share one username (default: false)
    pub allow_duplicate_usernames: bool,
    /// Attestation behaviour of the software credential store (default: supported)
    pub attestation_mode: AttestationMode,
}

impl Default for PassportConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            device_id: None,
            challenge_ttl: Duration::from_secs(300),
            relying_party_timeout: Duration::from_secs(30),
            allow_duplicate_usernames: false,
            attestation_mode: AttestationMode::Supported,
        }
    }
}

impl PassportConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let data_dir = std::env::var("PASSPORT_DATA_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let device_id = match std::env::var("PASSPORT_DEVICE_ID") {
            Ok(v) if !v.is_empty() => Some(v.parse().map_err(|e| {
                PassportError::InvalidConfig(format!("PASSPORT_DEVICE_ID: {e}"))
            })?),
            _ => None,
        };

        let challenge_ttl = std::env::var("PASSPORT_CHALLENGE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.challenge_ttl);

        let relying_party_timeout = std::env::var("PASSPORT_RP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.relying_party_timeout);

        let allow_duplicate_usernames = std::env::var("PASSPORT_ALLOW_DUPLICATE_USERNAMES")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        let attestation_mode = match std::env::var("PASSPORT_ATTESTATION") {
            Ok(v) if !v.is_empty() => v.parse()?,
            _ => defaults.attestation_mode,
        };

        Ok(Self {
            data_dir,
            device_id,
            challenge_ttl,
            relying_party_timeout,
            allow_duplicate_usernames,
            attestation_mode,
        })
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(REGISTRY_FILE)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join(KEYS_DIR)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".passport")
}
