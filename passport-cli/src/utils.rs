//! Common utility functions shared across CLI commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use passport_core::signature::key_digest;
use passport_core::{
    Attestation, AttestationRetryStatus, CredentialManager, PassportConfig, PassportError,
    UserAccount,
};
use tracing::debug;

use crate::prompt::ConsoleVerification;
use crate::CliContext;

/// Load configuration and build the credential manager for this device.
pub fn build_manager(ctx: &CliContext) -> Result<CredentialManager> {
    let mut config = PassportConfig::from_env().context("Failed to load configuration")?;
    if let Some(dir) = &ctx.data_dir {
        config.data_dir = dir.clone();
    }
    debug!(data_dir = %config.data_dir.display(), "Using data directory");

    let verifier = Arc::new(ConsoleVerification::new(ctx.assume_yes));
    CredentialManager::from_config(&config, verifier).with_context(|| {
        format!(
            "Failed to open passport data in {}",
            config.data_dir.display()
        )
    })
}

/// Find the account enrolled on this device under `username`.
pub async fn find_local_account(
    manager: &CredentialManager,
    username: &str,
) -> Result<Option<UserAccount>> {
    let accounts = manager.accounts_on_this_device().await?;
    Ok(accounts.into_iter().find(|a| a.username == username.trim()))
}

/// Like [`find_local_account`], failing when there is none.
pub async fn require_local_account(
    manager: &CredentialManager,
    username: &str,
) -> Result<UserAccount> {
    find_local_account(manager, username)
        .await?
        .ok_or_else(|| PassportError::AccountNotFound(username.to_string()).into())
}

/// Short fingerprint of a public key: first 8 bytes of its SHA3-256 digest.
pub fn key_fingerprint(public_key: &[u8]) -> String {
    hex::encode(&key_digest(public_key)[..8])
}

/// Human-readable attestation state.
pub fn attestation_label(attestation: Option<&Attestation>) -> &'static str {
    match attestation {
        Some(a) if a.included => "attested",
        Some(a) => match a.retry_status {
            AttestationRetryStatus::TemporaryFailure => "pending (temporary failure)",
            AttestationRetryStatus::NotSupported => "not supported",
            AttestationRetryStatus::None => "missing",
        },
        None => "missing",
    }
}

/// Format a timestamp as a human-readable UTC string.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
