//! Revocation commands.

use anyhow::{Context, Result};
use colored::Colorize;
use passport_core::{CredentialManager, DeviceId, UserAccount};
use serde_json::json;
use tracing::info;

use super::accounts::print_account;
use crate::utils::{build_manager, require_local_account};
use crate::{CliContext, OutputFormat};

/// Sign in with the device key before a destructive change.
async fn confirm_identity(manager: &CredentialManager, account: &UserAccount) -> Result<()> {
    manager
        .authenticate(account)
        .await?
        .into_result(account)
        .context("Sign-in required")
}

/// Execute the forget-device command.
pub async fn device(ctx: &CliContext, username: &str, device_id: Option<DeviceId>) -> Result<()> {
    let manager = build_manager(ctx)?;
    let account = require_local_account(&manager, username).await?;
    confirm_identity(&manager, &account).await?;

    let device_id = device_id.unwrap_or_else(|| manager.device_id());
    manager
        .revoke_device(&account, device_id)
        .await
        .context("Failed to remove device")?;
    info!(user_id = %account.user_id, device_id = %device_id, "Device forgotten");

    let account = manager
        .refresh_account(&account.user_id)
        .await?
        .unwrap_or(account);

    if ctx.quiet {
        return Ok(());
    }

    if ctx.format == OutputFormat::Text {
        println!("{} {}", "Device removed:".green().bold(), device_id);
        if account.devices.is_empty() {
            println!(
                "{}",
                "No devices left on this account, sign in with a password to enroll one".yellow()
            );
        }
        println!();
    }
    print_account(ctx, &account, manager.device_id())
}

/// Execute the forget-user command.
pub async fn user(ctx: &CliContext, username: &str) -> Result<()> {
    let manager = build_manager(ctx)?;
    let account = require_local_account(&manager, username).await?;
    confirm_identity(&manager, &account).await?;

    manager
        .revoke_account(&account)
        .await
        .context("Failed to remove account")?;
    info!(user_id = %account.user_id, "Account forgotten");

    if ctx.quiet {
        return Ok(());
    }

    match ctx.format {
        OutputFormat::Json => {
            let result = json!({
                "removed": true,
                "user_id": account.user_id.to_string(),
                "username": account.username,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            println!("{} {}", "Account removed:".green().bold(), account.username);
        }
    }
    Ok(())
}
