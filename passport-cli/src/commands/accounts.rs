//! Account listing commands.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use colored::Colorize;
use passport_core::{DeviceId, UserAccount};
use serde::Serialize;

use crate::utils::{
    attestation_label, build_manager, format_timestamp, key_fingerprint, require_local_account,
};
use crate::{CliContext, OutputFormat};

/// JSON view of an account. Carries public material only.
#[derive(Serialize)]
pub struct AccountView {
    pub user_id: String,
    pub username: String,
    pub created_at: String,
    pub devices: Vec<DeviceView>,
}

#[derive(Serialize)]
pub struct DeviceView {
    pub device_id: String,
    pub this_device: bool,
    pub public_key: String,
    pub fingerprint: String,
    pub attestation: &'static str,
    pub registered_at: String,
}

impl AccountView {
    pub fn new(account: &UserAccount, local_device: DeviceId) -> Self {
        Self {
            user_id: account.user_id.to_string(),
            username: account.username.clone(),
            created_at: account.created_at.to_rfc3339(),
            devices: account
                .devices
                .iter()
                .map(|device| DeviceView {
                    device_id: device.device_id.to_string(),
                    this_device: device.device_id == local_device,
                    public_key: STANDARD.encode(&device.public_key),
                    fingerprint: key_fingerprint(&device.public_key),
                    attestation: attestation_label(device.attestation.as_ref()),
                    registered_at: device.registered_at.to_rfc3339(),
                })
                .collect(),
        }
    }
}

/// Print an account in the selected format.
pub fn print_account(ctx: &CliContext, account: &UserAccount, local_device: DeviceId) -> Result<()> {
    match ctx.format {
        OutputFormat::Json => {
            let view = AccountView::new(account, local_device);
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        OutputFormat::Text => {
            println!("   {} {}", "Username:".dimmed(), account.username.bold());
            println!("   {} {}", "User id:".dimmed(), account.user_id);
            println!(
                "   {} {}",
                "Created:".dimmed(),
                format_timestamp(&account.created_at)
            );
            if account.devices.is_empty() {
                println!("   {} {}", "Devices:".dimmed(), "none".yellow());
            }
            for device in &account.devices {
                let marker = if device.device_id == local_device {
                    " (this device)".green().to_string()
                } else {
                    String::new()
                };
                println!("   {} {}{}", "Device:".dimmed(), device.device_id, marker);
                println!(
                    "     {} {}",
                    "Key:".dimmed(),
                    key_fingerprint(&device.public_key)
                );
                println!(
                    "     {} {}",
                    "Attestation:".dimmed(),
                    attestation_label(device.attestation.as_ref())
                );
                println!(
                    "     {} {}",
                    "Registered:".dimmed(),
                    format_timestamp(&device.registered_at)
                );
            }
        }
    }
    Ok(())
}

/// Execute the accounts command.
pub async fn execute(ctx: &CliContext) -> Result<()> {
    let manager = build_manager(ctx)?;
    let accounts = manager.accounts_on_this_device().await?;

    if ctx.quiet {
        return Ok(());
    }

    match ctx.format {
        OutputFormat::Json => {
            let views: Vec<_> = accounts
                .iter()
                .map(|a| AccountView::new(a, manager.device_id()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        OutputFormat::Text => {
            if accounts.is_empty() {
                println!("{}", "No accounts on this device".dimmed());
            }
            for account in &accounts {
                println!(
                    "{}  {}  {} device(s)",
                    account.username.bold(),
                    account.user_id.to_string().dimmed(),
                    account.devices.len()
                );
            }
        }
    }

    Ok(())
}

/// Execute the show command.
pub async fn show(ctx: &CliContext, username: &str) -> Result<()> {
    let manager = build_manager(ctx)?;
    let account = require_local_account(&manager, username).await?;

    if !ctx.quiet {
        print_account(ctx, &account, manager.device_id())?;
    }
    Ok(())
}
