//! Status command implementation.

use anyhow::Result;
use colored::Colorize;
use serde_json::json;

use crate::utils::build_manager;
use crate::{CliContext, OutputFormat};

/// Execute the status command.
pub async fn execute(ctx: &CliContext) -> Result<()> {
    let manager = build_manager(ctx)?;
    let available = manager.check_availability().await;
    let accounts = manager.accounts_on_this_device().await?;

    if ctx.quiet {
        return Ok(());
    }

    match ctx.format {
        OutputFormat::Json => {
            let status = json!({
                "available": available,
                "device_id": manager.device_id().to_string(),
                "accounts": accounts.len(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Text => {
            let availability = if available {
                "available".green()
            } else {
                "not configured".yellow()
            };
            println!("   {} {}", "Key sign-in:".dimmed(), availability);
            println!("   {} {}", "Device:".dimmed(), manager.device_id());
            println!("   {} {}", "Accounts:".dimmed(), accounts.len());
        }
    }

    Ok(())
}
