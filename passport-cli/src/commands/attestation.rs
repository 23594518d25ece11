//! Attestation retry command.

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use tracing::info;

use crate::utils::{attestation_label, build_manager, require_local_account};
use crate::{CliContext, OutputFormat};

/// Execute the retry-attestation command.
pub async fn retry(ctx: &CliContext, username: &str) -> Result<()> {
    let manager = build_manager(ctx)?;
    let account = require_local_account(&manager, username).await?;

    let attestation = manager
        .retry_attestation(&account)
        .await
        .context("Attestation retry failed")?;
    info!(user_id = %account.user_id, retried = attestation.is_some(), "Attestation retry finished");

    if ctx.quiet {
        return Ok(());
    }

    let label = match &attestation {
        Some(attestation) => attestation_label(Some(attestation)),
        None => attestation_label(
            account
                .device(&manager.device_id())
                .and_then(|d| d.attestation.as_ref()),
        ),
    };

    match ctx.format {
        OutputFormat::Json => {
            let result = json!({
                "retried": attestation.is_some(),
                "attestation": label,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => match attestation {
            Some(a) if a.included => println!("{}", "Device key attested".green().bold()),
            Some(_) => println!("   {} {}", "Attestation:".dimmed(), label.yellow()),
            None => println!(
                "   {} {} {}",
                "Attestation:".dimmed(),
                label,
                "(nothing to retry)".dimmed()
            ),
        },
    }
    Ok(())
}
