//! Login command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use passport_core::PassportError;
use serde_json::json;
use tracing::info;

use crate::utils::{build_manager, find_local_account};
use crate::{CliContext, OutputFormat};

/// Execute the login command.
///
/// Accounts enrolled on this device sign in with the device key. Anything else
/// needs `--password`, which enrolls this device on success.
pub async fn execute(ctx: &CliContext, username: &str, password: Option<&str>) -> Result<()> {
    let manager = build_manager(ctx)?;

    let (account, enrolled) = match find_local_account(&manager, username).await? {
        Some(account) => {
            let outcome = manager
                .authenticate(&account)
                .await
                .context("Sign-in failed")?;
            info!(user_id = %account.user_id, outcome = ?outcome, "Key sign-in finished");
            outcome.into_result(&account).context("Sign-in failed")?;
            (account, false)
        }
        None => {
            let Some(password) = password else {
                if !ctx.quiet {
                    eprintln!(
                        "{}",
                        format!("'{username}' is not enrolled on this device, pass --password to enroll it")
                            .yellow()
                    );
                }
                return Err(PassportError::AccountNotFound(username.to_string()).into());
            };
            let account = manager
                .sign_in_with_password(username, password)
                .await
                .context("Password sign-in failed")?;
            (account, true)
        }
    };

    if ctx.quiet {
        return Ok(());
    }

    match ctx.format {
        OutputFormat::Json => {
            let result = json!({
                "signed_in": true,
                "user_id": account.user_id.to_string(),
                "username": account.username,
                "enrolled": enrolled,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            println!("{}", format!("Welcome, {}!", account.username).green().bold());
            if enrolled {
                println!(
                    "   {} {}",
                    "This device:".dimmed(),
                    "enrolled for key sign-in".green()
                );
            }
        }
    }

    Ok(())
}
