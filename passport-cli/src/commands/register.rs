//! Register command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use super::accounts::print_account;
use crate::utils::build_manager;
use crate::{CliContext, OutputFormat};

/// Execute the register command.
///
/// Without `--password` the account can only sign in with enrolled device keys.
pub async fn execute(ctx: &CliContext, username: &str, password: Option<&str>) -> Result<()> {
    let manager = build_manager(ctx)?;

    let account = match password {
        Some(password) => manager.register_account_with_password(username, password).await,
        None => manager.register_account(username).await,
    }
    .context("Account creation failed")?;

    info!(user_id = %account.user_id, "Account registered");

    if !ctx.quiet {
        if ctx.format == OutputFormat::Text {
            println!();
            println!("{}", "Account created and device enrolled!".green().bold());
            println!();
        }
        print_account(ctx, &account, manager.device_id())?;
    }

    Ok(())
}
