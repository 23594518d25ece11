//! Passport CLI - key-based local sign-in tool.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use passport_core::DeviceId;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;
mod prompt;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Usage error
  65  Sign-in rejected
  66  Account not found
  69  Secure credentials unavailable
  74  I/O error
  75  Cancelled by user";

#[derive(Parser)]
#[command(name = "passport")]
#[command(author, version, about = "Key-based local sign-in", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Directory holding the registry and device keys
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Approve every verification prompt without asking
    #[arg(short = 'y', long, global = true)]
    assume_yes: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Show debug logs on stderr
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Print nothing on success
    #[arg(short, long, global = true)]
    quiet: bool,

    /// When to use colors
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether key sign-in is available on this device
    Status,

    /// Create an account and enroll this device
    Register {
        #[arg(value_name = "USERNAME")]
        username: String,

        /// Also allow password sign-in to enroll other devices
        #[arg(long)]
        password: Option<String>,
    },

    /// Sign in with this device's key, or enroll it using a password
    Login {
        #[arg(value_name = "USERNAME")]
        username: String,

        /// Password for an account not yet enrolled on this device
        #[arg(long)]
        password: Option<String>,
    },

    /// List accounts enrolled on this device
    Accounts,

    /// Show an account's devices and attestation state
    Show {
        #[arg(value_name = "USERNAME")]
        username: String,
    },

    /// Remove a device from an account (defaults to this device)
    ForgetDevice {
        #[arg(value_name = "USERNAME")]
        username: String,

        /// Device to remove
        #[arg(long, value_name = "DEVICE_ID")]
        device: Option<DeviceId>,
    },

    /// Delete an account and this device's key
    ForgetUser {
        #[arg(value_name = "USERNAME")]
        username: String,
    },

    /// Fetch attestation again for this device's key
    RetryAttestation {
        #[arg(value_name = "USERNAME")]
        username: String,
    },
}

/// Options shared by every command.
pub struct CliContext {
    pub data_dir: Option<PathBuf>,
    pub assume_yes: bool,
    pub format: OutputFormat,
    pub quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.color != ColorChoice::Never);
    match cli.color {
        ColorChoice::Always => colored::control::set_override(true),
        ColorChoice::Never => colored::control::set_override(false),
        ColorChoice::Auto => {}
    }

    let ctx = CliContext {
        data_dir: cli.data_dir,
        assume_yes: cli.assume_yes,
        format: cli.format,
        quiet: cli.quiet,
    };

    if let Err(err) = run(cli.command, &ctx).await {
        let exit = ExitCode::from_anyhow(&err);
        tracing::debug!(error = %format!("{err:#}"), code = exit.code, "Command failed");
        if let Some(message) = &exit.message {
            eprintln!("{} {}", "Error:".red().bold(), message);
        }
        std::process::exit(exit.code);
    }
}

async fn run(command: Commands, ctx: &CliContext) -> Result<()> {
    match command {
        Commands::Status => commands::status::execute(ctx).await,
        Commands::Register { username, password } => {
            commands::register::execute(ctx, &username, password.as_deref()).await
        }
        Commands::Login { username, password } => {
            commands::login::execute(ctx, &username, password.as_deref()).await
        }
        Commands::Accounts => commands::accounts::execute(ctx).await,
        Commands::Show { username } => commands::accounts::show(ctx, &username).await,
        Commands::ForgetDevice { username, device } => {
            commands::forget::device(ctx, &username, device).await
        }
        Commands::ForgetUser { username } => commands::forget::user(ctx, &username).await,
        Commands::RetryAttestation { username } => {
            commands::attestation::retry(ctx, &username).await
        }
    }
}

fn init_tracing(verbose: bool, ansi: bool) {
    let default = if verbose {
        "passport_core=debug,passport_cli=debug,info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .init();
}
