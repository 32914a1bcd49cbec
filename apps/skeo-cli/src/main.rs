//! # SKEO Sync CLI
//!
//! Command line front end for the stock syncer.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  parse args ──► init tracing ──► load + validate config ──► command    │
//! │                                        │                       │        │
//! │                                        ▼                       ▼        │
//! │                                  exit 2 on error      exit 0 / exit 1   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reports are printed to stdout as JSON; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use skeo_sync::oauth2::DEFAULT_RESET_LIFETIME_SECS;
use skeo_sync::{
    do_check_config, do_cleanup_procedure, do_generate_shopee_shop_authorization_url,
    do_lazada_reset_access_token, do_sync_procedure, CancelToken, SyncConfig, SyncError, TokenReset,
};

const EXIT_FATAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "skeo-sync", version)]
#[command(about = "Keeps Lazada and Shopee stock in line with the OpenCart storefront", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CONFIG_PATH", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run cleanup, then one sync pass
    Sync {
        /// Compute and log the plan without writing to any marketplace
        #[arg(long)]
        readonly: bool,
    },
    /// Prune orphaned mappings, stale passes and old logs
    Cleanup,
    /// Replace the stored Lazada access token
    Lzreauth {
        #[arg(long)]
        token: String,
        #[arg(long)]
        refresh_token: Option<String>,
        /// Token lifetime in seconds
        #[arg(long, default_value_t = DEFAULT_RESET_LIFETIME_SECS)]
        expires_in: i64,
    },
    /// Print the Shopee shop authorization URL
    Shreauth {
        /// Overrides Shopee.RedirectURL
        #[arg(long)]
        redirect: Option<String>,
    },
    /// Show the loaded sections and stored credentials
    Chkconfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let path = SyncConfig::resolve_path(cli.config.clone());
    let config = match SyncConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Configuration rejected");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            let config_error = e
                .downcast_ref::<SyncError>()
                .is_some_and(SyncError::is_config_error);
            ExitCode::from(if config_error { EXIT_CONFIG } else { EXIT_FATAL })
        }
    }
}

async fn run(command: Command, config: &SyncConfig) -> Result<ExitCode> {
    match command {
        Command::Sync { readonly } => {
            let cancel = CancelToken::new();
            tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

            let cleanup = do_cleanup_procedure(config, cancel.clone())
                .await
                .context("cleanup failed")?;
            print_json(&json!({ "cleanup": cleanup }))?;

            let report = do_sync_procedure(config, readonly, cancel)
                .await
                .context("sync pass failed")?;
            print_json(&report)?;

            if report.has_fatal() || report.cancelled {
                return Ok(ExitCode::from(EXIT_FATAL));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Cleanup => {
            let cancel = CancelToken::new();
            tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

            let report = do_cleanup_procedure(config, cancel).await?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Lzreauth {
            token,
            refresh_token,
            expires_in,
        } => {
            let reset = TokenReset {
                refresh_token,
                expires_in: Some(expires_in),
                ..TokenReset::new(token)
            };
            let record = do_lazada_reset_access_token(config, reset).await?;
            print_json(&json!({
                "platform": record.platform,
                "access_token": record.masked_access_token(),
                "expires_at": record.expires_at,
                "has_refresh_token": record.has_refresh_token(),
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Shreauth { redirect } => {
            let url = do_generate_shopee_shop_authorization_url(config, redirect.as_deref())?;
            println!("{url}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Chkconfig => {
            let check = do_check_config(config).await?;
            info!(sections = ?check.sections, store = %check.store.display(), "Configuration loaded");
            for status in &check.credentials {
                if status.authorized {
                    info!(
                        platform = %status.platform,
                        token = status.access_token.as_deref().unwrap_or_default(),
                        expires_at = ?status.expires_at,
                        remaining_secs = status.remaining_secs.unwrap_or_default(),
                        expired = status.expired,
                        "Credential stored"
                    );
                } else {
                    warn!(platform = %status.platform, "No credential stored");
                }
            }
            print_json(&check)?;
            Ok(if check.is_ready() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FATAL)
            })
        }
    }
}

/// Sets up the subscriber. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "debug,sqlx=warn,hyper=info,reqwest=info"
    } else {
        "info,sqlx=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Requests cooperative cancellation on the first Ctrl-C.
async fn cancel_on_ctrl_c(cancel: CancelToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("Interrupt received, finishing in-flight writes and stopping");
            cancel.cancel();
        }
        Err(e) => warn!(error = %e, "Could not install Ctrl-C handler"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("could not serialise report")?;
    println!("{text}");
    Ok(())
}
