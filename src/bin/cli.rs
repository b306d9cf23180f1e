//! portalwatch CLI
//!
//! Local entry point: watch the inbox, run a single check, or test the login.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use portalwatch::{
    error::{AppError, Result},
    models::Config,
    pipeline::{CycleOutcome, PollingEngine},
    services::{LogSink, NotificationSink, RecipientRegistry, SessionManager, WebhookSink},
};
use tokio::sync::watch;

/// portalwatch - forwards new inbox messages from a web portal
#[derive(Parser, Debug)]
#[command(name = "portalwatch", version, about = "Web portal inbox watcher")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "portalwatch.toml")]
    config: PathBuf,

    /// Additional recipient identifiers
    #[arg(short, long = "recipient")]
    recipients: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the inbox until interrupted
    Watch,

    /// Run a single check and forward anything new
    Check,

    /// Log in once and report the result
    Login,

    /// Show account balance from the dashboard
    Stats,

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn build_sink(config: &Config) -> Result<Arc<dyn NotificationSink>> {
    let template = config.delivery.message_template.clone();
    Ok(match &config.delivery.webhook_url {
        Some(url) => {
            log::info!("Forwarding to webhook {}", url);
            Arc::new(WebhookSink::new(
                url,
                template,
                config.delivery.send_timeout_secs,
            )?)
        }
        None => Arc::new(LogSink::new(template)),
    })
}

fn build_engine(config: &Config, extra_recipients: Vec<String>) -> Result<PollingEngine> {
    let registry = RecipientRegistry::new(config.delivery.recipients.iter().cloned());
    for recipient in extra_recipients {
        registry.add(recipient);
    }
    if registry.is_empty() {
        log::warn!("No recipients configured; new records will only be tracked");
    }
    PollingEngine::from_config(config, build_sink(config)?, registry)
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);
    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Watch => {
            config.validate()?;
            let engine = Arc::new(build_engine(&config, cli.recipients)?);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let runner = tokio::spawn({
                let engine = Arc::clone(&engine);
                async move { engine.run(shutdown_rx).await }
            });

            tokio::signal::ctrl_c().await?;
            log::info!("Shutdown requested; finishing the current cycle...");
            let _ = shutdown_tx.send(true);
            if let Err(error) = runner.await {
                log::error!("Polling task ended abnormally: {}", error);
            }

            let status = engine.status();
            log::info!(
                "Ran {} cycles, forwarded {} records, tracking {}",
                status.cycles,
                status.total_emitted,
                status.tracked_records
            );
        }

        Command::Check => {
            config.validate()?;
            let engine = build_engine(&config, cli.recipients)?;
            let report = engine.check_now().await;
            match report.outcome {
                CycleOutcome::Clean { extracted, emitted } => {
                    log::info!("Found {} records, {} forwarded", extracted, emitted)
                }
                CycleOutcome::LoginFailed(error) => return Err(error.into()),
                CycleOutcome::SessionExpired(error) | CycleOutcome::NetworkFailed(error) => {
                    return Err(error.into());
                }
            }
        }

        Command::Login => {
            let credentials = config.credentials()?;
            let account = credentials.masked_identifier();
            let mut sessions = SessionManager::new(config.portal.clone(), credentials)?;
            let session = sessions.authenticate().await?;
            log::info!(
                "✓ Logged in as {} at {}",
                account,
                session.authenticated_at()
            );
        }

        Command::Stats => {
            let credentials = config.credentials()?;
            let mut sessions = SessionManager::new(config.portal.clone(), credentials)?;
            let summary = sessions.account_summary().await?;
            log::info!("Account: {}", summary.account);
            log::info!("Balance: {}", summary.balance);
            log::info!(
                "Status: {}",
                if summary.session_valid {
                    "logged in"
                } else {
                    "not logged in"
                }
            );
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            match config.credentials() {
                Ok(credentials) => log::info!("✓ Credentials present for {}", credentials),
                Err(AppError::Config(message)) => log::warn!("{}", message),
                Err(e) => return Err(e),
            }
            log::info!("All validations passed!");
        }
    }

    Ok(())
}
