use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mfea_bot::config::{load_config, Config, ConfigFormat};
use mfea_bot::notify::{
    FileRegistry, LogNotifier, NotificationSink, StaticRegistry, SubscriberRegistry,
    WebhookNotifier,
};
use mfea_bot::provider::FixtureProvider;
use mfea_bot::store::{MemoryTier, StateStore};
use mfea_bot::ChangeDetector;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "mfea",
    version,
    about = "Checks the MFEA allocation and notifies subscribers when it changes"
)]
struct Cli {
    /// Path to configuration file (TOML or YAML).
    #[arg(long, env = "MFEA_CONFIG", default_value = "configs/mfea.toml")]
    config: PathBuf,
    /// Explicit configuration format override.
    #[arg(long, value_enum, default_value_t = ConfigFormat::Auto)]
    config_format: ConfigFormat,
    /// Keep state in memory and log notifications instead of sending them.
    #[arg(long)]
    dry_run: bool,
    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate, persist on change and notify.
    Check {
        /// Send the status message even when nothing changed.
        #[arg(long)]
        force: bool,
        /// Message heading; defaults to `strategy.title`.
        #[arg(long)]
        title: Option<String>,
    },
    /// Print the current evaluation without touching state.
    Status,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn build_detector(config: &Config, dry_run: bool) -> anyhow::Result<ChangeDetector> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.strategy.fetch_timeout_ms))
        .build()
        .context("building http client")?;

    let store = if dry_run {
        StateStore::new(vec![Arc::new(MemoryTier::new("memory"))])
    } else {
        config.store.build(&client, env_var)?
    };

    let notifier: Arc<dyn NotificationSink> = match (&config.notify.webhook_url_env, dry_run) {
        (Some(name), false) => {
            let raw = env_var(name).with_context(|| format!("environment variable {name} is not set"))?;
            let url = Url::parse(&raw).with_context(|| format!("{name} is not a valid url"))?;
            Arc::new(WebhookNotifier::new(client.clone(), url))
        }
        _ => Arc::new(LogNotifier),
    };

    let registry: Arc<dyn SubscriberRegistry> = match &config.notify.subscribers_file {
        Some(path) => Arc::new(FileRegistry::new(path)),
        None => Arc::new(StaticRegistry::new(config.notify.subscriber_ids())),
    };

    tracing::info!(
        tiers = ?store.tier_names(),
        fixture = %config.provider.fixture.display(),
        dry_run,
        "detector ready"
    );

    Ok(ChangeDetector::new(
        Arc::new(FixtureProvider::new(&config.provider.fixture)),
        store,
        notifier,
        registry,
        config.detector_settings(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli.config, cli.config_format)?;
    let detector = build_detector(&config, cli.dry_run)?;

    match cli.command {
        Command::Check { force, title } => {
            let title = title.unwrap_or_else(|| config.strategy.title.clone());
            let mut outcome = detector.check_allocation(force, &title).await?;
            println!(
                "{}",
                json!({
                    "previous": outcome.previous,
                    "current": outcome.current,
                    "changed": outcome.changed,
                })
            );
            outcome.settle().await;
        }
        Command::Status => {
            let evaluation = detector.evaluate().await?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
    }

    Ok(())
}
