//! # DeskBot — Issue Notification Bot
//!
//! Keeps Telegram messages synchronized with issues in a YouTrack-compatible
//! tracker: reminder sequences while an issue sits in the target status,
//! live message updates on issue changes, and archiving of idle messages.
//!
//! Usage:
//!   deskbot                          # run with ~/.deskbot/config.toml
//!   deskbot --config /etc/deskbot.toml
//!   deskbot --verbose

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use deskbot_core::DeskBotConfig;
use deskbot_engine::BotContext;
use deskbot_telegram::TelegramClient;
use deskbot_tracker::TrackerClient;

#[derive(Parser)]
#[command(name = "deskbot", version, about = "🛎️ DeskBot — issue notification bot")]
struct Cli {
    /// Path to the config file (default: ~/.deskbot/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "deskbot=debug,deskbot_engine=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => DeskBotConfig::load_from(std::path::Path::new(path))?,
        None => DeskBotConfig::load()?,
    };
    config.validate()?;

    let store = deskbot_store::open_store(&config.storage).await?;
    let chat = Arc::new(TelegramClient::new(&config.telegram.bot_token));
    let tracker = Arc::new(TrackerClient::new(&config.tracker.base_url, &config.tracker.token));

    println!("🛎️ DeskBot v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Storage:  {}", config.storage.backend);
    println!("   📋 Tracker:  {}", config.tracker.base_url);
    println!("   💬 Chat:     {}", config.telegram.chat_id);
    println!("   ⏰ Reminder steps: {}", config.alerts.steps.len());
    println!();

    let ctx = BotContext::new(store, chat, tracker, config);

    let mut alert_worker = ctx.build_alert_worker();
    if let Some(worker) = alert_worker.as_mut() {
        worker.start();
    }
    let mut archive_worker = ctx.build_archive_worker();
    archive_worker.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping workers");
    if let Some(worker) = alert_worker.as_mut() {
        worker.stop().await;
    }
    archive_worker.stop().await;

    Ok(())
}
