//! Daemon command: wires config, providers, scheduler and bot together.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Result;
use reveille_provider::build_providers;
use reveille_scheduler::{SchedulerConfig, WakeupScheduler};
use reveille_telegram::{TelegramBot, TelegramClient};
use tokio::sync::watch;
use tracing::info;

use crate::config::load_provider_configs;

/// Settings for the daemon.
pub struct DaemonConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub state_path: PathBuf,
    pub retry_base_seconds: u64,
    pub retry_max_seconds: u64,
}

pub async fn run(config: DaemonConfig) -> Result<()> {
    let provider_configs =
        load_provider_configs().map_err(|e| miette::miette!("configuration error: {}", e))?;
    info!(
        providers = %provider_configs.keys().cloned().collect::<Vec<_>>().join(", "),
        "enabled providers"
    );

    let providers = build_providers(&provider_configs);
    if providers.is_empty() {
        return Err(miette::miette!("no providers configured"));
    }

    let client = Arc::new(TelegramClient::new(&config.bot_token, &config.chat_id));
    let bot = TelegramBot::new(client, providers.clone());

    let scheduler = WakeupScheduler::new(
        SchedulerConfig {
            state_path: config.state_path,
            retry_base_seconds: config.retry_base_seconds,
            retry_max_seconds: config.retry_max_seconds,
        },
        provider_configs,
        providers,
        bot.notifier(),
        TelegramBot::auth_requester(&bot),
    )
    .map_err(|e| miette::miette!("configuration error: {}", e))?;
    bot.set_scheduler(scheduler.clone());

    bot.send_startup_summary().await;
    scheduler.start().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bot_handle = tokio::spawn(Arc::clone(&bot).run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("failed to listen for ctrl-c: {}", e))?;
    info!("shutting down");

    let _ = shutdown_tx.send(true);
    scheduler.stop().await;
    let _ = bot_handle.await;

    Ok(())
}
