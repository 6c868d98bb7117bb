//! Reveille: keeps quota-limited AI CLI tools awake.
//!
//! Main binary with subcommands:
//! - `daemon`: scheduler loops + Telegram command polling

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod daemon;

#[derive(Parser)]
#[command(name = "reveille")]
#[command(about = "Keep AI CLI usage windows open", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (wake-up scheduler + Telegram bot)
    Daemon {
        /// Telegram bot token
        #[arg(long, env = "REVEILLE_TELEGRAM_BOT_TOKEN")]
        bot_token: String,

        /// Telegram chat id that may command the bot and receives notifications
        #[arg(long, env = "REVEILLE_TELEGRAM_CHAT_ID")]
        chat_id: String,

        /// Path of the persisted schedule-state file
        #[arg(long, env = "REVEILLE_STATE_PATH", default_value = "data/scheduler_state.json")]
        state_path: String,

        /// First transient-failure retry delay in seconds
        #[arg(long, env = "REVEILLE_RETRY_BASE_SECONDS", default_value = "60")]
        retry_base_seconds: u64,

        /// Transient-failure retry delay cap in seconds
        #[arg(long, env = "REVEILLE_RETRY_MAX_SECONDS", default_value = "3600")]
        retry_max_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "reveille=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            bot_token,
            chat_id,
            state_path,
            retry_base_seconds,
            retry_max_seconds,
        } => {
            daemon::run(daemon::DaemonConfig {
                bot_token,
                chat_id,
                state_path: state_path.into(),
                retry_base_seconds,
                retry_max_seconds,
            })
            .await
        }
    }
}
