//! Telegram command loop and device-auth orchestration.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reveille_provider::{AuthStatus, Provider};
use reveille_scheduler::{AuthRequester, Notifier, WakeupScheduler, format_time};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::{TelegramClient, Update};

/// How long one `getUpdates` long poll waits.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll before retrying.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram bot: relays commands to the scheduler and walks the operator
/// through device-code auth flows.
pub struct TelegramBot {
    client: Arc<TelegramClient>,
    providers: HashMap<String, Arc<dyn Provider>>,
    scheduler: OnceLock<WakeupScheduler>,
    pending_auth: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TelegramBot {
    pub fn new(
        client: Arc<TelegramClient>,
        providers: HashMap<String, Arc<dyn Provider>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            providers,
            scheduler: OnceLock::new(),
            pending_auth: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Attach the scheduler used by command handlers. Called once during
    /// wiring, after the scheduler was built with this bot's callbacks.
    pub fn set_scheduler(&self, scheduler: WakeupScheduler) {
        let _ = self.scheduler.set(scheduler);
    }

    /// Notification callback for the scheduler.
    pub fn notifier(&self) -> Notifier {
        let client = Arc::clone(&self.client);
        Arc::new(move |message| {
            let client = Arc::clone(&client);
            Box::pin(async move {
                client
                    .send_message(&message)
                    .await
                    .map_err(|e| e.to_string())
            })
        })
    }

    /// Re-authentication callback for the scheduler: kicks off the device
    /// flow for the named provider.
    pub fn auth_requester(bot: &Arc<Self>) -> AuthRequester {
        let bot = Arc::clone(bot);
        Arc::new(move |name| {
            let bot = Arc::clone(&bot);
            Box::pin(async move {
                bot.run_device_auth(&name).await;
                Ok(())
            })
        })
    }

    /// Poll for commands until shutdown is signaled.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Telegram bot started");
        let mut offset: Option<i64> = None;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                polled = self.client.get_updates(offset, POLL_TIMEOUT_SECS) => {
                    match polled {
                        Ok(updates) => {
                            for update in updates {
                                offset = Some(update.update_id + 1);
                                self.handle_update(update).await;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to poll Telegram updates");
                            tokio::time::sleep(POLL_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }

        // Cancel pending device-auth watchers.
        let mut pending = self.pending_auth.lock().await;
        for (_, handle) in pending.drain() {
            handle.abort();
        }
        info!("Telegram bot stopped");
    }

    /// Check auth status for all providers, sorted by name.
    pub async fn check_all_auth(&self) -> Vec<(String, AuthStatus)> {
        let mut names: Vec<&String> = self.providers.keys().collect();
        names.sort();

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let status = self.providers[name].check_auth().await;
            results.push((name.clone(), status));
        }
        results
    }

    /// Send the boot-time auth summary to the configured chat.
    pub async fn send_startup_summary(&self) {
        let results = self.check_all_auth().await;
        let mut lines = vec!["Reveille started. Auth status:".to_string(), String::new()];
        let mut needs_auth = false;

        for (name, status) in &results {
            lines.push(format!("  {name}: {}", status.label()));
            if *status != AuthStatus::Ok {
                needs_auth = true;
            }
        }
        if needs_auth {
            lines.push(String::new());
            lines.push("Use /auth &lt;provider&gt; to authenticate manually.".to_string());
        }

        if let Err(e) = self.client.send_message(&lines.join("\n")).await {
            warn!(error = %e, "failed to send startup summary");
        }
    }

    /// Orchestrate a device-code auth flow for one provider.
    pub async fn run_device_auth(&self, name: &str) {
        let Some(provider) = self.providers.get(name).cloned() else {
            self.reply(&format!("Unknown provider: {name}")).await;
            return;
        };

        // Only one auth flow per provider at a time.
        if let Some(previous) = self.pending_auth.lock().await.remove(name) {
            previous.abort();
            provider.cancel_device_auth().await;
        }

        self.reply(&format!(
            "Starting device-code auth for {}...",
            provider.name()
        ))
        .await;

        let Some(info) = provider.start_device_auth().await else {
            self.reply(&format!(
                "Could not start device-code flow for {}.\n\n\
                 <b>Fallback:</b> authenticate on a machine with a browser, \
                 then copy the auth files over.\n\
                 Use /check_auth {name} after copying.",
                provider.name()
            ))
            .await;
            return;
        };

        self.reply(&format!(
            "<b>{} authentication required</b>\n\n\
             1. Open: {}\n\
             2. Enter code: <code>{}</code>\n\n\
             Waiting for you to complete authentication...",
            provider.name(),
            info.url,
            info.code
        ))
        .await;

        // Watch for completion in the background so the command loop stays
        // responsive.
        let client = Arc::clone(&self.client);
        let pending = Arc::clone(&self.pending_auth);
        let provider_name = name.to_string();
        let handle = tokio::spawn(async move {
            let display = provider.name().to_string();
            let message = if provider.wait_for_device_auth().await {
                format!("{display} authentication successful!")
            } else {
                format!(
                    "{display} authentication timed out or failed.\n\
                     Use /auth {provider_name} to try again."
                )
            };
            if let Err(e) = client.send_message(&message).await {
                warn!(error = %e, "failed to send device-auth result");
            }
            pending.lock().await.remove(&provider_name);
        });
        self.pending_auth
            .lock()
            .await
            .insert(name.to_string(), handle);
    }

    async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        // Only the configured chat may command the bot.
        if message.chat.id.to_string() != self.client.chat_id() {
            return;
        }
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let Some((command, argument)) = parse_command(text) else {
            return;
        };
        self.handle_command(command, argument).await;
    }

    async fn handle_command(&self, command: &str, argument: Option<&str>) {
        match command {
            "status" => {
                let results = self.check_all_auth().await;
                let mut lines = vec!["<b>Provider Status</b>".to_string(), String::new()];
                for (name, status) in results {
                    lines.push(format!("  {name}: {}", status.label()));
                }
                self.reply(&lines.join("\n")).await;
            }
            "check_auth" => match argument {
                Some(name) => match self.providers.get(name) {
                    Some(provider) => {
                        let status = provider.check_auth().await;
                        self.reply(&format!("{}: {}", provider.name(), status.label()))
                            .await;
                    }
                    None => self.reply(&format!("Unknown provider: {name}")).await,
                },
                None => {
                    let results = self.check_all_auth().await;
                    let lines: Vec<String> = results
                        .into_iter()
                        .map(|(name, status)| format!("{name}: {}", status.label()))
                        .collect();
                    self.reply(&lines.join("\n")).await;
                }
            },
            "auth" => match argument {
                Some(name) => self.run_device_auth(name).await,
                None => {
                    self.reply(&format!(
                        "Usage: /auth &lt;provider&gt;\nAvailable: {}",
                        self.provider_names()
                    ))
                    .await;
                }
            },
            "schedule" => {
                let text = match self.scheduler.get() {
                    Some(scheduler) => scheduler.format_status().await,
                    None => "Scheduler is not initialized yet.".to_string(),
                };
                self.reply(&text).await;
            }
            "wake" => match argument {
                Some(name) => {
                    let reply = self.run_manual_wake(name).await;
                    self.reply(&reply).await;
                }
                None => {
                    self.reply(&format!(
                        "Usage: /wake &lt;provider&gt;\nAvailable: {}",
                        self.provider_names()
                    ))
                    .await;
                }
            },
            "help" => {
                self.reply(
                    "<b>Reveille Commands</b>\n\n\
                     /status - Show all provider auth status\n\
                     /auth &lt;provider&gt; - Start device-code auth\n\
                     /check_auth [provider] - Verify auth status\n\
                     /schedule - Show scheduler state\n\
                     /wake &lt;provider&gt; - Trigger immediate wake-up\n\
                     /help - Show this message",
                )
                .await;
            }
            _ => {}
        }
    }

    /// Trigger a wake-up and render a status reply for `/wake`.
    async fn run_manual_wake(&self, name: &str) -> String {
        let Some(scheduler) = self.scheduler.get() else {
            return "Scheduler is not initialized yet.".to_string();
        };

        let Some(result) = scheduler.trigger_wakeup(name).await else {
            return format!("Unknown provider: {name}");
        };

        let next_run = match scheduler.get_state(name).await {
            Some(state) => format_time(Some(state.next_run_at)),
            None => "unknown".to_string(),
        };

        if result.success {
            format!("{name}: wake-up succeeded.\nNext run: {next_run}")
        } else {
            format!(
                "{name}: wake-up failed ({}).\nMessage: {}\nNext run: {next_run}",
                result.failure_kind.as_str(),
                result.message
            )
        }
    }

    fn provider_names(&self) -> String {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names.join(", ")
    }

    async fn reply(&self, text: &str) {
        if let Err(e) = self.client.send_message(text).await {
            warn!(error = %e, "failed to send Telegram reply");
        }
    }
}

/// Split `/command argument` into its parts. Non-commands yield `None`.
fn parse_command(text: &str) -> Option<(&str, Option<&str>)> {
    let rest = text.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let command = parts.next()?;
    // Telegram appends @botname in group chats.
    let command = command.split('@').next().unwrap_or(command);
    Some((command, parts.next()))
}
