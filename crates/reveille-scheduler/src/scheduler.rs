//! Wake-up scheduler implementation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use reveille_provider::{FailureKind, Provider, ProviderConfig, WakeupResult, truncate_chars};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::duration::parse_duration_seconds;
use crate::error::SchedulerError;
use crate::schedule::{
    SchedulerConfig, backoff_seconds, compute_next_run, compute_next_weekly_run, format_time,
};
use crate::state::{PauseReason, ScheduleState};
use crate::store::StateStore;

/// Type alias for the notification callback.
pub type Notifier =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Type alias for the re-authentication request callback. Receives the
/// provider key whose pause episode needs an interactive login.
pub type AuthRequester =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Maximum characters of a failure message quoted in notifications.
const FAILURE_MESSAGE_MAX_CHARS: usize = 120;

/// One managed provider and its scheduling state.
///
/// `attempt_lock` is the per-provider exclusive section: it is held across a
/// whole attempt (including the capability call) and across every externally
/// triggered mutation. `state` is only ever held briefly, so snapshotting for
/// persistence is never blocked behind provider I/O.
struct ResourceEntry {
    provider: Arc<dyn Provider>,
    config: RwLock<ProviderConfig>,
    attempt_lock: Mutex<()>,
    state: Mutex<Option<ScheduleState>>,
}

/// Control handles for one provider's loop task.
struct LoopTask {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: SchedulerConfig,
    resources: BTreeMap<String, ResourceEntry>,
    store: StateStore,
    notify: Notifier,
    request_auth: AuthRequester,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<HashMap<String, LoopTask>>,
    started: AtomicBool,
}

/// Side effects decided while the state lock was held, executed after it is
/// released.
struct AttemptEffects {
    notification: Option<String>,
    request_auth: bool,
}

/// Coordinates provider wake-up requests according to policy.
///
/// Runs one supervised loop per provider; each loop sleeps until the earlier
/// of the provider's short-cycle and weekly due times, performs one attempt,
/// applies the success/auth/rate-limit/backoff transition, and persists the
/// full state snapshot before continuing.
#[derive(Clone)]
pub struct WakeupScheduler {
    inner: Arc<Inner>,
}

impl WakeupScheduler {
    /// Build a scheduler over the given providers.
    ///
    /// Every provider must have a configuration entry; a missing entry or
    /// invalid retry bounds are configuration errors, fatal at startup.
    pub fn new(
        config: SchedulerConfig,
        provider_configs: HashMap<String, ProviderConfig>,
        providers: HashMap<String, Arc<dyn Provider>>,
        notify: Notifier,
        request_auth: AuthRequester,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let mut resources = BTreeMap::new();
        for (name, provider) in providers {
            let Some(provider_config) = provider_configs.get(&name) else {
                return Err(SchedulerError::InvalidConfig(format!(
                    "no configuration for provider {name}"
                )));
            };
            resources.insert(
                name,
                ResourceEntry {
                    provider,
                    config: RwLock::new(provider_config.clone()),
                    attempt_lock: Mutex::new(()),
                    state: Mutex::new(None),
                },
            );
        }

        let store = StateStore::new(config.state_path.clone());
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                resources,
                store,
                notify,
                request_auth,
                shutdown_tx,
                tasks: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Load persisted state (or synthesize defaults) and spawn one loop per
    /// provider.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(false);

        let configured: HashSet<String> = self.inner.resources.keys().cloned().collect();
        let mut loaded = self.inner.store.load(&configured).await;
        let now = Utc::now();

        for (name, entry) in &self.inner.resources {
            let state = match loaded.remove(name) {
                Some(state) => state,
                None => {
                    let provider_config = entry.config.read().await;
                    ScheduleState::initial(now, &provider_config)
                }
            };
            *entry.state.lock().await = Some(state);
            self.spawn_loop(name).await;
        }

        self.inner.persist().await;
        info!(
            providers = %self.inner.resources.keys().cloned().collect::<Vec<_>>().join(", "),
            "scheduler started"
        );
    }

    /// Stop every loop and persist the final state.
    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(true);

        let mut tasks = self.inner.tasks.lock().await;
        for (name, task) in tasks.drain() {
            let _ = task.cancel_tx.send(true);
            if let Err(e) = task.handle.await {
                warn!(provider = %name, error = %e, "loop task did not shut down cleanly");
            }
        }
        drop(tasks);

        self.inner.persist().await;
        info!("scheduler stopped");
    }

    /// Render a human-readable snapshot of all providers' state.
    pub async fn format_status(&self) -> String {
        let mut lines = vec!["Scheduler".to_string()];
        for (name, entry) in &self.inner.resources {
            let guard = entry.state.lock().await;
            match guard.as_ref() {
                None => lines.push(format!("{name}: not initialized")),
                Some(state) => lines.push(format!(
                    "{name}: {} | next={} | weekly={} | last_ok={} | failures={}",
                    state.status_label(),
                    format_time(Some(state.next_run_at)),
                    format_time(state.weekly_next_run_at),
                    format_time(state.last_success_at),
                    state.consecutive_failures,
                )),
            }
        }
        lines.join("\n")
    }

    /// Return a copy of one provider's schedule state.
    pub async fn get_state(&self, name: &str) -> Option<ScheduleState> {
        let entry = self.inner.resources.get(name)?;
        let guard = entry.state.lock().await;
        guard.clone()
    }

    /// Force an immediate wake-up attempt, then restart the provider's loop
    /// so the fresh due times take effect without waiting out the old sleep.
    pub async fn trigger_wakeup(&self, name: &str) -> Option<WakeupResult> {
        if !self.inner.resources.contains_key(name) {
            return None;
        }
        let result = self.inner.attempt_wakeup(name, true).await;
        self.restart_loop(name).await;
        result
    }

    /// Move the short-cycle due time to an explicit timestamp, ending any
    /// pause or backoff episode. The weekly timer is untouched unless it was
    /// never initialized.
    pub async fn schedule_next_wakeup(
        &self,
        name: &str,
        at: DateTime<Utc>,
    ) -> Option<ScheduleState> {
        let entry = self.inner.resources.get(name)?;
        let updated = {
            let _attempt_guard = entry.attempt_lock.lock().await;
            let provider_config = entry.config.read().await.clone();
            let now = Utc::now();
            let mut guard = entry.state.lock().await;
            let state = guard.get_or_insert_with(|| ScheduleState::initial(now, &provider_config));
            state.next_run_at = at;
            state.paused_reason = None;
            state.backoff_until = None;
            state.auth_request_sent = false;
            if state.weekly_next_run_at.is_none() {
                let base = state.last_success_at.unwrap_or(now);
                state.weekly_next_run_at = Some(compute_next_weekly_run(&provider_config, base));
            }
            state.clone()
        };
        self.inner.persist().await;
        self.restart_loop(name).await;
        info!(provider = %name, at = %at, "short-cycle wake-up rescheduled");
        Some(updated)
    }

    /// Move the weekly due time to an explicit timestamp, ending any pause or
    /// backoff episode. The short-cycle timer is untouched.
    pub async fn schedule_next_weekly_wakeup(
        &self,
        name: &str,
        at: DateTime<Utc>,
    ) -> Option<ScheduleState> {
        let entry = self.inner.resources.get(name)?;
        let updated = {
            let _attempt_guard = entry.attempt_lock.lock().await;
            let provider_config = entry.config.read().await.clone();
            let now = Utc::now();
            let mut guard = entry.state.lock().await;
            let state = guard.get_or_insert_with(|| ScheduleState::initial(now, &provider_config));
            state.weekly_next_run_at = Some(at);
            state.paused_reason = None;
            state.backoff_until = None;
            state.auth_request_sent = false;
            state.clone()
        };
        self.inner.persist().await;
        self.restart_loop(name).await;
        info!(provider = %name, at = %at, "weekly wake-up rescheduled");
        Some(updated)
    }

    /// Replace a provider's configuration in place. Takes effect on the
    /// provider's next attempt.
    pub async fn reload_provider_config(&self, name: &str, config: ProviderConfig) -> bool {
        match self.inner.resources.get(name) {
            Some(entry) => {
                let _attempt_guard = entry.attempt_lock.lock().await;
                *entry.config.write().await = config;
                info!(provider = %name, "provider configuration reloaded");
                true
            }
            None => false,
        }
    }

    /// Cancel a provider's loop, wait for it to unwind, and respawn it.
    ///
    /// Never leaves two live loops for one provider. A no-op for unknown
    /// providers or while the scheduler is not running.
    pub async fn restart_loop(&self, name: &str) -> bool {
        if !self.inner.resources.contains_key(name) {
            return false;
        }

        let mut tasks = self.inner.tasks.lock().await;
        if let Some(task) = tasks.remove(name) {
            let _ = task.cancel_tx.send(true);
            if let Err(e) = task.handle.await {
                warn!(provider = %name, error = %e, "loop task did not shut down cleanly");
            }
        }

        if self.inner.started.load(Ordering::SeqCst) && !*self.inner.shutdown_tx.borrow() {
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let handle = tokio::spawn(resource_loop(
                Arc::clone(&self.inner),
                name.to_string(),
                cancel_rx,
            ));
            tasks.insert(name.to_string(), LoopTask { cancel_tx, handle });
        }
        true
    }

    async fn spawn_loop(&self, name: &str) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(resource_loop(
            Arc::clone(&self.inner),
            name.to_string(),
            cancel_rx,
        ));
        self.inner
            .tasks
            .lock()
            .await
            .insert(name.to_string(), LoopTask { cancel_tx, handle });
    }
}

/// One provider's control loop: sleep until the nearest due time, attempt,
/// repeat. Exits on global shutdown or a per-loop cancel.
async fn resource_loop(inner: Arc<Inner>, name: String, mut cancel_rx: watch::Receiver<bool>) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();
    debug!(provider = %name, "loop started");

    loop {
        if *shutdown_rx.borrow() || *cancel_rx.borrow() {
            break;
        }
        let Some(entry) = inner.resources.get(&name) else {
            break;
        };

        let due = {
            let guard = entry.state.lock().await;
            match guard.as_ref() {
                Some(state) => state.earliest_due(),
                None => Utc::now(),
            }
        };

        let now = Utc::now();
        if due > now {
            let sleep_for = (due - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown_rx.changed() => {}
                _ = cancel_rx.changed() => {}
            }
            continue;
        }

        inner.attempt_wakeup(&name, false).await;
    }

    debug!(provider = %name, "loop exited");
}

impl Inner {
    /// Perform one wake-up attempt for a provider, exclusively.
    ///
    /// Returns `None` for unknown providers and for loop-driven attempts that
    /// found nothing due anymore (a forced attempt already moved the timers).
    async fn attempt_wakeup(&self, name: &str, user_triggered: bool) -> Option<WakeupResult> {
        let entry = self.resources.get(name)?;
        let _attempt_guard = entry.attempt_lock.lock().await;

        let provider_config = entry.config.read().await.clone();
        let now = Utc::now();

        let (short_due, weekly_due) = {
            let mut guard = entry.state.lock().await;
            let state = guard.get_or_insert_with(|| ScheduleState::initial(now, &provider_config));

            // A forced/manual attempt always counts as short-cycle due.
            let short_due = user_triggered || state.next_run_at <= now;
            let weekly_due = state.weekly_next_run_at.is_some_and(|t| t <= now);
            if !short_due && !weekly_due {
                return None;
            }

            state.last_attempt_at = Some(now);
            if state.weekly_next_run_at.is_none() {
                let base = state.last_success_at.unwrap_or(now);
                state.weekly_next_run_at = Some(compute_next_weekly_run(&provider_config, base));
            }
            (short_due, weekly_due)
        };

        let result = match entry.provider.send_wakeup().await {
            Ok(result) => result,
            Err(e) => {
                error!(provider = %name, error = %e, "wake-up capability raised");
                WakeupResult::failure(
                    FailureKind::Transient,
                    format!("Unhandled wake-up error: {e}"),
                )
            }
        };

        let effects = {
            let mut guard = entry.state.lock().await;
            let state = guard.as_mut()?;
            self.apply_outcome(
                state,
                &provider_config,
                entry.provider.name(),
                &result,
                now,
                short_due,
                weekly_due,
                user_triggered,
            )
        };

        self.persist().await;

        if let Some(message) = effects.notification {
            self.safe_notify(message).await;
        }
        if effects.request_auth
            && let Err(e) = (self.request_auth)(name.to_string()).await
        {
            warn!(provider = %name, error = %e, "failed to request re-authentication");
        }

        Some(result)
    }

    /// Apply one attempt's outcome to the schedule state and decide which
    /// side effects to run once the lock is released.
    #[allow(clippy::too_many_arguments)]
    fn apply_outcome(
        &self,
        state: &mut ScheduleState,
        provider_config: &ProviderConfig,
        display_name: &str,
        result: &WakeupResult,
        now: DateTime<Utc>,
        short_due: bool,
        weekly_due: bool,
        user_triggered: bool,
    ) -> AttemptEffects {
        if result.success {
            let ended_episode = state.paused_reason.is_some() || state.consecutive_failures > 0;
            state.last_success_at = Some(now);
            state.consecutive_failures = 0;
            state.paused_reason = None;
            state.backoff_until = None;
            state.auth_request_sent = false;
            if short_due {
                state.next_run_at = compute_next_run(provider_config, now);
            }
            if weekly_due {
                state.weekly_next_run_at = Some(compute_next_weekly_run(provider_config, now));
            }

            // Routine silent successes stay silent; user-triggered runs and
            // recoveries from a failure or pause episode are surfaced.
            let notification = (user_triggered || ended_episode).then(|| {
                format!(
                    "{display_name}: wake-up successful. Next run at {}.",
                    format_time(Some(state.next_run_at)),
                )
            });
            return AttemptEffects {
                notification,
                request_auth: false,
            };
        }

        match result.failure_kind {
            FailureKind::Auth => {
                state.consecutive_failures += 1;
                state.paused_reason = Some(PauseReason::AuthRequired);
                state.backoff_until = None;
                // Both cycles move a full window out; each pushed-out firing
                // is itself the auth probe.
                state.next_run_at = now
                    + Duration::seconds(
                        (provider_config.window_seconds + provider_config.wake_delay_seconds)
                            as i64,
                    );
                state.weekly_next_run_at = Some(
                    now + Duration::seconds(
                        (provider_config.weekly_window_seconds
                            + provider_config.weekly_wake_delay_seconds)
                            as i64,
                    ),
                );

                let first_of_episode = !state.auth_request_sent;
                state.auth_request_sent = true;
                let notification = first_of_episode.then(|| {
                    format!(
                        "{display_name}: authentication required. \
                         Scheduler is paused until auth is restored.",
                    )
                });
                AttemptEffects {
                    notification,
                    request_auth: first_of_episode,
                }
            }
            FailureKind::RateLimit => {
                let reset_seconds = result
                    .rate_limit_hint
                    .as_deref()
                    .and_then(parse_duration_seconds)
                    .or_else(|| parse_duration_seconds(&result.message))
                    .unwrap_or(provider_config.window_seconds);

                state.consecutive_failures = 0;
                state.paused_reason = None;
                state.backoff_until = None;
                state.auth_request_sent = false;
                state.next_run_at = now
                    + Duration::seconds(
                        (reset_seconds + provider_config.wake_delay_seconds) as i64,
                    );
                state.weekly_next_run_at = Some(
                    now + Duration::seconds(
                        (reset_seconds + provider_config.weekly_wake_delay_seconds) as i64,
                    ),
                );

                let notification = user_triggered.then(|| {
                    format!(
                        "{display_name}: rate limited. Next retry at {}.",
                        format_time(Some(state.next_run_at)),
                    )
                });
                AttemptEffects {
                    notification,
                    request_auth: false,
                }
            }
            FailureKind::Transient | FailureKind::None => {
                state.consecutive_failures += 1;
                let backoff = backoff_seconds(
                    self.config.retry_base_seconds,
                    self.config.retry_max_seconds,
                    state.consecutive_failures,
                );
                let until = now + Duration::seconds(backoff as i64);
                state.backoff_until = Some(until);
                state.next_run_at = until;
                state.weekly_next_run_at = Some(until);

                // Decaying cadence: surface the 1st, 3rd and 5th consecutive
                // failures instead of spamming through a long outage.
                let wants_notify =
                    user_triggered || matches!(state.consecutive_failures, 1 | 3 | 5);
                let notification = wants_notify.then(|| {
                    format!(
                        "{display_name}: wake-up failed ({}). Retrying in {backoff}s.",
                        truncate_chars(&result.message, FAILURE_MESSAGE_MAX_CHARS),
                    )
                });
                AttemptEffects {
                    notification,
                    request_auth: false,
                }
            }
        }
    }

    /// Persist the full snapshot of all providers' state. Failures are
    /// logged; the in-memory state stands and the next write retries.
    async fn persist(&self) {
        let mut snapshot = BTreeMap::new();
        for (name, entry) in &self.resources {
            if let Some(state) = entry.state.lock().await.as_ref() {
                snapshot.insert(name.clone(), state.clone());
            }
        }
        if let Err(e) = self.store.save(&snapshot).await {
            error!(error = %e, "failed to persist scheduler state");
        }
    }

    async fn safe_notify(&self, message: String) {
        if let Err(e) = (self.notify)(message).await {
            warn!(error = %e, "failed to send scheduler notification");
        }
    }
}
