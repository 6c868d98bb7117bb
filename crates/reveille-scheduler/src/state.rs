//! Per-provider schedule state.

use chrono::{DateTime, Duration, Utc};
use reveille_provider::ProviderConfig;
use serde::{Deserialize, Serialize};

/// Why a provider's schedule is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// The provider rejected requests for lack of authentication; wake-ups
    /// keep probing on their pushed-out schedule until one succeeds.
    AuthRequired,
}

/// Schedule state for one provider.
///
/// Owned by the scheduler and only mutated inside that provider's exclusive
/// section. `next_run_at` is the sole mandatory field when restoring from
/// disk; everything else defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    /// Next short-cycle due time.
    pub next_run_at: DateTime<Utc>,
    /// Next weekly due time; `None` only before the first attempt.
    #[serde(default)]
    pub weekly_next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Consecutive failed attempts; reset to 0 on any success.
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub paused_reason: Option<PauseReason>,
    /// Set only while in transient-failure backoff; always equals
    /// `next_run_at` when present.
    #[serde(default)]
    pub backoff_until: Option<DateTime<Utc>>,
    /// True once the automatic re-auth request went out for the current
    /// pause episode; cleared on success.
    #[serde(default)]
    pub auth_request_sent: bool,
}

impl ScheduleState {
    /// Fresh state for a provider with no persisted history: first wake-up
    /// one post-success delay from now.
    pub fn initial(now: DateTime<Utc>, config: &ProviderConfig) -> Self {
        Self {
            next_run_at: now + Duration::seconds(config.wake_delay_seconds as i64),
            weekly_next_run_at: None,
            last_success_at: None,
            last_attempt_at: None,
            consecutive_failures: 0,
            paused_reason: None,
            backoff_until: None,
            auth_request_sent: false,
        }
    }

    /// The earlier of the short-cycle and weekly due times.
    pub fn earliest_due(&self) -> DateTime<Utc> {
        match self.weekly_next_run_at {
            Some(weekly) => self.next_run_at.min(weekly),
            None => self.next_run_at,
        }
    }

    /// Short status word for display.
    pub fn status_label(&self) -> &'static str {
        if self.paused_reason.is_some() {
            "paused(auth_required)"
        } else if self.backoff_until.is_some() {
            "backoff"
        } else {
            "active"
        }
    }
}
