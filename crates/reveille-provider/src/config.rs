//! Per-provider configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// How a provider's rate-limit window resets after a successful request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    /// Next window starts exactly `window` after the triggering success.
    Rolling,
    /// Next window is anchored to the top of the hour of the triggering success.
    ClockAlignedHour,
}

impl ResetMode {
    /// Stable string form, matching the configuration and persisted values.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetMode::Rolling => "rolling",
            ResetMode::ClockAlignedHour => "clock_aligned_hour",
        }
    }
}

impl FromStr for ResetMode {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rolling" => Ok(ResetMode::Rolling),
            "clock_aligned_hour" => Ok(ResetMode::ClockAlignedHour),
            other => Err(ProviderError::UnsupportedResetMode(other.to_string())),
        }
    }
}

/// Configuration for one managed provider.
///
/// Immutable once loaded; the scheduler replaces the whole value on a hot
/// reload rather than mutating fields in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry key, e.g. "claude" or "codex".
    pub name: String,
    /// Model identifier passed to the CLI.
    pub model: String,
    /// Prompt sent as the wake-up request.
    pub wakeup_message: String,
    /// How the short-cycle window resets.
    pub reset_mode: ResetMode,
    /// Short-cycle rate-limit window length in seconds.
    pub window_seconds: u64,
    /// Delay past the window boundary before waking, in seconds.
    pub wake_delay_seconds: u64,
    /// Weekly quota window length in seconds.
    pub weekly_window_seconds: u64,
    /// Delay past the weekly boundary before waking, in seconds.
    pub weekly_wake_delay_seconds: u64,
}
