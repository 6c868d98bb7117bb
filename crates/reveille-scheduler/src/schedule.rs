//! Pure scheduling math: next-run computation and backoff.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use reveille_provider::{ProviderConfig, ResetMode};

use crate::error::SchedulerError;

/// Global scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Path of the persisted schedule-state file.
    pub state_path: PathBuf,
    /// First transient-failure retry delay in seconds.
    pub retry_base_seconds: u64,
    /// Transient-failure retry delay cap in seconds.
    pub retry_max_seconds: u64,
}

impl SchedulerConfig {
    /// Validate numeric bounds. Invalid bounds are fatal at startup.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.retry_base_seconds == 0 {
            return Err(SchedulerError::InvalidConfig(
                "retry_base_seconds must be >= 1".to_string(),
            ));
        }
        if self.retry_max_seconds < self.retry_base_seconds {
            return Err(SchedulerError::InvalidConfig(
                "retry_max_seconds must be >= retry_base_seconds".to_string(),
            ));
        }
        Ok(())
    }
}

/// Compute the next short-cycle wake-up after a success at `success_at`.
///
/// Rolling mode counts the window from the success itself; clock-aligned mode
/// anchors it to the top of the success's hour, reproducing providers whose
/// quota resets on the hour rather than rolling from the exact call time.
pub fn compute_next_run(config: &ProviderConfig, success_at: DateTime<Utc>) -> DateTime<Utc> {
    let offset = Duration::seconds((config.window_seconds + config.wake_delay_seconds) as i64);
    match config.reset_mode {
        ResetMode::Rolling => success_at + offset,
        ResetMode::ClockAlignedHour => truncate_to_hour(success_at) + offset,
    }
}

/// Compute the next weekly wake-up after a success at `success_at`.
/// The weekly cycle is always rolling.
pub fn compute_next_weekly_run(
    config: &ProviderConfig,
    success_at: DateTime<Utc>,
) -> DateTime<Utc> {
    success_at
        + Duration::seconds((config.weekly_window_seconds + config.weekly_wake_delay_seconds) as i64)
}

/// Exponential backoff after `failures` consecutive transient failures:
/// `min(base * 2^(failures - 1), max)`.
pub fn backoff_seconds(base: u64, max: u64, failures: u32) -> u64 {
    let exponent = failures.saturating_sub(1).min(31);
    base.saturating_mul(1u64 << exponent).min(max)
}

/// Render a timestamp for status output, `-` when absent.
pub fn format_time(value: Option<DateTime<Utc>>) -> String {
    match value {
        Some(t) => t.format("%Y-%m-%d %H:%M:%SZ").to_string(),
        None => "-".to_string(),
    }
}

/// Truncate to the start of the hour, discarding minutes, seconds and
/// sub-second precision.
fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let past_hour = t.timestamp().rem_euclid(3600);
    t - Duration::seconds(past_hour) - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
}
