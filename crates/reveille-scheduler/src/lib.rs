//! Durable per-provider wake-up scheduler for Reveille.
//!
//! This crate provides a persistent scheduler that:
//! - Runs one supervised control loop per managed provider
//! - Tracks a short rate-limit window and a weekly quota window per provider
//! - Pauses itself on authentication failures and resumes on success
//! - Applies exponential backoff to transient failures
//! - Survives crashes and restarts via an atomically written state file

mod duration;
mod error;
mod schedule;
mod scheduler;
mod state;
mod store;

pub use duration::parse_duration_seconds;
pub use error::SchedulerError;
pub use schedule::{
    SchedulerConfig, backoff_seconds, compute_next_run, compute_next_weekly_run, format_time,
};
pub use scheduler::{AuthRequester, Notifier, WakeupScheduler};
pub use state::{PauseReason, ScheduleState};
pub use store::StateStore;
