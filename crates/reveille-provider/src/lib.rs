//! Provider capability boundary for Reveille.
//!
//! This crate provides:
//! - The `Provider` trait every managed CLI tool implements
//! - Shared result types (auth status, wake-up outcomes, device codes)
//! - An async subprocess runner with timeout handling
//! - Pure classification of CLI failure output into failure kinds
//! - Concrete providers for the Claude Code and OpenAI Codex CLIs

mod claude;
mod classify;
mod codex;
mod config;
mod error;
mod process;
mod registry;
mod types;

pub use claude::ClaudeProvider;
pub use classify::{classify_failure, contains_auth_error, extract_rate_limit_hint, truncate_chars};
pub use codex::CodexProvider;
pub use config::{ProviderConfig, ResetMode};
pub use error::ProviderError;
pub use process::{CliOutput, run_cli, start_long_running};
pub use registry::build_providers;
pub use types::{AuthStatus, DeviceCodeInfo, FailureKind, Provider, WakeupResult};
