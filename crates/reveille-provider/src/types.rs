//! Shared provider types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Result of an authentication probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// A valid session exists.
    Ok,
    /// No session, or the session was rejected.
    NotAuthenticated,
    /// A session exists but its credentials have lapsed.
    Expired,
    /// The probe itself failed (CLI missing, timeout, ...).
    Error,
}

impl AuthStatus {
    /// Short uppercase label for status summaries.
    pub fn label(&self) -> &'static str {
        match self {
            AuthStatus::Ok => "OK",
            AuthStatus::NotAuthenticated => "NOT AUTHENTICATED",
            AuthStatus::Expired => "EXPIRED",
            AuthStatus::Error => "ERROR",
        }
    }
}

/// Classification of a failed wake-up attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Not a failure (the attempt succeeded).
    #[default]
    None,
    /// Authentication is required before requests can succeed.
    Auth,
    /// The provider's rate limit is exhausted.
    RateLimit,
    /// Anything else; retried with backoff.
    Transient,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::None => "none",
            FailureKind::Auth => "auth",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::Transient => "transient",
        }
    }
}

/// Outcome of one wake-up request.
#[derive(Debug, Clone)]
pub struct WakeupResult {
    pub success: bool,
    /// Human-readable summary of the CLI response, truncated at the boundary.
    pub message: String,
    pub failure_kind: FailureKind,
    /// Free-text reset phrase parsed from CLI output, if the failure was a
    /// rate limit ("3 hours 2 minutes").
    pub rate_limit_hint: Option<String>,
}

impl WakeupResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            failure_kind: FailureKind::None,
            rate_limit_hint: None,
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            failure_kind: kind,
            rate_limit_hint: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            failure_kind: FailureKind::RateLimit,
            rate_limit_hint: Some(hint.into()),
        }
    }
}

/// A device-code login challenge for the operator to complete out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCodeInfo {
    pub code: String,
    pub url: String,
}

/// Capability contract every managed CLI tool implements.
///
/// The scheduler consumes `send_wakeup`; the chat front end additionally uses
/// `check_auth` and the device-auth flow. Implementations own their per-call
/// timeouts; callers impose none of their own.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Check whether the provider has a valid authentication session.
    async fn check_auth(&self) -> AuthStatus;

    /// Send a minimal request to restart the rate-limit window.
    ///
    /// Ordinary failures (auth, rate limit, flaky CLI) are reported inside
    /// the `WakeupResult`; an `Err` means the wrapper itself misbehaved and
    /// is treated as transient by the scheduler.
    async fn send_wakeup(&self) -> Result<WakeupResult, ProviderError>;

    /// Start a device-code auth flow. Returns the code and URL, or `None`
    /// when the flow could not be started or its output not parsed.
    async fn start_device_auth(&self) -> Option<DeviceCodeInfo>;

    /// Wait for the running device-auth process to complete.
    async fn wait_for_device_auth(&self) -> bool;

    /// Cancel a running device-auth process, if any.
    async fn cancel_device_auth(&self);
}
