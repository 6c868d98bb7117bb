//! Claude Code CLI provider.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::warn;

use crate::classify::{classify_failure, contains_auth_error, truncate_chars};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::process::{self, CliOutput, read_initial_output, run_cli, start_long_running};
use crate::types::{AuthStatus, DeviceCodeInfo, FailureKind, Provider, WakeupResult};

const AUTH_CHECK_TIMEOUT: Duration = Duration::from_secs(30);
const DEVICE_OUTPUT_TIMEOUT: Duration = Duration::from_secs(15);
const DEVICE_AUTH_TIMEOUT: Duration = Duration::from_secs(300);
const MESSAGE_MAX_CHARS: usize = 300;

static DEVICE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:code)[:\s]+([A-Z0-9-]{4,12})").unwrap());
static DEVICE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(https?://\S*device\S*)").unwrap());

const AUTH_ERROR_KEYWORDS: &[&str] = &[
    "invalid api key",
    "not authenticated",
    "authentication required",
    "please log in",
    "login required",
    "unauthorized",
];

/// Provider wrapping the Claude Code CLI.
pub struct ClaudeProvider {
    config: ProviderConfig,
    device_auth: Mutex<Option<Child>>,
}

impl ClaudeProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            device_auth: Mutex::new(None),
        }
    }

    /// Interpret a `claude -p ... --output-format json` response.
    fn parse_wakeup_output(&self, out: &CliOutput) -> WakeupResult {
        let combined = out.combined();

        let Ok(data) = serde_json::from_str::<serde_json::Value>(&out.stdout) else {
            if !out.ok() {
                return WakeupResult::failure(
                    FailureKind::Transient,
                    truncate_chars(&combined, MESSAGE_MAX_CHARS),
                );
            }
            return WakeupResult::success("OK (non-JSON response)");
        };

        if data.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false) {
            let text = data.get("result").and_then(|v| v.as_str()).unwrap_or("");
            let (kind, hint) = classify_failure(text, AUTH_ERROR_KEYWORDS);
            let message = match kind {
                FailureKind::Auth => format!("Auth error: {text}"),
                _ => truncate_chars(text, MESSAGE_MAX_CHARS),
            };
            return WakeupResult {
                success: false,
                message,
                failure_kind: kind,
                rate_limit_hint: hint,
            };
        }

        let text = data.get("result").and_then(|v| v.as_str()).unwrap_or("OK");
        WakeupResult::success(truncate_chars(text, MESSAGE_MAX_CHARS))
    }

    fn parse_auth_output(&self, out: &CliOutput) -> AuthStatus {
        if out.timed_out {
            return AuthStatus::Error;
        }

        let Ok(data) = serde_json::from_str::<serde_json::Value>(&out.stdout) else {
            // Fall back to keyword matching on the combined output.
            if contains_auth_error(&out.combined(), AUTH_ERROR_KEYWORDS) {
                return AuthStatus::NotAuthenticated;
            }
            return AuthStatus::Error;
        };

        if data.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false) {
            let text = data.get("result").and_then(|v| v.as_str()).unwrap_or("");
            if contains_auth_error(text, AUTH_ERROR_KEYWORDS) {
                return AuthStatus::NotAuthenticated;
            }
            return AuthStatus::Error;
        }

        AuthStatus::Ok
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
    fn name(&self) -> &str {
        "Claude"
    }

    async fn check_auth(&self) -> AuthStatus {
        let result = run_cli(
            "claude",
            &["-p", "hi", "--output-format", "json", "--max-turns", "1"],
            AUTH_CHECK_TIMEOUT,
        )
        .await;

        match result {
            Ok(out) => self.parse_auth_output(&out),
            Err(e) => {
                warn!(error = %e, "claude auth probe failed to run");
                AuthStatus::Error
            }
        }
    }

    async fn send_wakeup(&self) -> Result<WakeupResult, ProviderError> {
        let out = run_cli(
            "claude",
            &[
                "-p",
                &self.config.wakeup_message,
                "--output-format",
                "json",
                "--max-turns",
                "1",
                "--model",
                &self.config.model,
            ],
            process::DEFAULT_TIMEOUT,
        )
        .await?;

        if out.timed_out {
            return Ok(WakeupResult::failure(
                FailureKind::Transient,
                "Command timed out",
            ));
        }

        Ok(self.parse_wakeup_output(&out))
    }

    async fn start_device_auth(&self) -> Option<DeviceCodeInfo> {
        self.cancel_device_auth().await;

        let mut child = match start_long_running("claude", &["auth", "login", "--device"]) {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "could not start claude device auth");
                return None;
            }
        };

        let stdout = child.stdout.take()?;
        // The CLI prints the code and URL up front, then polls in the
        // background until the operator completes the flow.
        let output = read_initial_output(stdout, DEVICE_OUTPUT_TIMEOUT, |text| {
            DEVICE_CODE_RE.is_match(text) && DEVICE_URL_RE.is_match(text)
        })
        .await;

        *self.device_auth.lock().await = Some(child);

        let Some(output) = output else {
            self.cancel_device_auth().await;
            return None;
        };

        let code = DEVICE_CODE_RE.captures(&output).map(|c| c[1].to_string());
        let url = DEVICE_URL_RE.captures(&output).map(|c| c[1].to_string());

        match (code, url) {
            (Some(code), Some(url)) => Some(DeviceCodeInfo { code, url }),
            _ => {
                warn!(
                    output = %truncate_chars(&output, MESSAGE_MAX_CHARS),
                    "could not parse device code from claude output"
                );
                self.cancel_device_auth().await;
                None
            }
        }
    }

    async fn wait_for_device_auth(&self) -> bool {
        let mut guard = self.device_auth.lock().await;
        let Some(child) = guard.as_mut() else {
            return false;
        };

        match tokio::time::timeout(DEVICE_AUTH_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                *guard = None;
                status.success()
            }
            Ok(Err(_)) => {
                *guard = None;
                false
            }
            Err(_) => {
                let _ = child.kill().await;
                *guard = None;
                false
            }
        }
    }

    async fn cancel_device_auth(&self) {
        let mut guard = self.device_auth.lock().await;
        if let Some(child) = guard.as_mut() {
            let _ = child.kill().await;
        }
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn provider() -> ClaudeProvider {
        ClaudeProvider::new(ProviderConfig {
            name: "claude".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            wakeup_message: "hi".to_string(),
            reset_mode: crate::ResetMode::ClockAlignedHour,
            window_seconds: 18000,
            wake_delay_seconds: 2,
            weekly_window_seconds: 604800,
            weekly_wake_delay_seconds: 60,
        })
    }

    fn cli(code: i32, stdout: &str, stderr: &str) -> CliOutput {
        CliOutput {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            timed_out: false,
        }
    }

    #[test]
    fn successful_json_response_is_success() {
        let out = cli(0, r#"{"is_error": false, "result": "Hello!"}"#, "");
        let result = provider().parse_wakeup_output(&out);
        assert!(result.success);
        assert_eq!(result.message, "Hello!");
        assert_eq!(result.failure_kind, FailureKind::None);
    }

    #[test]
    fn auth_error_is_classified() {
        let out = cli(
            1,
            r#"{"is_error": true, "result": "Please log in to continue"}"#,
            "",
        );
        let result = provider().parse_wakeup_output(&out);
        assert!(!result.success);
        assert_eq!(result.failure_kind, FailureKind::Auth);
        assert!(result.message.starts_with("Auth error:"));
    }

    #[test]
    fn rate_limit_error_carries_hint() {
        let out = cli(
            1,
            r#"{"is_error": true, "result": "Usage limit reached. Try again in 3 hours."}"#,
            "",
        );
        let result = provider().parse_wakeup_output(&out);
        assert_eq!(result.failure_kind, FailureKind::RateLimit);
        assert_eq!(result.rate_limit_hint.as_deref(), Some("3 hours."));
    }

    #[test]
    fn unknown_json_error_is_transient() {
        let out = cli(1, r#"{"is_error": true, "result": "internal error"}"#, "");
        let result = provider().parse_wakeup_output(&out);
        assert_eq!(result.failure_kind, FailureKind::Transient);
    }

    #[test]
    fn non_json_success_is_tolerated() {
        let out = cli(0, "plain text reply", "");
        let result = provider().parse_wakeup_output(&out);
        assert!(result.success);
    }

    #[test]
    fn non_json_failure_is_transient() {
        let out = cli(1, "", "segfault");
        let result = provider().parse_wakeup_output(&out);
        assert!(!result.success);
        assert_eq!(result.failure_kind, FailureKind::Transient);
    }

    #[test]
    fn auth_probe_parses_ok() {
        let out = cli(0, r#"{"is_error": false, "result": "hi"}"#, "");
        assert_eq!(provider().parse_auth_output(&out), AuthStatus::Ok);
    }

    #[test]
    fn auth_probe_detects_missing_login() {
        let out = cli(
            1,
            r#"{"is_error": true, "result": "authentication required"}"#,
            "",
        );
        assert_eq!(
            provider().parse_auth_output(&out),
            AuthStatus::NotAuthenticated
        );
    }

    #[test]
    fn auth_probe_falls_back_to_text_matching() {
        let out = cli(1, "not authenticated", "");
        assert_eq!(
            provider().parse_auth_output(&out),
            AuthStatus::NotAuthenticated
        );
    }
}
