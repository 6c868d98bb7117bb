//! OpenAI Codex CLI provider.

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

const AUTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const DEVICE_OUTPUT_TIMEOUT: Duration = Duration::from_secs(15);
const DEVICE_AUTH_TIMEOUT: Duration = Duration::from_secs(300);
const MESSAGE_MAX_CHARS: usize = 300;

static DEVICE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z0-9]{4,}(?:-[A-Z0-9]{2,})+)\b").unwrap());
static DEVICE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(https?://\S*(?:device|auth)\S*)").unwrap());
static ANSI_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());

const AUTH_ERROR_KEYWORDS: &[&str] = &[
    "could not be refreshed",
    "refresh_token_reused",
    "not logged in",
    "not authenticated",
    "authentication required",
    "please log in",
    "login required",
    "unauthorized",
    "401 unauthorized",
    "missing bearer",
    "sign in again",
];

const RATE_LIMIT_KEYWORDS: &[&str] = &["usage limit", "rate limit"];

/// Provider wrapping the OpenAI Codex CLI.
pub struct CodexProvider {
    config: ProviderConfig,
    device_auth: Mutex<Option<Child>>,
}

impl CodexProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            device_auth: Mutex::new(None),
        }
    }

    /// Interpret `codex exec --json` output. Codex emits JSON lines; the
    /// error text can land on stderr, so classification scans the combined
    /// output when the exit code is nonzero.
    fn parse_wakeup_output(&self, out: &CliOutput) -> WakeupResult {
        if out.ok() {
            return WakeupResult::success(truncate_chars(&out.stdout, MESSAGE_MAX_CHARS));
        }

        let combined = out.combined();
        let (kind, hint) = classify_failure(&combined, AUTH_ERROR_KEYWORDS);

        // Rate-limit wording without a parsable reset phrase still counts as
        // a rate limit; the scheduler falls back to the configured window.
        let lowered = combined.to_lowercase();
        let kind = if kind == FailureKind::Transient
            && RATE_LIMIT_KEYWORDS.iter().any(|kw| lowered.contains(kw))
        {
            FailureKind::RateLimit
        } else {
            kind
        };

        WakeupResult {
            success: false,
            message: truncate_chars(&combined, MESSAGE_MAX_CHARS),
            failure_kind: kind,
            rate_limit_hint: hint,
        }
    }
}

#[async_trait]
impl Provider for CodexProvider {
    fn name(&self) -> &str {
        "Codex"
    }

    async fn check_auth(&self) -> AuthStatus {
        let result = run_cli("codex", &["login", "status"], AUTH_CHECK_TIMEOUT).await;

        let out = match result {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "codex auth probe failed to run");
                return AuthStatus::Error;
            }
        };

        if out.timed_out {
            return AuthStatus::Error;
        }

        let combined = out.combined().to_lowercase();
        if !out.ok() {
            if contains_auth_error(&combined, AUTH_ERROR_KEYWORDS) {
                return AuthStatus::NotAuthenticated;
            }
            return AuthStatus::Error;
        }

        if combined.contains("logged in") {
            AuthStatus::Ok
        } else {
            AuthStatus::NotAuthenticated
        }
    }

    async fn send_wakeup(&self) -> Result<WakeupResult, ProviderError> {
        let out = run_cli(
            "codex",
            &[
                "exec",
                &self.config.wakeup_message,
                "--full-auto",
                "--json",
                "--skip-git-repo-check",
                "-m",
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

        let mut child = match start_long_running("codex", &["login", "--device-auth"]) {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "could not start codex device auth");
                return None;
            }
        };

        let stdout = child.stdout.take()?;
        let output = read_initial_output(stdout, DEVICE_OUTPUT_TIMEOUT, |text| {
            let cleaned = strip_ansi(text);
            DEVICE_CODE_RE.is_match(&cleaned) && DEVICE_URL_RE.is_match(&cleaned)
        })
        .await;

        *self.device_auth.lock().await = Some(child);

        let Some(output) = output else {
            self.cancel_device_auth().await;
            return None;
        };

        let cleaned = strip_ansi(&output);
        let code = DEVICE_CODE_RE.captures(&cleaned).map(|c| c[1].to_string());
        let url = DEVICE_URL_RE.captures(&cleaned).map(|c| c[1].to_string());

        match (code, url) {
            (Some(code), Some(url)) => Some(DeviceCodeInfo { code, url }),
            _ => {
                warn!(
                    output = %truncate_chars(&cleaned, MESSAGE_MAX_CHARS),
                    "could not parse device code from codex output"
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

/// Strip ANSI escape sequences from CLI output before pattern matching.
fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE_RE.replace_all(text, "").to_string()
}
