//! Per-provider configuration loaded from environment variables.
//!
//! Global settings (bot token, state path, retry bounds) arrive via clap;
//! provider settings use prefixed variables (`CLAUDE_WINDOW_SECONDS`, ...) so
//! providers can be tuned independently without new flags.

use std::collections::HashMap;

use reveille_provider::{ProviderConfig, ResetMode};
use thiserror::Error;

/// Configuration errors, fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} must be an integer, got {1:?}")]
    NotAnInteger(String, String),

    #[error("environment variable {0} must be >= {1}")]
    BelowMinimum(String, u64),

    #[error("unsupported {0}: {1:?} (expected \"rolling\" or \"clock_aligned_hour\")")]
    UnsupportedResetMode(String, String),
}

struct ProviderDefaults {
    model: &'static str,
    wakeup_message: &'static str,
    reset_mode: ResetMode,
}

fn defaults_for(name: &str) -> ProviderDefaults {
    match name {
        "claude" => ProviderDefaults {
            model: "claude-sonnet-4-5",
            wakeup_message: "hi",
            reset_mode: ResetMode::ClockAlignedHour,
        },
        "codex" => ProviderDefaults {
            model: "o4-mini",
            wakeup_message: "say hi",
            reset_mode: ResetMode::Rolling,
        },
        _ => ProviderDefaults {
            model: "",
            wakeup_message: "hi",
            reset_mode: ResetMode::Rolling,
        },
    }
}

const DEFAULT_WINDOW_SECONDS: u64 = 18000;
const DEFAULT_WAKE_DELAY_SECONDS: u64 = 2;
const DEFAULT_WEEKLY_WINDOW_SECONDS: u64 = 604_800;
const DEFAULT_WEEKLY_WAKE_DELAY_SECONDS: u64 = 60;

/// Load provider configurations from process environment variables.
pub fn load_provider_configs() -> Result<HashMap<String, ProviderConfig>, ConfigError> {
    load_provider_configs_from(&|key| std::env::var(key).ok())
}

/// Testable core of [`load_provider_configs`]: reads from any lookup.
pub fn load_provider_configs_from(
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<HashMap<String, ProviderConfig>, ConfigError> {
    let enabled = env("ENABLED_PROVIDERS").unwrap_or_else(|| "claude,codex".to_string());

    let mut configs = HashMap::new();
    for name in enabled.split(',') {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            continue;
        }

        let defaults = defaults_for(&name);
        let prefix = name.to_uppercase();

        let reset_mode_key = format!("{prefix}_RESET_MODE");
        let reset_mode = match env(&reset_mode_key) {
            Some(raw) => raw
                .parse::<ResetMode>()
                .map_err(|_| ConfigError::UnsupportedResetMode(reset_mode_key, raw))?,
            None => defaults.reset_mode,
        };

        let config = ProviderConfig {
            model: env(&format!("{prefix}_MODEL")).unwrap_or_else(|| defaults.model.to_string()),
            wakeup_message: env(&format!("{prefix}_WAKEUP_MESSAGE"))
                .unwrap_or_else(|| defaults.wakeup_message.to_string()),
            reset_mode,
            window_seconds: env_u64(env, &format!("{prefix}_WINDOW_SECONDS"), DEFAULT_WINDOW_SECONDS, 1)?,
            wake_delay_seconds: env_u64(
                env,
                &format!("{prefix}_WAKE_DELAY_SECONDS"),
                DEFAULT_WAKE_DELAY_SECONDS,
                0,
            )?,
            weekly_window_seconds: env_u64(
                env,
                &format!("{prefix}_WEEKLY_WINDOW_SECONDS"),
                DEFAULT_WEEKLY_WINDOW_SECONDS,
                1,
            )?,
            weekly_wake_delay_seconds: env_u64(
                env,
                &format!("{prefix}_WEEKLY_WAKE_DELAY_SECONDS"),
                DEFAULT_WEEKLY_WAKE_DELAY_SECONDS,
                0,
            )?,
            name: name.clone(),
        };

        configs.insert(name, config);
    }

    Ok(configs)
}

fn env_u64(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
    minimum: u64,
) -> Result<u64, ConfigError> {
    let value = match env(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::NotAnInteger(key.to_string(), raw.clone()))?,
        None => default,
    };
    if value < minimum {
        return Err(ConfigError::BelowMinimum(key.to_string(), minimum));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_cover_claude_and_codex() {
        let configs = load_provider_configs_from(&lookup(&[])).unwrap();
        assert_eq!(configs.len(), 2);

        let claude = &configs["claude"];
        assert_eq!(claude.reset_mode, ResetMode::ClockAlignedHour);
        assert_eq!(claude.window_seconds, 18000);
        assert_eq!(claude.weekly_window_seconds, 604_800);

        let codex = &configs["codex"];
        assert_eq!(codex.reset_mode, ResetMode::Rolling);
        assert_eq!(codex.wakeup_message, "say hi");
    }

    #[test]
    fn enabled_providers_limits_the_set() {
        let configs =
            load_provider_configs_from(&lookup(&[("ENABLED_PROVIDERS", "claude")])).unwrap();
        assert_eq!(configs.len(), 1);
        assert!(configs.contains_key("claude"));
    }

    #[test]
    fn provider_overrides_are_applied() {
        let configs = load_provider_configs_from(&lookup(&[
            ("ENABLED_PROVIDERS", "codex"),
            ("CODEX_MODEL", "o4"),
            ("CODEX_WINDOW_SECONDS", "3600"),
            ("CODEX_RESET_MODE", "clock_aligned_hour"),
            ("CODEX_WEEKLY_WAKE_DELAY_SECONDS", "0"),
        ]))
        .unwrap();

        let codex = &configs["codex"];
        assert_eq!(codex.model, "o4");
        assert_eq!(codex.window_seconds, 3600);
        assert_eq!(codex.reset_mode, ResetMode::ClockAlignedHour);
        assert_eq!(codex.weekly_wake_delay_seconds, 0);
    }

    #[test]
    fn invalid_integer_is_rejected() {
        let err = load_provider_configs_from(&lookup(&[
            ("ENABLED_PROVIDERS", "claude"),
            ("CLAUDE_WINDOW_SECONDS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::NotAnInteger(..)));
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = load_provider_configs_from(&lookup(&[
            ("ENABLED_PROVIDERS", "claude"),
            ("CLAUDE_WINDOW_SECONDS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum(..)));
    }

    #[test]
    fn unknown_reset_mode_is_rejected() {
        let err = load_provider_configs_from(&lookup(&[
            ("ENABLED_PROVIDERS", "claude"),
            ("CLAUDE_RESET_MODE", "clock_aligned_day"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedResetMode(..)));
    }

    #[test]
    fn whitespace_and_empty_entries_are_ignored() {
        let configs = load_provider_configs_from(&lookup(&[(
            "ENABLED_PROVIDERS",
            " claude , ,codex ",
        )]))
        .unwrap();
        assert_eq!(configs.len(), 2);
    }
}
