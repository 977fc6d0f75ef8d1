//! Application-level configuration loading: session tuning knobs read from a
//! JSON file with built-in defaults.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_ARENA_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Entries kept in a quiz leaderboard.
    pub leaderboard_size: usize,
    /// Random join codes tried before giving up.
    pub join_code_attempts: u32,
    /// Delay between a session finishing and its live document being purged.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "purgeGraceSecs")]
    pub purge_grace: Duration,
    /// Period of the all-answered check while a question is live.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "answerPollIntervalMs")]
    pub answer_poll_interval: Duration,
    /// Whether the server shows results by itself once everyone answered or time ran out.
    pub auto_review: bool,
    /// Network latency granted to players on top of the server-measured answer time.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "latencyAllowanceMs")]
    pub latency_allowance: Duration,
    /// Upper bound for a host command, store round-trips included.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "transitionTimeoutMs")]
    pub transition_timeout: Duration,
    /// Longest accepted chat message, in characters.
    pub chat_message_max_len: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            leaderboard_size: 50,
            join_code_attempts: 32,
            purge_grace: Duration::from_secs(300),
            answer_poll_interval: Duration::from_millis(2_000),
            auto_review: true,
            latency_allowance: Duration::from_millis(1_500),
            transition_timeout: Duration::from_millis(5_000),
            chat_message_max_len: 500,
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to the built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded session configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"leaderboardSize": 10, "purgeGraceSecs": 5, "autoReview": false}"#)
                .unwrap();

        assert_eq!(config.leaderboard_size, 10);
        assert_eq!(config.purge_grace, Duration::from_secs(5));
        assert!(!config.auto_review);
        assert_eq!(config.answer_poll_interval, Duration::from_secs(2));
        assert_eq!(config.chat_message_max_len, 500);
    }
}
