//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc};

use serde::Deserialize;

use super::types::Res;

/// Default tracker GraphQL endpoint.
fn default_tracker_api_url() -> String {
    "https://api.linear.app/graphql".to_string()
}

/// Default number of startup connection attempts against the tracker.
fn default_tracker_connect_attempts() -> u32 {
    5
}

/// Default base delay for the tracker connection backoff.
fn default_tracker_connect_base_delay_ms() -> u64 {
    1000
}

/// Default timeout for a single triager call.
fn default_triager_timeout_secs() -> u64 {
    300
}

/// Default reaction used as the "already handled" watermark.
fn default_marker_reaction() -> String {
    "white_check_mark".to_string()
}

/// Longest accepted correlation TTL (one year).
const MAX_CORRELATION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Longest accepted recovery lookback.
const MAX_RECOVERY_LOOKBACK_DAYS: u32 = 365;

/// Default lifetime of correlation entries (24 hours).
fn default_correlation_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Default recovery lookback window.
fn default_recovery_lookback_days() -> u32 {
    7
}

/// Default page size for history scans.
fn default_recovery_page_size() -> u16 {
    200
}

/// Default cap of the queued-message dedup set.
fn default_dedup_capacity() -> usize {
    1000
}

/// Default number of entries evicted once the dedup cap is exceeded.
fn default_dedup_evict_count() -> usize {
    500
}

/// Configuration for the intake-bot application.
#[derive(Debug, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigInner {
    /// Slack app token (`SLACK_APP_TOKEN`).
    pub slack_app_token: String,
    /// Slack bot token (`SLACK_BOT_TOKEN`).
    pub slack_bot_token: String,
    /// The single monitored channel (`CHANNEL_ID`).
    pub channel_id: String,
    /// Base URL of the triager service (`TRIAGER_ENDPOINT`).
    pub triager_endpoint: String,
    /// Timeout for one triager call, in seconds (`TRIAGER_TIMEOUT_SECS`).
    #[serde(default = "default_triager_timeout_secs")]
    pub triager_timeout_secs: u64,
    /// Tracker API key (`TRACKER_API_KEY`).
    pub tracker_api_key: String,
    /// Tracker GraphQL endpoint (`TRACKER_API_URL`).
    #[serde(default = "default_tracker_api_url")]
    pub tracker_api_url: String,
    /// Startup connection attempts before giving up (`TRACKER_CONNECT_ATTEMPTS`).
    #[serde(default = "default_tracker_connect_attempts")]
    pub tracker_connect_attempts: u32,
    /// Base delay of the exponential connection backoff (`TRACKER_CONNECT_BASE_DELAY_MS`).
    #[serde(default = "default_tracker_connect_base_delay_ms")]
    pub tracker_connect_base_delay_ms: u64,
    /// Reaction name marking the last handled message (`MARKER_REACTION`).
    #[serde(default = "default_marker_reaction")]
    pub marker_reaction: String,
    /// Lifetime of thread and message outcomes, in seconds (`CORRELATION_TTL_SECS`).
    #[serde(default = "default_correlation_ttl_secs")]
    pub correlation_ttl_secs: u64,
    /// How far back the startup scan may look (`RECOVERY_LOOKBACK_DAYS`).
    #[serde(default = "default_recovery_lookback_days")]
    pub recovery_lookback_days: u32,
    /// History page size for the startup scan (`RECOVERY_PAGE_SIZE`).
    #[serde(default = "default_recovery_page_size")]
    pub recovery_page_size: u16,
    /// Maximum number of remembered queued messages (`DEDUP_CAPACITY`).
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Entries evicted once the capacity is exceeded (`DEDUP_EVICT_COUNT`).
    #[serde(default = "default_dedup_evict_count")]
    pub dedup_evict_count: usize,
}

impl Config {
    /// Loads the file (explicit or `.hidden/config.toml`), then `INTAKE_BOT_*` environment overrides.
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder();

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        cfg = cfg.add_source(config::Environment::default().prefix("INTAKE_BOT"));

        Self::validate(Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        })
    }

    /// Load configuration from an in-memory TOML document.
    pub fn from_toml(toml: &str) -> Res<Self> {
        let cfg = config::Config::builder().add_source(config::File::from_str(toml, config::FileFormat::Toml));

        Self::validate(Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        })
    }

    fn validate(result: Self) -> Res<Self> {
        if result.channel_id.trim().is_empty() {
            return Err(anyhow::anyhow!("A channel ID must be configured."));
        }

        if result.tracker_connect_attempts < 1 {
            return Err(anyhow::anyhow!("Tracker connect attempts must be at least 1."));
        }

        if result.correlation_ttl_secs < 1 || result.correlation_ttl_secs > MAX_CORRELATION_TTL_SECS {
            return Err(anyhow::anyhow!("Correlation TTL must be between one second and {MAX_CORRELATION_TTL_SECS} seconds."));
        }

        if result.recovery_lookback_days < 1 || result.recovery_lookback_days > MAX_RECOVERY_LOOKBACK_DAYS {
            return Err(anyhow::anyhow!("Recovery lookback must be between 1 and {MAX_RECOVERY_LOOKBACK_DAYS} days."));
        }

        if result.recovery_page_size < 1 || result.recovery_page_size > 1000 {
            return Err(anyhow::anyhow!("Recovery page size must be between 1 and 1000."));
        }

        if result.dedup_evict_count < 1 || result.dedup_evict_count > result.dedup_capacity {
            return Err(anyhow::anyhow!("Dedup evict count must be between 1 and the dedup capacity."));
        }

        Ok(result)
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        slack_app_token = "xapp-test"
        slack_bot_token = "xoxb-test"
        channel_id = "C0INTAKE"
        triager_endpoint = "http://localhost:8080"
        tracker_api_key = "lin_api_test"
    "#;

    #[test]
    fn defaults_are_applied() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.channel_id, "C0INTAKE");
        assert_eq!(config.marker_reaction, "white_check_mark");
        assert_eq!(config.correlation_ttl_secs, 86400);
        assert_eq!(config.recovery_lookback_days, 7);
        assert_eq!(config.dedup_capacity, 1000);
        assert_eq!(config.dedup_evict_count, 500);
        assert_eq!(config.tracker_connect_attempts, 5);
        assert_eq!(config.tracker_api_url, "https://api.linear.app/graphql");
    }

    #[test]
    fn environment_overrides_file() {
        let path = std::env::temp_dir().join(format!("intake-bot-config-{}.toml", std::process::id()));
        std::fs::write(&path, MINIMAL).unwrap();

        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("INTAKE_BOT_CHANNEL_ID", "C0FROMENV") };
        let config = Config::load(Some(&path));
        unsafe { std::env::remove_var("INTAKE_BOT_CHANNEL_ID") };
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.channel_id, "C0FROMENV");
        assert_eq!(config.slack_bot_token, "xoxb-test");
    }

    #[test]
    fn rejects_blank_channel() {
        let toml = MINIMAL.replace("C0INTAKE", " ");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn rejects_evict_count_above_capacity() {
        let toml = format!("{MINIMAL}\ndedup_capacity = 10\ndedup_evict_count = 11\n");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn rejects_oversized_ttl() {
        let toml = format!("{MINIMAL}\ncorrelation_ttl_secs = 18000000000000000\n");
        assert!(Config::from_toml(&toml).is_err());

        let toml = format!("{MINIMAL}\ncorrelation_ttl_secs = {}\n", MAX_CORRELATION_TTL_SECS);
        assert!(Config::from_toml(&toml).is_ok());
    }

    #[test]
    fn rejects_oversized_lookback() {
        let toml = format!("{MINIMAL}\nrecovery_lookback_days = 200000000\n");
        assert!(Config::from_toml(&toml).is_err());

        let toml = format!("{MINIMAL}\nrecovery_lookback_days = 365\n");
        assert!(Config::from_toml(&toml).is_ok());
    }

    #[test]
    fn rejects_zero_connect_attempts() {
        let toml = format!("{MINIMAL}\ntracker_connect_attempts = 0\n");
        assert!(Config::from_toml(&toml).is_err());
    }
}
