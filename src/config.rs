//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::upstream::RetryPolicy;

/// How far back a run looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    /// A fixed instant.
    Fixed(DateTime<Utc>),
    /// A window ending at the start of each run.
    Trailing(Duration),
}

impl Horizon {
    /// The cutoff instant for a run starting at `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Horizon::Fixed(at) => *at,
            Horizon::Trailing(window) => chrono::Duration::from_std(*window)
                .ok()
                .and_then(|w| now.checked_sub_signed(w))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

impl FromStr for Horizon {
    type Err = String;

    /// Accepts an RFC 3339 instant or a whole number of days.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(days) = s.parse::<u64>() {
            let secs = days
                .checked_mul(86_400)
                .ok_or_else(|| format!("{days} days is too far back"))?;
            return Ok(Horizon::Trailing(Duration::from_secs(secs)));
        }
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Horizon::Fixed(dt.with_timezone(&Utc)))
            .map_err(|e| format!("expected RFC 3339 timestamp or number of days: {e}"))
    }
}

/// Knobs for a single sync run.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub page_size: u32,
    /// Pause between consecutive page requests.
    pub page_delay: Duration,
    pub horizon: Horizon,
    /// Server-side filter for snapshot logs.
    pub log_query: String,
    /// Sessions processed concurrently by the raw log sync.
    pub batch_size: usize,
    pub batch_pause: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            page_delay: Duration::from_millis(500),
            horizon: Horizon::Trailing(Duration::from_secs(7 * 86_400)), // 7 days
            log_query: "context".to_string(),
            batch_size: 5,
            batch_pause: Duration::from_secs(1),
        }
    }
}

/// Full service configuration, loaded from the environment.
#[derive(Debug)]
pub struct SyncConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub request_timeout: Duration,
    pub sync: SyncSettings,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    /// Cron expression overriding `poll_interval` when set.
    pub cron: Option<String>,
    pub db_path: PathBuf,
    /// Directory for daily rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));

        let defaults = SyncSettings::default();
        let default_retry = RetryPolicy::default();

        let sync = SyncSettings {
            page_size: parse_or(&get, "SYNC_PAGE_SIZE", defaults.page_size)?,
            page_delay: millis_or(&get, "SYNC_PAGE_DELAY_MS", defaults.page_delay)?,
            horizon: parse_or(&get, "SYNC_HORIZON", defaults.horizon)?,
            log_query: get("SYNC_LOG_QUERY").unwrap_or(defaults.log_query),
            batch_size: parse_or(&get, "SYNC_BATCH_SIZE", defaults.batch_size)?,
            batch_pause: millis_or(&get, "SYNC_BATCH_PAUSE_MS", defaults.batch_pause)?,
        };
        if sync.page_size == 0 {
            return Err(invalid("SYNC_PAGE_SIZE", "must be at least 1"));
        }
        if sync.batch_size == 0 {
            return Err(invalid("SYNC_BATCH_SIZE", "must be at least 1"));
        }

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "SYNC_MAX_ATTEMPTS", default_retry.max_attempts)?,
            base_delay: millis_or(&get, "SYNC_RETRY_BASE_MS", default_retry.base_delay)?,
            ..default_retry
        };
        if retry.max_attempts == 0 {
            return Err(invalid("SYNC_MAX_ATTEMPTS", "must be at least 1"));
        }

        let poll_interval = Duration::from_secs(parse_or(&get, "SYNC_POLL_INTERVAL_SECS", 300)?);
        if poll_interval.is_zero() {
            return Err(invalid("SYNC_POLL_INTERVAL_SECS", "must be at least 1"));
        }

        Ok(Self {
            api_key: SecretString::from(required("UPSTREAM_API_KEY")?),
            base_url: required("UPSTREAM_BASE_URL")?,
            request_timeout: Duration::from_secs(parse_or(&get, "SYNC_REQUEST_TIMEOUT_SECS", 30)?),
            sync,
            retry,
            poll_interval,
            cron: get("SYNC_CRON"),
            db_path: get("SYNC_DB_PATH")
                .unwrap_or_else(|| "./data/transcript-sync.db".to_string())
                .into(),
            log_dir: get("SYNC_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        message: message.into(),
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(key, e.to_string())),
        None => Ok(default),
    }
}

fn millis_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(_) => parse_or(get, key, 0u64).map(Duration::from_millis),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| map.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("UPSTREAM_API_KEY", "key-123"),
        ("UPSTREAM_BASE_URL", "https://platform.example/api"),
    ];

    #[test]
    fn defaults_apply() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.api_key.expose_secret(), "key-123");
        assert_eq!(config.sync.page_size, 100);
        assert_eq!(config.sync.page_delay, Duration::from_millis(500));
        assert_eq!(config.sync.log_query, "context");
        assert_eq!(config.sync.batch_size, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.db_path, PathBuf::from("./data/transcript-sync.db"));
        assert!(config.cron.is_none());
        assert!(config.log_dir.is_none());
        assert_eq!(
            config.sync.horizon,
            Horizon::Trailing(Duration::from_secs(7 * 86_400))
        );
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = load(&[("UPSTREAM_BASE_URL", "https://x")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "UPSTREAM_API_KEY"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let err = load(&[("UPSTREAM_API_KEY", "  "), ("UPSTREAM_BASE_URL", "https://x")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("SYNC_PAGE_SIZE", "25"),
            ("SYNC_PAGE_DELAY_MS", "0"),
            ("SYNC_HORIZON", "2024-05-01T00:00:00Z"),
            ("SYNC_CRON", "0 */5 * * * *"),
            ("SYNC_MAX_ATTEMPTS", "5"),
            ("SYNC_LOG_DIR", "/var/log/sync"),
        ]);
        let config = load(&vars).unwrap();
        assert_eq!(config.sync.page_size, 25);
        assert_eq!(config.sync.page_delay, Duration::ZERO);
        assert_eq!(
            config.sync.horizon,
            Horizon::Fixed(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(config.cron.as_deref(), Some("0 */5 * * * *"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/sync")));
    }

    #[test]
    fn invalid_number_names_the_key() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("SYNC_PAGE_SIZE", "lots"));
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "SYNC_PAGE_SIZE"));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("SYNC_PAGE_SIZE", "0"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn horizon_accepts_days() {
        assert_eq!(
            "3".parse::<Horizon>().unwrap(),
            Horizon::Trailing(Duration::from_secs(3 * 86_400))
        );
        assert!("yesterday".parse::<Horizon>().is_err());
    }

    #[test]
    fn huge_day_count_is_rejected() {
        assert!(u64::MAX.to_string().parse::<Horizon>().is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("SYNC_HORIZON", "213503982334602"));
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "SYNC_HORIZON"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("SYNC_POLL_INTERVAL_SECS", "0"));
        let err = load(&vars).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { key, .. } if key == "SYNC_POLL_INTERVAL_SECS")
        );
    }

    #[test]
    fn trailing_horizon_resolves_against_now() {
        let now = Utc.with_ymd_and_hms(2024, 5, 8, 0, 0, 0).unwrap();
        let horizon = Horizon::Trailing(Duration::from_secs(7 * 86_400));
        assert_eq!(
            horizon.resolve(now),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
    }
}
