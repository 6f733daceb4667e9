//! Gateway configuration, loaded from the environment.
//!
//! The deployment contract is environment variables (the gateway runs as a
//! sidecar next to the tenant backend), so there is no config file layer.
//! Missing required variables are a startup error; everything else has a
//! default.

use std::time::Duration;

use tracing::warn;

/// Runtime configuration for the gateway process.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub env: String,
    /// sqlx connection string for the device store.
    pub database_url: String,
    /// Base URL of the tenant webhook sink; event type is appended per delivery.
    pub webhook_base: String,
    /// Shared secret for the `X-WA-Signature` HMAC.
    pub signing_secret: String,
    pub session_idle_ttl: Duration,
    pub send_rate_per_minute: u32,
    pub send_jitter_min_ms: u64,
    pub send_jitter_max_ms: u64,
    pub max_concurrent_sessions: usize,
    pub webhook_timeout: Duration,
    pub webhook_retry_max: u32,
    pub webhook_retry_backoff_base: Duration,
}

impl Config {
    /// Load configuration from process environment variables.
    ///
    /// Fails when a required variable (`DATABASE_URL`, `LARAVEL_WEBHOOK_BASE`,
    /// `GO_WA_SIGNING_SECRET`) is missing or empty.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let config = Self {
            port: int_value(get("PORT"), 4001, "PORT"),
            env: get("APP_ENV").unwrap_or_else(|| "production".into()),
            database_url: get("DATABASE_URL").unwrap_or_default(),
            webhook_base: get("LARAVEL_WEBHOOK_BASE").unwrap_or_default(),
            signing_secret: get("GO_WA_SIGNING_SECRET").unwrap_or_default(),
            session_idle_ttl: duration_value(
                get("SESSION_IDLE_TTL"),
                Duration::from_secs(6 * 3600),
                "SESSION_IDLE_TTL",
            ),
            send_rate_per_minute: int_value(
                get("SEND_RATE_PER_MINUTE_DEFAULT"),
                15,
                "SEND_RATE_PER_MINUTE_DEFAULT",
            ),
            send_jitter_min_ms: int_value(get("SEND_JITTER_MIN_MS"), 200, "SEND_JITTER_MIN_MS"),
            send_jitter_max_ms: int_value(get("SEND_JITTER_MAX_MS"), 600, "SEND_JITTER_MAX_MS"),
            max_concurrent_sessions: int_value(
                get("MAX_CONCURRENT_SESSIONS"),
                10_000,
                "MAX_CONCURRENT_SESSIONS",
            ),
            webhook_timeout: duration_value(
                get("WEBHOOK_TIMEOUT"),
                Duration::from_secs(10),
                "WEBHOOK_TIMEOUT",
            ),
            webhook_retry_max: int_value(get("WEBHOOK_RETRY_MAX"), 3, "WEBHOOK_RETRY_MAX"),
            webhook_retry_backoff_base: duration_value(
                get("WEBHOOK_RETRY_BACKOFF_BASE"),
                Duration::from_secs(2),
                "WEBHOOK_RETRY_BACKOFF_BASE",
            ),
        };

        if config.database_url.is_empty() {
            anyhow::bail!("DATABASE_URL is required");
        }
        if config.webhook_base.is_empty() {
            anyhow::bail!("LARAVEL_WEBHOOK_BASE is required");
        }
        if config.signing_secret.is_empty() {
            anyhow::bail!("GO_WA_SIGNING_SECRET is required");
        }

        Ok(config)
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}

fn int_value<T: std::str::FromStr + Copy>(raw: Option<String>, default: T, key: &str) -> T {
    match raw {
        None => default,
        Some(s) => s.parse().unwrap_or_else(|_| {
            warn!(key, value = %s, "invalid integer value, using default");
            default
        }),
    }
}

/// Parse a duration value: humantime syntax (`6h`, `90s`, `500ms`) or a bare
/// number of seconds.
fn duration_value(raw: Option<String>, default: Duration, key: &str) -> Duration {
    let Some(s) = raw else {
        return default;
    };
    if let Ok(d) = humantime::parse_duration(&s) {
        return d;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Duration::from_secs(secs);
    }
    warn!(key, value = %s, "invalid duration value, using default");
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env(key: &str) -> Option<String> {
        match key {
            "DATABASE_URL" => Some("sqlite::memory:".into()),
            "LARAVEL_WEBHOOK_BASE" => Some("http://sink.test/webhooks/wa".into()),
            "GO_WA_SIGNING_SECRET" => Some("s3cret".into()),
            _ => None,
        }
    }

    #[test]
    fn defaults_applied() {
        let config = Config::from_lookup(base_env).unwrap();
        assert_eq!(config.port, 4001);
        assert_eq!(config.env, "production");
        assert!(config.is_production());
        assert_eq!(config.session_idle_ttl, Duration::from_secs(6 * 3600));
        assert_eq!(config.send_rate_per_minute, 15);
        assert_eq!(config.send_jitter_min_ms, 200);
        assert_eq!(config.send_jitter_max_ms, 600);
        assert_eq!(config.max_concurrent_sessions, 10_000);
        assert_eq!(config.webhook_timeout, Duration::from_secs(10));
        assert_eq!(config.webhook_retry_max, 3);
        assert_eq!(config.webhook_retry_backoff_base, Duration::from_secs(2));
    }

    #[test]
    fn missing_database_url_is_fatal() {
        let err = Config::from_lookup(|key| match key {
            "DATABASE_URL" => None,
            other => base_env(other),
        })
        .unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn missing_webhook_base_is_fatal() {
        let err = Config::from_lookup(|key| match key {
            "LARAVEL_WEBHOOK_BASE" => None,
            other => base_env(other),
        })
        .unwrap_err();
        assert!(err.to_string().contains("LARAVEL_WEBHOOK_BASE"));
    }

    #[test]
    fn missing_signing_secret_is_fatal() {
        let err = Config::from_lookup(|key| match key {
            "GO_WA_SIGNING_SECRET" => None,
            other => base_env(other),
        })
        .unwrap_err();
        assert!(err.to_string().contains("GO_WA_SIGNING_SECRET"));
    }

    #[test]
    fn overrides_parsed() {
        let config = Config::from_lookup(|key| match key {
            "PORT" => Some("8080".into()),
            "APP_ENV" => Some("development".into()),
            "SESSION_IDLE_TTL" => Some("90m".into()),
            "SEND_RATE_PER_MINUTE_DEFAULT" => Some("2".into()),
            other => base_env(other),
        })
        .unwrap();
        assert_eq!(config.port, 8080);
        assert!(!config.is_production());
        assert_eq!(config.session_idle_ttl, Duration::from_secs(90 * 60));
        assert_eq!(config.send_rate_per_minute, 2);
    }

    #[test]
    fn bare_seconds_accepted_as_duration() {
        let config = Config::from_lookup(|key| match key {
            "WEBHOOK_TIMEOUT" => Some("30".into()),
            other => base_env(other),
        })
        .unwrap();
        assert_eq!(config.webhook_timeout, Duration::from_secs(30));
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        let config = Config::from_lookup(|key| match key {
            "PORT" => Some("not-a-port".into()),
            "SESSION_IDLE_TTL" => Some("soon".into()),
            other => base_env(other),
        })
        .unwrap();
        assert_eq!(config.port, 4001);
        assert_eq!(config.session_idle_ttl, Duration::from_secs(6 * 3600));
    }
}
