use parley_core::BackoffPolicy;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Timing and retry knobs for one session connection.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    /// How long the transport may take to open.
    pub connect_timeout: Duration,
    /// How long a voice session may wait for `session_ready`.
    pub handshake_timeout: Duration,
    /// Pause between transport-open and sending `start_session`.
    pub settle_delay: Duration,
    pub backoff: BackoffPolicy,
    pub health_interval: Duration,
    pub health_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(150),
            backoff: BackoffPolicy::default(),
            health_interval: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_host: String,
    pub secure: bool,
    pub auth_token: Option<String>,
    pub log_level: Level,
    pub session: SessionSettings,
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let server_host =
            std::env::var("SERVER_HOST").unwrap_or_else(|_| "localhost:8000".to_string());
        if server_host.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST".to_string(),
                "host must not be empty".to_string(),
            ));
        }

        let secure = parse_var("SERVER_SECURE", false)?;
        let auth_token = std::env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let defaults = SessionSettings::default();
        let backoff = BackoffPolicy::new()
            .base_delay(parse_millis("RECONNECT_BASE_DELAY_MS", defaults.backoff.base_delay)?)
            .max_delay(parse_millis("RECONNECT_MAX_DELAY_MS", defaults.backoff.max_delay)?)
            .max_attempts(parse_var("MAX_RECONNECT_ATTEMPTS", defaults.backoff.max_attempts)?);
        let session = SessionSettings {
            connect_timeout: parse_millis("CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
            handshake_timeout: parse_millis("HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout)?,
            settle_delay: parse_millis("SETTLE_DELAY_MS", defaults.settle_delay)?,
            backoff,
            health_interval: parse_millis("HEALTH_CHECK_INTERVAL_MS", defaults.health_interval)?,
            health_timeout: parse_millis("HEALTH_CHECK_TIMEOUT_MS", defaults.health_timeout)?,
        };

        if session.health_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "HEALTH_CHECK_INTERVAL_MS".to_string(),
                "interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            server_host,
            secure,
            auth_token,
            log_level,
            session,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_millis(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = parse_var(name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}
