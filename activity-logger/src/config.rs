//! Configuration for the activity logger.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

const DEFAULT_ACTIONS_PATH: &str = "/api/activity/actions";
const DEFAULT_ERRORS_PATH: &str = "/api/activity/errors";
const DEFAULT_SESSION_PATH: &str = "/api/activity/session";

/// Logger configuration. Defaults follow the ingestion backend's contract.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Endpoint receiving `{ actions: [...] }`
    pub actions_url: String,
    /// Endpoint receiving `{ errors: [...] }`
    pub errors_url: String,
    /// Session create/update/end endpoint
    pub session_url: String,
    /// Maximum items per batch; also the immediate-flush threshold for actions
    pub batch_size: usize,
    /// Period of the background flush timer
    pub flush_interval: Duration,
    /// Dispatch attempts per batch, including the first
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub retry_base_delay: Duration,
    /// Upper bound on a single HTTP request
    pub request_timeout: Duration,
}

impl LoggerConfig {
    /// Build a configuration with default endpoint paths under `base_url`.
    pub fn new(base_url: impl AsRef<str>) -> Self {
        let base = base_url.as_ref().trim_end_matches('/');
        Self {
            actions_url: format!("{}{}", base, DEFAULT_ACTIONS_PATH),
            errors_url: format!("{}{}", base, DEFAULT_ERRORS_PATH),
            session_url: format!("{}{}", base, DEFAULT_SESSION_PATH),
            batch_size: 50,
            flush_interval: Duration::from_secs(5),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("ACTIVITY_API_BASE_URL")
            .map_err(|_| Error::Config("ACTIVITY_API_BASE_URL not set".to_string()))?;

        let mut config = Self::new(base_url);
        if let Some(size) = parse_var::<usize>("ACTIVITY_BATCH_SIZE")? {
            config.batch_size = size;
        }
        if let Some(ms) = parse_var::<u64>("ACTIVITY_FLUSH_INTERVAL_MS")? {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u32>("ACTIVITY_MAX_ATTEMPTS")? {
            config.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64>("ACTIVITY_RETRY_BASE_MS")? {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("ACTIVITY_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the flush algorithm cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max attempts must be at least 1".to_string()));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::Config("flush interval must be non-zero".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Queue length at which errors are flushed without waiting for the timer.
    pub fn error_flush_threshold(&self) -> usize {
        (self.batch_size / 2).max(1)
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} is not a valid value: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let config = LoggerConfig::new("https://health.example.com/");
        assert_eq!(config.actions_url, "https://health.example.com/api/activity/actions");
        assert_eq!(config.errors_url, "https://health.example.com/api/activity/errors");
        assert_eq!(config.session_url, "https://health.example.com/api/activity/session");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.error_flush_threshold(), 25);
        assert_eq!(config.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_batch() {
        let mut config = LoggerConfig::new("http://localhost:3000");
        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_request_timeout() {
        let mut config = LoggerConfig::new("http://localhost:3000");
        config.request_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    // Environment variables are process-wide, so every from_env case runs
    // in this one test.
    #[test]
    fn test_from_env() {
        const VARS: [&str; 6] = [
            "ACTIVITY_API_BASE_URL",
            "ACTIVITY_BATCH_SIZE",
            "ACTIVITY_FLUSH_INTERVAL_MS",
            "ACTIVITY_MAX_ATTEMPTS",
            "ACTIVITY_RETRY_BASE_MS",
            "ACTIVITY_REQUEST_TIMEOUT_MS",
        ];
        for var in VARS {
            env::remove_var(var);
        }

        assert!(matches!(LoggerConfig::from_env(), Err(Error::Config(_))));

        env::set_var("ACTIVITY_API_BASE_URL", "https://health.example.com");
        let config = LoggerConfig::from_env().unwrap();
        assert_eq!(config.actions_url, "https://health.example.com/api/activity/actions");
        assert_eq!(config.batch_size, 50);

        env::set_var("ACTIVITY_BATCH_SIZE", "20");
        env::set_var("ACTIVITY_FLUSH_INTERVAL_MS", " 2500 ");
        env::set_var("ACTIVITY_REQUEST_TIMEOUT_MS", "3000");
        let config = LoggerConfig::from_env().unwrap();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.error_flush_threshold(), 10);
        assert_eq!(config.flush_interval, Duration::from_millis(2500));
        assert_eq!(config.request_timeout, Duration::from_secs(3));

        env::set_var("ACTIVITY_MAX_ATTEMPTS", "three");
        assert!(matches!(LoggerConfig::from_env(), Err(Error::Config(_))));
        env::remove_var("ACTIVITY_MAX_ATTEMPTS");

        env::set_var("ACTIVITY_REQUEST_TIMEOUT_MS", "0");
        assert!(matches!(LoggerConfig::from_env(), Err(Error::Config(_))));

        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_error_threshold_never_zero() {
        let mut config = LoggerConfig::new("http://localhost:3000");
        config.batch_size = 1;
        assert_eq!(config.error_flush_threshold(), 1);
    }
}
