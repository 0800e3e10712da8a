use std::env;
use std::time::Duration;

use crate::engine::MatchingPolicy;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub match_interval_secs: u64,
    pub match_window_secs: u64,
    pub claim_timeout_secs: u64,
    pub max_concurrent_matches: usize,
    pub exclude_last_decliner: bool,
    pub scheduler_enabled: bool,
    pub shutdown_grace_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            match_interval_secs: parse_or_default("MATCH_INTERVAL_SECS", 10)?,
            match_window_secs: parse_or_default("MATCH_WINDOW_SECS", 300)?,
            claim_timeout_secs: parse_or_default("CLAIM_TIMEOUT_SECS", 60)?,
            max_concurrent_matches: parse_or_default("MAX_CONCURRENT_MATCHES", 8)?,
            exclude_last_decliner: parse_or_default("EXCLUDE_LAST_DECLINER", true)?,
            scheduler_enabled: parse_or_default("SCHEDULER_ENABLED", true)?,
            shutdown_grace_secs: parse_or_default("SHUTDOWN_GRACE_SECS", 30)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.match_interval_secs == 0 {
            return Err(AppError::Internal(
                "MATCH_INTERVAL_SECS must be > 0".to_string(),
            ));
        }
        if self.match_window_secs == 0 {
            return Err(AppError::Internal("MATCH_WINDOW_SECS must be > 0".to_string()));
        }
        if self.event_buffer_size == 0 {
            return Err(AppError::Internal("EVENT_BUFFER_SIZE must be > 0".to_string()));
        }
        if self.max_concurrent_matches == 0 {
            return Err(AppError::Internal(
                "MAX_CONCURRENT_MATCHES must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn matching_policy(&self) -> MatchingPolicy {
        MatchingPolicy {
            tick_interval: Duration::from_secs(self.match_interval_secs),
            match_window: Duration::from_secs(self.match_window_secs),
            claim_timeout: Duration::from_secs(self.claim_timeout_secs),
            max_concurrent_matches: self.max_concurrent_matches,
            exclude_last_decliner: self.exclude_last_decliner,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_or_default, Config};

    fn defaults() -> Config {
        Config {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            match_interval_secs: 10,
            match_window_secs: 300,
            claim_timeout_secs: 60,
            max_concurrent_matches: 8,
            exclude_last_decliner: true,
            scheduler_enabled: true,
            shutdown_grace_secs: 30,
        }
    }

    #[test]
    fn missing_key_falls_back_to_default() {
        let value: u64 = parse_or_default("SERVICE_MATCHER_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn default_policy_matches_documented_cadence() {
        let policy = crate::engine::MatchingPolicy::default();
        assert_eq!(policy.tick_interval.as_secs(), 10);
        assert_eq!(policy.match_window.as_secs(), 300);
    }

    #[test]
    fn zero_sized_settings_are_rejected() {
        assert!(defaults().validate().is_ok());

        let no_buffer = Config {
            event_buffer_size: 0,
            ..defaults()
        };
        assert!(no_buffer.validate().is_err());

        let no_workers = Config {
            max_concurrent_matches: 0,
            ..defaults()
        };
        assert!(no_workers.validate().is_err());
    }
}
