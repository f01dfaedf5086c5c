//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::FixedOffset;
use newsgenie_core::pipeline::fetch::DEFAULT_USER_AGENT;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub llm_max_retries: u32,
    pub llm_max_concurrency: usize,
    pub fetch_user_agent: String,
    /// Largest article page body accepted, in bytes.
    pub fetch_max_bytes: usize,
    /// Offset whose midnight starts a new goal day.
    pub goal_utc_offset: FixedOffset,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let database_url = lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5u32)?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Language Model Settings ---
        let openai_api_key = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
        let llm_base_url = lookup("LLM_BASE_URL").filter(|u| !u.trim().is_empty());
        let llm_model = lookup("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let llm_timeout = Duration::from_secs(parse_or(&lookup, "LLM_TIMEOUT_SECS", 60u64)?);
        let llm_max_retries = parse_or(&lookup, "LLM_MAX_RETRIES", 2u32)?;
        let llm_max_concurrency = parse_or(&lookup, "LLM_MAX_CONCURRENCY", 8usize)?;
        if llm_max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "LLM_MAX_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        // --- Pipeline and Goal Settings ---
        let fetch_user_agent = lookup("FETCH_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let fetch_max_bytes = parse_or(&lookup, "FETCH_MAX_BYTES", 2 * 1024 * 1024usize)?;
        if fetch_max_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "FETCH_MAX_BYTES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let offset_hours = parse_or(&lookup, "GOAL_UTC_OFFSET_HOURS", 9i32)?;
        let goal_utc_offset = offset_hours.checked_mul(3600).and_then(FixedOffset::east_opt).ok_or_else(|| {
            ConfigError::InvalidValue(
                "GOAL_UTC_OFFSET_HOURS".to_string(),
                format!("{} is outside -23..=23", offset_hours),
            )
        })?;
        let cors_origin = lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            database_max_connections,
            log_level,
            openai_api_key,
            llm_base_url,
            llm_model,
            llm_timeout,
            llm_max_retries,
            llm_max_concurrency,
            fetch_user_agent,
            fetch_max_bytes,
            goal_utc_offset,
            cors_origin,
        })
    }
}

fn invalid<E: std::fmt::Display>(key: &'static str) -> impl Fn(E) -> ConfigError {
    move |e| ConfigError::InvalidValue(key.to_string(), e.to_string())
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(invalid(key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_database_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/news")]).unwrap();

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.llm_timeout, Duration::from_secs(60));
        assert_eq!(config.llm_max_retries, 2);
        assert_eq!(config.llm_max_concurrency, 8);
        assert_eq!(config.fetch_user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.fetch_max_bytes, 2 * 1024 * 1024);
        assert_eq!(config.goal_utc_offset.local_minus_utc(), 9 * 3600);
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn missing_database_url_is_reported() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "DATABASE_URL"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/news"),
            ("BIND_ADDRESS", "127.0.0.1:8080"),
            ("LLM_MAX_CONCURRENCY", "3"),
            ("LLM_BASE_URL", "https://openrouter.ai/api/v1"),
            ("GOAL_UTC_OFFSET_HOURS", "-5"),
            ("FETCH_MAX_BYTES", "65536"),
        ])
        .unwrap();

        assert_eq!(config.fetch_max_bytes, 65536);

        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.llm_max_concurrency, 3);
        assert_eq!(config.llm_base_url.as_deref(), Some("https://openrouter.ai/api/v1"));
        assert_eq!(config.goal_utc_offset.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = load(&[("DATABASE_URL", "x"), ("LLM_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key, _) if key == "LLM_TIMEOUT_SECS"));

        let err = load(&[("DATABASE_URL", "x"), ("LLM_MAX_CONCURRENCY", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key, _) if key == "LLM_MAX_CONCURRENCY"));

        let err = load(&[("DATABASE_URL", "x"), ("GOAL_UTC_OFFSET_HOURS", "30")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key, _) if key == "GOAL_UTC_OFFSET_HOURS"));
    }
}
