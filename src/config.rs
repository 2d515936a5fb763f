//! Broker configuration
//!
//! Loaded from the environment (and `.env` when present).

use crate::error::BrokerError;
use crate::Result;
use std::env;
use std::str::FromStr;

/// Similarity at or above which a fact is treated as already known
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Postgres connection string; in-memory store when absent
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub similarity_threshold: f32,
    /// Conversation turns included in each context bundle
    pub history_limit: usize,
    /// Facts / knowledge items included in each context bundle
    pub search_limit: usize,
    /// Upper bound on preference records read per user
    pub preference_cap: usize,
    /// Characters of an agent response kept in its event description
    pub event_preview_chars: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            history_limit: 5,
            search_limit: 3,
            preference_cap: 100,
            event_preview_chars: 50,
        }
    }
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("POSTGRES_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());

        let config = Self {
            database_url,
            max_connections: parse_var("BROKER_MAX_CONNECTIONS", defaults.max_connections)?,
            similarity_threshold: parse_var(
                "BROKER_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?,
            history_limit: parse_var("BROKER_HISTORY_LIMIT", defaults.history_limit)?,
            search_limit: parse_var("BROKER_SEARCH_LIMIT", defaults.search_limit)?,
            preference_cap: parse_var("BROKER_PREFERENCE_CAP", defaults.preference_cap)?,
            event_preview_chars: parse_var(
                "BROKER_EVENT_PREVIEW_CHARS",
                defaults.event_preview_chars,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(BrokerError::ConfigError(format!(
                "similarity threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }

        if self.max_connections == 0 {
            return Err(BrokerError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("history_limit", self.history_limit),
            ("search_limit", self.search_limit),
            ("preference_cap", self.preference_cap),
        ] {
            if value == 0 {
                return Err(BrokerError::ConfigError(format!("{} must be at least 1", name)));
            }
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| BrokerError::ConfigError(format!("invalid value for {}: {:?}", key, raw)))
}
