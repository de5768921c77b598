//! Environment-driven configuration for the three binaries.

use log::info;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_DATABASE_URL: &str = "sqlite:polls.db";
const DEFAULT_AMQP_URL: &str = "amqp://127.0.0.1:5672/%2f";
const DEFAULT_STREAM_URL: &str = "https://stream.twitter.com/1.1/statuses/filter.json";

/// Loads a dotenv file: the one named by `DOTENV` if set (it must exist),
/// otherwise `.env` when present.
pub fn load_dotenv() -> Result<()> {
    match std::env::var("DOTENV") {
        Ok(path) if !path.is_empty() => {
            dotenvy::from_path(&path)
                .map_err(|e| Error::Config(format!("could not load {}: {}", path, e)))?;
            info!("Loaded environment from {}", path);
        }
        _ => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

/// How a flush cycle treats options whose update failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Only entries confirmed persisted are removed from the tally.
    PerOption,
    /// The whole tally is cleared only when every update succeeded. Options
    /// that did persist are re-applied on the next cycle, so this double
    /// counts after a partial failure.
    AllOrNothing,
}

impl FromStr for FlushPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-option" | "per_option" => Ok(FlushPolicy::PerOption),
            "all-or-nothing" | "all_or_nothing" => Ok(FlushPolicy::AllOrNothing),
            other => Err(Error::Config(format!("unknown flush policy: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub database_url: String,
    pub amqp_url: String,
    pub stream_url: String,
    pub stream_bearer_token: Option<String>,
    // None keeps a connection open until shutdown
    pub stream_lifetime: Option<Duration>,
    pub refresh_options: bool,
    pub reconnect_delay: Duration,
    pub vote_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub database_url: String,
    pub amqp_url: String,
    pub consumer_group: String,
    pub flush_interval: Duration,
    pub flush_policy: FlushPolicy,
    pub flush_on_shutdown: bool,
    pub prefetch: u16,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub api_key: String,
}

/// Reads typed values out of a variable lookup.
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| Error::Config(format!("{} must be set", key)))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
            None => Ok(default),
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl IngestorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup };
        let lifetime_secs: u64 = vars.parse("STREAM_LIFETIME_SECS", 60)?;
        let vote_buffer: usize = vars.parse("VOTE_BUFFER", 1024)?;
        if vote_buffer == 0 {
            return Err(Error::Config("VOTE_BUFFER must be at least 1".to_string()));
        }

        Ok(Self {
            database_url: vars.string("DATABASE_URL", DEFAULT_DATABASE_URL),
            amqp_url: vars.string("AMQP_URL", DEFAULT_AMQP_URL),
            stream_url: vars.string("STREAM_URL", DEFAULT_STREAM_URL),
            stream_bearer_token: vars.optional("STREAM_BEARER_TOKEN"),
            stream_lifetime: (lifetime_secs > 0).then(|| Duration::from_secs(lifetime_secs)),
            refresh_options: vars.parse("REFRESH_OPTIONS", false)?,
            reconnect_delay: Duration::from_secs(vars.parse("RECONNECT_DELAY_SECS", 10)?),
            vote_buffer,
        })
    }
}

impl AggregatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup };
        let interval_ms: u64 = vars.parse("FLUSH_INTERVAL_MS", 1000)?;
        if interval_ms == 0 {
            return Err(Error::Config("FLUSH_INTERVAL_MS must be positive".to_string()));
        }

        Ok(Self {
            database_url: vars.string("DATABASE_URL", DEFAULT_DATABASE_URL),
            amqp_url: vars.string("AMQP_URL", DEFAULT_AMQP_URL),
            consumer_group: vars.string("CONSUMER_GROUP", "counter"),
            flush_interval: Duration::from_millis(interval_ms),
            flush_policy: vars.parse("FLUSH_POLICY", FlushPolicy::PerOption)?,
            flush_on_shutdown: vars.parse("FLUSH_ON_SHUTDOWN", false)?,
            prefetch: vars.parse("BUS_PREFETCH", 100)?,
        })
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup };
        Ok(Self {
            database_url: vars.string("DATABASE_URL", DEFAULT_DATABASE_URL),
            bind_addr: vars.string("BIND_ADDR", "0.0.0.0:8080"),
            api_key: vars.required("API_KEY")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn ingestor_defaults() {
        let config = IngestorConfig::from_lookup(vars(&[])).unwrap();
        assert_eq!(config.stream_lifetime, Some(Duration::from_secs(60)));
        assert!(!config.refresh_options);
        assert_eq!(config.reconnect_delay, Duration::from_secs(10));
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert!(config.stream_bearer_token.is_none());
    }

    #[test]
    fn zero_lifetime_disables_the_timer() {
        let config = IngestorConfig::from_lookup(vars(&[
            ("STREAM_LIFETIME_SECS", "0"),
            ("REFRESH_OPTIONS", "true"),
        ]))
        .unwrap();
        assert_eq!(config.stream_lifetime, None);
        assert!(config.refresh_options);
    }

    #[test]
    fn aggregator_parses_policy_and_interval() {
        let config = AggregatorConfig::from_lookup(vars(&[
            ("FLUSH_INTERVAL_MS", "250"),
            ("FLUSH_POLICY", "all-or-nothing"),
            ("CONSUMER_GROUP", "counter-eu"),
        ]))
        .unwrap();
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.flush_policy, FlushPolicy::AllOrNothing);
        assert_eq!(config.consumer_group, "counter-eu");
        assert!(!config.flush_on_shutdown);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let err = AggregatorConfig::from_lookup(vars(&[("FLUSH_INTERVAL_MS", "soon")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("FLUSH_INTERVAL_MS")));

        let err = AggregatorConfig::from_lookup(vars(&[("FLUSH_POLICY", "sometimes")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = IngestorConfig::from_lookup(vars(&[("VOTE_BUFFER", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn api_key_is_required() {
        assert!(ApiConfig::from_lookup(vars(&[])).is_err());
        let config = ApiConfig::from_lookup(vars(&[("API_KEY", "wowsosecret")])).unwrap();
        assert_eq!(config.api_key, "wowsosecret");
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
    }
}
