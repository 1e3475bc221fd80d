use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use url::Url;

use tradepost_api::HttpTimeouts;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the client.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: std::env::var("STATSD_SERVER").ok(),
            prefix: "tradepost".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Fine-tuning of one query family's expiry.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq, Default)]
#[serde(default)]
pub struct QueryCacheConfig {
    /// Duration for which a successful fetch is served without revalidation
    /// (time since the fetch completed).
    ///
    /// Absent means entries stay fresh until explicitly invalidated by a
    /// mutation.
    #[serde(with = "humantime_serde")]
    pub stale_after: Option<Duration>,
}

/// Per-family cache expiry configuration.
///
/// Entries are never evicted; these values only control when a read
/// revalidates against the backend.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfigs {
    /// Expiry of product listings and details.
    pub products: QueryCacheConfig,
    /// Expiry of the admin user roster.
    pub users: QueryCacheConfig,
    /// Expiry of the session probe result.
    ///
    /// Defaults to "fresh until invalidated": the probe is re-issued exactly
    /// when a session-changing mutation invalidates it, never passively,
    /// to avoid surprising re-auth attempts.
    pub session: QueryCacheConfig,
}

impl Default for CacheConfigs {
    fn default() -> Self {
        Self {
            products: QueryCacheConfig {
                stale_after: Some(Duration::from_secs(30)),
            },
            users: QueryCacheConfig {
                stale_after: Some(Duration::from_secs(30)),
            },
            session: QueryCacheConfig { stale_after: None },
        }
    }
}

/// Top-level client configuration, loaded from YAML.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the backend, e.g. `http://127.0.0.1:8080/`.
    pub base_url: Url,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// Fine-tune cache expiry per query family.
    pub caches: CacheConfigs,

    /// The timeout for establishing a connection to the backend.
    ///
    /// This timeout applies to each individual connection attempt.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The overall timeout for a single backend call.
    ///
    /// This is the upper limit a call may take, regardless of any retries
    /// performed below the RPC boundary.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Config {
    /// The timeouts the HTTP client should apply to every backend call.
    pub fn http_timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: self.connect_timeout,
            request: self.request_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: Url::parse("http://127.0.0.1:8080/").expect("hardcoded URL is valid"),
            logging: Logging::default(),
            metrics: Metrics::default(),
            caches: CacheConfigs::default(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Loads the configuration from the given file, or the defaults if no
    /// path is provided.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed to read configuration file")?;
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.base_url.as_str(), "http://127.0.0.1:8080/");
        assert_eq!(
            cfg.caches.products.stale_after,
            Some(Duration::from_secs(30))
        );
        assert_eq!(cfg.caches.session.stale_after, None);
    }

    #[test]
    fn test_base_url() {
        let yaml = "base_url: https://shop.example.com/\n";
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.base_url.as_str(), "https://shop.example.com/");
    }

    #[test]
    fn test_cache_expiry() {
        let yaml = r"
caches:
  products:
    stale_after: 2m
  users:
    stale_after: 1h
";
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.caches.products.stale_after,
            Some(Duration::from_secs(120))
        );
        assert_eq!(cfg.caches.users.stale_after, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_logging_level() {
        let yaml = r"
logging:
  level: debug
  format: json
";
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_level() {
        let yaml = "logging:\n  level: shouting\n";
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }
}
