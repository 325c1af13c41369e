use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use loader_cache::{CacheConfig, InFlightInvalidation};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

/// The public Hacker News API.
const DEFAULT_API_URL: &str = "https://hacker-news.firebaseio.com/v0/";

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
    /// The log level.
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
            level: LevelFilter::WARN,
            format: LogFormat::Auto,
            enable_backtraces: false,
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
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "hnloader".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Where and how to reach the Hacker News API.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Api {
    /// The versioned API root, ending in a slash.
    pub base_url: Url,
    /// The timeout for a single request, including reading the body.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for Api {
    fn default() -> Self {
        Api {
            // The constant is a valid absolute URL.
            base_url: Url::parse(DEFAULT_API_URL).unwrap(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// The configuration of each resource cache.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfigs {
    /// Story id lists, keyed by list kind.
    #[serde(deserialize_with = "deserialize_lists")]
    pub lists: CacheConfig,
    /// Stories, keyed by item id.
    #[serde(deserialize_with = "deserialize_stories")]
    pub stories: CacheConfig,
    /// Comments, keyed by item id.
    #[serde(deserialize_with = "deserialize_comments")]
    pub comments: CacheConfig,
}

impl Default for CacheConfigs {
    fn default() -> Self {
        CacheConfigs {
            lists: CacheConfig::named("lists"),
            stories: CacheConfig::named("stories"),
            comments: CacheConfig::named("comments"),
        }
    }
}

/// A cache section as written in the file, where the name falls back to the resource kind.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheSection {
    name: Option<String>,
    in_flight_invalidation: InFlightInvalidation,
}

impl CacheSection {
    fn into_config(self, kind: &str) -> CacheConfig {
        CacheConfig::named(self.name.unwrap_or_else(|| kind.into()))
            .in_flight_invalidation(self.in_flight_invalidation)
    }
}

fn deserialize_lists<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<CacheConfig, D::Error> {
    Ok(CacheSection::deserialize(deserializer)?.into_config("lists"))
}

fn deserialize_stories<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<CacheConfig, D::Error> {
    Ok(CacheSection::deserialize(deserializer)?.into_config("stories"))
}

fn deserialize_comments<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<CacheConfig, D::Error> {
    Ok(CacheSection::deserialize(deserializer)?.into_config("comments"))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration for logging.
    pub logging: Logging,
    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,
    /// Configuration of the upstream API.
    pub api: Api,
    /// Configuration of the in-memory caches.
    pub caches: CacheConfigs,
}

impl Config {
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
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
