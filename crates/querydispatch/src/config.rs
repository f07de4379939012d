//! Configuration for the dispatch service.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use querydispatch_cache::KeySerialization;

use crate::transport::ApiVersion;

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
    /// The log level for the dispatcher.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Configuration for a query dispatcher.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the backend serving query endpoints.
    pub base_url: String,

    /// REST prefix to dispatch queries under.
    pub api_version: ApiVersion,

    /// Maximum number of queries running against the backend at once.
    ///
    /// Further queries wait in FIFO order for a free slot.
    pub max_concurrent_queries: usize,

    /// Fixed ceiling for a single network round trip.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How request payloads are serialized into cache keys.
    pub key_serialization: KeySerialization,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: "http://localhost:5000".into(),
            api_version: ApiVersion::default(),
            max_concurrent_queries: 6,
            request_timeout: Duration::from_secs(300),
            key_serialization: KeySerialization::default(),
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from the given path, or the defaults if no
    /// path is given.
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
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.max_concurrent_queries, 6);
        assert_eq!(cfg.request_timeout, Duration::from_secs(300));
        assert_eq!(cfg.api_version, ApiVersion::V2);
        assert_eq!(cfg.key_serialization, KeySerialization::InsertionOrder);
        assert_eq!(cfg.logging.level, LevelFilter::INFO);
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let yaml = r#"
            base_url: "https://bi.example.org"
            max_concurrent_queries: 2
            request_timeout: 30s
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.base_url, "https://bi.example.org");
        assert_eq!(cfg.max_concurrent_queries, 2);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.api_version, ApiVersion::V2);
        assert_eq!(cfg.key_serialization, KeySerialization::InsertionOrder);
    }

    #[test]
    fn test_key_serialization_and_logging() {
        let yaml = r#"
            api_version: v1
            key_serialization: canonical
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.api_version, ApiVersion::V1);
        assert_eq!(cfg.key_serialization, KeySerialization::Canonical);
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_get_reads_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_concurrent_queries: 3").unwrap();

        let cfg = Config::get(Some(file.path())).unwrap();
        assert_eq!(cfg.max_concurrent_queries, 3);

        assert!(Config::get(Some(Path::new("/nonexistent/config.yml"))).is_err());
    }

    #[test]
    fn test_empty_config_is_rejected() {
        assert!(Config::from_reader("".as_bytes()).is_err());
        assert!(Config::from_reader("   \n".as_bytes()).is_err());
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let yaml = r#"
            logging:
              level: verbose
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }
}
