use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::LevelFilter;
use serde::Deserialize;

use crate::filtering::FilterSpec;

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
    /// The log level for the tool.
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::Warn,
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}

/// Fine-tuning expiry of records fetched from remote APIs.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct FetchedCacheConfig {
    /// How long a fetched record stays valid before it is re-fetched.
    ///
    /// `None` means fetched records never expire.
    #[serde(with = "humantime_serde")]
    pub time_valid: Option<Duration>,
}

impl Default for FetchedCacheConfig {
    fn default() -> Self {
        Self {
            time_valid: Some(Duration::from_secs(3600 * 24 * 30)),
        }
    }
}

/// Fine-tuning of all caches.
#[derive(Debug, Clone, Copy, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfigs {
    /// Expiry of raw records fetched from remote APIs.
    pub fetched: FetchedCacheConfig,
}

/// Settings for the HTTP client used by all remote fetchers.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The overall timeout for a single request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Delay inserted between consecutive requests of one batch.
    #[serde(with = "humantime_serde")]
    pub pacing: Duration,

    /// The `User-Agent` sent to the remote APIs.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            pacing: Duration::from_millis(500),
            user_agent: concat!("bibtidy/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// The top-level configuration, loaded from a YAML file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where to persist the fetch cache.
    ///
    /// Defaults to `<bibliography>.cache.json` next to the bibliography file.
    pub cache_file: Option<PathBuf>,

    /// Expiry fine-tuning for the caches.
    pub caches: CacheConfigs,

    /// HTTP client settings for the remote fetchers.
    pub fetch: FetchConfig,

    /// Logging configuration.
    pub logging: Logging,

    /// The filters to run, in order.
    pub filters: Vec<FilterSpec>,
}

impl Config {
    /// Loads the configuration from the given path, or the defaults.
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
        if config.trim().is_empty() {
            bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse YAML")
    }

    /// The cache file path to use for the given bibliography file.
    pub fn cache_file_for(&self, bibliography: &Path) -> PathBuf {
        match &self.cache_file {
            Some(path) => path.clone(),
            None => {
                let mut name = bibliography.file_name().unwrap_or_default().to_owned();
                name.push(".cache.json");
                bibliography.with_file_name(name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(
            cfg.caches.fetched.time_valid,
            Some(Duration::from_secs(3600 * 24 * 30))
        );
        assert_eq!(cfg.fetch.pacing, Duration::from_millis(500));
        assert!(cfg.filters.is_empty());
        assert!(cfg.cache_file.is_none());
    }

    #[test]
    fn test_cache_config() {
        // It should be possible to tune one cache in reasonable units
        // without affecting the other defaults.
        let yaml = r#"
            caches:
              fetched:
                time_valid: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.caches.fetched.time_valid,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(cfg.fetch, FetchConfig::default());

        let yaml = r#"
            caches:
              fetched:
                time_valid: null
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.caches.fetched.time_valid, None);
    }

    #[test]
    fn test_unknown_keys_tolerated() {
        let yaml = r#"
            some_future_setting: 17
            fetch:
              pacing: 0ms
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.fetch.pacing, Duration::ZERO);
    }

    #[test]
    fn test_empty_file_rejected() {
        assert!(Config::from_reader("".as_bytes()).is_err());
        assert!(Config::from_reader("  \n\t\n".as_bytes()).is_err());
    }

    #[test]
    fn test_filters_parse() {
        let yaml = r#"
            filters:
              - name: arxiv
                options:
                  mode: eprint
              - name: orderentries
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.filters.len(), 2);
        assert_eq!(cfg.filters[0].name, "arxiv");
        assert!(cfg.filters[1].options.is_empty());
    }

    #[test]
    fn test_cache_file_for() {
        let cfg = Config::default();
        assert_eq!(
            cfg.cache_file_for(Path::new("/work/refs.yaml")),
            PathBuf::from("/work/refs.yaml.cache.json")
        );

        let cfg = Config {
            cache_file: Some(PathBuf::from("/tmp/other.json")),
            ..Default::default()
        };
        assert_eq!(
            cfg.cache_file_for(Path::new("/work/refs.yaml")),
            PathBuf::from("/tmp/other.json")
        );
    }
}
