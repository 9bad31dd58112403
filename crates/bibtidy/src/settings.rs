use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;

use bibtidy_service::config::Config;

/// Normalizes a bibliography database.
///
/// Runs the filter sequence from the configuration file over the given
/// bibliography, fetching missing metadata from arXiv, doi.org and
/// INSPIRE-HEP through a persistent cache stored next to the bibliography.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about)]
struct Cli {
    /// The bibliography database to normalize (YAML, or JSON by extension).
    pub bibliography: PathBuf,

    /// Path to the configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Where to store the fetch cache.
    ///
    /// Defaults to `<bibliography>.cache.json` next to the bibliography.
    #[arg(long)]
    pub cache_file: Option<PathBuf>,

    /// The severity level of logging output.
    ///
    /// Possible values: off, error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

/// The merged settings of one invocation: config file, then CLI overrides.
#[derive(Debug)]
pub struct Settings {
    pub bibliography: PathBuf,
    pub config: Config,
}

impl Settings {
    pub fn get() -> Result<Self> {
        let cli = Cli::parse();

        let mut config =
            Config::get(cli.config.as_deref()).context("failed loading configuration")?;
        if cli.cache_file.is_some() {
            config.cache_file = cli.cache_file;
        }
        if let Some(level) = cli.log_level {
            config.logging.level = level;
        }

        Ok(Settings {
            bibliography: cli.bibliography,
            config,
        })
    }
}
