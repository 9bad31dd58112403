//! One normalization run over a bibliography database.

use std::path::PathBuf;

use bibtidy_bib::{BibDatabase, DatabaseError};

use crate::caching::{CacheAccessors, CacheName, CacheStore, FetchError};
use crate::config::Config;
use crate::filtering::{Filter, FilterError, FilterMode, build_filter};

/// An error aborting a pipeline run.
///
/// Whatever the error, the cache store has already been saved by the time
/// this reaches the caller; the bibliography file on the other hand is
/// only written after a fully successful run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Loading or saving the bibliography failed.
    #[error("bibliography error: {0}")]
    Database(#[from] DatabaseError),
    /// A configured filter could not be constructed.
    #[error(transparent)]
    Filter(#[from] FilterError),
    /// A fetch failed fatally, i.e. the remote rate-limited us.
    #[error("{0}. The cache was saved; rerun later to continue where this run stopped")]
    Fetch(#[from] FetchError),
    /// Run setup failed, e.g. the HTTP client could not be built.
    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}

/// What a successful run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// How many filters ran.
    pub filters_run: usize,
    /// How many entries the database holds.
    pub entries: usize,
}

/// A configured run: which bibliography to normalize and how.
pub struct Pipeline {
    config: Config,
    bibliography: PathBuf,
}

impl Pipeline {
    /// Creates a pipeline for one bibliography file.
    pub fn new(config: Config, bibliography: PathBuf) -> Self {
        Self {
            config,
            bibliography,
        }
    }

    /// Runs the pipeline with real remote fetchers.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let accessors = CacheAccessors::from_config(&self.config)?;
        self.run_with(accessors).await
    }

    /// Runs the pipeline over the given accessors.
    ///
    /// Loads the bibliography, constructs all filters up front, brings up
    /// exactly the caches those filters need, and applies the filters in
    /// configuration order. The cache store is saved unconditionally at
    /// the end, so even an aborted run keeps everything fetched so far.
    pub async fn run_with(&self, mut accessors: CacheAccessors) -> Result<RunSummary, PipelineError> {
        let mut bib = BibDatabase::load(&self.bibliography)?;
        tracing::info!(
            bibliography = %self.bibliography.display(),
            entries = bib.len(),
            "loaded bibliography"
        );

        let mut filters = self
            .config
            .filters
            .iter()
            .map(build_filter)
            .collect::<Result<Vec<_>, _>>()?;
        let required: Vec<CacheName> = filters
            .iter()
            .flat_map(|filter| filter.required_caches())
            .copied()
            .collect();

        let cache_path = self.config.cache_file_for(&self.bibliography);
        let mut store = CacheStore::load(&cache_path);
        accessors.initialize(&required, &mut store, &self.config.caches);

        let result = run_filters(&mut filters, &mut bib, &mut accessors).await;

        if let Err(error) = accessors
            .persist_all(&mut store)
            .map_err(std::io::Error::other)
            .and_then(|()| store.save())
        {
            tracing::warn!(
                path = %store.path().display(),
                error = %error,
                "failed to save the cache, fetched records will be lost"
            );
        }

        result?;
        bib.save(&self.bibliography)?;

        Ok(RunSummary {
            filters_run: filters.len(),
            entries: bib.len(),
        })
    }
}

async fn run_filters(
    filters: &mut [Box<dyn Filter>],
    bib: &mut BibDatabase,
    accessors: &mut CacheAccessors,
) -> Result<(), FetchError> {
    for filter in filters {
        tracing::info!(filter = filter.name(), "running filter");
        filter.prepare(accessors, bib).await?;

        match filter.mode() {
            FilterMode::SingleEntry => {
                let keys: Vec<String> = bib.keys().map(str::to_owned).collect();
                for key in keys {
                    if let Some(entry) = bib.get_mut(&key) {
                        filter.filter_entry(&key, entry, accessors);
                    }
                }
            }
            FilterMode::WholeDatabase => filter.filter_database(bib, accessors),
        }
    }
    Ok(())
}
