//! The filters that rewrite a bibliography, and their construction.
//!
//! A run is a configured sequence of filters. Each filter declares which
//! caches it needs, gets a chance to batch-complete them in
//! [`Filter::prepare`], and then rewrites either individual entries or
//! the database as a whole, depending on its [`FilterMode`].

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bibtidy_bib::{BibDatabase, Entry};
use serde::Deserialize;

use crate::caching::{CacheAccessors, CacheName, FetchError};

mod arxiv;
mod fixes;
mod order_entries;

pub use arxiv::{ArxivFilter, ArxivMode};
pub use fixes::FixesFilter;
pub use order_entries::{OrderEntriesFilter, Ordering};

/// An error constructing or applying a filter.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// The configuration named a filter that does not exist.
    #[error("unknown filter `{0}`, expected one of: arxiv, fixes, orderentries")]
    UnknownFilter(String),
    /// A filter option did not deserialize.
    #[error("invalid options for filter `{filter}`")]
    InvalidOptions {
        /// The filter whose options were rejected.
        filter: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
    /// A mode string was not one of the allowed values.
    #[error("invalid mode for filter `{filter}`: {message}")]
    InvalidMode {
        /// The filter whose mode was rejected.
        filter: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

/// How a filter is applied to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// The filter rewrites one entry at a time.
    SingleEntry,
    /// The filter rewrites the database as a whole.
    WholeDatabase,
}

impl AsRef<str> for FilterMode {
    fn as_ref(&self) -> &str {
        match self {
            Self::SingleEntry => "single_entry",
            Self::WholeDatabase => "whole_database",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_entry" => Ok(Self::SingleEntry),
            "whole_database" => Ok(Self::WholeDatabase),
            other => Err(format!(
                "unknown filter mode `{other}`, expected `single_entry` or `whole_database`"
            )),
        }
    }
}

/// One filter invocation as configured, before construction.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    /// The filter name, resolved by [`build_filter`].
    pub name: String,
    /// Filter-specific options, interpreted by the filter itself.
    pub options: serde_yaml::Mapping,
}

/// A step in the normalization pipeline.
#[async_trait]
pub trait Filter: Send {
    /// The configured name of this filter.
    fn name(&self) -> &'static str;

    /// Whether this filter works per entry or on the whole database.
    fn mode(&self) -> FilterMode;

    /// The caches this filter reads; the pipeline initializes exactly
    /// these (plus dependencies) before the filter runs.
    fn required_caches(&self) -> &'static [CacheName] {
        &[]
    }

    /// Batch-completes the required caches for the whole database.
    ///
    /// This is the single point where a filter may await network I/O.
    async fn prepare(
        &mut self,
        _accessors: &mut CacheAccessors,
        _bib: &BibDatabase,
    ) -> Result<(), FetchError> {
        Ok(())
    }

    /// Rewrites one entry. Only called for [`FilterMode::SingleEntry`].
    fn filter_entry(&self, _key: &str, _entry: &mut Entry, _accessors: &CacheAccessors) {}

    /// Rewrites the database. Only called for [`FilterMode::WholeDatabase`].
    fn filter_database(&self, _bib: &mut BibDatabase, _accessors: &CacheAccessors) {}
}

/// Resolves a [`FilterSpec`] into a runnable filter.
///
/// All resolution happens here, up front; an unknown name or bad option
/// fails the run before any filter has touched the database.
pub fn build_filter(spec: &FilterSpec) -> Result<Box<dyn Filter>, FilterError> {
    match spec.name.as_str() {
        "arxiv" => Ok(Box::new(ArxivFilter::from_options(&spec.options)?)),
        "fixes" => Ok(Box::new(FixesFilter::from_options(&spec.options)?)),
        "orderentries" => Ok(Box::new(OrderEntriesFilter::from_options(&spec.options)?)),
        other => Err(FilterError::UnknownFilter(other.to_owned())),
    }
}

/// Deserializes a filter's options mapping into its option struct.
fn parse_options<T: serde::de::DeserializeOwned>(
    filter: &'static str,
    options: &serde_yaml::Mapping,
) -> Result<T, FilterError> {
    serde_yaml::from_value(serde_yaml::Value::Mapping(options.clone()))
        .map_err(|source| FilterError::InvalidOptions { filter, source })
}
