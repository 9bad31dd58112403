//! Reorders the entries of the database.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bibtidy_bib::BibDatabase;
use serde::Deserialize;

use super::{Filter, FilterError, FilterMode, parse_options};
use crate::caching::CacheAccessors;

/// The order entries are written back in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Ordering {
    /// Keep the order the entries were read in.
    Raw,
    /// Sort entries alphabetically by key.
    #[default]
    Alphabetical,
}

impl AsRef<str> for Ordering {
    fn as_ref(&self) -> &str {
        match self {
            Self::Raw => "raw",
            Self::Alphabetical => "alphabetical",
        }
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl FromStr for Ordering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "alphabetical" => Ok(Self::Alphabetical),
            other => Err(format!(
                "unknown ordering `{other}`, expected `raw` or `alphabetical`"
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Options {
    order: Option<String>,
}

/// Rewrites the entry order of the whole database.
pub struct OrderEntriesFilter {
    order: Ordering,
}

impl OrderEntriesFilter {
    /// Builds the filter from its configured options.
    pub fn from_options(options: &serde_yaml::Mapping) -> Result<Self, FilterError> {
        let options: Options = parse_options("orderentries", options)?;
        let order = match options.order.as_deref() {
            Some(order) => order.parse().map_err(|message| FilterError::InvalidMode {
                filter: "orderentries",
                message,
            })?,
            None => Ordering::default(),
        };
        Ok(Self { order })
    }
}

#[async_trait]
impl Filter for OrderEntriesFilter {
    fn name(&self) -> &'static str {
        "orderentries"
    }

    fn mode(&self) -> FilterMode {
        FilterMode::WholeDatabase
    }

    fn filter_database(&self, bib: &mut BibDatabase, _accessors: &CacheAccessors) {
        match self.order {
            Ordering::Raw => {}
            Ordering::Alphabetical => {
                let mut keys: Vec<String> = bib.keys().map(str::to_owned).collect();
                keys.sort_unstable();
                bib.reorder(keys);
            }
        }
    }
}
