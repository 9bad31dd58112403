//! Small per-entry cleanups.

use async_trait::async_trait;
use bibtidy_bib::Entry;
use serde::Deserialize;

use super::{Filter, FilterError, FilterMode, parse_options};
use crate::caching::CacheAccessors;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Options {
    remove_fields: Vec<String>,
}

/// Collapses whitespace in field values and drops configured fields.
pub struct FixesFilter {
    remove_fields: Vec<String>,
}

impl FixesFilter {
    /// Builds the filter from its configured options.
    pub fn from_options(options: &serde_yaml::Mapping) -> Result<Self, FilterError> {
        let options: Options = parse_options("fixes", options)?;
        Ok(Self {
            remove_fields: options.remove_fields,
        })
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Filter for FixesFilter {
    fn name(&self) -> &'static str {
        "fixes"
    }

    fn mode(&self) -> FilterMode {
        FilterMode::SingleEntry
    }

    fn filter_entry(&self, _key: &str, entry: &mut Entry, _accessors: &CacheAccessors) {
        for field in &self.remove_fields {
            entry.remove_field(field);
        }
        for value in entry.fields.values_mut() {
            let collapsed = collapse_whitespace(value);
            if collapsed != *value {
                *value = collapsed;
            }
        }
    }
}
