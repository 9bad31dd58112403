//! Normalizes the arXiv metadata of entries.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bibtidy_bib::{BibDatabase, Entry};
use serde::Deserialize;

use super::{Filter, FilterError, FilterMode, parse_options};
use crate::caching::{ArxivInfo, CacheAccessors, CacheName, FetchError};

/// The fields this filter may rewrite or remove.
const ARXIV_FIELDS: &[&str] = &["eprint", "archiveprefix", "primaryclass", "arxivid"];

/// What shape the arXiv metadata should take after the filter ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArxivMode {
    /// Remove arXiv metadata from entries that have appeared in a journal.
    Strip,
    /// Normalize to the `eprint`/`archiveprefix`/`primaryclass` triple.
    #[default]
    Eprint,
    /// Move the arXiv reference into the `note` field.
    Note,
}

impl AsRef<str> for ArxivMode {
    fn as_ref(&self) -> &str {
        match self {
            Self::Strip => "strip",
            Self::Eprint => "eprint",
            Self::Note => "note",
        }
    }
}

impl fmt::Display for ArxivMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl FromStr for ArxivMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strip" => Ok(Self::Strip),
            "eprint" => Ok(Self::Eprint),
            "note" => Ok(Self::Note),
            other => Err(format!(
                "unknown arxiv mode `{other}`, expected `strip`, `eprint` or `note`"
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Options {
    mode: Option<String>,
}

/// Rewrites entries to carry their arXiv identity in one canonical shape.
pub struct ArxivFilter {
    mode: ArxivMode,
}

impl ArxivFilter {
    /// Builds the filter from its configured options.
    pub fn from_options(options: &serde_yaml::Mapping) -> Result<Self, FilterError> {
        let options: Options = parse_options("arxiv", options)?;
        let mode = match options.mode.as_deref() {
            Some(mode) => mode.parse().map_err(|message| FilterError::InvalidMode {
                filter: "arxiv",
                message,
            })?,
            None => ArxivMode::default(),
        };
        Ok(Self { mode })
    }

    fn apply(&self, entry: &mut Entry, info: &ArxivInfo) {
        match self.mode {
            ArxivMode::Strip => {
                if info.published {
                    for field in ARXIV_FIELDS {
                        entry.remove_field(field);
                    }
                }
            }
            ArxivMode::Eprint => {
                for field in ARXIV_FIELDS {
                    entry.remove_field(field);
                }
                entry.set_field("eprint", info.arxivid.clone());
                entry.set_field("archiveprefix", "arXiv");
                if let Some(class) = &info.primary_class {
                    entry.set_field("primaryclass", class.clone());
                }
            }
            ArxivMode::Note => {
                for field in ARXIV_FIELDS {
                    entry.remove_field(field);
                }
                let mut reference = format!("arXiv:{}", info.arxivid);
                if let Some(class) = &info.primary_class {
                    reference = format!("{reference} [{class}]");
                }
                // Append to an existing note; a note that already carries
                // the arXiv id (often the very source it was detected
                // from) is left alone.
                let note = match entry.field("note") {
                    Some(existing) if existing.contains(&info.arxivid) => existing.to_owned(),
                    Some(existing) if !existing.is_empty() => format!("{existing}, {reference}"),
                    _ => reference,
                };
                entry.set_field("note", note);
            }
        }

        // An API-confirmed DOI is worth recording in any mode.
        if entry.field("doi").is_none() {
            if let Some(doi) = &info.doi {
                entry.set_field("doi", doi.clone());
            }
        }
    }
}

#[async_trait]
impl Filter for ArxivFilter {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    fn mode(&self) -> FilterMode {
        FilterMode::SingleEntry
    }

    fn required_caches(&self) -> &'static [CacheName] {
        &[CacheName::ArxivInfo]
    }

    async fn prepare(
        &mut self,
        accessors: &mut CacheAccessors,
        bib: &BibDatabase,
    ) -> Result<(), FetchError> {
        let CacheAccessors {
            arxiv_fetched,
            arxiv_info,
            ..
        } = accessors;
        arxiv_info.complete_cache(bib, arxiv_fetched).await
    }

    fn filter_entry(&self, key: &str, entry: &mut Entry, accessors: &CacheAccessors) {
        if let Some(info) = accessors.arxiv_info.get(key) {
            self.apply(entry, info);
        }
    }
}
