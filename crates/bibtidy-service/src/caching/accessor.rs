use std::fmt;
use std::str::FromStr;

use super::error::FetchError;
use super::store::CacheStore;
use crate::config::CacheConfigs;

/// All known cache names.
///
/// The name doubles as the namespace under which the cache lives in the
/// store file, so renaming a variant orphans previously written state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheName {
    /// Derived per-entry arXiv information.
    ArxivInfo,
    /// Raw records fetched from the arXiv export API.
    ArxivFetchedApiInfo,
    /// Raw CSL records fetched from doi.org.
    DoiOrgFetchedInfo,
    /// Raw records fetched from the INSPIRE-HEP API.
    InspireHepFetchedApiInfo,
}

impl CacheName {
    /// All caches, raw fetch caches before the derived ones.
    ///
    /// Initialization follows this order so that a derived cache can rely
    /// on its raw collaborator being ready.
    pub const ALL: &[CacheName] = &[
        CacheName::ArxivFetchedApiInfo,
        CacheName::DoiOrgFetchedInfo,
        CacheName::InspireHepFetchedApiInfo,
        CacheName::ArxivInfo,
    ];

    /// The raw caches this cache reads through.
    pub fn dependencies(&self) -> &'static [CacheName] {
        match self {
            CacheName::ArxivInfo => &[CacheName::ArxivFetchedApiInfo],
            _ => &[],
        }
    }
}

impl AsRef<str> for CacheName {
    fn as_ref(&self) -> &str {
        match self {
            Self::ArxivInfo => "arxiv_info",
            Self::ArxivFetchedApiInfo => "arxiv_fetched_api_info",
            Self::DoiOrgFetchedInfo => "doi_org_fetched_info",
            Self::InspireHepFetchedApiInfo => "inspirehep_fetched_api_info",
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// An unknown string was used as a cache name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cache name `{0}`, expected one of: arxiv_info, arxiv_fetched_api_info, doi_org_fetched_info, inspirehep_fetched_api_info")]
pub struct UnknownCacheNameError(String);

impl FromStr for CacheName {
    type Err = UnknownCacheNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|name| name.as_ref() == s)
            .ok_or_else(|| UnknownCacheNameError(s.to_owned()))
    }
}

/// The three-way answer of a cache read.
///
/// [`NeverLookedUp`](Self::NeverLookedUp) covers both a key nobody asked
/// about and a slot that went stale, the two cases being equivalent for
/// callers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheLookup<'a, T> {
    /// No valid slot, the key still needs a fetch.
    NeverLookedUp,
    /// A fetch established that the remote has no such record.
    Missing,
    /// A fetch failed and the error was remembered.
    Failed(&'a FetchError),
    /// The record.
    Found(&'a T),
}

impl<'a, T> CacheLookup<'a, T> {
    /// The record if the lookup hit a [`Found`](Self::Found) slot.
    pub fn found(self) -> Option<&'a T> {
        match self {
            CacheLookup::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Common lifecycle of every cache accessor.
///
/// Accessors are created empty, borrow their namespace from the store in
/// [`initialize`](Self::initialize) and hand it back in
/// [`persist`](Self::persist). An accessor that was never initialized
/// must leave the store alone on persist, otherwise it would clobber the
/// state of a run that did not need it.
pub trait CacheAccessor {
    /// The name, and store namespace, of this cache.
    fn name(&self) -> CacheName;

    /// Takes ownership of the namespace and applies expiry configuration.
    fn initialize(&mut self, store: &mut CacheStore, configs: &CacheConfigs);

    /// Writes the namespace back into the store.
    fn persist(&self, store: &mut CacheStore) -> Result<(), serde_json::Error>;
}
