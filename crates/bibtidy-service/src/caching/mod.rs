//! The caching subsystem, the heart of the tool.
//!
//! Every network lookup is mediated by a cache accessor. Accessors follow
//! a *fetch-then-read* protocol: a filter first asks its accessor to
//! complete the cache for everything it will need (one batched, awaited
//! operation), then reads synchronously while rewriting entries. Reads
//! never trigger I/O.
//!
//! # Slots and tokens
//!
//! A cache is a keyed dictionary of slots ([`CacheDict`]). Each slot
//! stores the outcome of one lookup ([`CachedValue`]) together with the
//! [`ValidationToken`] captured when it was written. Validation is lazy:
//! nothing is evicted, a slot whose token no longer validates is simply
//! treated as absent and recomputed on the next fetch.
//!
//! Raw fetch caches use expiry tokens (records age out after the
//! configured `time_valid`), the derived per-entry cache uses content
//! fingerprints (a slot goes stale exactly when the watched fields of its
//! entry are edited).
//!
//! # Negative caching and error markers
//!
//! "The remote does not know this id" is itself a cacheable fact, stored
//! as [`CachedValue::Missing`] and distinct from a key that was never
//! looked up. Persistable fetch failures are stored as
//! [`CachedValue::Failed`] markers carrying their [`FetchError`], so a
//! broken record does not get re-fetched on every run. Transient errors,
//! rate limiting, and internal errors are never persisted, see
//! [`FetchError::is_persistable`].
//!
//! # Persistence
//!
//! All caches of a run share one [`CacheStore`], a single JSON file next
//! to the bibliography. Each accessor owns one namespace in it; unclaimed
//! namespaces ride along untouched. The store is written atomically and
//! is always saved at the end of a run, even when the pipeline aborts on
//! rate limiting, so whatever was fetched until then is kept.

use anyhow::Context;

mod accessor;
mod arxiv_info;
mod dict;
mod error;
mod remote_info;
mod store;
mod token;

#[cfg(test)]
mod tests;

pub use accessor::{CacheAccessor, CacheLookup, CacheName, UnknownCacheNameError};
pub use arxiv_info::{ArxivInfo, ArxivInfoCache};
pub use dict::{CacheDict, CacheSlot, CachedValue};
pub use error::FetchError;
pub use remote_info::RemoteInfoCache;
pub use store::CacheStore;
pub use token::{FingerprintBuilder, ValidationToken, entry_fingerprint};

use std::collections::BTreeSet;

use crate::config::{CacheConfigs, Config};
use crate::remote::{
    ArxivFetcher, ArxivRecord, DoiFetcher, DoiRecord, DynFetcher, InspireFetcher, InspireRecord,
    create_client,
};

/// The set of all cache accessors of one run.
///
/// This is the explicit registry the pipeline resolves once at setup and
/// injects into every filter; filters declare which caches they need by
/// [`CacheName`] and only those get initialized.
pub struct CacheAccessors {
    /// Raw records from the arXiv export API.
    pub arxiv_fetched: RemoteInfoCache<DynFetcher<ArxivRecord>>,
    /// Raw CSL records from doi.org.
    pub doi_fetched: RemoteInfoCache<DynFetcher<DoiRecord>>,
    /// Raw records from the INSPIRE-HEP API.
    pub inspire_fetched: RemoteInfoCache<DynFetcher<InspireRecord>>,
    /// Derived per-entry arXiv info.
    pub arxiv_info: ArxivInfoCache,
}

impl CacheAccessors {
    /// Creates the accessors with real fetchers sharing one HTTP client.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = create_client(&config.fetch).context("failed to create HTTP client")?;
        Ok(Self::with_fetchers(
            Box::new(ArxivFetcher::new(client.clone(), &config.fetch)),
            Box::new(DoiFetcher::new(client.clone(), &config.fetch)),
            Box::new(InspireFetcher::new(client, &config.fetch)),
        ))
    }

    /// Creates the accessors over the given fetchers.
    pub fn with_fetchers(
        arxiv: DynFetcher<ArxivRecord>,
        doi: DynFetcher<DoiRecord>,
        inspire: DynFetcher<InspireRecord>,
    ) -> Self {
        Self {
            arxiv_fetched: RemoteInfoCache::new(CacheName::ArxivFetchedApiInfo, arxiv),
            doi_fetched: RemoteInfoCache::new(CacheName::DoiOrgFetchedInfo, doi),
            inspire_fetched: RemoteInfoCache::new(CacheName::InspireHepFetchedApiInfo, inspire),
            arxiv_info: ArxivInfoCache::new(),
        }
    }

    /// Initializes the required caches, plus their dependencies, in
    /// dependency order.
    pub fn initialize(
        &mut self,
        required: &[CacheName],
        store: &mut CacheStore,
        configs: &CacheConfigs,
    ) {
        let mut wanted: BTreeSet<CacheName> = required.iter().copied().collect();
        for name in required {
            wanted.extend(name.dependencies());
        }

        for name in CacheName::ALL.iter().filter(|name| wanted.contains(*name)) {
            self.accessor_mut(*name).initialize(store, configs);
        }
    }

    /// Hands every initialized cache's namespace back to the store.
    pub fn persist_all(&self, store: &mut CacheStore) -> Result<(), serde_json::Error> {
        for name in CacheName::ALL {
            self.accessor(*name).persist(store)?;
        }
        Ok(())
    }

    fn accessor(&self, name: CacheName) -> &dyn CacheAccessor {
        match name {
            CacheName::ArxivInfo => &self.arxiv_info,
            CacheName::ArxivFetchedApiInfo => &self.arxiv_fetched,
            CacheName::DoiOrgFetchedInfo => &self.doi_fetched,
            CacheName::InspireHepFetchedApiInfo => &self.inspire_fetched,
        }
    }

    /// Accessors over real fetchers that are never called; for tests that
    /// only need the container.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let config = crate::config::FetchConfig::default();
        let client = reqwest::Client::new();
        Self::with_fetchers(
            Box::new(ArxivFetcher::new(client.clone(), &config)),
            Box::new(DoiFetcher::new(client.clone(), &config)),
            Box::new(InspireFetcher::new(client, &config)),
        )
    }

    fn accessor_mut(&mut self, name: CacheName) -> &mut dyn CacheAccessor {
        match name {
            CacheName::ArxivInfo => &mut self.arxiv_info,
            CacheName::ArxivFetchedApiInfo => &mut self.arxiv_fetched,
            CacheName::DoiOrgFetchedInfo => &mut self.doi_fetched,
            CacheName::InspireHepFetchedApiInfo => &mut self.inspire_fetched,
        }
    }
}
