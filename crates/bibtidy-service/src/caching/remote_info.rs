use std::collections::BTreeSet;
use std::time::Duration;

use super::accessor::{CacheAccessor, CacheLookup, CacheName};
use super::dict::{CacheDict, CachedValue};
use super::error::FetchError;
use super::store::CacheStore;
use super::token::ValidationToken;
use crate::config::CacheConfigs;
use crate::remote::RecordFetcher;

/// A cache of raw records fetched from one remote, keyed by remote id.
///
/// This accessor implements the fetch-then-read protocol: a batched
/// [`fetch`](Self::fetch) that populates slots, followed by any number of
/// synchronous [`get`](Self::get)/[`lookup`](Self::lookup) reads. Slots
/// age out via expiry tokens, the time-to-live comes from the `fetched`
/// cache configuration.
pub struct RemoteInfoCache<F: RecordFetcher> {
    name: CacheName,
    fetcher: F,
    time_valid: Option<Duration>,
    dict: CacheDict<F::Record>,
    initialized: bool,
}

impl<F: RecordFetcher> RemoteInfoCache<F> {
    /// Creates an uninitialized accessor for the given remote.
    pub fn new(name: CacheName, fetcher: F) -> Self {
        Self {
            name,
            fetcher,
            time_valid: None,
            dict: CacheDict::new(),
            initialized: false,
        }
    }

    fn fresh_token(&self) -> ValidationToken {
        ValidationToken::expiry(self.time_valid)
    }

    /// Ensures every given id has a populated slot.
    ///
    /// Ids that already hold a valid slot are skipped; when none are left
    /// this performs no I/O at all, making repeated calls with the same
    /// ids free. Otherwise the missing subset goes to the remote in one
    /// batched call and every attempted id receives a slot: `Found`,
    /// `Missing` for ids the remote does not know, or `Failed` for ids
    /// whose record was unusable. Ids that failed transiently get no slot
    /// and are tried again on the next fetch.
    ///
    /// Returns `Ok(false)` when the whole batch failed recoverably (the
    /// remote was unreachable, say). Nothing is cached in that case and
    /// the run carries on without these records. Rate limiting is not
    /// recoverable and is returned as an error.
    pub async fn fetch(&mut self, ids: &[String]) -> Result<bool, FetchError> {
        let fresh = self.fresh_token();
        let misses: BTreeSet<String> = ids
            .iter()
            .filter(|id| !self.dict.is_valid(id, &fresh))
            .cloned()
            .collect();
        if misses.is_empty() {
            return Ok(true);
        }

        let misses: Vec<String> = misses.into_iter().collect();
        tracing::debug!(
            cache = %self.name,
            remote = self.fetcher.remote_name(),
            count = misses.len(),
            "fetching records"
        );

        let mut results = match self.fetcher.fetch_records(&misses).await {
            Ok(results) => results,
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => {
                tracing::warn!(
                    cache = %self.name,
                    error = %error,
                    "batch fetch failed, records unavailable this run"
                );
                return Ok(false);
            }
        };

        for id in misses {
            let value = match results.remove(&id) {
                Some(Ok(record)) => CachedValue::Found(record),
                Some(Err(error)) if !error.is_persistable() => {
                    tracing::warn!(cache = %self.name, id, error = %error, "record unavailable");
                    continue;
                }
                Some(Err(error)) => {
                    tracing::warn!(cache = %self.name, id, error = %error, "remembering failed record");
                    CachedValue::from_result(Err(error))
                }
                None => CachedValue::Missing,
            };
            self.dict.insert(id, self.fresh_token(), value);
        }
        Ok(true)
    }

    /// The cached record for an id. Pure read, never any I/O.
    pub fn get(&self, id: &str) -> Option<&F::Record> {
        self.lookup(id).found()
    }

    /// The full three-way state of an id. Pure read, never any I/O.
    pub fn lookup(&self, id: &str) -> CacheLookup<'_, F::Record> {
        match self.dict.get_valid(id, &self.fresh_token()) {
            None => CacheLookup::NeverLookedUp,
            Some(CachedValue::Found(record)) => CacheLookup::Found(record),
            Some(CachedValue::Missing) => CacheLookup::Missing,
            Some(CachedValue::Failed(error)) => CacheLookup::Failed(error),
        }
    }
}

impl<F: RecordFetcher> CacheAccessor for RemoteInfoCache<F> {
    fn name(&self) -> CacheName {
        self.name
    }

    fn initialize(&mut self, store: &mut CacheStore, configs: &CacheConfigs) {
        self.time_valid = configs.fetched.time_valid;
        self.dict = store.take_namespace(self.name.as_ref());
        self.initialized = true;
    }

    fn persist(&self, store: &mut CacheStore) -> Result<(), serde_json::Error> {
        if self.initialized {
            store.put_namespace(self.name.as_ref(), &self.dict)?;
        }
        Ok(())
    }
}
