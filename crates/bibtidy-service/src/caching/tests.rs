use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bibtidy_bib::{BibDatabase, Entry};

use super::*;
use crate::config::{CacheConfigs, FetchedCacheConfig};
use crate::remote::{ArxivRecord, DoiRecord, FetchedRecords, InspireRecord, RecordFetcher};

/// Observable side of a [`MockFetcher`], shared with the test body.
#[derive(Default)]
struct MockState {
    /// Number of `fetch_records` invocations.
    calls: AtomicUsize,
    /// Every id the mock got around to processing, across all calls.
    attempted: Mutex<Vec<String>>,
}

impl MockState {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn attempted(&self) -> Vec<String> {
        self.attempted.lock().unwrap().clone()
    }
}

/// A scripted arXiv remote: known records, per-id failures, and an
/// optional id at which the whole batch rate-limits, processing ids in
/// the order given like the real sequential fetchers do.
#[derive(Default)]
struct MockFetcher {
    state: Arc<MockState>,
    records: BTreeMap<String, ArxivRecord>,
    failures: BTreeMap<String, FetchError>,
    batch_failure: Option<FetchError>,
    rate_limit_at: Option<String>,
}

impl MockFetcher {
    fn with_record(mut self, id: &str) -> Self {
        self.records.insert(
            id.to_owned(),
            ArxivRecord {
                arxivid: id.to_owned(),
                title: format!("Record {id}"),
                primary_class: Some("hep-th".to_owned()),
                ..Default::default()
            },
        );
        self
    }

    fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

#[async_trait::async_trait]
impl RecordFetcher for MockFetcher {
    type Record = ArxivRecord;

    fn remote_name(&self) -> &'static str {
        "mock"
    }

    async fn fetch_records(
        &self,
        ids: &[String],
    ) -> Result<FetchedRecords<ArxivRecord>, FetchError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.batch_failure {
            return Err(error.clone());
        }

        let mut records = FetchedRecords::new();
        for id in ids {
            if self.rate_limit_at.as_deref() == Some(id.as_str()) {
                return Err(FetchError::RateLimited("scripted rate limit".into()));
            }
            self.state.attempted.lock().unwrap().push(id.clone());

            if let Some(error) = self.failures.get(id) {
                records.insert(id.clone(), Err(error.clone()));
            } else if let Some(record) = self.records.get(id) {
                records.insert(id.clone(), Ok(record.clone()));
            }
            // ids in neither map stay absent, i.e. unknown to the remote
        }
        Ok(records)
    }
}

/// A scripted remote with a fixed record set, generic over the record
/// type; ids outside the set are unknown to the remote.
struct StaticFetcher<R> {
    remote: &'static str,
    state: Arc<MockState>,
    records: BTreeMap<String, R>,
}

impl<R> StaticFetcher<R> {
    fn new(remote: &'static str, records: BTreeMap<String, R>) -> Self {
        Self {
            remote,
            state: Arc::default(),
            records,
        }
    }

    fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

#[async_trait::async_trait]
impl<R> RecordFetcher for StaticFetcher<R>
where
    R: Clone + PartialEq + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    type Record = R;

    fn remote_name(&self) -> &'static str {
        self.remote
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<FetchedRecords<R>, FetchError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .iter()
            .filter_map(|id| Some((id.clone(), Ok(self.records.get(id)?.clone()))))
            .collect())
    }
}

fn configs() -> CacheConfigs {
    CacheConfigs::default()
}

fn raw_cache(fetcher: MockFetcher) -> RemoteInfoCache<MockFetcher> {
    raw_cache_with(fetcher, configs())
}

fn raw_cache_with(fetcher: MockFetcher, configs: CacheConfigs) -> RemoteInfoCache<MockFetcher> {
    let mut cache = RemoteInfoCache::new(CacheName::ArxivFetchedApiInfo, fetcher);
    let mut store = CacheStore::empty("unused.cache.json");
    cache.initialize(&mut store, &configs);
    cache
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| (*id).to_owned()).collect()
}

fn bib_with_eprints(entries: &[(&str, &str)]) -> BibDatabase {
    let mut bib = BibDatabase::new();
    for (key, eprint) in entries {
        let mut entry = Entry::new("article");
        entry.set_field("eprint", *eprint);
        bib.insert(*key, entry);
    }
    bib
}

#[tokio::test]
async fn test_fetch_is_idempotent() {
    let fetcher = MockFetcher::default().with_record("1203.1234");
    let state = fetcher.state();
    let mut cache = raw_cache(fetcher);

    assert!(cache.fetch(&ids(&["1203.1234", "9999.00001"])).await.unwrap());
    assert_eq!(state.calls(), 1);
    assert_eq!(cache.get("1203.1234").unwrap().arxivid, "1203.1234");

    // Same key set again: everything has a valid slot, zero remote calls.
    assert!(cache.fetch(&ids(&["1203.1234", "9999.00001"])).await.unwrap());
    assert_eq!(state.calls(), 1);
}

#[tokio::test]
async fn test_negative_caching_roundtrips_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refs.cache.json");

    {
        let fetcher = MockFetcher::default();
        let mut cache = RemoteInfoCache::new(CacheName::ArxivFetchedApiInfo, fetcher);
        let mut store = CacheStore::load(&path);
        cache.initialize(&mut store, &configs());

        cache.fetch(&ids(&["9999.00001"])).await.unwrap();
        assert_eq!(cache.lookup("9999.00001"), CacheLookup::Missing);

        cache.persist(&mut store).unwrap();
        store.save().unwrap();
    }

    // A second run must remember the negative answer without fetching.
    let fetcher = MockFetcher::default();
    let state = fetcher.state();
    let mut cache = RemoteInfoCache::new(CacheName::ArxivFetchedApiInfo, fetcher);
    let mut store = CacheStore::load(&path);
    cache.initialize(&mut store, &configs());

    assert_eq!(cache.lookup("9999.00001"), CacheLookup::Missing);
    assert_eq!(cache.lookup("never-asked"), CacheLookup::NeverLookedUp);

    cache.fetch(&ids(&["9999.00001"])).await.unwrap();
    assert_eq!(state.calls(), 0);
}

#[tokio::test]
async fn test_failure_markers_are_remembered() {
    let mut fetcher = MockFetcher::default();
    fetcher.failures.insert(
        "1203.1234".to_owned(),
        FetchError::Malformed("feed entry without a title".into()),
    );
    let state = fetcher.state();
    let mut cache = raw_cache(fetcher);

    cache.fetch(&ids(&["1203.1234"])).await.unwrap();
    cache.fetch(&ids(&["1203.1234"])).await.unwrap();
    assert_eq!(state.calls(), 1);
    assert!(matches!(
        cache.lookup("1203.1234"),
        CacheLookup::Failed(FetchError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_expired_slot_is_refetched() {
    let fetcher = MockFetcher::default().with_record("1203.1234");
    let state = fetcher.state();
    let configs = CacheConfigs {
        fetched: FetchedCacheConfig {
            time_valid: Some(Duration::ZERO),
        },
    };
    let mut cache = raw_cache_with(fetcher, configs);

    cache.fetch(&ids(&["1203.1234"])).await.unwrap();
    assert_eq!(cache.lookup("1203.1234"), CacheLookup::NeverLookedUp);

    cache.fetch(&ids(&["1203.1234"])).await.unwrap();
    assert_eq!(state.calls(), 2);
}

#[tokio::test]
async fn test_recoverable_batch_failure_caches_nothing() {
    let mut fetcher = MockFetcher::default().with_record("1203.1234");
    fetcher.batch_failure = Some(FetchError::Download("connection reset".into()));
    let state = fetcher.state();
    let mut cache = raw_cache(fetcher);

    assert!(!cache.fetch(&ids(&["1203.1234"])).await.unwrap());
    assert_eq!(cache.lookup("1203.1234"), CacheLookup::NeverLookedUp);

    // The next fetch tries the remote again.
    assert!(!cache.fetch(&ids(&["1203.1234"])).await.unwrap());
    assert_eq!(state.calls(), 2);
}

#[tokio::test]
async fn test_rate_limit_stops_the_batch_at_the_failing_key() {
    let mut fetcher = MockFetcher::default().with_record("a.1").with_record("c.3");
    fetcher.rate_limit_at = Some("b.2".to_owned());
    let state = fetcher.state();
    let mut cache = raw_cache(fetcher);

    let error = cache.fetch(&ids(&["a.1", "b.2", "c.3"])).await.unwrap_err();
    assert!(error.is_fatal());

    // "a.1" was attempted before the limit hit, "c.3" never was; the
    // rate-limited call leaves no slots behind at all.
    assert_eq!(state.attempted(), ids(&["a.1"]));
    assert_eq!(cache.lookup("a.1"), CacheLookup::NeverLookedUp);
    assert_eq!(cache.lookup("c.3"), CacheLookup::NeverLookedUp);
}

#[tokio::test]
async fn test_batched_completion_issues_one_call() {
    let fetcher = MockFetcher::default()
        .with_record("1203.1234")
        .with_record("1204.5678")
        .with_record("hep-th/9901001");
    let state = fetcher.state();
    let mut raw = raw_cache(fetcher);
    let mut derived = ArxivInfoCache::new();

    let bib = bib_with_eprints(&[
        ("A", "1203.1234"),
        ("B", "1204.5678"),
        ("C", "hep-th/9901001"),
        ("D", "1203.1234"), // duplicate id must not be fetched twice
    ]);

    derived.complete_cache(&bib, &mut raw).await.unwrap();
    assert_eq!(state.calls(), 1);
    assert_eq!(
        state.attempted(),
        ids(&["1203.1234", "1204.5678", "hep-th/9901001"])
    );
}

#[tokio::test]
async fn test_complete_then_get_then_idempotent() {
    let fetcher = MockFetcher::default().with_record("1203.1234");
    let state = fetcher.state();
    let mut raw = raw_cache(fetcher);
    let mut derived = ArxivInfoCache::new();

    let bib = bib_with_eprints(&[("A", "1203.1234")]);
    derived.complete_cache(&bib, &mut raw).await.unwrap();

    let info = derived.get("A").unwrap();
    assert_eq!(info.arxivid, "1203.1234");
    assert_eq!(info.primary_class.as_deref(), Some("hep-th"));
    assert!(info.api_confirmed);

    derived.complete_cache(&bib, &mut raw).await.unwrap();
    assert_eq!(state.calls(), 1);
}

#[tokio::test]
async fn test_field_edit_invalidates_only_that_entry() {
    let fetcher = MockFetcher::default()
        .with_record("1203.1234")
        .with_record("1204.5678")
        .with_record("1205.0001");
    let state = fetcher.state();
    let mut raw = raw_cache(fetcher);
    let mut derived = ArxivInfoCache::new();

    let mut bib = bib_with_eprints(&[("A", "1203.1234"), ("B", "1204.5678")]);
    derived.complete_cache(&bib, &mut raw).await.unwrap();
    assert_eq!(state.calls(), 1);

    // Untouched database: revalidation is free.
    derived.revalidate(&bib, &mut raw).await.unwrap();
    assert_eq!(state.calls(), 1);

    // Editing a watched field of A re-derives A; B stays cached.
    bib.get_mut("A").unwrap().set_field("eprint", "1205.0001");
    derived.revalidate(&bib, &mut raw).await.unwrap();
    assert_eq!(state.calls(), 2);
    assert_eq!(state.attempted().last().map(String::as_str), Some("1205.0001"));
    assert_eq!(derived.get("A").unwrap().arxivid, "1205.0001");
    assert_eq!(derived.get("B").unwrap().arxivid, "1204.5678");

    // Editing an unwatched field changes nothing.
    bib.get_mut("B").unwrap().set_field("abstract", "irrelevant");
    derived.revalidate(&bib, &mut raw).await.unwrap();
    assert_eq!(state.calls(), 2);
}

#[tokio::test]
async fn test_entries_without_arxiv_identity_are_negative() {
    let fetcher = MockFetcher::default();
    let state = fetcher.state();
    let mut raw = raw_cache(fetcher);
    let mut derived = ArxivInfoCache::new();

    let mut bib = BibDatabase::new();
    let mut entry = Entry::new("book");
    entry.set_field("title", "A Book Without Preprint");
    bib.insert("B", entry);

    derived.complete_cache(&bib, &mut raw).await.unwrap();
    // Nothing to fetch, and the negative derivation is cached.
    assert_eq!(state.calls(), 0);
    assert_eq!(derived.get("B"), None);

    derived.complete_cache(&bib, &mut raw).await.unwrap();
    assert_eq!(state.calls(), 0);
}

#[tokio::test]
async fn test_transient_failure_is_not_persisted() {
    let mut fetcher = MockFetcher::default();
    fetcher.failures.insert(
        "1203.1234".to_owned(),
        FetchError::Timeout(Duration::from_secs(30)),
    );
    let state = fetcher.state();
    let mut cache = raw_cache(fetcher);

    assert!(cache.fetch(&ids(&["1203.1234"])).await.unwrap());
    // Unavailable this run, but no slot: the next fetch tries again.
    assert_eq!(cache.lookup("1203.1234"), CacheLookup::NeverLookedUp);

    assert!(cache.fetch(&ids(&["1203.1234"])).await.unwrap());
    assert_eq!(state.calls(), 2);
}

#[tokio::test]
async fn test_zero_ttl_completion_degrades_to_a_retry() {
    let fetcher = MockFetcher::default().with_record("1203.1234");
    let state = fetcher.state();
    let configs = CacheConfigs {
        fetched: FetchedCacheConfig {
            time_valid: Some(Duration::ZERO),
        },
    };
    let mut raw = raw_cache_with(fetcher, configs);
    let mut derived = ArxivInfoCache::new();

    let bib = bib_with_eprints(&[("A", "1203.1234")]);
    derived.complete_cache(&bib, &mut raw).await.unwrap();

    // The raw slot expires as soon as it is written, so the derived info
    // stays unwritten and the next completion tries the API again.
    assert_eq!(derived.get("A"), None);
    assert_eq!(state.calls(), 1);

    derived.complete_cache(&bib, &mut raw).await.unwrap();
    assert_eq!(state.calls(), 2);
}

#[tokio::test]
async fn test_unusable_record_recovers_once_the_raw_marker_expires() {
    let mut fetcher = MockFetcher::default();
    fetcher.failures.insert(
        "1203.1234".to_owned(),
        FetchError::Malformed("truncated feed".into()),
    );
    let mut raw = raw_cache(fetcher);
    let mut derived = ArxivInfoCache::new();
    let bib = bib_with_eprints(&[("A", "1203.1234")]);

    derived.complete_cache(&bib, &mut raw).await.unwrap();
    assert_eq!(derived.get("A"), None);

    // A later run in which the raw failure marker has aged out and the
    // fetch succeeds: the derived layer must not have pinned the failure.
    let fetcher = MockFetcher::default().with_record("1203.1234");
    let state = fetcher.state();
    let mut raw = raw_cache(fetcher);
    derived.complete_cache(&bib, &mut raw).await.unwrap();
    assert_eq!(state.calls(), 1);
    assert_eq!(derived.get("A").unwrap().arxivid, "1203.1234");
}

#[tokio::test]
async fn test_doi_records_flow_through_the_cache() {
    let record = DoiRecord {
        doi: "10.1103/physrevx.1.1".to_owned(),
        title: Some("On the Normalization of References".to_owned()),
        ..Default::default()
    };
    let fetcher = StaticFetcher::new(
        "doi.org",
        BTreeMap::from([("10.1103/physrevx.1.1".to_owned(), record)]),
    );
    let state = fetcher.state();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refs.cache.json");
    let mut store = CacheStore::load(&path);
    let mut cache = RemoteInfoCache::new(CacheName::DoiOrgFetchedInfo, fetcher);
    cache.initialize(&mut store, &configs());

    assert!(
        cache
            .fetch(&ids(&["10.1103/physrevx.1.1", "10.1/unknown"]))
            .await
            .unwrap()
    );
    assert_eq!(
        cache.get("10.1103/physrevx.1.1").unwrap().title.as_deref(),
        Some("On the Normalization of References")
    );
    assert_eq!(cache.lookup("10.1/unknown"), CacheLookup::Missing);

    // Everything has a slot now, repeating the fetch is free.
    assert!(
        cache
            .fetch(&ids(&["10.1103/physrevx.1.1", "10.1/unknown"]))
            .await
            .unwrap()
    );
    assert_eq!(state.calls(), 1);

    cache.persist(&mut store).unwrap();
    store.save().unwrap();
    let saved: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert!(saved.get("doi_org_fetched_info").is_some());
}

#[tokio::test]
async fn test_inspire_records_flow_through_the_cache() {
    let record = InspireRecord {
        texkey: Some("Curie:2012abc".to_owned()),
        title: None,
        citation_count: Some(41),
    };
    let fetcher = StaticFetcher::new(
        "inspirehep",
        BTreeMap::from([("1203.1234".to_owned(), record)]),
    );
    let state = fetcher.state();
    let mut cache = RemoteInfoCache::new(CacheName::InspireHepFetchedApiInfo, fetcher);
    let mut store = CacheStore::empty("unused.cache.json");
    cache.initialize(&mut store, &configs());

    assert!(cache.fetch(&ids(&["1203.1234"])).await.unwrap());
    assert_eq!(
        cache.get("1203.1234").unwrap().texkey.as_deref(),
        Some("Curie:2012abc")
    );

    assert!(cache.fetch(&ids(&["1203.1234"])).await.unwrap());
    assert_eq!(state.calls(), 1);
}

#[tokio::test]
async fn test_accessors_container_initializes_dependencies() {
    let mut accessors = CacheAccessors::with_fetchers(
        Box::new(MockFetcher::default().with_record("1203.1234")),
        Box::new(crate::remote::DoiFetcher::new(
            reqwest::Client::new(),
            &crate::config::FetchConfig::default(),
        )),
        Box::new(crate::remote::InspireFetcher::new(
            reqwest::Client::new(),
            &crate::config::FetchConfig::default(),
        )),
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refs.cache.json");
    let mut store = CacheStore::load(&path);

    // Asking for the derived cache alone must bring up its raw dependency.
    accessors.initialize(&[CacheName::ArxivInfo], &mut store, &configs());

    let bib = bib_with_eprints(&[("A", "1203.1234")]);
    let CacheAccessors {
        arxiv_fetched,
        arxiv_info,
        ..
    } = &mut accessors;
    arxiv_info.complete_cache(&bib, arxiv_fetched).await.unwrap();
    assert_eq!(arxiv_info.get("A").unwrap().arxivid, "1203.1234");

    accessors.persist_all(&mut store).unwrap();
    store.save().unwrap();

    let saved: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert!(saved.get("arxiv_info").is_some());
    assert!(saved.get("arxiv_fetched_api_info").is_some());
    // The uninitialized accessors must not have written empty namespaces.
    assert!(saved.get("doi_org_fetched_info").is_none());
}
