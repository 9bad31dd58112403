use std::collections::BTreeSet;
use std::sync::LazyLock;

use bibtidy_bib::{BibDatabase, Entry};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::accessor::{CacheAccessor, CacheLookup, CacheName};
use super::dict::{CacheDict, CachedValue};
use super::error::FetchError;
use super::remote_info::RemoteInfoCache;
use super::store::CacheStore;
use super::token::{ValidationToken, entry_fingerprint};
use crate::config::CacheConfigs;
use crate::remote::{ArxivRecord, RecordFetcher};

/// The entry fields the derived arXiv info is computed from.
///
/// The fingerprint token covers exactly these (plus the entry type), so
/// editing any of them invalidates the slot while edits elsewhere in the
/// entry leave it untouched.
const WATCHED_FIELDS: &[&str] = &[
    "eprint",
    "archiveprefix",
    "primaryclass",
    "arxivid",
    "doi",
    "note",
    "url",
    "journal",
];

/// An eprint field value: an optional `arXiv:` prefix, then a new-style
/// (`1203.1234`) or old-style (`hep-th/9901001`) id, then an optional
/// version suffix.
static EPRINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:arxiv:)?(\d{4}\.\d{4,5}|[a-z-]+(?:\.[a-z]{2})?/\d{7})(?:v(\d+))?\s*$")
        .unwrap()
});

/// An arXiv id referenced in running text or a URL. Unlike [`EPRINT_RE`]
/// this requires an explicit `arXiv:` or `arxiv.org/abs/` marker so that
/// stray numbers in a note are not misread as ids.
static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:arxiv:|arxiv\.org/abs/)(\d{4}\.\d{4,5}|[a-z-]+(?:\.[a-z]{2})?/\d{7})(?:v(\d+))?")
        .unwrap()
});

/// The derived arXiv information of one bibliography entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArxivInfo {
    /// The arXiv id, without version suffix.
    pub arxivid: String,
    /// The version pinned by the entry or reported by the API.
    pub version: Option<u32>,
    /// The primary classification, e.g. `hep-th`.
    pub primary_class: Option<String>,
    /// The DOI of the published version, if known.
    pub doi: Option<String>,
    /// Whether the record has appeared in a journal.
    pub published: bool,
    /// Whether the export API confirmed this record.
    ///
    /// `false` means the info rests solely on what the entry itself
    /// claims, either because the API does not know the id or because the
    /// API was unreachable this run.
    pub api_confirmed: bool,
}

/// What the entry's own fields claim about its arXiv identity.
#[derive(Debug, Default, PartialEq)]
struct DetectedId {
    arxivid: Option<String>,
    version: Option<u32>,
    primary_class: Option<String>,
    doi: Option<String>,
}

fn detect(entry: &Entry) -> DetectedId {
    let mut detected = DetectedId {
        doi: entry.field("doi").map(str::to_owned),
        primary_class: entry.field("primaryclass").map(str::to_owned),
        ..Default::default()
    };

    for field in ["eprint", "arxivid"] {
        if let Some(captures) = entry.field(field).and_then(|value| EPRINT_RE.captures(value)) {
            detected.arxivid = Some(captures[1].to_owned());
            detected.version = captures.get(2).and_then(|v| v.as_str().parse().ok());
            return detected;
        }
    }
    for field in ["url", "note"] {
        if let Some(captures) = entry
            .field(field)
            .and_then(|value| REFERENCE_RE.captures(value))
        {
            detected.arxivid = Some(captures[1].to_owned());
            detected.version = captures.get(2).and_then(|v| v.as_str().parse().ok());
            return detected;
        }
    }
    detected
}

/// The derived per-entry arXiv cache, layered on the raw fetch cache.
///
/// Keys are bibliography entry keys; slots carry fingerprint tokens over
/// the [`WATCHED_FIELDS`], so the cache survives any number of runs until
/// the relevant part of an entry is edited.
#[derive(Default)]
pub struct ArxivInfoCache {
    dict: CacheDict<ArxivInfo>,
    initialized: bool,
}

impl ArxivInfoCache {
    /// Creates an uninitialized accessor.
    pub fn new() -> Self {
        Self::default()
    }

    fn token_for(entry: &Entry) -> ValidationToken {
        entry_fingerprint(entry, WATCHED_FIELDS, true)
    }

    /// Completes the cache for every entry of the database.
    ///
    /// Runs in two phases: one local pass over all entries whose slot is
    /// absent or stale, deriving their claimed arXiv ids from entry
    /// fields; then a single batched fetch of the union of those ids
    /// through the raw cache, and a fill-in pass combining local claims
    /// with what the API answered.
    ///
    /// Calling this again without editing any entry is free: every slot
    /// validates against its fingerprint and both phases have nothing to
    /// do. After an edit, only the affected entries are recomputed.
    pub async fn complete_cache<F>(
        &mut self,
        bib: &BibDatabase,
        raw: &mut RemoteInfoCache<F>,
    ) -> Result<(), FetchError>
    where
        F: RecordFetcher<Record = ArxivRecord>,
    {
        let mut pending = Vec::new();
        let mut wanted_ids = BTreeSet::new();

        for (key, entry) in bib.entries() {
            let token = Self::token_for(entry);
            // Failed slots (written by older versions of the cache file)
            // are re-derived every run; a fingerprint token would
            // otherwise pin the failure until the entry is edited.
            match self.dict.get_valid(key, &token) {
                Some(CachedValue::Found(_) | CachedValue::Missing) => continue,
                Some(CachedValue::Failed(_)) | None => {}
            }
            let detected = detect(entry);
            if let Some(arxivid) = &detected.arxivid {
                wanted_ids.insert(arxivid.clone());
            }
            pending.push((key.to_owned(), token, detected));
        }

        if pending.is_empty() {
            return Ok(());
        }

        let wanted_ids: Vec<String> = wanted_ids.into_iter().collect();
        if !wanted_ids.is_empty() {
            raw.fetch(&wanted_ids).await?;
        }

        for (key, token, detected) in pending {
            let DetectedId {
                arxivid,
                version,
                primary_class,
                doi,
            } = detected;
            let Some(arxivid) = arxivid else {
                self.dict.insert(key, token, CachedValue::Missing);
                continue;
            };

            let value = match raw.lookup(&arxivid) {
                CacheLookup::Found(record) => CachedValue::Found(ArxivInfo {
                    arxivid: record.arxivid.clone(),
                    version: version.or(record.version),
                    primary_class: record.primary_class.clone().or(primary_class),
                    published: record.doi.is_some()
                        || record.journal_ref.is_some()
                        || doi.is_some(),
                    doi: record.doi.clone().or(doi),
                    api_confirmed: true,
                }),
                CacheLookup::Missing => {
                    tracing::warn!(key, arxivid, "entry claims an arXiv id the API does not know");
                    CachedValue::Found(ArxivInfo {
                        arxivid,
                        version,
                        primary_class,
                        published: doi.is_some(),
                        doi,
                        api_confirmed: false,
                    })
                }
                CacheLookup::Failed(error) => {
                    // Not written through: the fingerprint token would pin
                    // the failure until the entry is edited. The raw cache
                    // keeps its own expiring failure marker, so the next
                    // run re-derives this entry without re-fetching until
                    // that marker ages out.
                    tracing::warn!(key, arxivid, error = %error, "arXiv record unusable");
                    continue;
                }
                CacheLookup::NeverLookedUp => {
                    // The batch fetch failed recoverably, or the raw slot
                    // already expired again (a zero or very short TTL).
                    // Leave these slots unwritten so the next run retries
                    // the API.
                    continue;
                }
            };
            self.dict.insert(key, token, value);
        }

        Ok(())
    }

    /// Re-derives info for entries whose watched fields changed.
    ///
    /// This is [`complete_cache`](Self::complete_cache): per-slot
    /// fingerprint validation already restricts the work to stale
    /// entries, so revalidation needs no separate mechanism.
    pub async fn revalidate<F>(
        &mut self,
        bib: &BibDatabase,
        raw: &mut RemoteInfoCache<F>,
    ) -> Result<(), FetchError>
    where
        F: RecordFetcher<Record = ArxivRecord>,
    {
        self.complete_cache(bib, raw).await
    }

    /// The derived info for an entry key.
    ///
    /// Pure read; meant to be called after
    /// [`complete_cache`](Self::complete_cache) in the same run, which
    /// guarantees every slot is current. `None` for entries without an
    /// arXiv identity, with an unusable raw record, or never completed.
    pub fn get(&self, key: &str) -> Option<&ArxivInfo> {
        // Tokens are validated at completion time against the live entry,
        // a read afterwards must not re-require the entry.
        self.dict.get(key)?.found()
    }
}

impl CacheAccessor for ArxivInfoCache {
    fn name(&self) -> CacheName {
        CacheName::ArxivInfo
    }

    fn initialize(&mut self, store: &mut CacheStore, _configs: &CacheConfigs) {
        self.dict = store.take_namespace(self.name().as_ref());
        self.initialized = true;
    }

    fn persist(&self, store: &mut CacheStore) -> Result<(), serde_json::Error> {
        if self.initialized {
            store.put_namespace(self.name().as_ref(), &self.dict)?;
        }
        Ok(())
    }
}
