//! Fetcher for the arXiv export API.
//!
//! The export API answers a single batched query
//! (`/api/query?id_list=a,b,c`) with an Atom feed containing one `<entry>`
//! per resolved id. Ids the API does not know are simply absent from the
//! feed (or come back as an error pseudo-entry without a parseable id).

use reqwest::Client;
use serde::{Deserialize, Serialize};

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{FetchedRecords, RecordFetcher, error_for_status, retry};
use crate::caching::FetchError;
use crate::config::FetchConfig;

const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

/// The raw metadata of one arXiv record, as returned by the export API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArxivRecord {
    /// The canonical arXiv id, without version suffix.
    pub arxivid: String,
    /// The version the API resolved to, if the feed carried one.
    pub version: Option<u32>,
    /// The record title, whitespace-normalized.
    pub title: String,
    /// The primary classification, e.g. `hep-th`.
    pub primary_class: Option<String>,
    /// The DOI of the published version, if any.
    pub doi: Option<String>,
    /// The journal reference of the published version, if any.
    pub journal_ref: Option<String>,
}

/// Fetches record batches from the arXiv export API.
pub struct ArxivFetcher {
    client: Client,
    api_url: String,
}

impl ArxivFetcher {
    /// Creates a fetcher talking to the public export API.
    pub fn new(client: Client, _config: &FetchConfig) -> Self {
        Self {
            client,
            api_url: ARXIV_API_URL.to_owned(),
        }
    }
}

#[async_trait::async_trait]
impl RecordFetcher for ArxivFetcher {
    type Record = ArxivRecord;

    fn remote_name(&self) -> &'static str {
        "arxiv"
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<FetchedRecords<ArxivRecord>, FetchError> {
        let url = format!(
            "{}?id_list={}&max_results={}",
            self.api_url,
            ids.join(","),
            ids.len()
        );

        let body = retry(|| async {
            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(error_for_status("arxiv", &response));
            }
            Ok(response.text().await?)
        })
        .await?;

        let mut records = FetchedRecords::new();
        for (id, parsed) in parse_atom_feed(&body)? {
            records.insert(id, parsed);
        }
        Ok(records)
    }
}

#[derive(Default)]
struct EntryBuilder {
    id: Option<String>,
    title: String,
    primary_class: Option<String>,
    doi: Option<String>,
    journal_ref: Option<String>,
}

enum TextField {
    Id,
    Title,
    Doi,
    JournalRef,
}

impl EntryBuilder {
    fn push_text(&mut self, field: &TextField, text: &str) {
        match field {
            TextField::Id => *self.id.get_or_insert_default() += text,
            TextField::Title => {
                if !self.title.is_empty() {
                    self.title.push(' ');
                }
                self.title.push_str(text);
            }
            TextField::Doi => *self.doi.get_or_insert_default() += text,
            TextField::JournalRef => *self.journal_ref.get_or_insert_default() += text,
        }
    }

    fn finish(self) -> Option<(String, Result<ArxivRecord, FetchError>)> {
        // Error pseudo-entries have an `/api/errors` id and no usable key.
        let (arxivid, version) = split_versioned_id(self.id.as_deref()?)?;

        let result = if self.title.is_empty() {
            Err(FetchError::Malformed("feed entry without a title".into()))
        } else {
            Ok(ArxivRecord {
                arxivid: arxivid.clone(),
                version,
                title: normalize_whitespace(&self.title),
                primary_class: self.primary_class,
                doi: self.doi,
                journal_ref: self.journal_ref,
            })
        };
        Some((arxivid, result))
    }
}

/// Extracts `("1203.1234", Some(2))` from an entry id like
/// `http://arxiv.org/abs/1203.1234v2`. Old-style ids (`hep-th/9901001`)
/// contain a slash and are handled the same way.
fn split_versioned_id(id_url: &str) -> Option<(String, Option<u32>)> {
    let (_, id) = id_url.split_once("/abs/")?;
    match id.rsplit_once('v') {
        Some((base, version)) if !base.is_empty() && !version.is_empty() => {
            match version.parse::<u32>() {
                Ok(version) => Some((base.to_owned(), Some(version))),
                Err(_) => Some((id.to_owned(), None)),
            }
        }
        _ => Some((id.to_owned(), None)),
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses an Atom feed into per-id results, keyed by unversioned arXiv id.
fn parse_atom_feed(xml: &str) -> Result<Vec<(String, Result<ArxivRecord, FetchError>)>, FetchError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut field: Option<TextField> = None;

    loop {
        match reader.read_event() {
            Err(error) => {
                return Err(FetchError::Malformed(format!("invalid Atom feed: {error}")));
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) => {
                field = None;
                match start.local_name().as_ref() {
                    b"entry" => entry = Some(EntryBuilder::default()),
                    // Feed-level <id> and <title> exist too, only capture
                    // text while inside an entry.
                    b"id" if entry.is_some() => field = Some(TextField::Id),
                    b"title" if entry.is_some() => field = Some(TextField::Title),
                    b"doi" if entry.is_some() => field = Some(TextField::Doi),
                    b"journal_ref" if entry.is_some() => field = Some(TextField::JournalRef),
                    _ => {}
                }
            }
            Ok(Event::Empty(start)) => {
                if start.local_name().as_ref() == b"primary_category" {
                    if let Some(entry) = entry.as_mut() {
                        if let Ok(Some(term)) = start.try_get_attribute("term") {
                            if let Ok(term) = term.unescape_value() {
                                entry.primary_class = Some(term.into_owned());
                            }
                        }
                    }
                }
            }
            Ok(Event::Text(text)) => {
                if let (Some(entry), Some(field)) = (entry.as_mut(), field.as_ref()) {
                    let text = text
                        .unescape()
                        .map_err(|error| FetchError::Malformed(error.to_string()))?;
                    entry.push_text(field, &text);
                }
            }
            Ok(Event::End(end)) => {
                field = None;
                if end.local_name().as_ref() == b"entry" {
                    if let Some(finished) = entry.take().and_then(EntryBuilder::finish) {
                        parsed.push(finished);
                    }
                }
            }
            Ok(_) => {}
        }
    }

    Ok(parsed)
}
