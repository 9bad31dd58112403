//! Fetcher for the INSPIRE-HEP literature API.
//!
//! INSPIRE offers direct lookup endpoints per external identifier:
//! `api.inspirehep.net/api/arxiv/<id>` and `api/doi/<doi>`. Ids are
//! classified by shape: everything that looks like a DOI (`10.` prefix
//! with a slash) goes to the DOI endpoint, the rest is treated as an
//! arXiv id.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{FetchedRecords, RecordFetcher, error_for_status, pace, retry};
use crate::caching::FetchError;
use crate::config::FetchConfig;

const INSPIRE_API_URL: &str = "https://api.inspirehep.net/api";

/// The subset of an INSPIRE literature record the filters care about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspireRecord {
    /// The preferred TeX citation key, e.g. `Curie:2012abc`.
    pub texkey: Option<String>,
    pub title: Option<String>,
    pub citation_count: Option<u64>,
}

#[derive(Deserialize)]
struct ApiResponse {
    metadata: ApiMetadata,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ApiMetadata {
    texkeys: Vec<String>,
    titles: Vec<ApiTitle>,
    citation_count: Option<u64>,
}

#[derive(Deserialize)]
struct ApiTitle {
    title: String,
}

impl From<ApiResponse> for InspireRecord {
    fn from(response: ApiResponse) -> Self {
        let metadata = response.metadata;
        InspireRecord {
            texkey: metadata.texkeys.into_iter().next(),
            title: metadata.titles.into_iter().next().map(|t| t.title),
            citation_count: metadata.citation_count,
        }
    }
}

fn is_doi(id: &str) -> bool {
    id.starts_with("10.") && id.contains('/')
}

/// Resolves arXiv ids and DOIs against INSPIRE-HEP, one request per id.
pub struct InspireFetcher {
    client: Client,
    api_url: String,
    pacing: Duration,
}

impl InspireFetcher {
    /// Creates a fetcher talking to the public INSPIRE API.
    pub fn new(client: Client, config: &FetchConfig) -> Self {
        Self {
            client,
            api_url: INSPIRE_API_URL.to_owned(),
            pacing: config.pacing,
        }
    }

    async fn fetch_one(&self, id: &str) -> Result<InspireRecord, FetchError> {
        let endpoint = if is_doi(id) { "doi" } else { "arxiv" };
        let url = format!("{}/{endpoint}/{id}", self.api_url);

        retry(|| async {
            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(error_for_status("inspirehep", &response));
            }
            let response: ApiResponse = response.json().await?;
            Ok(response.into())
        })
        .await
    }
}

#[async_trait::async_trait]
impl RecordFetcher for InspireFetcher {
    type Record = InspireRecord;

    fn remote_name(&self) -> &'static str {
        "inspirehep"
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<FetchedRecords<InspireRecord>, FetchError> {
        let mut records = FetchedRecords::new();
        for (index, id) in ids.iter().enumerate() {
            pace(self.pacing, index).await;

            match self.fetch_one(id).await {
                Ok(record) => {
                    records.insert(id.clone(), Ok(record));
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    records.insert(id.clone(), Err(error));
                }
            }
        }
        Ok(records)
    }
}
