//! Fetcher for doi.org content negotiation.
//!
//! There is no batch endpoint; each DOI is resolved with its own request
//! carrying an `Accept: application/vnd.citationstyles.csl+json` header,
//! which makes doi.org return the Citation Style Language JSON of the
//! record instead of redirecting to the landing page.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};

use super::{FetchedRecords, RecordFetcher, error_for_status, pace, retry};
use crate::caching::FetchError;
use crate::config::FetchConfig;

const DOI_ORG_URL: &str = "https://doi.org";
const CSL_JSON: &str = "application/vnd.citationstyles.csl+json";

/// The CSL JSON date shape, nested year/month/day integer lists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CslDate {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<i32>>,
}

impl CslDate {
    /// The year, if the date carries one.
    pub fn year(&self) -> Option<i32> {
        self.date_parts.first()?.first().copied()
    }
}

/// The subset of a CSL JSON record the filters care about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoiRecord {
    /// The DOI itself, as echoed back by doi.org.
    #[serde(rename = "DOI")]
    pub doi: String,
    #[serde(default)]
    pub title: Option<String>,
    /// The journal or book the record appeared in.
    #[serde(rename = "container-title", default)]
    pub container_title: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub issued: Option<CslDate>,
}

/// Resolves DOIs one by one via doi.org content negotiation.
pub struct DoiFetcher {
    client: Client,
    base_url: String,
    pacing: Duration,
}

impl DoiFetcher {
    /// Creates a fetcher talking to the public doi.org resolver.
    pub fn new(client: Client, config: &FetchConfig) -> Self {
        Self {
            client,
            base_url: DOI_ORG_URL.to_owned(),
            pacing: config.pacing,
        }
    }

    async fn fetch_one(&self, doi: &str) -> Result<DoiRecord, FetchError> {
        let url = format!("{}/{doi}", self.base_url);
        retry(|| async {
            let response = self
                .client
                .get(&url)
                .header(ACCEPT, CSL_JSON)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(error_for_status("doi.org", &response));
            }
            Ok(response.json().await?)
        })
        .await
    }
}

#[async_trait::async_trait]
impl RecordFetcher for DoiFetcher {
    type Record = DoiRecord;

    fn remote_name(&self) -> &'static str {
        "doi.org"
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<FetchedRecords<DoiRecord>, FetchError> {
        let mut records = FetchedRecords::new();
        for (index, doi) in ids.iter().enumerate() {
            pace(self.pacing, index).await;

            match self.fetch_one(doi).await {
                Ok(record) => {
                    records.insert(doi.clone(), Ok(record));
                }
                // A rate limit affects every DOI still in the batch.
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    records.insert(doi.clone(), Err(error));
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csl_json() {
        let payload = serde_json::json!({
            "DOI": "10.1103/physrevx.1.1",
            "title": "On the Normalization of References",
            "container-title": "Physical Review X",
            "volume": "1",
            "page": "1-10",
            "publisher": "American Physical Society",
            "issued": { "date-parts": [[2012, 3, 7]] },
            "author": [{ "family": "Curie", "given": "Marie" }],
        });

        let record: DoiRecord = serde_json::from_value(payload).unwrap();
        assert_eq!(record.doi, "10.1103/physrevx.1.1");
        assert_eq!(record.container_title.as_deref(), Some("Physical Review X"));
        assert_eq!(record.issued.as_ref().and_then(CslDate::year), Some(2012));
    }

    #[test]
    fn test_parse_minimal_record() {
        let record: DoiRecord =
            serde_json::from_value(serde_json::json!({ "DOI": "10.1/x" })).unwrap();
        assert_eq!(record.doi, "10.1/x");
        assert_eq!(record.title, None);
        assert_eq!(record.issued, None);
    }
}
