//! Clients for the remote bibliographic APIs.
//!
//! Each remote is wrapped in a [`RecordFetcher`]: given a batch of ids it
//! returns a per-id result map. Fetchers never cache anything themselves,
//! that is the job of the accessors in [`crate::caching`] layered on top.
//!
//! The fetchers share one [`reqwest::Client`] per run and space consecutive
//! requests of a batch by the configured pacing delay, since all three
//! remotes are public services with strict usage policies.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::caching::FetchError;
use crate::config::FetchConfig;

pub mod arxiv;
pub mod doi;
pub mod inspire;

pub use arxiv::{ArxivFetcher, ArxivRecord};
pub use doi::{DoiFetcher, DoiRecord};
pub use inspire::{InspireFetcher, InspireRecord};

/// Per-id results of one batched fetch.
pub type FetchedRecords<R> = BTreeMap<String, Result<R, FetchError>>;

/// A remote API that can resolve a batch of ids to records.
///
/// `fetch_records` reports failures on two levels: the outer `Result` is
/// for failures that doom the whole batch (rate limiting, or loss of
/// connectivity on a batched endpoint), the per-id results are for
/// individual ids (unknown id, malformed payload, a transient failure on
/// one request of a sequential batch). Ids that were asked for but are
/// absent from the returned map are treated as not found by the caller.
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    /// The record type this remote produces.
    type Record: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// A short name of the remote, used in log messages.
    fn remote_name(&self) -> &'static str;

    /// Resolves the given ids against the remote.
    async fn fetch_records(&self, ids: &[String]) -> Result<FetchedRecords<Self::Record>, FetchError>;
}

#[async_trait]
impl<T: RecordFetcher + ?Sized> RecordFetcher for Box<T> {
    type Record = T::Record;

    fn remote_name(&self) -> &'static str {
        (**self).remote_name()
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<FetchedRecords<Self::Record>, FetchError> {
        (**self).fetch_records(ids).await
    }
}

/// A boxed fetcher, to keep the accessor container non-generic.
pub type DynFetcher<R> = Box<dyn RecordFetcher<Record = R> + Send + Sync>;

/// Creates the HTTP client shared by all fetchers of one run.
pub fn create_client(config: &FetchConfig) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .user_agent(config.user_agent.clone())
        .gzip(true)
        .build()
}

/// Try to run a future up to 3 times with 20 millisecond delays on failure.
pub async fn retry<G, F, T>(task_gen: G) -> Result<T, FetchError>
where
    G: Fn() -> F,
    F: Future<Output = Result<T, FetchError>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        let result = task_gen().await;

        // its highly unlikely we get a different result when retrying these
        let should_not_retry = matches!(
            result,
            Ok(_) | Err(FetchError::NotFound | FetchError::RateLimited(_))
        );

        if should_not_retry || tries >= 3 {
            break result;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Converts a non-success response into a [`FetchError`].
///
/// This uses the HTTP status code alone, which works for all three remotes:
/// none of them put machine-readable errors into their failure bodies.
pub(crate) fn error_for_status(remote: &str, response: &Response) -> FetchError {
    let status = response.status();
    debug_assert!(!status.is_success());

    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::debug!("Rate limited by `{remote}`: {status}");

        FetchError::RateLimited(format!("{remote} responded with {status}"))
    } else if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
        tracing::debug!("Request to `{remote}` denied: {status}");

        FetchError::RateLimited(format!("{remote} denied the request ({status})"))
    } else if status.is_client_error() {
        // If it's any other client error, chances are it's a 404.
        tracing::debug!("Unexpected client error status code from `{remote}`: {status}");

        FetchError::NotFound
    } else {
        tracing::debug!("Unexpected status code from `{remote}`: {status}");

        FetchError::Download(status.to_string())
    }
}

/// Sleeps the pacing delay before every request of a batch but the first.
pub(crate) async fn pace(pacing: Duration, index: usize) {
    if index > 0 && !pacing.is_zero() {
        tokio::time::sleep(pacing).await;
    }
}
