use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error that happens when fetching a record from a remote service.
///
/// [`NotFound`](Self::NotFound) and [`Malformed`](Self::Malformed) are
/// durable facts about the remote record and are persisted in the cache,
/// so that repeat runs remember that a lookup was attempted and how it
/// failed. Transient errors ([`Timeout`](Self::Timeout),
/// [`Download`](Self::Download)) only mean the record was unavailable
/// this run and are never persisted; [`RateLimited`](Self::RateLimited)
/// additionally aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    /// The remote service had no record for the requested identifier.
    #[error("not found")]
    NotFound,
    /// The record was fetched but could not be interpreted.
    ///
    /// The attached string describes what was wrong with the payload.
    #[error("malformed record: {0}")]
    Malformed(String),
    /// The request timed out.
    #[error("fetch timed out after {0:?}")]
    Timeout(#[serde(with = "humantime_serde")] Duration),
    /// The request failed for another reason, like connection loss, DNS
    /// resolution, or a 5xx server response.
    #[error("fetch failed: {0}")]
    Download(String),
    /// The remote service refused the request and asked us to back off.
    ///
    /// Continuing to hammer the service could get the user's access blocked
    /// entirely, so this aborts the remaining pipeline. Never persisted.
    #[error("remote service refused further requests: {0}")]
    RateLimited(String),
    /// An unexpected error in bibtidy itself. Never persisted.
    #[error("internal error")]
    Internal,
}

impl FetchError {
    /// Whether this error may be stored in the cache as a failure marker.
    ///
    /// Only errors that describe the remote record itself qualify; a
    /// transient failure says nothing about the record and must be
    /// retried on the next run.
    pub fn is_persistable(&self) -> bool {
        matches!(self, Self::NotFound | Self::Malformed(_))
    }

    /// Whether this error must abort the remaining pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    #[track_caller]
    pub(crate) fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::Internal
    }
}

impl From<std::io::Error> for FetchError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout(Duration::ZERO);
        }

        // Report the innermost cause, which carries the actually useful
        // message for connection-level failures.
        let mut source: &dyn std::error::Error = &error;
        while let Some(inner) = source.source() {
            source = inner;
        }
        Self::Download(source.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistable() {
        assert!(FetchError::NotFound.is_persistable());
        assert!(FetchError::Malformed("bad xml".into()).is_persistable());
        assert!(!FetchError::Timeout(Duration::from_secs(30)).is_persistable());
        assert!(!FetchError::Download("connection reset".into()).is_persistable());
        assert!(!FetchError::RateLimited("429".into()).is_persistable());
        assert!(!FetchError::Internal.is_persistable());
    }

    #[test]
    fn test_serde_roundtrip() {
        let err = FetchError::Timeout(Duration::from_secs(30));
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(serde_json::from_str::<FetchError>(&json).unwrap(), err);

        let err = FetchError::Malformed("truncated feed".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"malformed","detail":"truncated feed"}"#
        );
    }
}
