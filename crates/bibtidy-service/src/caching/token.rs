use std::fmt::{self, Write};
use std::time::Duration;

use bibtidy_bib::Entry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An opaque value representing the state a cached value was computed from.
///
/// A cache slot stores the token produced at population time; on every read
/// it is checked against a freshly produced token. A slot whose token fails
/// that check is treated as absent and gets recomputed.
///
/// Two kinds exist so that accessors can apply different staleness
/// policies: locally derived info should invalidate when the entry it was
/// derived from is edited ([`Fingerprint`](Self::Fingerprint)), while a raw
/// record fetched from a remote API should merely expire after a while
/// ([`Expiry`](Self::Expiry)), since the remote record rarely changes but
/// should not be pinned forever.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationToken {
    /// A content fingerprint over watched parts of a bibliography entry.
    Fingerprint {
        /// Hex-encoded sha256 of the watched-content projection.
        digest: String,
    },
    /// A time-to-live anchored at token creation.
    Expiry {
        /// When the cached value was produced.
        created_at: DateTime<Utc>,
        /// How long the value stays valid; `None` means forever.
        #[serde(default, with = "humantime_serde")]
        time_valid: Option<Duration>,
    },
}

impl ValidationToken {
    /// Creates an expiry token anchored at the current time.
    pub fn expiry(time_valid: Option<Duration>) -> Self {
        Self::Expiry {
            created_at: Utc::now(),
            time_valid,
        }
    }

    /// Checks this (stored) token against a freshly produced one.
    ///
    /// Fingerprints compare by equality. Expiry tokens ignore the fresh
    /// token's timestamp and check their own age. Tokens of different
    /// kinds never validate, which forces recomputation when an accessor
    /// changes its token policy.
    pub fn is_valid_against(&self, fresh: &ValidationToken) -> bool {
        match (self, fresh) {
            (Self::Fingerprint { digest: stored }, Self::Fingerprint { digest: current }) => {
                stored == current
            }
            (
                Self::Expiry {
                    created_at,
                    time_valid,
                },
                Self::Expiry { .. },
            ) => {
                let Some(time_valid) = time_valid else {
                    return true;
                };
                let elapsed = Utc::now()
                    .signed_duration_since(*created_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                elapsed < *time_valid
            }
            _ => false,
        }
    }
}

/// A builder for content fingerprints.
///
/// This builder implements [`fmt::Write`]; the intention is to feed it a
/// human-readable but most importantly **stable** projection of the watched
/// content, which is then hashed to form the token. Care must be taken that
/// the projection is stable, as it would otherwise cause spurious
/// recomputation.
pub struct FingerprintBuilder {
    projection: String,
}

impl FingerprintBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            projection: String::new(),
        }
    }

    /// Writes the watched parts of an entry into the projection.
    ///
    /// Fields are written in the order given; absent fields are recorded as
    /// absent, which distinguishes "field removed" from "field empty".
    pub fn write_entry_projection(
        &mut self,
        entry: &Entry,
        fields: &[&str],
        include_type: bool,
        include_persons: bool,
    ) -> fmt::Result {
        if include_type {
            writeln!(self, "type: {}", entry.entry_type)?;
        }
        for name in fields {
            match entry.field(name) {
                Some(value) => writeln!(self, "field {name}: {value}")?,
                None => writeln!(self, "field {name}: <absent>")?,
            }
        }
        if include_persons {
            for (role, persons) in &entry.persons {
                write!(self, "role {role}:")?;
                for person in persons {
                    write!(self, " {};", person.plain())?;
                }
                writeln!(self)?;
            }
        }
        Ok(())
    }

    /// Finalizes the builder into a fingerprint token.
    pub fn build(self) -> ValidationToken {
        let digest = Sha256::digest(&self.projection);
        ValidationToken::Fingerprint {
            digest: format!("{digest:x}"),
        }
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for FingerprintBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.projection.write_str(s)
    }
}

/// Fingerprints the given fields (and type) of an entry.
pub fn entry_fingerprint(entry: &Entry, fields: &[&str], include_type: bool) -> ValidationToken {
    let mut builder = FingerprintBuilder::new();
    builder
        .write_entry_projection(entry, fields, include_type, false)
        .expect("writing to a string projection cannot fail");
    builder.build()
}
