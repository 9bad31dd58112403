//! The bibliography data model used by bibtidy.
//!
//! A bibliography is an ordered collection of entries, each identified by a
//! unique citation key. Entries carry a type tag (e.g. `article`), a
//! case-insensitive field map, and ordered person lists per role (`author`,
//! `editor`, ...). The whole database round-trips through serde; the cache
//! and filter machinery in `bibtidy-service` treats it as an opaque
//! key→entry mapping.

#![warn(missing_docs)]

mod database;
mod entry;
mod person;

pub use database::*;
pub use entry::*;
pub use person::*;
