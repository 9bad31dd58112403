//! Core machinery for the bibtidy reference normalizer.
//!
//! This crate contains the caching subsystem (the heart of the tool), the
//! remote metadata fetchers, the filter implementations, and the pipeline
//! that wires them together for one run over a bibliography database.

pub mod caching;
pub mod config;
pub mod filtering;
pub mod logging;
pub mod pipeline;
pub mod remote;
