//! # Strands Ingest
//!
//! Alert ingestion and normalisation: polls configured providers in priority
//! order, validates and harmonizes their alerts, deduplicates by fingerprint
//! within a sliding window, and clusters survivors by service and truncated
//! time window. A cycle never aborts because of a single malformed alert.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod cluster;
pub mod collector;
pub mod dedup;
pub mod normalizer;
pub mod provider;

pub use cluster::Clusterer;
pub use collector::AlertCollector;
pub use dedup::Deduplicator;
pub use normalizer::AlertNormalizer;
pub use provider::{AlertProvider, HttpAlertProvider, MetricsAlertProvider, StaticAlertProvider};
