//! # Strands Analysis
//!
//! Statistical correlation between signal domains: Pearson with lag
//! detection over aligned time series, Student-t significance, a Bayesian
//! posterior that grades correlation strength, anomaly flagging, and
//! monotonic temporal chains over event sequences.
//!
//! All code here is CPU-bound and synchronous; the soft time budget is
//! enforced by logging, never by cancellation.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod correlation;
pub mod temporal;

pub use correlation::{AnalyzeOptions, CorrelationAnalyzer, TimeSeries};
pub use temporal::{ChainDetector, TimedEvent};
