//! # Strands Replay
//!
//! Deterministic re-execution of historical alerts against a frozen
//! configuration snapshot. Each recorded event is pushed through the same
//! pipeline that produced it; the original and replayed decisions are
//! compared and classified. The aggregate reports the alignment rate,
//! per-confidence-bucket precision and the unsafe-bypass count, which must
//! be zero for a validation run to pass.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod engine;
pub mod ledger;

pub use engine::{ReplayEngine, ReplayMode, ReplayPipeline, ReplayReport};
pub use ledger::{generate_dataset, load_events, save_events};
