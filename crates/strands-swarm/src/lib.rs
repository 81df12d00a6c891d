//! # Strands Swarm
//!
//! Parallel investigation of one alert cluster by independent specialists
//! (metrics, logs, embeddings, graph context, correlation), coordinated
//! under a single propagated deadline. Specialist failures are isolated:
//! one unavailable upstream degrades that specialist's result, never the
//! investigation as a whole.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod orchestrator;
pub mod specialist;
pub mod specialists;

pub use orchestrator::{InvestigationOutcome, SwarmOrchestrator};
pub use specialist::{InvestigationContext, Specialist};
