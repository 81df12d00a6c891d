//! # Strands Governance
//!
//! The decision half of the pipeline: weighted fusion of specialist evidence
//! into a graded [`strands_core::model::decision::DecisionCandidate`],
//! playbook resolution (known → generated → fallback), the versioned
//! playbook store with atomic execution statistics, and the human-review
//! state machine that gates execution and closes the learning loop.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod decision;
pub mod playbook;
pub mod recommend;
pub mod review;
pub mod strategy;

pub use decision::DecisionEngine;
pub use playbook::PlaybookStore;
pub use recommend::{Recommendation, RecommendationSource, Recommender, Readiness};
pub use review::{ReviewGate, ReviewOutcome};
pub use strategy::ConfidenceStrategy;
