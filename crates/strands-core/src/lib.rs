//! # Strands Core
//!
//! Shared foundation for the Strands incident-response platform:
//! - Error taxonomy and `Result` alias used across every crate
//! - Domain model (alerts, clusters, specialist results, decisions, playbooks)
//! - Resilience primitives (circuit breaker, bounded retry, per-call timeout)
//! - Numerically stable statistics (Welford, Neumaier, Student-t)
//! - Append-only JSON-lines audit log
//! - Configuration loading and validation

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod audit;
pub mod config;
pub mod error;
pub mod model;
pub mod resilience;
pub mod stats;
pub mod types;

pub use error::{Error, Result};

/// Re-export of commonly used types.
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditLogger};
    pub use crate::config::{PolicyName, ProviderConfig, StrandsConfig, WeightMatrix};
    pub use crate::error::{Error, Result};
    pub use crate::model::alert::{Alert, AlertCluster, AlertStatus, NormalizedAlert, RawAlert, ValidationStatus};
    pub use crate::model::correlation::{CorrelationPattern, CorrelationType, Significance, Strength};
    pub use crate::model::decision::{DecisionCandidate, DecisionOutcome};
    pub use crate::model::playbook::{
        ExecutionOutcome, Playbook, PlaybookExecution, PlaybookSource, PlaybookStats,
        PlaybookStatus, PlaybookStep, ReviewRecord, ReviewState, SemVer, VersionBump,
    };
    pub use crate::model::replay::ReplayEvent;
    pub use crate::model::swarm::{CompletionStatus, EvidenceItem, EvidenceKind, SpecialistResult};
    pub use crate::resilience::{CircuitBreaker, ResilienceContext, RetryPolicy};
    pub use crate::types::{AutomationLevel, Clock, IdGen, RiskLevel, Severity};
}
