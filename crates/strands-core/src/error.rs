//! Error taxonomy shared by all Strands crates.
//!
//! Kinds map one-to-one onto the platform failure modes: boundary validation,
//! transient upstream failures, breaker rejections, state-machine violations,
//! optimistic-concurrency races and review-gate refusals. Transient kinds are
//! the only ones the retry loop is allowed to consume.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Convenience alias used across every crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Platform-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Input contract violated at a boundary. Never retried.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// An adapter call failed transiently (timeout, 5xx, connection refused).
    #[error("upstream '{source_name}' unavailable: {detail}")]
    UpstreamUnavailable { source_name: String, detail: String },

    /// Call short-circuited by an open circuit breaker. Transient, but not
    /// retried within the same invocation.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// Attempted a transition the entity's state machine does not allow.
    #[error("illegal state transition for {entity}: {from} -> {to}")]
    IllegalStateTransition {
        entity: String,
        from: String,
        to: String,
    },

    /// Compare-and-set race on persisted statistics.
    #[error("optimistic concurrency conflict on {entity}")]
    OptimisticConflict { entity: String },

    /// Zero specialists succeeded in an investigation.
    #[error("investigation degraded: no specialist succeeded")]
    InvestigationDegraded,

    /// Every configured alert provider failed this cycle.
    #[error("no alert provider available")]
    NoProviderAvailable,

    /// A terminal review already exists for this decision.
    #[error("review already closed for decision {decision_id}")]
    ReviewAlreadyClosed { decision_id: Uuid },

    /// Reviewer identity refused by the review gate.
    #[error("invalid reviewer: {reason}")]
    InvalidReviewer { reason: String },

    /// Per-call timeout elapsed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Fatal configuration problem; aborts startup with exit code 1.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a transient upstream error.
    pub fn upstream(source_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            source_name: source_name.into(),
            detail: detail.into(),
        }
    }

    /// Create an illegal-transition error.
    pub fn illegal_transition(
        entity: impl Into<String>,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::IllegalStateTransition {
            entity: entity.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether the retry loop may consume this error and try again.
    ///
    /// `CircuitOpen` is transient but excluded: the breaker already decided
    /// the upstream is down, so retrying inside the same invocation would
    /// only hammer the short-circuit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::Timeout(_)
        )
    }

    /// Stable machine-readable kind, used by the audit log and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_FAILED",
            Self::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::IllegalStateTransition { .. } => "ILLEGAL_STATE_TRANSITION",
            Self::OptimisticConflict { .. } => "OPTIMISTIC_CONFLICT",
            Self::InvestigationDegraded => "INVESTIGATION_DEGRADED",
            Self::NoProviderAvailable => "NO_PROVIDER_AVAILABLE",
            Self::ReviewAlreadyClosed { .. } => "REVIEW_ALREADY_CLOSED",
            Self::InvalidReviewer { .. } => "INVALID_REVIEWER",
            Self::Timeout(_) => "TIMEOUT",
            Self::Config(_) => "CONFIG",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Io(_) => "IO",
        }
    }
}
