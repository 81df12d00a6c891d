//! Specialist outputs and the evidence items that support them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signal domain an evidence item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceKind {
    Metric,
    Log,
    Trace,
    Event,
    GraphRelation,
    Document,
    SimilarIncident,
}

/// A single piece of support attached to a specialist result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub kind: EvidenceKind,
    /// Identifier of the source (query expression, pod name, node id, ...).
    pub source: String,
    pub description: String,
    /// Quality score in [0, 1].
    pub quality: f64,
    pub timestamp: DateTime<Utc>,
    /// Optional numeric payload (metric value, similarity score, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl EvidenceItem {
    pub fn new(
        kind: EvidenceKind,
        source: impl Into<String>,
        description: impl Into<String>,
        quality: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            description: description.into(),
            quality: quality.clamp(0.0, 1.0),
            timestamp,
            value: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// How a specialist invocation finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Success,
    Timeout,
    Error { kind: String },
}

impl CompletionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Output of one specialist for one investigation. Immutable after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistResult {
    pub specialist_id: String,
    pub hypothesis: String,
    /// Base confidence in [0, 1].
    pub confidence: f64,
    pub evidence: Vec<EvidenceItem>,
    pub suggested_actions: Vec<String>,
    pub status: CompletionStatus,
    /// Wall time the specialist spent, in milliseconds.
    pub duration_ms: u64,
}

impl SpecialistResult {
    /// Synthetic result for a specialist that missed the deadline.
    pub fn timed_out(specialist_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            specialist_id: specialist_id.into(),
            hypothesis: String::new(),
            confidence: 0.0,
            evidence: Vec::new(),
            suggested_actions: Vec::new(),
            status: CompletionStatus::Timeout,
            duration_ms,
        }
    }

    /// Synthetic result for a specialist that failed.
    pub fn errored(specialist_id: impl Into<String>, kind: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            specialist_id: specialist_id.into(),
            hypothesis: String::new(),
            confidence: 0.0,
            evidence: Vec::new(),
            suggested_actions: Vec::new(),
            status: CompletionStatus::Error { kind: kind.into() },
            duration_ms,
        }
    }

    /// Mean evidence quality; 0 when the specialist produced no evidence.
    pub fn evidence_quality(&self) -> f64 {
        if self.evidence.is_empty() {
            return 0.0;
        }
        self.evidence.iter().map(|e| e.quality).sum::<f64>() / self.evidence.len() as f64
    }
}
