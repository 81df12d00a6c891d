//! Playbook model: versioned remediation recipes, their lifecycle, embedded
//! execution statistics, execution records and review records.

use crate::error::{Error, Result};
use crate::stats::Welford;
use crate::types::{AutomationLevel, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::correlation::CorrelationType;

/// Playbook lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybookStatus {
    Draft,
    PendingReview,
    Active,
    Deprecated,
    Archived,
}

impl PlaybookStatus {
    /// Whether the lifecycle state machine allows `self -> to`.
    ///
    /// `ARCHIVED` is terminal: anything that ever reached it stays there.
    pub fn allows(self, to: PlaybookStatus) -> bool {
        use PlaybookStatus::*;
        matches!(
            (self, to),
            (Draft, PendingReview)
                | (PendingReview, Active)
                | (PendingReview, Archived)
                | (Active, Deprecated)
                | (Deprecated, Archived)
        )
    }
}

impl std::fmt::Display for PlaybookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::PendingReview => "PENDING_REVIEW",
            Self::Active => "ACTIVE",
            Self::Deprecated => "DEPRECATED",
            Self::Archived => "ARCHIVED",
        };
        write!(f, "{s}")
    }
}

/// Who authored the playbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybookSource {
    HumanWritten,
    LlmGenerated,
    Hybrid,
}

/// One ordered remediation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub index: u32,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_command: Option<String>,
}

/// Semantic version of a playbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Which component of the version a change bumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionBump {
    /// Alters the ordered step list's semantics or the rollback procedure.
    Major,
    /// Adds auxiliary steps or refines wording, critical path preserved.
    Minor,
    /// Text-only fixes.
    Patch,
}

impl SemVer {
    pub fn initial() -> Self {
        Self {
            major: 1,
            minor: 0,
            patch: 0,
        }
    }

    pub fn bump(self, bump: VersionBump) -> Self {
        match bump {
            VersionBump::Major => Self {
                major: self.major + 1,
                minor: 0,
                patch: 0,
            },
            VersionBump::Minor => Self {
                major: self.major,
                minor: self.minor + 1,
                patch: 0,
            },
            VersionBump::Patch => Self {
                major: self.major,
                minor: self.minor,
                patch: self.patch + 1,
            },
        }
    }
}

impl std::fmt::Display for SemVer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for SemVer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '.');
        let mut next = || -> Result<u32> {
            parts
                .next()
                .ok_or_else(|| Error::validation(format!("malformed version '{s}'")))?
                .parse()
                .map_err(|_| Error::validation(format!("malformed version '{s}'")))
        };
        Ok(Self {
            major: next()?,
            minor: next()?,
            patch: next()?,
        })
    }
}

/// Embedded execution statistics, updated atomically per execution record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PlaybookStats {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Running mean duration in seconds.
    pub mean_duration_s: f64,
    /// Welford accumulator for the duration variance.
    pub m2_duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl PlaybookStats {
    /// Fold one execution into the counters and the Welford accumulator.
    ///
    /// Any outcome other than `Success` counts as a failure, so
    /// `total_executions == success_count + failure_count` always holds.
    pub fn record(&mut self, outcome: ExecutionOutcome, duration_s: f64, at: DateTime<Utc>) {
        let mut w = Welford::from_parts(self.total_executions, self.mean_duration_s, self.m2_duration);
        w.push(duration_s);
        self.total_executions = w.count;
        self.mean_duration_s = w.mean;
        self.m2_duration = w.m2;
        if outcome == ExecutionOutcome::Success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_executed_at = Some(at);
    }

    /// Sample variance of durations; 0 below two executions.
    pub fn variance(&self) -> f64 {
        Welford::from_parts(self.total_executions, self.mean_duration_s, self.m2_duration).variance()
    }

    /// Success ratio with a floor of one execution in the denominator.
    pub fn success_rate(&self) -> f64 {
        self.success_count as f64 / (self.total_executions.max(1)) as f64
    }

    /// Adaptive ranking score: `correlation_confidence * success_rate * ln(1 + n)`.
    pub fn adaptive_score(&self, correlation_confidence: f64) -> f64 {
        correlation_confidence * self.success_rate() * (1.0 + self.total_executions as f64).ln()
    }
}

/// A versioned remediation recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub playbook_id: Uuid,
    pub title: String,
    pub description: String,
    pub pattern_type: CorrelationType,
    /// Service pattern the playbook targets (exact name or glob-ish prefix).
    pub service_pattern: String,
    pub steps: Vec<PlaybookStep>,
    pub estimated_duration_s: u64,
    pub automation: AutomationLevel,
    pub risk: RiskLevel,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    pub rollback_procedure: String,
    pub source: PlaybookSource,
    pub status: PlaybookStatus,
    pub version: SemVer,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub stats: PlaybookStats,
    /// Retained rejection note, when review archived this playbook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_note: Option<String>,
}

/// How an execution of a playbook ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    Success,
    Failure,
    Partial,
    RolledBack,
}

/// Immutable record of one playbook execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookExecution {
    pub execution_id: Uuid,
    pub playbook_id: Uuid,
    pub decision_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    pub duration_s: f64,
    pub steps_attempted: u32,
    pub steps_completed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Human-review verdict states. `Pending` is initial; the others terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Pending,
    Approved,
    Rejected,
}

impl ReviewState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The human-in-the-loop verdict for a decision. Exactly one per decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub review_id: Uuid,
    pub decision_id: Uuid,
    pub state: ReviewState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transition_table() {
        use PlaybookStatus::*;
        assert!(Draft.allows(PendingReview));
        assert!(PendingReview.allows(Active));
        assert!(PendingReview.allows(Archived));
        assert!(Active.allows(Deprecated));
        assert!(Deprecated.allows(Archived));

        assert!(!Active.allows(Draft));
        assert!(!Archived.allows(Active));
        assert!(!Archived.allows(Draft));
        assert!(!Deprecated.allows(Active));
        assert!(!Draft.allows(Active));
    }

    #[test]
    fn stats_match_welford_seed_scenario() {
        // Durations [10, 12, 15, 11, 14], all successes.
        let mut stats = PlaybookStats::default();
        for d in [10.0, 12.0, 15.0, 11.0, 14.0] {
            stats.record(ExecutionOutcome::Success, d, Utc::now());
        }
        assert_eq!(stats.total_executions, 5);
        assert_eq!(stats.success_count, 5);
        assert_eq!(stats.failure_count, 0);
        assert!((stats.mean_duration_s - 12.4).abs() < 1e-12);
        assert!((stats.variance() - 4.3).abs() < 1e-12);
    }

    #[test]
    fn counters_always_reconcile() {
        let mut stats = PlaybookStats::default();
        stats.record(ExecutionOutcome::Success, 10.0, Utc::now());
        stats.record(ExecutionOutcome::Partial, 20.0, Utc::now());
        stats.record(ExecutionOutcome::RolledBack, 5.0, Utc::now());
        assert_eq!(
            stats.total_executions,
            stats.success_count + stats.failure_count
        );
        assert_eq!(stats.failure_count, 2);
    }

    #[test]
    fn semver_bumps() {
        let v = SemVer::initial();
        assert_eq!(v.bump(VersionBump::Patch).to_string(), "1.0.1");
        assert_eq!(v.bump(VersionBump::Minor).to_string(), "1.1.0");
        assert_eq!(v.bump(VersionBump::Major).to_string(), "2.0.0");
        let parsed: SemVer = "3.2.1".parse().unwrap();
        assert_eq!(parsed, SemVer { major: 3, minor: 2, patch: 1 });
        assert!("not-a-version".parse::<SemVer>().is_err());
    }

    #[test]
    fn adaptive_score_favours_proven_playbooks() {
        let mut seasoned = PlaybookStats::default();
        for _ in 0..20 {
            seasoned.record(ExecutionOutcome::Success, 30.0, Utc::now());
        }
        let mut fresh = PlaybookStats::default();
        fresh.record(ExecutionOutcome::Success, 30.0, Utc::now());
        assert!(seasoned.adaptive_score(0.8) > fresh.adaptive_score(0.8));
    }
}
