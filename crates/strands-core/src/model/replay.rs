//! Replay ledger model: immutable records of historical pipeline runs.

use crate::model::alert::Alert;
use crate::model::decision::DecisionCandidate;
use crate::model::playbook::{ExecutionOutcome, SemVer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in the immutable replay ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    /// When the original alert arrived.
    pub occurred_at: DateTime<Utc>,
    /// The original alert as validated at the time.
    pub alert: Alert,
    /// The decision the pipeline produced at the time.
    pub decision: DecisionCandidate,
    /// Playbook the recommender resolved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook_id: Option<Uuid>,
    /// Version of that playbook at original time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook_version: Option<SemVer>,
    /// Execution outcome, when the remediation ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
}
