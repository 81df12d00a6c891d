//! Decision candidate: the synthesized recommendation from one investigation.

use crate::error::{Error, Result};
use crate::model::swarm::EvidenceItem;
use crate::types::{AutomationLevel, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gate the decision must pass before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    /// Confidence and policy allow unattended execution.
    AutoApprove,
    /// Passed thresholds but needs a human sign-off.
    RequiresApproval,
    /// Failed thresholds; escalated to a human unconditionally.
    Escalate,
}

/// The consolidated output of one investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionCandidate {
    pub decision_id: Uuid,
    pub cluster_id: Uuid,
    pub hypothesis: String,
    /// Aggregated confidence in [0, 1] after conflict/degradation penalties.
    pub confidence: f64,
    pub risk: RiskLevel,
    pub automation: AutomationLevel,
    pub outcome: DecisionOutcome,
    /// Two high-confidence specialists disagreed.
    #[serde(default)]
    pub conflict: bool,
    /// Zero specialists succeeded; confidence penalised, automation forced
    /// to manual.
    #[serde(default)]
    pub degraded: bool,
    pub suggested_actions: Vec<String>,
    pub evidence: Vec<EvidenceItem>,
    /// Model version recorded for auditability.
    pub model_version: String,
    /// Weight-matrix version recorded for auditability.
    pub weights_version: String,
    pub audit_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl DecisionCandidate {
    /// Enforce the governance invariant: automation never exceeds what the
    /// risk grade permits.
    pub fn validate(&self) -> Result<()> {
        let ceiling = AutomationLevel::ceiling_for(self.risk);
        if self.automation > ceiling {
            return Err(Error::validation(format!(
                "automation {} exceeds ceiling {} for risk {}",
                self.automation, ceiling, self.risk
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::validation(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}
