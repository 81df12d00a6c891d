//! Replay engine: re-decide each recorded alert and classify divergence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strands_core::error::Result;
use strands_core::model::alert::Alert;
use strands_core::model::decision::{DecisionCandidate, DecisionOutcome};
use strands_core::model::replay::ReplayEvent;
use strands_core::types::RiskLevel;
use tracing::{info, warn};

/// Why a replay is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    Validation,
    Training,
    Simulation,
    Audit,
}

/// The decision path the engine drives. Implemented by the controller over a
/// frozen configuration snapshot with a seeded id source and pinned clock.
#[async_trait]
pub trait ReplayPipeline: Send + Sync {
    async fn decide(
        &self,
        alert: &Alert,
        occurred_at: DateTime<Utc>,
    ) -> Result<DecisionCandidate>;
}

/// How one replayed decision compares to its original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Divergence {
    Match,
    Safe,
    Unsafe,
}

/// Per-confidence-bucket precision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketStat {
    /// Inclusive lower bound of the bucket.
    pub lower: f64,
    pub total: usize,
    pub matched: usize,
}

impl BucketStat {
    pub fn precision(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }
}

/// Aggregate of one replay run.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub mode: ReplayMode,
    pub total: usize,
    pub matches: usize,
    pub divergent_safe: usize,
    pub divergent_unsafe: usize,
    pub alignment_rate: f64,
    pub buckets: Vec<BucketStat>,
    pub unsafe_bypass_count: usize,
    /// Validation passes only with zero unsafe bypasses.
    pub passed: bool,
    /// Replayed decisions in event order, for determinism checks.
    pub decisions: Vec<DecisionCandidate>,
}

/// Replays recorded events through a pipeline and scores the outcome.
#[derive(Debug, Default)]
pub struct ReplayEngine;

impl ReplayEngine {
    pub fn new() -> Self {
        Self
    }

    /// Replay every event in order.
    pub async fn replay(
        &self,
        events: &[ReplayEvent],
        mode: ReplayMode,
        pipeline: &dyn ReplayPipeline,
    ) -> Result<ReplayReport> {
        let mut matches = 0;
        let mut divergent_safe = 0;
        let mut divergent_unsafe = 0;
        let mut buckets: Vec<BucketStat> = (0..5)
            .map(|i| BucketStat {
                lower: i as f64 * 0.2,
                total: 0,
                matched: 0,
            })
            .collect();
        let mut decisions = Vec::with_capacity(events.len());

        for event in events {
            let replayed = pipeline.decide(&event.alert, event.occurred_at).await?;
            let divergence = Self::classify(&event.decision, &replayed);
            match divergence {
                Divergence::Match => matches += 1,
                Divergence::Safe => divergent_safe += 1,
                Divergence::Unsafe => {
                    warn!(
                        original_decision = %event.decision.decision_id,
                        replayed_decision = %replayed.decision_id,
                        "unsafe divergence detected"
                    );
                    divergent_unsafe += 1;
                }
            }

            let bucket = ((event.decision.confidence / 0.2) as usize).min(4);
            buckets[bucket].total += 1;
            if divergence == Divergence::Match {
                buckets[bucket].matched += 1;
            }
            decisions.push(replayed);
        }

        let total = events.len();
        let alignment_rate = if total == 0 {
            1.0
        } else {
            matches as f64 / total as f64
        };
        let passed = divergent_unsafe == 0;
        info!(
            ?mode,
            total,
            matches,
            divergent_safe,
            divergent_unsafe,
            alignment_rate,
            passed,
            "replay complete"
        );

        Ok(ReplayReport {
            mode,
            total,
            matches,
            divergent_safe,
            divergent_unsafe,
            alignment_rate,
            buckets,
            unsafe_bypass_count: divergent_unsafe,
            passed,
            decisions,
        })
    }

    /// Classify a pair of decisions.
    ///
    /// Unsafe: a high-risk original became auto-approvable in replay, or
    /// vice-versa. Match: equal risk, automation, outcome and hypothesis
    /// with indistinguishable confidence. Everything else is a safe
    /// divergence.
    fn classify(original: &DecisionCandidate, replayed: &DecisionCandidate) -> Divergence {
        let unsafe_bypass = (original.risk >= RiskLevel::High
            && replayed.outcome == DecisionOutcome::AutoApprove)
            || (replayed.risk >= RiskLevel::High
                && original.outcome == DecisionOutcome::AutoApprove);
        if unsafe_bypass {
            return Divergence::Unsafe;
        }
        let matched = original.risk == replayed.risk
            && original.automation == replayed.automation
            && original.outcome == replayed.outcome
            && original.hypothesis == replayed.hypothesis
            && (original.confidence - replayed.confidence).abs() < 1e-9;
        if matched {
            Divergence::Match
        } else {
            Divergence::Safe
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strands_core::model::alert::AlertStatus;
    use strands_core::types::{AutomationLevel, Severity};
    use uuid::Uuid;

    fn alert() -> Alert {
        Alert {
            received_at: Utc::now(),
            provider: "test".into(),
            fingerprint: "fp".into(),
            service: "checkout".into(),
            severity: Severity::High,
            description: "latency".into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            status: AlertStatus::Firing,
        }
    }

    fn decision(risk: RiskLevel, outcome: DecisionOutcome, confidence: f64) -> DecisionCandidate {
        DecisionCandidate {
            decision_id: Uuid::new_v4(),
            cluster_id: Uuid::new_v4(),
            hypothesis: "h".into(),
            confidence,
            risk,
            automation: match outcome {
                DecisionOutcome::AutoApprove => AutomationLevel::Full,
                _ => AutomationLevel::Manual,
            },
            outcome,
            conflict: false,
            degraded: false,
            suggested_actions: vec![],
            evidence: vec![],
            model_version: "m".into(),
            weights_version: "w".into(),
            audit_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    fn event(original: DecisionCandidate) -> ReplayEvent {
        ReplayEvent {
            occurred_at: Utc::now(),
            alert: alert(),
            decision: original,
            playbook_id: None,
            playbook_version: None,
            outcome: None,
        }
    }

    /// Pipeline that replays a fixed list of decisions.
    #[derive(Debug)]
    struct FixedPipeline {
        decisions: std::sync::Mutex<std::collections::VecDeque<DecisionCandidate>>,
    }

    impl FixedPipeline {
        fn new(decisions: Vec<DecisionCandidate>) -> Self {
            Self {
                decisions: std::sync::Mutex::new(decisions.into()),
            }
        }
    }

    #[async_trait]
    impl ReplayPipeline for FixedPipeline {
        async fn decide(
            &self,
            _alert: &Alert,
            _occurred_at: DateTime<Utc>,
        ) -> Result<DecisionCandidate> {
            Ok(self.decisions.lock().unwrap().pop_front().expect("scripted"))
        }
    }

    #[tokio::test]
    async fn identical_decisions_align() {
        let original = decision(RiskLevel::Medium, DecisionOutcome::RequiresApproval, 0.8);
        let mut replayed = original.clone();
        replayed.decision_id = Uuid::new_v4();

        let engine = ReplayEngine::new();
        let report = engine
            .replay(
                &[event(original)],
                ReplayMode::Validation,
                &FixedPipeline::new(vec![replayed]),
            )
            .await
            .unwrap();

        assert_eq!(report.matches, 1);
        assert_eq!(report.alignment_rate, 1.0);
        assert_eq!(report.unsafe_bypass_count, 0);
        assert!(report.passed);
        // Confidence 0.8 lands in the top bucket.
        assert_eq!(report.buckets[4].total, 1);
        assert_eq!(report.buckets[4].matched, 1);
    }

    #[tokio::test]
    async fn high_risk_original_auto_approved_in_replay_fails_validation() {
        let original = decision(RiskLevel::High, DecisionOutcome::RequiresApproval, 0.7);
        let replayed = decision(RiskLevel::Low, DecisionOutcome::AutoApprove, 0.9);

        let engine = ReplayEngine::new();
        let report = engine
            .replay(
                &[event(original)],
                ReplayMode::Validation,
                &FixedPipeline::new(vec![replayed]),
            )
            .await
            .unwrap();

        assert_eq!(report.unsafe_bypass_count, 1);
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn confidence_shift_same_risk_is_safe_divergence() {
        let original = decision(RiskLevel::Medium, DecisionOutcome::RequiresApproval, 0.7);
        let replayed = decision(RiskLevel::Medium, DecisionOutcome::RequiresApproval, 0.6);

        let engine = ReplayEngine::new();
        let report = engine
            .replay(
                &[event(original)],
                ReplayMode::Audit,
                &FixedPipeline::new(vec![replayed]),
            )
            .await
            .unwrap();

        assert_eq!(report.divergent_safe, 1);
        assert_eq!(report.matches, 0);
        assert!(report.passed);
    }

    #[tokio::test]
    async fn empty_ledger_passes_vacuously() {
        let engine = ReplayEngine::new();
        let report = engine
            .replay(&[], ReplayMode::Validation, &FixedPipeline::new(vec![]))
            .await
            .unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.alignment_rate, 1.0);
        assert!(report.passed);
    }
}
