//! Decision engine: weighted evidence fusion, conflict resolution, risk
//! grading and the automation downgrade.

use std::time::Instant;
use strands_core::config::EngineConfig;
use strands_core::model::alert::AlertCluster;
use strands_core::model::decision::{DecisionCandidate, DecisionOutcome};
use strands_core::model::swarm::SpecialistResult;
use strands_core::types::{AutomationLevel, Clock, IdGen, RiskLevel, Severity};
use strands_swarm::orchestrator::InvestigationOutcome;
use tracing::{info, warn};

use crate::strategy::ConfidenceStrategy;

/// A specialist must reach this quality to win the hypothesis outright.
const DOMINANT_QUALITY: f64 = 0.8;

/// Multiplicative confidence penalty applied when high-confidence
/// specialists disagree.
const CONFLICT_PENALTY: f64 = 0.85;

/// Agreement band used by the consensus ratio.
const CONSENSUS_BAND: f64 = 0.15;

/// Keyword sets for the rule-based risk grading.
const DATA_LOSS_KEYWORDS: &[&str] = &["data loss", "corruption", "corrupted", "disk full", "volume full"];
const EXHAUSTION_KEYWORDS: &[&str] = &["memory", "oom", "cpu", "exhaust"];
const RESTART_KEYWORDS: &[&str] = &["restart", "crash-loop", "crashloop", "backoff"];
const LATENCY_KEYWORDS: &[&str] = &["latency", "slow", "p95", "p99"];
const STABLE_KEYWORDS: &[&str] = &["stable"];

/// Consolidates specialist results into a single graded decision.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: EngineConfig,
    budget_ms: u64,
}

impl DecisionEngine {
    pub fn new(config: EngineConfig, budget_ms: u64) -> Self {
        Self { config, budget_ms }
    }

    /// Fuse an investigation into one [`DecisionCandidate`].
    pub fn consolidate(
        &self,
        cluster: &AlertCluster,
        investigation: &InvestigationOutcome,
        ids: &IdGen,
        clock: Clock,
    ) -> DecisionCandidate {
        let started = Instant::now();

        let successes: Vec<&SpecialistResult> = investigation.successes().collect();
        let qualities: Vec<(&str, f64)> = successes
            .iter()
            .map(|r| {
                (
                    r.specialist_id.as_str(),
                    r.confidence * r.evidence_quality(),
                )
            })
            .collect();

        let mut confidence =
            ConfidenceStrategy::Weighted(self.config.weights.clone()).aggregate(&qualities);
        let consensus =
            ConfidenceStrategy::Consensus { band: CONSENSUS_BAND }.aggregate(&qualities);

        let (hypothesis, conflict, winner_actions) = self.select_hypothesis(&successes, &qualities);
        if conflict {
            confidence *= CONFLICT_PENALTY;
        }

        let corpus = Self::keyword_corpus(&successes);
        let risk = Self::grade_risk(cluster.max_severity(), &corpus);

        // The downgrade applies after any upstream suggestion.
        let mut automation = self.config.default_automation.bounded_by(risk);
        if investigation.degraded {
            automation = AutomationLevel::Manual;
        }

        let (confidence_threshold, consensus_threshold) = self.config.policy.thresholds();
        let outcome = if investigation.degraded
            || confidence < confidence_threshold
            || consensus < consensus_threshold
        {
            DecisionOutcome::Escalate
        } else if automation == AutomationLevel::Full {
            DecisionOutcome::AutoApprove
        } else {
            DecisionOutcome::RequiresApproval
        };

        let evidence = successes
            .iter()
            .flat_map(|r| r.evidence.iter().cloned())
            .collect();
        let mut suggested_actions = winner_actions;
        for result in &successes {
            for action in &result.suggested_actions {
                if !suggested_actions.contains(action) {
                    suggested_actions.push(action.clone());
                }
            }
        }

        let candidate = DecisionCandidate {
            decision_id: ids.next_id(),
            cluster_id: cluster.cluster_id,
            hypothesis,
            confidence: confidence.clamp(0.0, 1.0),
            risk,
            automation,
            outcome,
            conflict,
            degraded: investigation.degraded,
            suggested_actions,
            evidence,
            model_version: self.config.model_version.clone(),
            weights_version: self.config.weights_version.clone(),
            audit_id: ids.next_id(),
            created_at: clock.now(),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.budget_ms {
            warn!(elapsed_ms, budget_ms = self.budget_ms, "decision exceeded soft budget");
        }
        info!(
            decision_id = %candidate.decision_id,
            cluster_id = %cluster.cluster_id,
            confidence = candidate.confidence,
            consensus,
            risk = %candidate.risk,
            automation = %candidate.automation,
            conflict,
            degraded = candidate.degraded,
            "decision consolidated"
        );
        metrics::counter!("strands_decisions_total", "outcome" => match candidate.outcome {
            DecisionOutcome::AutoApprove => "auto_approve",
            DecisionOutcome::RequiresApproval => "requires_approval",
            DecisionOutcome::Escalate => "escalate",
        })
        .increment(1);

        candidate
    }

    /// Winner-takes-all when one specialist dominates; otherwise the top two
    /// hypotheses are consolidated and the conflict flag set.
    fn select_hypothesis(
        &self,
        successes: &[&SpecialistResult],
        qualities: &[(&str, f64)],
    ) -> (String, bool, Vec<String>) {
        if successes.is_empty() {
            return (
                "insufficient data to form a hypothesis".to_string(),
                false,
                Vec::new(),
            );
        }

        let mut ranked: Vec<(usize, f64)> = qualities
            .iter()
            .enumerate()
            .map(|(i, (_, q))| (i, *q))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (winner_idx, winner_q) = ranked[0];
        let winner = successes[winner_idx];
        match ranked.get(1) {
            None => (
                winner.hypothesis.clone(),
                false,
                winner.suggested_actions.clone(),
            ),
            Some(&(runner_idx, runner_q)) => {
                if winner_q >= DOMINANT_QUALITY && winner_q > runner_q {
                    (
                        winner.hypothesis.clone(),
                        false,
                        winner.suggested_actions.clone(),
                    )
                } else {
                    let runner = successes[runner_idx];
                    (
                        format!("{} | {}", winner.hypothesis, runner.hypothesis),
                        true,
                        winner.suggested_actions.clone(),
                    )
                }
            }
        }
    }

    fn keyword_corpus(successes: &[&SpecialistResult]) -> String {
        let mut corpus = String::new();
        for result in successes {
            corpus.push_str(&result.hypothesis.to_ascii_lowercase());
            corpus.push(' ');
            for item in &result.evidence {
                corpus.push_str(&item.description.to_ascii_lowercase());
                corpus.push(' ');
            }
        }
        corpus
    }

    /// Rule-based risk grading from severity plus detected symptom classes.
    fn grade_risk(severity: Severity, corpus: &str) -> RiskLevel {
        let mentions = |keywords: &[&str]| keywords.iter().any(|k| corpus.contains(k));

        if severity == Severity::Critical && mentions(DATA_LOSS_KEYWORDS) {
            return RiskLevel::Critical;
        }
        if severity == Severity::Critical
            || mentions(EXHAUSTION_KEYWORDS)
            || mentions(RESTART_KEYWORDS)
        {
            return RiskLevel::High;
        }
        if severity == Severity::High || mentions(LATENCY_KEYWORDS) {
            return RiskLevel::Medium;
        }
        if severity == Severity::Warning && mentions(STABLE_KEYWORDS) {
            return RiskLevel::Low;
        }
        RiskLevel::Minimal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use strands_core::config::PolicyName;
    use strands_core::model::alert::{Alert, AlertStatus, NormalizedAlert, ValidationStatus};
    use strands_core::model::swarm::{CompletionStatus, EvidenceItem, EvidenceKind};
    use uuid::Uuid;

    fn cluster_with_severity(severity: Severity) -> AlertCluster {
        let alert = NormalizedAlert {
            alert: Alert {
                received_at: Utc::now(),
                provider: "test".into(),
                fingerprint: "fp".into(),
                service: "checkout".into(),
                severity,
                description: "d".into(),
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
                status: AlertStatus::Firing,
            },
            validation: ValidationStatus::Valid,
        };
        AlertCluster {
            cluster_id: Uuid::new_v4(),
            service: "checkout".into(),
            earliest: alert.alert.received_at,
            latest: alert.alert.received_at,
            cluster_type: "service-window".into(),
            members: vec![alert],
            correlation_basis: None,
        }
    }

    fn success(id: &str, confidence: f64, hypothesis: &str) -> SpecialistResult {
        SpecialistResult {
            specialist_id: id.into(),
            hypothesis: hypothesis.into(),
            confidence,
            evidence: vec![EvidenceItem::new(
                EvidenceKind::Metric,
                "expr",
                hypothesis,
                1.0,
                Utc::now(),
            )],
            suggested_actions: vec![format!("action from {id}")],
            status: CompletionStatus::Success,
            duration_ms: 5,
        }
    }

    fn engine(policy: PolicyName) -> DecisionEngine {
        let config = EngineConfig {
            policy,
            default_automation: AutomationLevel::Full,
            ..EngineConfig::default()
        };
        DecisionEngine::new(config, 500)
    }

    fn outcome(results: Vec<SpecialistResult>, degraded: bool) -> InvestigationOutcome {
        InvestigationOutcome { results, degraded }
    }

    #[test]
    fn partial_swarm_failure_fuses_over_successes() {
        // 2 successes (0.9, 0.8), one error, two timeouts.
        let investigation = outcome(
            vec![
                success("metrics", 0.9, "cpu saturation drives latency"),
                success("logs", 0.8, "timeout storm in logs"),
                SpecialistResult::errored("graph", "UPSTREAM_UNAVAILABLE", 10),
                SpecialistResult::timed_out("embeddings", 30_000),
                SpecialistResult::timed_out("correlator", 30_000),
            ],
            false,
        );
        let ids = IdGen::seeded(7);
        let decision = engine(PolicyName::Permissive).consolidate(
            &cluster_with_severity(Severity::High),
            &investigation,
            &ids,
            Clock::Wall,
        );

        assert!(!decision.degraded);
        assert!(!decision.conflict);
        // Weighted over SUCCESS only: (0.4*0.9 + 0.3*0.8) / 0.7
        let expected = (0.4 * 0.9 + 0.3 * 0.8) / 0.7;
        assert!((decision.confidence - expected).abs() < 1e-9);
        assert_eq!(decision.hypothesis, "cpu saturation drives latency");
        decision.validate().unwrap();
    }

    #[test]
    fn total_failure_is_degraded_and_manual() {
        let investigation = outcome(
            (0..5)
                .map(|i| SpecialistResult::timed_out(format!("s{i}"), 30_000))
                .collect(),
            true,
        );
        let ids = IdGen::seeded(7);
        let decision = engine(PolicyName::Permissive).consolidate(
            &cluster_with_severity(Severity::High),
            &investigation,
            &ids,
            Clock::Wall,
        );
        assert!(decision.degraded);
        assert_eq!(decision.automation, AutomationLevel::Manual);
        assert!(decision.confidence <= 0.3);
        assert_eq!(decision.outcome, DecisionOutcome::Escalate);
    }

    #[test]
    fn critical_risk_forces_manual_regardless_of_default() {
        let mut result = success("metrics", 0.95, "database volume full, data loss imminent");
        result.evidence[0].description = "disk full on primary volume".into();
        let investigation = outcome(vec![result], false);
        let ids = IdGen::seeded(7);
        let decision = engine(PolicyName::Permissive).consolidate(
            &cluster_with_severity(Severity::Critical),
            &investigation,
            &ids,
            Clock::Wall,
        );
        assert_eq!(decision.risk, RiskLevel::Critical);
        assert_eq!(decision.automation, AutomationLevel::Manual);
        // The downgrade does not touch confidence.
        assert!((decision.confidence - 0.95).abs() < 1e-9);
        decision.validate().unwrap();
    }

    #[test]
    fn high_risk_caps_at_assisted() {
        let investigation = outcome(
            vec![success("metrics", 0.95, "memory exhaustion in checkout")],
            false,
        );
        let ids = IdGen::seeded(7);
        let decision = engine(PolicyName::Permissive).consolidate(
            &cluster_with_severity(Severity::Warning),
            &investigation,
            &ids,
            Clock::Wall,
        );
        assert_eq!(decision.risk, RiskLevel::High);
        assert_eq!(decision.automation, AutomationLevel::Assisted);
        assert_eq!(decision.outcome, DecisionOutcome::RequiresApproval);
    }

    #[test]
    fn conflicting_hypotheses_concatenate_and_penalise() {
        let investigation = outcome(
            vec![
                success("metrics", 0.78, "cpu saturation"),
                success("logs", 0.77, "dependency outage"),
            ],
            false,
        );
        let ids = IdGen::seeded(7);
        let decision = engine(PolicyName::Permissive).consolidate(
            &cluster_with_severity(Severity::High),
            &investigation,
            &ids,
            Clock::Wall,
        );
        assert!(decision.conflict);
        assert!(decision.hypothesis.contains(" | "));
        let unpenalised = (0.4 * 0.78 + 0.3 * 0.77) / 0.7;
        assert!((decision.confidence - unpenalised * 0.85).abs() < 1e-9);
    }

    #[test]
    fn strict_policy_escalates_mid_confidence() {
        let investigation = outcome(vec![success("metrics", 0.8, "cpu pressure")], false);
        let ids = IdGen::seeded(7);
        let decision = engine(PolicyName::Strict).consolidate(
            &cluster_with_severity(Severity::Warning),
            &investigation,
            &ids,
            Clock::Wall,
        );
        assert_eq!(decision.outcome, DecisionOutcome::Escalate);
    }

    #[test]
    fn full_automation_with_passing_policy_auto_approves() {
        // Stable warning -> LOW risk -> FULL automation survives the bound.
        let investigation = outcome(
            vec![
                success("metrics", 0.95, "traffic shape is stable, transient blip"),
                success("logs", 0.93, "stable, no error signatures"),
            ],
            false,
        );
        let ids = IdGen::seeded(7);
        let decision = engine(PolicyName::Permissive).consolidate(
            &cluster_with_severity(Severity::Warning),
            &investigation,
            &ids,
            Clock::Wall,
        );
        assert_eq!(decision.risk, RiskLevel::Low);
        assert_eq!(decision.automation, AutomationLevel::Full);
        assert_eq!(decision.outcome, DecisionOutcome::AutoApprove);
    }

    #[test]
    fn model_and_weight_versions_recorded() {
        let investigation = outcome(vec![success("metrics", 0.9, "x")], false);
        let ids = IdGen::seeded(7);
        let decision = engine(PolicyName::Balanced).consolidate(
            &cluster_with_severity(Severity::Info),
            &investigation,
            &ids,
            Clock::Wall,
        );
        assert_eq!(decision.model_version, "strands-v1");
        assert_eq!(decision.weights_version, "weights-v1");
    }
}
