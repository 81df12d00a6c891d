//! Recommender: resolves a decision to a playbook.
//!
//! Resolution order: a known `ACTIVE` playbook ranked by adaptive score, a
//! freshly generated draft persisted for curation, or a synthetic fallback
//! carrying the specialist-suggested actions. The adaptive score is
//! `correlation_confidence * success_rate * ln(1 + total_executions)`.

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use strands_adapters::generator::{GenerationOptions, TextGenerator};
use strands_core::error::Result;
use strands_core::model::correlation::CorrelationType;
use strands_core::model::decision::DecisionCandidate;
use strands_core::model::playbook::{
    Playbook, PlaybookSource, PlaybookStats, PlaybookStatus, PlaybookStep, SemVer,
};
use strands_core::model::swarm::{EvidenceKind, SpecialistResult};
use strands_core::types::{AutomationLevel, Clock, IdGen, RiskLevel};
use tracing::{debug, info, warn};

use crate::playbook::PlaybookStore;

/// Where the recommended playbook came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationSource {
    Known,
    Generated,
    Fallback,
}

/// Whether the recommendation may execute as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    RequiresApproval,
}

/// Outcome of `recommend`.
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub playbook: Playbook,
    pub source: RecommendationSource,
    pub readiness: Readiness,
    /// False for the synthetic fallback, which is never stored.
    pub persisted: bool,
}

/// Lenient schema for the generated draft.
#[derive(Debug, Deserialize)]
struct DraftPlaybook {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    steps: Vec<DraftStep>,
    #[serde(default)]
    prerequisites: Vec<String>,
    #[serde(default)]
    success_criteria: Vec<String>,
    #[serde(default)]
    rollback_procedure: String,
    #[serde(default)]
    estimated_duration_s: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DraftStep {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default)]
    expected_output: Option<String>,
    #[serde(default)]
    rollback_command: Option<String>,
}

/// Resolves decisions to playbooks, learning as drafts are curated.
#[derive(Debug)]
pub struct Recommender {
    store: Arc<PlaybookStore>,
    generator: Arc<dyn TextGenerator>,
    system_identity: String,
}

impl Recommender {
    pub fn new(
        store: Arc<PlaybookStore>,
        generator: Arc<dyn TextGenerator>,
        system_identity: impl Into<String>,
    ) -> Self {
        Self {
            store,
            generator,
            system_identity: system_identity.into(),
        }
    }

    /// Dominant pattern type of an investigation, from the evidence mix.
    pub fn dominant_pattern_type(results: &[SpecialistResult]) -> CorrelationType {
        let mut has_metric = false;
        let mut has_log = false;
        let mut has_event = false;
        for result in results {
            for item in &result.evidence {
                match item.kind {
                    EvidenceKind::Metric => has_metric = true,
                    EvidenceKind::Log => has_log = true,
                    EvidenceKind::Event => has_event = true,
                    _ => {}
                }
            }
        }
        match (has_log, has_metric, has_event) {
            (true, true, _) => CorrelationType::LogMetric,
            (false, true, _) => CorrelationType::MetricMetric,
            (_, _, true) => CorrelationType::EventSequence,
            _ => CorrelationType::Temporal,
        }
    }

    /// Resolve a playbook for `decision`.
    pub async fn recommend(
        &self,
        decision: &DecisionCandidate,
        pattern_type: CorrelationType,
        service: &str,
        ids: &IdGen,
        clock: Clock,
    ) -> Result<Recommendation> {
        // 1. Known playbooks, ranked by adaptive score.
        let candidates = self.store.find_active(pattern_type, service).await?;
        if let Some(best) = Self::rank(candidates, decision.confidence) {
            info!(
                playbook_id = %best.playbook_id,
                score = best.stats.adaptive_score(decision.confidence),
                "known playbook selected"
            );
            metrics::counter!("strands_recommendations_total", "source" => "known").increment(1);
            return Ok(Recommendation {
                playbook: best,
                source: RecommendationSource::Known,
                readiness: Readiness::Ready,
                persisted: true,
            });
        }

        // 2. Draft a new playbook via the text generator.
        match self
            .generate_draft(decision, pattern_type, service, ids, clock)
            .await
        {
            Ok(draft) => {
                self.store.save(&draft).await?;
                info!(playbook_id = %draft.playbook_id, "generated playbook persisted for review");
                metrics::counter!("strands_recommendations_total", "source" => "generated")
                    .increment(1);
                Ok(Recommendation {
                    playbook: draft,
                    source: RecommendationSource::Generated,
                    readiness: Readiness::RequiresApproval,
                    persisted: true,
                })
            }
            Err(e) => {
                // 3. Fallback: synthetic playbook from the suggested actions.
                warn!(error = %e, "generation failed, using fallback playbook");
                metrics::counter!("strands_recommendations_total", "source" => "fallback")
                    .increment(1);
                Ok(Recommendation {
                    playbook: self.fallback_playbook(decision, pattern_type, service, ids, clock),
                    source: RecommendationSource::Fallback,
                    readiness: Readiness::RequiresApproval,
                    persisted: false,
                })
            }
        }
    }

    /// Highest adaptive score wins; ties go to the most recently executed.
    fn rank(candidates: Vec<Playbook>, correlation_confidence: f64) -> Option<Playbook> {
        candidates.into_iter().max_by(|a, b| {
            let sa = a.stats.adaptive_score(correlation_confidence);
            let sb = b.stats.adaptive_score(correlation_confidence);
            sa.partial_cmp(&sb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.stats.last_executed_at.cmp(&b.stats.last_executed_at))
        })
    }

    async fn generate_draft(
        &self,
        decision: &DecisionCandidate,
        pattern_type: CorrelationType,
        service: &str,
        ids: &IdGen,
        clock: Clock,
    ) -> Result<Playbook> {
        let prompt = Self::build_prompt(decision, pattern_type, service);
        let options = GenerationOptions::default();

        let mut response = self.generator.generate(&prompt, &options).await?;
        let draft = match Self::parse_draft(&response) {
            Ok(draft) => draft,
            Err(first_error) => {
                // One bounded repair attempt with the parse error quoted.
                debug!(error = %first_error, "draft parse failed, attempting repair");
                let repair = format!(
                    "{prompt}\n\nThe previous response could not be parsed ({first_error}). \
                     Respond again with ONLY the JSON object."
                );
                response = self.generator.generate(&repair, &options).await?;
                Self::parse_draft(&response)?
            }
        };

        let now = clock.now();
        Ok(Playbook {
            playbook_id: ids.next_id(),
            title: draft.title,
            description: draft.description,
            pattern_type,
            service_pattern: service.to_string(),
            steps: draft
                .steps
                .into_iter()
                .enumerate()
                .map(|(i, s)| PlaybookStep {
                    index: i as u32,
                    title: s.title,
                    description: s.description,
                    commands: s.commands,
                    expected_output: s.expected_output,
                    rollback_command: s.rollback_command,
                })
                .collect(),
            estimated_duration_s: draft.estimated_duration_s.unwrap_or(1800),
            automation: AutomationLevel::Manual,
            risk: decision.risk,
            prerequisites: draft.prerequisites,
            success_criteria: draft.success_criteria,
            rollback_procedure: draft.rollback_procedure,
            source: PlaybookSource::LlmGenerated,
            status: PlaybookStatus::PendingReview,
            version: SemVer::initial(),
            created_at: now,
            created_by: self.system_identity.clone(),
            updated_at: now,
            updated_by: None,
            approved_at: None,
            approved_by: None,
            stats: PlaybookStats::default(),
            rejection_note: None,
        })
    }

    fn build_prompt(
        decision: &DecisionCandidate,
        pattern_type: CorrelationType,
        service: &str,
    ) -> String {
        let evidence_lines: Vec<String> = decision
            .evidence
            .iter()
            .take(15)
            .map(|e| format!("- [{:?}] {} ({})", e.kind, e.description, e.source))
            .collect();
        let action_lines: Vec<String> = decision
            .suggested_actions
            .iter()
            .map(|a| format!("- {a}"))
            .collect();
        format!(
            "Draft a remediation playbook for a Kubernetes incident.\n\
             Service: {service}\n\
             Pattern: {pattern_type}\n\
             Hypothesis: {hypothesis}\n\
             Evidence:\n{evidence}\n\
             Suggested actions:\n{actions}\n\n\
             Respond with ONLY a JSON object with fields: title, description, \
             steps (array of {{title, description, commands, rollback_command}}), \
             prerequisites, success_criteria, rollback_procedure, estimated_duration_s.",
            hypothesis = decision.hypothesis,
            evidence = evidence_lines.join("\n"),
            actions = action_lines.join("\n"),
        )
    }

    fn parse_draft(response: &str) -> Result<DraftPlaybook> {
        // Tolerate prose around the JSON object.
        let start = response.find('{');
        let end = response.rfind('}');
        let json_slice = match (start, end) {
            (Some(s), Some(e)) if e > s => &response[s..=e],
            _ => response,
        };
        let draft: DraftPlaybook = serde_json::from_str(json_slice)?;
        if draft.title.is_empty() {
            return Err(strands_core::Error::validation("draft has no title"));
        }
        Ok(draft)
    }

    fn fallback_playbook(
        &self,
        decision: &DecisionCandidate,
        pattern_type: CorrelationType,
        service: &str,
        ids: &IdGen,
        clock: Clock,
    ) -> Playbook {
        let now = clock.now();
        let steps = decision
            .suggested_actions
            .iter()
            .enumerate()
            .map(|(i, action)| PlaybookStep {
                index: i as u32,
                title: action.clone(),
                description: String::new(),
                commands: vec![],
                expected_output: None,
                rollback_command: None,
            })
            .collect();
        Playbook {
            playbook_id: ids.next_id(),
            title: format!("Manual remediation for {service}"),
            description: format!(
                "Specialist-suggested actions for: {}",
                decision.hypothesis
            ),
            pattern_type,
            service_pattern: service.to_string(),
            steps,
            estimated_duration_s: 1800,
            automation: AutomationLevel::Manual,
            risk: decision.risk.max(RiskLevel::Medium),
            prerequisites: vec![],
            success_criteria: vec![],
            rollback_procedure: String::new(),
            source: PlaybookSource::Hybrid,
            status: PlaybookStatus::Draft,
            version: SemVer::initial(),
            created_at: now,
            created_by: self.system_identity.clone(),
            updated_at: now,
            updated_by: None,
            approved_at: None,
            approved_by: None,
            stats: PlaybookStats::default(),
            rejection_note: None,
        }
    }

    /// Persist the embedding of a confirmed incident so future
    /// investigations can retrieve it. Called only after a human approval.
    pub async fn remember_incident(
        &self,
        vectors: &dyn strands_adapters::vector::VectorStore,
        decision: &DecisionCandidate,
        service: &str,
    ) -> Result<()> {
        let text = format!("{service}: {}", decision.hypothesis);
        let embedding = self.generator.embed(&text).await?;
        let payload = json!({
            "hypothesis": decision.hypothesis,
            "actions": decision.suggested_actions,
            "service": service,
            "confirmed_at": Utc::now().to_rfc3339(),
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        vectors
            .upsert(&decision.decision_id.to_string(), embedding, payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strands_adapters::generator::StaticGenerator;
    use strands_adapters::graph::MemoryGraphStore;
    use strands_core::audit::AuditLogger;
    use strands_core::model::decision::DecisionOutcome;
    use strands_core::model::playbook::ExecutionOutcome;
    use uuid::Uuid;

    const SYSTEM: &str = "strands-system";

    struct Fixture {
        recommender: Recommender,
        store: Arc<PlaybookStore>,
        generator: Arc<StaticGenerator>,
        ids: IdGen,
    }

    fn fixture() -> Fixture {
        let graph = Arc::new(MemoryGraphStore::new());
        let audit = Arc::new(AuditLogger::in_memory());
        let store = Arc::new(PlaybookStore::new(graph, audit));
        let generator = Arc::new(StaticGenerator::new());
        Fixture {
            recommender: Recommender::new(store.clone(), generator.clone(), SYSTEM),
            store,
            generator,
            ids: IdGen::seeded(5),
        }
    }

    fn decision(ids: &IdGen) -> DecisionCandidate {
        DecisionCandidate {
            decision_id: ids.next_id(),
            cluster_id: ids.next_id(),
            hypothesis: "cpu saturation drives latency".into(),
            confidence: 0.8,
            risk: RiskLevel::Medium,
            automation: AutomationLevel::Assisted,
            outcome: DecisionOutcome::RequiresApproval,
            conflict: false,
            degraded: false,
            suggested_actions: vec!["scale out checkout".into()],
            evidence: vec![],
            model_version: "strands-v1".into(),
            weights_version: "weights-v1".into(),
            audit_id: ids.next_id(),
            created_at: Utc::now(),
        }
    }

    fn active_playbook(ids: &IdGen, executions: u64, successes: u64) -> Playbook {
        let now = Utc::now();
        let mut stats = PlaybookStats::default();
        for i in 0..executions {
            let outcome = if i < successes {
                ExecutionOutcome::Success
            } else {
                ExecutionOutcome::Failure
            };
            stats.record(outcome, 60.0, now);
        }
        Playbook {
            playbook_id: ids.next_id(),
            title: "Scale checkout".into(),
            description: "scale".into(),
            pattern_type: CorrelationType::MetricMetric,
            service_pattern: "checkout".into(),
            steps: vec![],
            estimated_duration_s: 600,
            automation: AutomationLevel::Assisted,
            risk: RiskLevel::Medium,
            prerequisites: vec![],
            success_criteria: vec![],
            rollback_procedure: "scale back".into(),
            source: PlaybookSource::HumanWritten,
            status: PlaybookStatus::Active,
            version: SemVer::initial(),
            created_at: now,
            created_by: "alice".into(),
            updated_at: now,
            updated_by: None,
            approved_at: Some(now),
            approved_by: Some("alice".into()),
            stats,
            rejection_note: None,
        }
    }

    #[tokio::test]
    async fn known_playbook_wins_by_adaptive_score() {
        let f = fixture();
        let weak = active_playbook(&f.ids, 10, 3);
        let strong = active_playbook(&f.ids, 10, 9);
        f.store.save(&weak).await.unwrap();
        f.store.save(&strong).await.unwrap();

        let d = decision(&f.ids);
        let recommendation = f
            .recommender
            .recommend(&d, CorrelationType::MetricMetric, "checkout", &f.ids, Clock::Wall)
            .await
            .unwrap();

        assert_eq!(recommendation.source, RecommendationSource::Known);
        assert_eq!(recommendation.readiness, Readiness::Ready);
        assert_eq!(recommendation.playbook.playbook_id, strong.playbook_id);
    }

    #[tokio::test]
    async fn no_match_generates_and_persists_draft() {
        let f = fixture();
        f.generator.push_response(
            r#"{"title": "Scale out checkout", "description": "Add replicas",
                "steps": [{"title": "scale", "commands": ["kubectl scale deploy/checkout --replicas=5"]}],
                "rollback_procedure": "scale back to 3"}"#,
        );

        let d = decision(&f.ids);
        let recommendation = f
            .recommender
            .recommend(&d, CorrelationType::MetricMetric, "checkout", &f.ids, Clock::Wall)
            .await
            .unwrap();

        assert_eq!(recommendation.source, RecommendationSource::Generated);
        assert_eq!(recommendation.readiness, Readiness::RequiresApproval);
        assert!(recommendation.persisted);
        assert_eq!(recommendation.playbook.status, PlaybookStatus::PendingReview);
        assert_eq!(recommendation.playbook.source, PlaybookSource::LlmGenerated);

        let stored = f
            .store
            .get(recommendation.playbook.playbook_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title, "Scale out checkout");
        assert_eq!(stored.steps.len(), 1);
    }

    #[tokio::test]
    async fn malformed_draft_gets_one_repair_attempt() {
        let f = fixture();
        f.generator.push_response("Sure! Here is the playbook you asked for.");
        f.generator
            .push_response(r#"{"title": "Repaired", "rollback_procedure": "undo"}"#);

        let d = decision(&f.ids);
        let recommendation = f
            .recommender
            .recommend(&d, CorrelationType::MetricMetric, "checkout", &f.ids, Clock::Wall)
            .await
            .unwrap();
        assert_eq!(recommendation.source, RecommendationSource::Generated);
        assert_eq!(recommendation.playbook.title, "Repaired");
    }

    #[tokio::test]
    async fn generator_outage_falls_back_to_suggested_actions() {
        let f = fixture();
        // No scripted responses: generation fails like a down upstream.
        let d = decision(&f.ids);
        let recommendation = f
            .recommender
            .recommend(&d, CorrelationType::MetricMetric, "checkout", &f.ids, Clock::Wall)
            .await
            .unwrap();

        assert_eq!(recommendation.source, RecommendationSource::Fallback);
        assert_eq!(recommendation.readiness, Readiness::RequiresApproval);
        assert!(!recommendation.persisted);
        assert_eq!(recommendation.playbook.steps.len(), 1);
        assert_eq!(recommendation.playbook.steps[0].title, "scale out checkout");
        // Synthetic playbooks never reach the store.
        assert!(f
            .store
            .get(recommendation.playbook.playbook_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn prose_wrapped_json_is_parsed() {
        let draft = Recommender::parse_draft(
            "Here you go:\n{\"title\": \"X\", \"rollback_procedure\": \"undo\"}\nGood luck!",
        )
        .unwrap();
        assert_eq!(draft.title, "X");
    }

    #[test]
    fn dominant_pattern_derivation() {
        use strands_core::model::swarm::{CompletionStatus, EvidenceItem};
        let now = Utc::now();
        let mk = |kind| SpecialistResult {
            specialist_id: "x".into(),
            hypothesis: "h".into(),
            confidence: 0.5,
            evidence: vec![EvidenceItem::new(kind, "s", "d", 0.5, now)],
            suggested_actions: vec![],
            status: CompletionStatus::Success,
            duration_ms: 0,
        };
        assert_eq!(
            Recommender::dominant_pattern_type(&[mk(EvidenceKind::Metric), mk(EvidenceKind::Log)]),
            CorrelationType::LogMetric
        );
        assert_eq!(
            Recommender::dominant_pattern_type(&[mk(EvidenceKind::Metric)]),
            CorrelationType::MetricMetric
        );
        assert_eq!(
            Recommender::dominant_pattern_type(&[mk(EvidenceKind::Event)]),
            CorrelationType::EventSequence
        );
        assert_eq!(
            Recommender::dominant_pattern_type(&[mk(EvidenceKind::Document)]),
            CorrelationType::Temporal
        );
    }

    #[tokio::test]
    async fn remember_incident_upserts_embedding() {
        let f = fixture();
        let vectors = strands_adapters::vector::MemoryVectorStore::new();
        let d = decision(&f.ids);
        f.recommender
            .remember_incident(&vectors, &d, "checkout")
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
    }
}
