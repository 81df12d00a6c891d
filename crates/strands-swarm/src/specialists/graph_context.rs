//! Graph specialist: pulls prior decisions and active playbooks for the
//! service out of the graph store to establish incident history.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use strands_adapters::graph::GraphStore;
use strands_core::error::Result;
use strands_core::model::alert::AlertCluster;
use strands_core::model::swarm::{CompletionStatus, EvidenceItem, EvidenceKind, SpecialistResult};

use crate::specialist::{InvestigationContext, Specialist};

/// The graph-domain specialist.
#[derive(Debug)]
pub struct GraphContextSpecialist {
    graph: Arc<dyn GraphStore>,
}

impl GraphContextSpecialist {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Specialist for GraphContextSpecialist {
    fn id(&self) -> &'static str {
        "graph"
    }

    async fn investigate(
        &self,
        cluster: &AlertCluster,
        ctx: &InvestigationContext,
    ) -> Result<SpecialistResult> {
        let now = ctx.clock.now();

        let past_decisions = self
            .graph
            .find_nodes(
                "DecisionCandidate",
                &[("service", json!(cluster.service.clone()))],
            )
            .await?;
        let active_playbooks = self
            .graph
            .find_nodes(
                "Playbook",
                &[
                    ("service_pattern", json!(cluster.service.clone())),
                    ("status", json!("ACTIVE")),
                ],
            )
            .await?;

        let mut evidence = Vec::new();
        for decision in past_decisions.iter().take(10) {
            let hypothesis = decision
                .get("hypothesis")
                .and_then(|v| v.as_str())
                .unwrap_or("unlabelled decision");
            let id = decision
                .get("decision_id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            evidence.push(EvidenceItem::new(
                EvidenceKind::GraphRelation,
                id.to_string(),
                format!("prior decision for {}: {hypothesis}", cluster.service),
                0.6,
                now,
            ));
        }
        for playbook in active_playbooks.iter().take(5) {
            let title = playbook
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("untitled playbook");
            let id = playbook
                .get("playbook_id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            evidence.push(EvidenceItem::new(
                EvidenceKind::GraphRelation,
                id.to_string(),
                format!("active playbook targets {}: {title}", cluster.service),
                0.7,
                now,
            ));
        }

        let (hypothesis, confidence, suggested_actions) = if past_decisions.is_empty() {
            (
                format!("no incident history for {} in the graph", cluster.service),
                0.2,
                Vec::new(),
            )
        } else {
            let mut actions = Vec::new();
            if !active_playbooks.is_empty() {
                actions.push(format!(
                    "review the {} active playbook(s) for {}",
                    active_playbooks.len(),
                    cluster.service
                ));
            }
            (
                format!(
                    "{} has {} recorded prior decision(s); recurring incident likely",
                    cluster.service,
                    past_decisions.len()
                ),
                (0.4 + 0.05 * past_decisions.len() as f64).min(0.65),
                actions,
            )
        };

        Ok(SpecialistResult {
            specialist_id: self.id().to_string(),
            hypothesis,
            confidence,
            evidence,
            suggested_actions,
            status: CompletionStatus::Success,
            duration_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::{Duration, Instant};
    use strands_adapters::graph::MemoryGraphStore;
    use strands_core::types::Clock;
    use uuid::Uuid;

    fn cluster() -> AlertCluster {
        AlertCluster {
            cluster_id: Uuid::new_v4(),
            service: "checkout".into(),
            earliest: Utc::now(),
            latest: Utc::now(),
            cluster_type: "service-window".into(),
            members: Vec::new(),
            correlation_basis: None,
        }
    }

    fn ctx() -> InvestigationContext {
        InvestigationContext::new(Instant::now() + Duration::from_secs(30), Clock::Wall)
    }

    fn props(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn history_raises_confidence() {
        let graph = Arc::new(MemoryGraphStore::new());
        for i in 0..3 {
            graph
                .upsert_node(
                    "DecisionCandidate",
                    &format!("d{i}"),
                    props(&[
                        ("decision_id", json!(format!("d{i}"))),
                        ("service", json!("checkout")),
                        ("hypothesis", json!("pool exhaustion")),
                    ]),
                )
                .await
                .unwrap();
        }
        graph
            .upsert_node(
                "Playbook",
                "p1",
                props(&[
                    ("playbook_id", json!("p1")),
                    ("service_pattern", json!("checkout")),
                    ("status", json!("ACTIVE")),
                    ("title", json!("restart checkout")),
                ]),
            )
            .await
            .unwrap();

        let specialist = GraphContextSpecialist::new(graph);
        let result = specialist.investigate(&cluster(), &ctx()).await.unwrap();

        assert!(result.status.is_success());
        assert!(result.hypothesis.contains("recurring"));
        assert!(result.confidence > 0.4);
        assert_eq!(result.evidence.len(), 4);
        assert!(!result.suggested_actions.is_empty());
    }

    #[tokio::test]
    async fn empty_graph_is_low_confidence() {
        let graph = Arc::new(MemoryGraphStore::new());
        let specialist = GraphContextSpecialist::new(graph);
        let result = specialist.investigate(&cluster(), &ctx()).await.unwrap();
        assert!(result.confidence <= 0.2);
        assert!(result.hypothesis.contains("no incident history"));
    }
}
