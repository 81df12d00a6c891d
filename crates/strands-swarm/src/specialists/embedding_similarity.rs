//! Embedding specialist: embeds the cluster description and searches the
//! vector store for similar past incidents.

use async_trait::async_trait;
use std::sync::Arc;
use strands_adapters::generator::TextGenerator;
use strands_adapters::vector::VectorStore;
use strands_core::error::Result;
use strands_core::model::alert::AlertCluster;
use strands_core::model::swarm::{CompletionStatus, EvidenceItem, EvidenceKind, SpecialistResult};
use tracing::debug;

use crate::specialist::{InvestigationContext, Specialist};

const TOP_K: usize = 5;
const MIN_SCORE: f64 = 0.55;

/// The similarity-domain specialist.
#[derive(Debug)]
pub struct EmbeddingSimilaritySpecialist {
    generator: Arc<dyn TextGenerator>,
    vectors: Arc<dyn VectorStore>,
}

impl EmbeddingSimilaritySpecialist {
    pub fn new(generator: Arc<dyn TextGenerator>, vectors: Arc<dyn VectorStore>) -> Self {
        Self { generator, vectors }
    }
}

#[async_trait]
impl Specialist for EmbeddingSimilaritySpecialist {
    fn id(&self) -> &'static str {
        "embeddings"
    }

    async fn investigate(
        &self,
        cluster: &AlertCluster,
        ctx: &InvestigationContext,
    ) -> Result<SpecialistResult> {
        let now = ctx.clock.now();
        let text = format!("{}: {}", cluster.service, cluster.combined_description());
        let embedding = self.generator.embed(&text).await?;
        let hits = self.vectors.search(&embedding, TOP_K, MIN_SCORE).await?;
        debug!(hits = hits.len(), "similar incidents retrieved");

        let evidence: Vec<EvidenceItem> = hits
            .iter()
            .map(|hit| {
                let summary = hit
                    .payload
                    .get("hypothesis")
                    .and_then(|v| v.as_str())
                    .unwrap_or("similar past incident");
                EvidenceItem::new(
                    EvidenceKind::SimilarIncident,
                    hit.id.clone(),
                    summary.to_string(),
                    hit.score.clamp(0.0, 1.0),
                    now,
                )
                .with_value(hit.score)
            })
            .collect();

        let (hypothesis, confidence, suggested_actions) = match hits.first() {
            Some(best) => {
                let past_hypothesis = best
                    .payload
                    .get("hypothesis")
                    .and_then(|v| v.as_str())
                    .unwrap_or("an unlabelled incident");
                let actions: Vec<String> = best
                    .payload
                    .get("actions")
                    .and_then(|v| v.as_array())
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                (
                    format!(
                        "matches past incident {} ({:.0}% similar): {past_hypothesis}",
                        best.id,
                        best.score * 100.0
                    ),
                    (best.score * 0.9).clamp(0.0, 1.0),
                    actions,
                )
            }
            None => (
                "no sufficiently similar past incident".to_string(),
                0.2,
                Vec::new(),
            ),
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
    use serde_json::json;
    use std::time::{Duration, Instant};
    use strands_adapters::generator::StaticGenerator;
    use strands_adapters::vector::MemoryVectorStore;
    use strands_core::types::Clock;
    use uuid::Uuid;

    fn cluster(description: &str) -> AlertCluster {
        use std::collections::BTreeMap;
        use strands_core::model::alert::{Alert, AlertStatus, NormalizedAlert, ValidationStatus};
        let alert = NormalizedAlert {
            alert: Alert {
                received_at: Utc::now(),
                provider: "test".into(),
                fingerprint: "fp".into(),
                service: "checkout".into(),
                severity: strands_core::types::Severity::High,
                description: description.into(),
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

    fn ctx() -> InvestigationContext {
        InvestigationContext::new(Instant::now() + Duration::from_secs(30), Clock::Wall)
    }

    #[tokio::test]
    async fn similar_incident_shapes_hypothesis() {
        let generator = Arc::new(StaticGenerator::new());
        let vectors = Arc::new(MemoryVectorStore::new());

        // Seed the store with the embedding of an equivalent description.
        let description = "checkout: checkout latency over threshold";
        let seed = generator.embed(description).await.unwrap();
        let payload = json!({
            "hypothesis": "connection pool exhaustion",
            "actions": ["raise pool size"]
        })
        .as_object()
        .cloned()
        .unwrap();
        vectors.upsert("incident-42", seed, payload).await.unwrap();

        let specialist = EmbeddingSimilaritySpecialist::new(generator, vectors);
        let result = specialist
            .investigate(&cluster("checkout latency over threshold"), &ctx())
            .await
            .unwrap();

        assert!(result.status.is_success());
        assert!(result.hypothesis.contains("incident-42"));
        assert!(result.hypothesis.contains("connection pool exhaustion"));
        assert!(result.confidence > 0.8);
        assert_eq!(result.suggested_actions, vec!["raise pool size"]);
        assert_eq!(result.evidence.len(), 1);
        assert_eq!(result.evidence[0].kind, EvidenceKind::SimilarIncident);
    }

    #[tokio::test]
    async fn empty_store_gives_low_confidence() {
        let generator = Arc::new(StaticGenerator::new());
        let vectors = Arc::new(MemoryVectorStore::new());
        let specialist = EmbeddingSimilaritySpecialist::new(generator, vectors);
        let result = specialist
            .investigate(&cluster("novel failure"), &ctx())
            .await
            .unwrap();
        assert!(result.confidence <= 0.2);
        assert!(result.evidence.is_empty());
    }
}
