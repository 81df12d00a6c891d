//! Log specialist: inspects pod logs and cluster events for the service,
//! counting error classes and restart loops.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use strands_adapters::kube::ClusterIntrospection;
use strands_core::error::Result;
use strands_core::model::alert::AlertCluster;
use strands_core::model::swarm::{CompletionStatus, EvidenceItem, EvidenceKind, SpecialistResult};
use tracing::debug;

use crate::specialist::{InvestigationContext, Specialist};

/// Error classes counted in log lines, most specific first.
const ERROR_CLASSES: &[&str] = &[
    "oomkilled",
    "out of memory",
    "panic",
    "connection refused",
    "deadline exceeded",
    "exception",
    "timeout",
    "error",
];

/// Restart count at which a pod is treated as crash-looping.
const RESTART_LOOP_THRESHOLD: u32 = 3;

const MAX_LOG_LINES: usize = 500;

/// The log-domain specialist.
#[derive(Debug)]
pub struct LogInspectorSpecialist {
    cluster_api: Arc<dyn ClusterIntrospection>,
}

impl LogInspectorSpecialist {
    pub fn new(cluster_api: Arc<dyn ClusterIntrospection>) -> Self {
        Self { cluster_api }
    }

    fn count_errors(logs: &str) -> Vec<(&'static str, usize)> {
        let lower = logs.to_ascii_lowercase();
        let mut counts = Vec::new();
        for class in ERROR_CLASSES {
            let count = lower.matches(class).count();
            if count > 0 {
                counts.push((*class, count));
            }
        }
        counts
    }
}

#[async_trait]
impl Specialist for LogInspectorSpecialist {
    fn id(&self) -> &'static str {
        "logs"
    }

    async fn investigate(
        &self,
        cluster: &AlertCluster,
        ctx: &InvestigationContext,
    ) -> Result<SpecialistResult> {
        let now = ctx.clock.now();
        let since = cluster.earliest - ChronoDuration::minutes(10);
        let selector = format!("app={}", cluster.service);
        let pods = self.cluster_api.list_pods(&selector).await?;

        let mut evidence = Vec::new();
        let mut looping_pods: Vec<String> = Vec::new();
        let mut dominant_class: Option<(&'static str, usize)> = None;

        for pod in &pods {
            if pod.restart_count >= RESTART_LOOP_THRESHOLD {
                looping_pods.push(pod.name.clone());
                evidence.push(
                    EvidenceItem::new(
                        EvidenceKind::Event,
                        pod.name.clone(),
                        format!("pod restarted {} times", pod.restart_count),
                        0.9,
                        now,
                    )
                    .with_value(pod.restart_count as f64),
                );
            }

            let logs = self
                .cluster_api
                .fetch_logs(&pod.name, since, MAX_LOG_LINES)
                .await?;
            for (class, count) in Self::count_errors(&logs) {
                debug!(pod = %pod.name, class, count, "log errors counted");
                let density = (count as f64 / MAX_LOG_LINES as f64).min(1.0);
                evidence.push(
                    EvidenceItem::new(
                        EvidenceKind::Log,
                        pod.name.clone(),
                        format!("{count} '{class}' lines in recent logs"),
                        (0.4 + density * 2.0).min(0.95),
                        now,
                    )
                    .with_value(count as f64),
                );
                if dominant_class.map(|(_, c)| count > c).unwrap_or(true) {
                    dominant_class = Some((class, count));
                }
            }
        }

        // Namespace events complement pod logs.
        if let Some(namespace) = pods.first().map(|p| p.namespace.clone()) {
            let events = self.cluster_api.fetch_events(&namespace, since).await?;
            for event in events.iter().take(20) {
                evidence.push(EvidenceItem::new(
                    EvidenceKind::Event,
                    event.involved_object.clone(),
                    format!("{}: {}", event.reason, event.message),
                    0.6,
                    event.timestamp,
                ));
            }
        }

        let (hypothesis, confidence, suggested_actions) = if !looping_pods.is_empty() {
            (
                format!(
                    "{} pods are crash-looping: {}",
                    cluster.service,
                    looping_pods.join(", ")
                ),
                0.85,
                vec![
                    format!("describe pods {} and inspect last state", looping_pods.join(", ")),
                    format!("roll back the latest {} deployment", cluster.service),
                ],
            )
        } else if let Some((class, count)) = dominant_class {
            (
                format!("{} logs show {count} '{class}' entries in the incident window", cluster.service),
                (0.45 + (count as f64 / 50.0)).min(0.8),
                vec![format!("inspect {} logs around the first '{class}' entry", cluster.service)],
            )
        } else {
            (
                format!("no error signatures in {} logs", cluster.service),
                0.25,
                vec![],
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
