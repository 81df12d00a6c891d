//! Swarm orchestration: one task per specialist, a completion channel back
//! to the coordinator, and deterministic reordering by specialist id.
//!
//! The coordinator is single-threaded at the collection boundary: all
//! shared-state updates happen on the coordinator task; specialists only
//! communicate through the channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strands_core::model::alert::AlertCluster;
use strands_core::model::swarm::{CompletionStatus, SpecialistResult};
use strands_core::types::Clock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::specialist::{InvestigationContext, Specialist};

/// Result of one swarm investigation.
#[derive(Debug, Clone)]
pub struct InvestigationOutcome {
    /// Exactly one result per registered specialist, ordered by specialist
    /// id regardless of completion order.
    pub results: Vec<SpecialistResult>,
    /// No specialist succeeded; downstream must penalise confidence and
    /// force manual automation.
    pub degraded: bool,
}

impl InvestigationOutcome {
    pub fn successes(&self) -> impl Iterator<Item = &SpecialistResult> {
        self.results.iter().filter(|r| r.status.is_success())
    }
}

/// Coordinates parallel specialist execution under a global deadline.
#[derive(Debug)]
pub struct SwarmOrchestrator {
    specialists: Vec<Arc<dyn Specialist>>,
}

impl SwarmOrchestrator {
    pub fn new(specialists: Vec<Arc<dyn Specialist>>) -> Self {
        Self { specialists }
    }

    pub fn specialist_count(&self) -> usize {
        self.specialists.len()
    }

    /// Investigate `cluster` with every registered specialist in parallel.
    ///
    /// On deadline expiry outstanding tasks are cancelled and each missing
    /// specialist is given a synthetic `TIMEOUT` result, so the output
    /// always holds one result per specialist.
    pub async fn investigate(
        &self,
        cluster: &AlertCluster,
        deadline: Duration,
        clock: Clock,
    ) -> InvestigationOutcome {
        let started = Instant::now();
        let deadline_at = started + deadline;
        let ctx = InvestigationContext::new(deadline_at, clock);

        let (tx, mut rx) = mpsc::channel::<(String, SpecialistResult)>(self.specialists.len().max(1));
        let mut handles = Vec::with_capacity(self.specialists.len());

        for specialist in &self.specialists {
            let specialist = specialist.clone();
            let cluster = cluster.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let task_started = Instant::now();
                let id = specialist.id().to_string();
                let result = match specialist.investigate(&cluster, &ctx).await {
                    Ok(mut result) => {
                        result.specialist_id = id.clone();
                        result.duration_ms = task_started.elapsed().as_millis() as u64;
                        result
                    }
                    Err(e) => {
                        warn!(specialist = %id, error = %e, "specialist failed");
                        SpecialistResult::errored(
                            id.clone(),
                            e.kind(),
                            task_started.elapsed().as_millis() as u64,
                        )
                    }
                };
                // Receiver may be gone if the deadline already expired; the
                // orphaned result is discarded by design.
                let _ = tx.send((id, result)).await;
            }));
        }
        drop(tx);

        let mut collected: HashMap<String, SpecialistResult> = HashMap::new();
        while collected.len() < self.specialists.len() {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some((id, result))) => {
                    collected.insert(id, result);
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        // Cancel whatever is still running and synthesize TIMEOUT results.
        for handle in &handles {
            handle.abort();
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut results: Vec<SpecialistResult> = self
            .specialists
            .iter()
            .map(|s| {
                collected
                    .remove(s.id())
                    .unwrap_or_else(|| SpecialistResult::timed_out(s.id(), elapsed_ms))
            })
            .collect();
        results.sort_by(|a, b| a.specialist_id.cmp(&b.specialist_id));

        let successes = results.iter().filter(|r| r.status.is_success()).count();
        let degraded = successes == 0;
        if degraded {
            warn!(cluster_id = %cluster.cluster_id, "investigation degraded: no specialist succeeded");
            metrics::counter!("strands_investigations_degraded_total").increment(1);
        }
        info!(
            cluster_id = %cluster.cluster_id,
            specialists = results.len(),
            successes,
            elapsed_ms,
            "investigation complete"
        );

        InvestigationOutcome { results, degraded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use strands_core::error::{Error, Result};
    use strands_core::model::alert::AlertCluster;
    use strands_core::model::swarm::{EvidenceItem, EvidenceKind};
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

    #[derive(Debug)]
    enum Behaviour {
        Succeed(f64),
        Fail,
        Hang,
    }

    #[derive(Debug)]
    struct ScriptedSpecialist {
        id: &'static str,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl Specialist for ScriptedSpecialist {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn investigate(
            &self,
            _cluster: &AlertCluster,
            _ctx: &InvestigationContext,
        ) -> Result<SpecialistResult> {
            match self.behaviour {
                Behaviour::Succeed(confidence) => Ok(SpecialistResult {
                    specialist_id: self.id.to_string(),
                    hypothesis: format!("{} hypothesis", self.id),
                    confidence,
                    evidence: vec![EvidenceItem::new(
                        EvidenceKind::Metric,
                        "expr",
                        "signal",
                        0.9,
                        Utc::now(),
                    )],
                    suggested_actions: vec!["act".into()],
                    status: CompletionStatus::Success,
                    duration_ms: 0,
                }),
                Behaviour::Fail => Err(Error::upstream("adapter", "503")),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    fn orchestrator(behaviours: Vec<(&'static str, Behaviour)>) -> SwarmOrchestrator {
        SwarmOrchestrator::new(
            behaviours
                .into_iter()
                .map(|(id, behaviour)| {
                    Arc::new(ScriptedSpecialist { id, behaviour }) as Arc<dyn Specialist>
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn partial_failure_is_tolerated() {
        // 2 succeed, 1 errors, 2 hang past the deadline.
        let swarm = orchestrator(vec![
            ("metrics", Behaviour::Succeed(0.9)),
            ("logs", Behaviour::Succeed(0.8)),
            ("graph", Behaviour::Fail),
            ("embeddings", Behaviour::Hang),
            ("correlator", Behaviour::Hang),
        ]);
        let outcome = swarm
            .investigate(&cluster(), Duration::from_millis(200), Clock::Wall)
            .await;

        assert_eq!(outcome.results.len(), 5);
        assert!(!outcome.degraded);

        let by_id: HashMap<&str, &SpecialistResult> = outcome
            .results
            .iter()
            .map(|r| (r.specialist_id.as_str(), r))
            .collect();
        assert!(by_id["metrics"].status.is_success());
        assert!(by_id["logs"].status.is_success());
        assert!(matches!(
            by_id["graph"].status,
            CompletionStatus::Error { .. }
        ));
        assert_eq!(by_id["embeddings"].status, CompletionStatus::Timeout);
        assert_eq!(by_id["correlator"].status, CompletionStatus::Timeout);
    }

    #[tokio::test]
    async fn total_timeout_is_degraded_with_full_result_set() {
        let swarm = orchestrator(vec![
            ("metrics", Behaviour::Hang),
            ("logs", Behaviour::Hang),
            ("graph", Behaviour::Hang),
            ("embeddings", Behaviour::Hang),
            ("correlator", Behaviour::Hang),
        ]);
        let outcome = swarm
            .investigate(&cluster(), Duration::from_millis(100), Clock::Wall)
            .await;

        assert!(outcome.degraded);
        assert_eq!(outcome.results.len(), 5);
        assert!(outcome
            .results
            .iter()
            .all(|r| r.status == CompletionStatus::Timeout));
    }

    #[tokio::test]
    async fn results_ordered_by_id_not_completion() {
        let swarm = orchestrator(vec![
            ("zeta", Behaviour::Succeed(0.5)),
            ("alpha", Behaviour::Succeed(0.5)),
            ("midway", Behaviour::Succeed(0.5)),
        ]);
        let outcome = swarm
            .investigate(&cluster(), Duration::from_secs(5), Clock::Wall)
            .await;
        let order: Vec<&str> = outcome
            .results
            .iter()
            .map(|r| r.specialist_id.as_str())
            .collect();
        assert_eq!(order, vec!["alpha", "midway", "zeta"]);
    }

    #[tokio::test]
    async fn upstream_failure_does_not_fail_swarm() {
        let swarm = orchestrator(vec![
            ("metrics", Behaviour::Fail),
            ("logs", Behaviour::Succeed(0.7)),
        ]);
        let outcome = swarm
            .investigate(&cluster(), Duration::from_secs(5), Clock::Wall)
            .await;
        assert!(!outcome.degraded);
        assert_eq!(outcome.successes().count(), 1);
    }
}
