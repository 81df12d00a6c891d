//! Incident controller: end-to-end sequencing of one tick.
//!
//! ingest → normalize → dedup → cluster → swarm → decide → recommend →
//! persist → review. The controller never blocks a tick on human input;
//! reviews close asynchronously through [`IncidentController::approve_decision`]
//! and [`IncidentController::reject_decision`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strands_adapters::generator::TextGenerator;
use strands_adapters::graph::{GraphStore, NodeProps};
use strands_adapters::kube::ClusterIntrospection;
use strands_adapters::metrics_source::MetricsSource;
use strands_adapters::vector::VectorStore;
use strands_analysis::correlation::CorrelationAnalyzer;
use strands_core::audit::{AuditEvent, AuditLogger};
use strands_core::config::StrandsConfig;
use strands_core::error::{Error, Result};
use strands_core::model::alert::{Alert, AlertCluster, NormalizedAlert, ValidationStatus};
use strands_core::model::decision::{DecisionCandidate, DecisionOutcome};
use strands_core::types::{Clock, IdGen};
use strands_governance::decision::DecisionEngine;
use strands_governance::playbook::PlaybookStore;
use strands_governance::recommend::{Readiness, Recommendation, Recommender};
use strands_governance::review::{ReviewGate, ReviewOutcome};
use strands_ingest::cluster::Clusterer;
use strands_ingest::collector::AlertCollector;
use strands_ingest::dedup::Deduplicator;
use strands_ingest::normalizer::AlertNormalizer;
use strands_ingest::provider::{build_providers, AlertProvider};
use strands_replay::engine::ReplayPipeline;
use strands_swarm::orchestrator::SwarmOrchestrator;
use strands_swarm::specialists::{
    CorrelatorSpecialist, EmbeddingSimilaritySpecialist, GraphContextSpecialist,
    LogInspectorSpecialist, MetricsAnalystSpecialist,
};
use strands_swarm::specialist::Specialist;
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Identity the pipeline uses when it authors decisions and drafts.
pub const SYSTEM_IDENTITY: &str = "strands-system";

const NODE_CLUSTER: &str = "AlertCluster";
const NODE_DECISION: &str = "DecisionCandidate";
const REL_DECIDED_FROM: &str = "DECIDED_FROM";

/// The external stores one controller instance talks to.
#[derive(Debug, Clone)]
pub struct Stores {
    pub graph: Arc<dyn GraphStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub metrics_source: Arc<dyn MetricsSource>,
    pub cluster_api: Arc<dyn ClusterIntrospection>,
    pub generator: Arc<dyn TextGenerator>,
}

/// Summary of one controller tick.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub skipped: bool,
    pub provider: Option<String>,
    pub alerts_seen: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub clusters: usize,
    pub decisions: Vec<Uuid>,
    pub auto_approved: usize,
}

/// End-to-end incident controller.
#[derive(Debug)]
pub struct IncidentController {
    config: StrandsConfig,
    stores: Stores,
    collector: AlertCollector,
    normalizer: AlertNormalizer,
    dedup: Deduplicator,
    clusterer: Clusterer,
    swarm: Arc<SwarmOrchestrator>,
    engine: DecisionEngine,
    recommender: Arc<Recommender>,
    playbooks: Arc<PlaybookStore>,
    review: Arc<ReviewGate>,
    audit: Arc<AuditLogger>,
    ids: IdGen,
}

impl IncidentController {
    /// Wire the full pipeline from configuration and stores.
    pub fn new(
        config: StrandsConfig,
        stores: Stores,
        audit: Arc<AuditLogger>,
        ids: IdGen,
    ) -> Result<Self> {
        let providers: Vec<Arc<dyn AlertProvider>> =
            build_providers(&config.providers, stores.metrics_source.clone())?;
        Self::with_providers(config, stores, audit, ids, providers)
    }

    /// Wire the pipeline with explicitly constructed providers.
    pub fn with_providers(
        config: StrandsConfig,
        stores: Stores,
        audit: Arc<AuditLogger>,
        ids: IdGen,
        providers: Vec<Arc<dyn AlertProvider>>,
    ) -> Result<Self> {
        let collector = AlertCollector::new(providers);
        let normalizer = AlertNormalizer::new(&config.providers, Vec::new());
        let dedup = Deduplicator::new(config.ingest.dedup_window_s);
        let clusterer = Clusterer::new(config.ingest.cluster_window_s);
        let swarm = Arc::new(SwarmOrchestrator::new(Self::specialists(&config, &stores)));
        let engine = DecisionEngine::new(config.engine.clone(), config.analysis.decision_budget_ms);
        let playbooks = Arc::new(PlaybookStore::new(stores.graph.clone(), audit.clone()));
        let recommender = Arc::new(Recommender::new(
            playbooks.clone(),
            stores.generator.clone(),
            SYSTEM_IDENTITY,
        ));
        let review = Arc::new(ReviewGate::new(
            stores.graph.clone(),
            playbooks.clone(),
            audit.clone(),
            SYSTEM_IDENTITY,
        ));

        Ok(Self {
            config,
            stores,
            collector,
            normalizer,
            dedup,
            clusterer,
            swarm,
            engine,
            recommender,
            playbooks,
            review,
            audit,
            ids,
        })
    }

    fn specialists(config: &StrandsConfig, stores: &Stores) -> Vec<Arc<dyn Specialist>> {
        let analyzer = CorrelationAnalyzer::new(&config.analysis);
        vec![
            Arc::new(MetricsAnalystSpecialist::new(stores.metrics_source.clone())),
            Arc::new(LogInspectorSpecialist::new(stores.cluster_api.clone())),
            Arc::new(EmbeddingSimilaritySpecialist::new(
                stores.generator.clone(),
                stores.vectors.clone(),
            )),
            Arc::new(GraphContextSpecialist::new(stores.graph.clone())),
            Arc::new(CorrelatorSpecialist::new(
                stores.metrics_source.clone(),
                stores.cluster_api.clone(),
                analyzer,
            )),
        ]
    }

    pub fn playbooks(&self) -> Arc<PlaybookStore> {
        self.playbooks.clone()
    }

    /// Steady-state loop. Ticks until shutdown.
    pub async fn run(&self) -> Result<()> {
        let interval = Duration::from_secs(self.config.controller.tick_interval_s);
        info!(tick_s = interval.as_secs(), "controller loop started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(summary) => {
                            info!(
                                skipped = summary.skipped,
                                alerts = summary.alerts_seen,
                                clusters = summary.clusters,
                                decisions = summary.decisions.len(),
                                "tick complete"
                            );
                        }
                        Err(e) => error!(error = %e, "tick failed"),
                    }
                }
                _ = wait_for_shutdown() => {
                    info!("shutdown signal received, stopping controller");
                    return Ok(());
                }
            }
        }
    }

    /// One controller tick.
    pub async fn tick(&self) -> Result<TickSummary> {
        let tick_started = Instant::now();
        let tick_budget = Duration::from_secs(self.config.controller.global_deadline_s);
        let clock = Clock::Wall;
        let mut summary = TickSummary::default();

        // 1. Collect.
        let collected = match self.collector.collect().await {
            Ok(collected) => collected,
            Err(Error::NoProviderAvailable) => {
                self.audit.append(AuditEvent::new(
                    self.ids.next_id(),
                    "TICK_SKIPPED",
                    json!({"reason": "NO_PROVIDER_AVAILABLE"}),
                ))?;
                metrics::counter!("strands_ticks_skipped_total").increment(1);
                summary.skipped = true;
                return Ok(summary);
            }
            Err(e) => return Err(e),
        };
        summary.provider = Some(collected.provider.clone());
        summary.alerts_seen = collected.alerts.len();

        // 2. Normalize + dedup.
        let duplicates_before = self.dedup.duplicate_count();
        let now = clock.now();
        let mut normalized: Vec<NormalizedAlert> = Vec::new();
        for raw in &collected.alerts {
            let alert = self.normalizer.normalize(raw, now);
            if !alert.validation.is_valid() {
                summary.rejected += 1;
                continue;
            }
            if self.dedup.admit(alert.fingerprint(), alert.alert.received_at) {
                normalized.push(alert);
            }
        }
        summary.duplicates = (self.dedup.duplicate_count() - duplicates_before) as usize;
        self.dedup.evict_expired(now);

        // 3. Cluster, then process in deterministic id order.
        let mut clusters = self.clusterer.cluster(normalized, &self.ids);
        clusters.sort_by_key(|c| c.cluster_id);
        summary.clusters = clusters.len();

        for cluster in clusters {
            let remaining = tick_budget.saturating_sub(tick_started.elapsed());
            if remaining.is_zero() {
                warn!("tick budget exhausted, remaining clusters deferred");
                break;
            }
            match self.process_cluster(&cluster, remaining, clock).await {
                Ok((decision, auto_approved)) => {
                    summary.decisions.push(decision.decision_id);
                    if auto_approved {
                        summary.auto_approved += 1;
                    }
                }
                Err(e) => {
                    error!(cluster_id = %cluster.cluster_id, error = %e, "cluster processing failed");
                }
            }
        }
        Ok(summary)
    }

    /// Investigate, decide, recommend, persist and gate one cluster.
    async fn process_cluster(
        &self,
        cluster: &AlertCluster,
        deadline: Duration,
        clock: Clock,
    ) -> Result<(DecisionCandidate, bool)> {
        // a. Swarm investigation under the shared deadline.
        let investigation = self.swarm.investigate(cluster, deadline, clock).await;

        // b. Fuse into a decision.
        let decision = self
            .engine
            .consolidate(cluster, &investigation, &self.ids, clock);
        decision.validate()?;

        // c. Resolve a playbook.
        let pattern_type = Recommender::dominant_pattern_type(&investigation.results);
        let recommendation = self
            .recommender
            .recommend(&decision, pattern_type, &cluster.service, &self.ids, clock)
            .await?;

        // d. Persist cluster, decision, review.
        self.persist_cluster(cluster).await?;
        self.persist_decision(&decision, cluster).await?;
        let linked_playbook = recommendation
            .persisted
            .then_some(recommendation.playbook.playbook_id);
        self.review
            .open(&decision, linked_playbook, &self.ids, clock)
            .await?;
        self.audit.append(
            AuditEvent::new(
                decision.audit_id,
                "DECISION_CREATED",
                json!({
                    "confidence": decision.confidence,
                    "risk": decision.risk.to_string(),
                    "automation": decision.automation.to_string(),
                    "degraded": decision.degraded,
                    "playbook_source": format!("{:?}", recommendation.source),
                }),
            )
            .with_decision(decision.decision_id)
            .with_playbook(recommendation.playbook.playbook_id),
        )?;

        // e. Auto-approval short-circuit. Never persists embeddings; that
        // requires a human verdict.
        let auto_approved = self.try_auto_approve(&decision, &recommendation).await?;
        Ok((decision, auto_approved))
    }

    async fn try_auto_approve(
        &self,
        decision: &DecisionCandidate,
        recommendation: &Recommendation,
    ) -> Result<bool> {
        let eligible = recommendation.readiness == Readiness::Ready
            && decision.outcome == DecisionOutcome::AutoApprove;
        if !eligible {
            return Ok(false);
        }
        self.audit.append(
            AuditEvent::new(
                decision.audit_id,
                "EXECUTE_REQUEST",
                json!({"approved_by": "policy", "auto": true}),
            )
            .with_decision(decision.decision_id)
            .with_playbook(recommendation.playbook.playbook_id),
        )?;
        metrics::counter!("strands_auto_approvals_total").increment(1);
        info!(decision_id = %decision.decision_id, "auto-approved under policy");
        Ok(true)
    }

    /// Close a review with an approval. On success the confirmed incident's
    /// embedding is persisted for future similarity lookups.
    pub async fn approve_decision(
        &self,
        decision_id: Uuid,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<ReviewOutcome> {
        let outcome = self.review.approve(decision_id, reviewer, notes).await?;
        if let ReviewOutcome::ExecuteRequest { .. } = &outcome {
            if let Some(decision) = self.load_decision(decision_id).await? {
                if let Err(e) = self
                    .recommender
                    .remember_incident(
                        self.stores.vectors.as_ref(),
                        &decision,
                        &self.decision_service(&decision).await?,
                    )
                    .await
                {
                    warn!(error = %e, "failed to persist confirmed-incident embedding");
                }
            }
            self.audit.append(
                AuditEvent::new(
                    self.ids.next_id(),
                    "EXECUTE_REQUEST",
                    json!({"approved_by": reviewer, "auto": false}),
                )
                .with_decision(decision_id),
            )?;
        }
        Ok(outcome)
    }

    /// Close a review with a rejection.
    pub async fn reject_decision(
        &self,
        decision_id: Uuid,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<ReviewOutcome> {
        self.review.reject(decision_id, reviewer, notes).await
    }

    async fn persist_cluster(&self, cluster: &AlertCluster) -> Result<()> {
        let Value::Object(props) = serde_json::to_value(cluster)? else {
            return Err(Error::validation("cluster did not serialize to an object"));
        };
        self.stores
            .graph
            .upsert_node(NODE_CLUSTER, &cluster.cluster_id.to_string(), props)
            .await
    }

    async fn persist_decision(
        &self,
        decision: &DecisionCandidate,
        cluster: &AlertCluster,
    ) -> Result<()> {
        let Value::Object(mut props) = serde_json::to_value(decision)? else {
            return Err(Error::validation("decision did not serialize to an object"));
        };
        // The service is denormalized onto the node for graph-context lookups.
        props.insert("service".into(), json!(cluster.service));
        self.stores
            .graph
            .upsert_node(NODE_DECISION, &decision.decision_id.to_string(), props)
            .await?;
        self.stores
            .graph
            .upsert_relation(
                &decision.decision_id.to_string(),
                REL_DECIDED_FROM,
                &cluster.cluster_id.to_string(),
                NodeProps::new(),
            )
            .await
    }

    async fn load_decision(&self, decision_id: Uuid) -> Result<Option<DecisionCandidate>> {
        let Some(mut props) = self
            .stores
            .graph
            .get_node(NODE_DECISION, &decision_id.to_string())
            .await?
        else {
            return Ok(None);
        };
        props.remove("service");
        Ok(Some(serde_json::from_value(Value::Object(props))?))
    }

    async fn decision_service(&self, decision: &DecisionCandidate) -> Result<String> {
        let Some(props) = self
            .stores
            .graph
            .get_node(NODE_DECISION, &decision.decision_id.to_string())
            .await?
        else {
            return Ok("unknown".into());
        };
        Ok(props
            .get("service")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string())
    }
}

/// Replayable decision path over a frozen configuration snapshot.
///
/// Ids come from a seeded generator and the clock is pinned to each event's
/// original timestamp, so a fixed seed and input stream reproduce identical
/// decisions.
#[derive(Debug)]
pub struct FrozenPipeline {
    clusterer: Clusterer,
    swarm: Arc<SwarmOrchestrator>,
    engine: DecisionEngine,
    deadline: Duration,
    ids: IdGen,
}

impl FrozenPipeline {
    pub fn new(config: &StrandsConfig, stores: &Stores, seed: u64) -> Self {
        Self {
            clusterer: Clusterer::new(config.ingest.cluster_window_s),
            swarm: Arc::new(SwarmOrchestrator::new(IncidentController::specialists(
                config, stores,
            ))),
            engine: DecisionEngine::new(
                config.engine.clone(),
                config.analysis.decision_budget_ms,
            ),
            deadline: Duration::from_secs(config.controller.global_deadline_s),
            ids: IdGen::seeded(seed),
        }
    }
}

#[async_trait]
impl ReplayPipeline for FrozenPipeline {
    async fn decide(
        &self,
        alert: &Alert,
        occurred_at: DateTime<Utc>,
    ) -> Result<DecisionCandidate> {
        let clock = Clock::Fixed(occurred_at);
        let normalized = NormalizedAlert {
            alert: alert.clone(),
            validation: ValidationStatus::Valid,
        };
        let clusters = self.clusterer.cluster(vec![normalized], &self.ids);
        let cluster = clusters
            .into_iter()
            .next()
            .ok_or_else(|| Error::validation("alert did not form a cluster"))?;
        let investigation = self.swarm.investigate(&cluster, self.deadline, clock).await;
        let decision = self
            .engine
            .consolidate(&cluster, &investigation, &self.ids, clock);
        Ok(decision)
    }
}

/// Wait for SIGTERM or CTRL+C.
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
