//! End-to-end pipeline tests over in-memory adapters: ingest through
//! decision, review closure, execution statistics and replay determinism.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use strands::controller::{FrozenPipeline, IncidentController, Stores, SYSTEM_IDENTITY};
use strands_adapters::generator::StaticGenerator;
use strands_adapters::graph::MemoryGraphStore;
use strands_adapters::kube::StaticCluster;
use strands_adapters::metrics_source::StaticMetricsSource;
use strands_adapters::vector::MemoryVectorStore;
use strands_core::audit::AuditLogger;
use strands_core::config::StrandsConfig;
use strands_core::model::alert::RawAlert;
use strands_core::model::correlation::CorrelationType;
use strands_core::model::playbook::{
    ExecutionOutcome, Playbook, PlaybookExecution, PlaybookSource, PlaybookStats, PlaybookStatus,
    SemVer,
};
use strands_core::types::{AutomationLevel, IdGen, RiskLevel};
use strands_governance::review::ReviewOutcome;
use strands_ingest::provider::{AlertProvider, StaticAlertProvider};
use strands_replay::engine::{ReplayEngine, ReplayMode, ReplayPipeline};
use strands_replay::ledger;
use uuid::Uuid;

struct Harness {
    controller: IncidentController,
    provider: Arc<StaticAlertProvider>,
    graph: Arc<MemoryGraphStore>,
    vectors: Arc<MemoryVectorStore>,
    audit: Arc<AuditLogger>,
}

fn harness() -> Harness {
    let graph = Arc::new(MemoryGraphStore::new());
    let vectors = Arc::new(MemoryVectorStore::new());
    let stores = Stores {
        graph: graph.clone(),
        vectors: vectors.clone(),
        metrics_source: Arc::new(StaticMetricsSource::new()),
        cluster_api: Arc::new(StaticCluster::new()),
        generator: Arc::new(StaticGenerator::new()),
    };
    let audit = Arc::new(AuditLogger::in_memory());
    let provider = Arc::new(StaticAlertProvider::new("fixture", 100));
    let providers: Vec<Arc<dyn AlertProvider>> = vec![provider.clone()];

    let mut config = StrandsConfig::default();
    config.controller.global_deadline_s = 5;

    let controller = IncidentController::with_providers(
        config,
        stores,
        audit.clone(),
        IdGen::seeded(99),
        providers,
    )
    .unwrap();

    Harness {
        controller,
        provider,
        graph,
        vectors,
        audit,
    }
}

fn checkout_alert(fingerprint: &str) -> RawAlert {
    RawAlert {
        provider: "fixture".into(),
        fingerprint: Some(fingerprint.into()),
        severity: "high".into(),
        description: "checkout latency over threshold".into(),
        labels: BTreeMap::from([("service".to_string(), "checkout".to_string())]),
        annotations: BTreeMap::new(),
        status: Default::default(),
        starts_at: Utc::now(),
    }
}

fn active_temporal_playbook() -> Playbook {
    let now = Utc::now();
    let mut stats = PlaybookStats::default();
    stats.record(ExecutionOutcome::Success, 120.0, now);
    Playbook {
        playbook_id: Uuid::new_v4(),
        title: "Investigate checkout latency".into(),
        description: "Curated runbook".into(),
        pattern_type: CorrelationType::Temporal,
        service_pattern: "checkout".into(),
        steps: vec![],
        estimated_duration_s: 600,
        automation: AutomationLevel::Assisted,
        risk: RiskLevel::Medium,
        prerequisites: vec![],
        success_criteria: vec![],
        rollback_procedure: "none".into(),
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
async fn tick_produces_decision_and_pending_review() {
    let h = harness();
    h.provider
        .set_alerts(vec![checkout_alert("fp-1"), checkout_alert("fp-2")]);

    let summary = h.controller.tick().await.unwrap();
    assert!(!summary.skipped);
    assert_eq!(summary.provider.as_deref(), Some("fixture"));
    assert_eq!(summary.alerts_seen, 2);
    assert_eq!(summary.clusters, 1);
    assert_eq!(summary.decisions.len(), 1);

    // Cluster, decision and review landed in the graph.
    assert_eq!(h.graph.node_count("AlertCluster"), 1);
    assert_eq!(h.graph.node_count("DecisionCandidate"), 1);
    assert_eq!(h.graph.node_count("ReviewRecord"), 1);
    assert_eq!(h.graph.relation_count("DECIDED_FROM"), 1);

    // The audit trail recorded the decision.
    let events = h.audit.captured();
    assert!(events.iter().any(|e| e.event_type == "DECISION_CREATED"));
    assert!(events.iter().any(|e| e.event_type == "REVIEW_OPENED"));
}

#[tokio::test]
async fn duplicate_fingerprints_collapse_within_window() {
    let h = harness();
    h.provider
        .set_alerts(vec![checkout_alert("same"), checkout_alert("same")]);

    let summary = h.controller.tick().await.unwrap();
    assert_eq!(summary.alerts_seen, 2);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.clusters, 1);
}

#[tokio::test]
async fn failed_provider_skips_tick_with_audit_entry() {
    let h = harness();
    h.provider.set_failing(true);

    let summary = h.controller.tick().await.unwrap();
    assert!(summary.skipped);
    assert!(summary.decisions.is_empty());

    let events = h.audit.captured();
    let skip = events
        .iter()
        .find(|e| e.event_type == "TICK_SKIPPED")
        .expect("skip entry");
    assert_eq!(skip.payload["reason"], "NO_PROVIDER_AVAILABLE");
}

#[tokio::test]
async fn human_approval_closes_loop_and_persists_embedding() {
    let h = harness();
    // A curated playbook matches the (Temporal, checkout) key, so the
    // recommendation is KNOWN/READY and linked to the review.
    let playbook = active_temporal_playbook();
    h.controller.playbooks().save(&playbook).await.unwrap();

    h.provider.set_alerts(vec![checkout_alert("fp-1")]);
    let summary = h.controller.tick().await.unwrap();
    let decision_id = summary.decisions[0];

    // No embedding is persisted before the human verdict.
    assert!(h.vectors.is_empty());

    let outcome = h
        .controller
        .approve_decision(decision_id, "alice", Some("agreed".into()))
        .await
        .unwrap();
    match outcome {
        ReviewOutcome::ExecuteRequest {
            decision_id: d,
            playbook_id,
        } => {
            assert_eq!(d, decision_id);
            assert_eq!(playbook_id, Some(playbook.playbook_id));
        }
        other => panic!("expected execute request, got {other:?}"),
    }

    // The confirmed incident is now retrievable by similarity.
    assert_eq!(h.vectors.len(), 1);

    // Execution feedback flows back into the playbook statistics.
    let now = Utc::now();
    let execution = PlaybookExecution {
        execution_id: Uuid::new_v4(),
        playbook_id: playbook.playbook_id,
        decision_id,
        started_at: now,
        completed_at: now,
        outcome: ExecutionOutcome::Success,
        duration_s: 95.0,
        steps_attempted: 3,
        steps_completed: 3,
        error: None,
        feedback: Some("resolved".into()),
    };
    let stats = h
        .controller
        .playbooks()
        .record_execution(&execution)
        .await
        .unwrap();
    assert_eq!(stats.total_executions, 2);
    assert_eq!(stats.success_count, 2);
}

#[tokio::test]
async fn rejection_leaves_vectors_untouched() {
    let h = harness();
    h.provider.set_alerts(vec![checkout_alert("fp-1")]);
    let summary = h.controller.tick().await.unwrap();
    let decision_id = summary.decisions[0];

    let outcome = h
        .controller
        .reject_decision(decision_id, "bob", Some("not convinced".into()))
        .await
        .unwrap();
    assert_eq!(outcome, ReviewOutcome::Rejected { decision_id });
    assert!(h.vectors.is_empty());
}

#[tokio::test]
async fn system_identity_cannot_self_approve() {
    let h = harness();
    h.provider.set_alerts(vec![checkout_alert("fp-1")]);
    let summary = h.controller.tick().await.unwrap();

    let err = h
        .controller
        .approve_decision(summary.decisions[0], SYSTEM_IDENTITY, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_REVIEWER");
}

fn frozen_pipeline(seed: u64) -> FrozenPipeline {
    let stores = Stores {
        graph: Arc::new(MemoryGraphStore::new()),
        vectors: Arc::new(MemoryVectorStore::new()),
        metrics_source: Arc::new(StaticMetricsSource::new()),
        cluster_api: Arc::new(StaticCluster::new()),
        generator: Arc::new(StaticGenerator::new()),
    };
    let mut config = StrandsConfig::default();
    config.controller.global_deadline_s = 5;
    FrozenPipeline::new(&config, &stores, seed)
}

#[tokio::test]
async fn replay_is_deterministic_under_fixed_seed() {
    let events = ledger::generate_dataset(12, 7);
    let engine = ReplayEngine::new();

    let first = engine
        .replay(&events, ReplayMode::Validation, &frozen_pipeline(42))
        .await
        .unwrap();
    let second = engine
        .replay(&events, ReplayMode::Validation, &frozen_pipeline(42))
        .await
        .unwrap();

    let a = serde_json::to_string(&first.decisions).unwrap();
    let b = serde_json::to_string(&second.decisions).unwrap();
    assert_eq!(a, b, "replayed decisions must be byte-identical");

    assert_eq!(first.unsafe_bypass_count, 0);
    assert!(first.passed);
    assert_eq!(first.total, 12);
}

#[tokio::test]
async fn replay_decisions_honor_automation_bounds() {
    let events = ledger::generate_dataset(8, 3);
    let report = ReplayEngine::new()
        .replay(&events, ReplayMode::Audit, &frozen_pipeline(3))
        .await
        .unwrap();
    for decision in &report.decisions {
        decision.validate().unwrap();
    }
}

#[tokio::test]
async fn direct_pipeline_decide_is_stable_per_event() {
    let events = ledger::generate_dataset(1, 5);
    let event = &events[0];

    let p1 = frozen_pipeline(9);
    let p2 = frozen_pipeline(9);
    let d1 = p1.decide(&event.alert, event.occurred_at).await.unwrap();
    let d2 = p2.decide(&event.alert, event.occurred_at).await.unwrap();
    assert_eq!(
        serde_json::to_string(&d1).unwrap(),
        serde_json::to_string(&d2).unwrap()
    );
}
