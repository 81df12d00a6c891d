//! Replay ledger persistence (JSON lines) and seeded dataset generation.

use chrono::{Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use strands_core::error::{Error, Result};
use strands_core::model::alert::{Alert, AlertStatus};
use strands_core::model::decision::{DecisionCandidate, DecisionOutcome};
use strands_core::model::replay::ReplayEvent;
use strands_core::types::{AutomationLevel, IdGen, RiskLevel, Severity};

/// Load a JSON-lines ledger.
pub fn load_events(path: impl AsRef<Path>) -> Result<Vec<ReplayEvent>> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let mut events = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: ReplayEvent = serde_json::from_str(line).map_err(|e| {
            Error::validation(format!(
                "malformed ledger line {} in {}: {e}",
                lineno + 1,
                path.as_ref().display()
            ))
        })?;
        events.push(event);
    }
    // The ledger is an append-only chronology; enforce order on read.
    events.sort_by_key(|e| e.occurred_at);
    Ok(events)
}

/// Write a ledger as JSON lines.
pub fn save_events(path: impl AsRef<Path>, events: &[ReplayEvent]) -> Result<()> {
    let mut out = String::new();
    for event in events {
        out.push_str(&serde_json::to_string(event)?);
        out.push('\n');
    }
    std::fs::write(path.as_ref(), out)?;
    Ok(())
}

/// Generate a synthetic, fully seeded event ledger for validation runs.
///
/// The same `seed` and `count` always produce the same ledger.
pub fn generate_dataset(count: usize, seed: u64) -> Vec<ReplayEvent> {
    let ids = IdGen::seeded(seed);
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid base time");

    let services = ["checkout", "payments", "cart", "search"];
    let severities = [
        Severity::Warning,
        Severity::High,
        Severity::Critical,
        Severity::Info,
    ];
    let hypotheses = [
        "cpu saturation drives latency",
        "memory leak in worker pool",
        "dependency timeout cascade",
        "traffic surge within capacity",
    ];

    (0..count)
        .map(|i| {
            let occurred_at = base + Duration::minutes(i as i64 * 7);
            let service = services[i % services.len()];
            let severity = severities[i % severities.len()];
            let hypothesis = hypotheses[i % hypotheses.len()];
            let confidence = 0.35 + 0.13 * ((i % 5) as f64);
            let risk = match severity {
                Severity::Critical => RiskLevel::High,
                Severity::High => RiskLevel::Medium,
                Severity::Warning => RiskLevel::Low,
                Severity::Info => RiskLevel::Minimal,
            };
            let automation = AutomationLevel::Assisted.bounded_by(risk);

            let mut labels = BTreeMap::new();
            labels.insert("service".to_string(), service.to_string());
            let alert = Alert {
                received_at: occurred_at,
                provider: "synthetic".into(),
                fingerprint: format!("synthetic-{seed}-{i}"),
                service: service.into(),
                severity,
                description: format!("{hypothesis} on {service}"),
                labels,
                annotations: BTreeMap::new(),
                status: AlertStatus::Firing,
            };
            let decision = DecisionCandidate {
                decision_id: ids.next_id(),
                cluster_id: ids.next_id(),
                hypothesis: hypothesis.into(),
                confidence,
                risk,
                automation,
                outcome: DecisionOutcome::RequiresApproval,
                conflict: false,
                degraded: false,
                suggested_actions: vec![format!("inspect {service}")],
                evidence: vec![],
                model_version: "strands-v1".into(),
                weights_version: "weights-v1".into(),
                audit_id: ids.next_id(),
                created_at: occurred_at,
            };
            ReplayEvent {
                occurred_at,
                alert,
                decision,
                playbook_id: None,
                playbook_version: None,
                outcome: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn dataset_is_deterministic() {
        let a = generate_dataset(20, 42);
        let b = generate_dataset(20, 42);
        assert_eq!(a, b);
        let c = generate_dataset(20, 43);
        assert_ne!(a, c);
    }

    #[test]
    fn ledger_round_trip() {
        let dir = std::env::temp_dir().join(format!("strands-ledger-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("events.jsonl");

        let events = generate_dataset(5, 7);
        save_events(&path, &events).unwrap();
        let loaded = load_events(&path).unwrap();
        assert_eq!(events, loaded);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn malformed_line_is_rejected_with_position() {
        let dir = std::env::temp_dir().join(format!("strands-ledger-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();

        let err = load_events(&path).unwrap_err();
        assert!(err.to_string().contains("line 1"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_orders_by_time() {
        let dir = std::env::temp_dir().join(format!("strands-ledger-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("events.jsonl");

        let mut events = generate_dataset(3, 9);
        events.reverse();
        save_events(&path, &events).unwrap();
        let loaded = load_events(&path).unwrap();
        assert!(loaded.windows(2).all(|w| w[0].occurred_at <= w[1].occurred_at));
        std::fs::remove_dir_all(&dir).ok();
    }
}
