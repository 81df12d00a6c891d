//! Clustering: group one cycle's normalized alerts by service and truncated
//! time window. Clusters are finalised at end-of-cycle.

use std::collections::BTreeMap;
use strands_core::model::alert::{AlertCluster, NormalizedAlert};
use strands_core::types::IdGen;
use tracing::debug;

/// Cluster-type tag applied to service/window groupings.
const CLUSTER_TYPE_SERVICE_WINDOW: &str = "service-window";

/// Groups alerts by `(service, truncated_time_window)`.
#[derive(Debug)]
pub struct Clusterer {
    /// Truncation step in seconds (default 5 minutes).
    window_s: u64,
}

impl Clusterer {
    pub fn new(window_s: u64) -> Self {
        Self {
            window_s: window_s.max(1),
        }
    }

    /// Build clusters from one cycle's valid alerts.
    ///
    /// Invalid alerts are skipped (they were already rejected at the
    /// boundary). Output order is deterministic: by service, then window.
    /// Member order within a cluster is arrival order.
    pub fn cluster(&self, alerts: Vec<NormalizedAlert>, ids: &IdGen) -> Vec<AlertCluster> {
        let mut groups: BTreeMap<(String, i64), Vec<NormalizedAlert>> = BTreeMap::new();
        for alert in alerts {
            if !alert.validation.is_valid() {
                continue;
            }
            let bucket = alert.alert.received_at.timestamp().div_euclid(self.window_s as i64);
            groups
                .entry((alert.service().to_string(), bucket))
                .or_default()
                .push(alert);
        }

        let mut clusters = Vec::with_capacity(groups.len());
        for ((service, _bucket), members) in groups {
            let Some(first) = members.first() else {
                continue;
            };
            let mut cluster = AlertCluster {
                cluster_id: ids.next_id(),
                service,
                earliest: first.alert.received_at,
                latest: first.alert.received_at,
                cluster_type: CLUSTER_TYPE_SERVICE_WINDOW.to_string(),
                members: Vec::new(),
                correlation_basis: None,
            };
            for member in members {
                cluster.push_member(member);
            }
            debug!(
                cluster_id = %cluster.cluster_id,
                service = %cluster.service,
                members = cluster.members.len(),
                "cluster finalised"
            );
            clusters.push(cluster);
        }
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::BTreeMap as LabelMap;
    use strands_core::model::alert::{Alert, AlertStatus, ValidationStatus};
    use strands_core::types::Severity;

    fn normalized(service: &str, fingerprint: &str, at: DateTime<Utc>) -> NormalizedAlert {
        NormalizedAlert {
            alert: Alert {
                received_at: at,
                provider: "test".into(),
                fingerprint: fingerprint.into(),
                service: service.into(),
                severity: Severity::Warning,
                description: "d".into(),
                labels: LabelMap::new(),
                annotations: LabelMap::new(),
                status: AlertStatus::Firing,
            },
            validation: ValidationStatus::Valid,
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn same_service_same_window_clusters_together() {
        let clusterer = Clusterer::new(300);
        let ids = IdGen::seeded(1);
        let clusters = clusterer.cluster(
            vec![
                normalized("checkout", "a", base()),
                normalized("checkout", "b", base() + Duration::seconds(90)),
            ],
            &ids,
        );
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members.len(), 2);
        assert_eq!(clusters[0].service, "checkout");
        assert_eq!(clusters[0].earliest, base());
        assert_eq!(clusters[0].latest, base() + Duration::seconds(90));
    }

    #[test]
    fn different_services_split() {
        let clusterer = Clusterer::new(300);
        let ids = IdGen::seeded(1);
        let clusters = clusterer.cluster(
            vec![
                normalized("checkout", "a", base()),
                normalized("payments", "b", base()),
            ],
            &ids,
        );
        assert_eq!(clusters.len(), 2);
        // Deterministic order by service.
        assert_eq!(clusters[0].service, "checkout");
        assert_eq!(clusters[1].service, "payments");
    }

    #[test]
    fn window_truncation_splits_far_apart_alerts() {
        let clusterer = Clusterer::new(300);
        let ids = IdGen::seeded(1);
        let clusters = clusterer.cluster(
            vec![
                normalized("checkout", "a", base()),
                normalized("checkout", "b", base() + Duration::seconds(600)),
            ],
            &ids,
        );
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn rejected_alerts_are_skipped() {
        let clusterer = Clusterer::new(300);
        let ids = IdGen::seeded(1);
        let mut bad = normalized("checkout", "a", base());
        bad.validation = ValidationStatus::Rejected {
            reason: "unmappable severity".into(),
        };
        let clusters = clusterer.cluster(vec![bad, normalized("checkout", "b", base())], &ids);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members.len(), 1);
    }

    #[test]
    fn member_order_is_arrival_order() {
        let clusterer = Clusterer::new(300);
        let ids = IdGen::seeded(1);
        let clusters = clusterer.cluster(
            vec![
                normalized("checkout", "first", base() + Duration::seconds(60)),
                normalized("checkout", "second", base()),
            ],
            &ids,
        );
        let fingerprints: Vec<&str> =
            clusters[0].members.iter().map(|m| m.fingerprint()).collect();
        assert_eq!(fingerprints, vec!["first", "second"]);
        // Earliest still reflects the true minimum.
        assert_eq!(clusters[0].earliest, base());
    }
}
