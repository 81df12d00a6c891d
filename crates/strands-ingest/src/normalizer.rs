//! Alert normalisation: severity mapping, service extraction, fingerprint
//! synthesis and boundary validation.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use strands_core::config::ProviderConfig;
use strands_core::model::alert::{Alert, NormalizedAlert, RawAlert, ValidationStatus};
use strands_core::types::Severity;
use tracing::debug;

/// Longest description prefix folded into a synthesized fingerprint.
const FINGERPRINT_DESCRIPTION_LEN: usize = 128;

/// Normalizes raw provider alerts into canonical [`NormalizedAlert`]s.
#[derive(Debug, Default)]
pub struct AlertNormalizer {
    /// Per-provider severity maps, keyed by provider name.
    severity_maps: HashMap<String, HashMap<String, Severity>>,
    /// Known service names matched against descriptions, longest first.
    service_patterns: Vec<String>,
}

impl AlertNormalizer {
    pub fn new(providers: &[ProviderConfig], mut service_patterns: Vec<String>) -> Self {
        let severity_maps = providers
            .iter()
            .map(|p| {
                let map = p
                    .severity_map
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), *v))
                    .collect();
                (p.name.clone(), map)
            })
            .collect();
        service_patterns.sort_by_key(|p| std::cmp::Reverse(p.len()));
        Self {
            severity_maps,
            service_patterns,
        }
    }

    /// Normalize one raw alert. Malformed alerts come back with
    /// `Rejected(reason)`; the cycle continues regardless.
    pub fn normalize(&self, raw: &RawAlert, received_at: DateTime<Utc>) -> NormalizedAlert {
        let severity = self.map_severity(raw);
        let service = self.extract_service(raw);
        let fingerprint = raw
            .fingerprint
            .clone()
            .filter(|fp| !fp.is_empty())
            .unwrap_or_else(|| {
                Self::synthesize_fingerprint(&service, raw, severity.unwrap_or_default())
            });

        let validation = match severity {
            Some(_) => ValidationStatus::Valid,
            None => ValidationStatus::Rejected {
                reason: format!(
                    "unmappable severity '{}' from provider '{}'",
                    raw.severity, raw.provider
                ),
            },
        };
        if let ValidationStatus::Rejected { reason } = &validation {
            debug!(provider = %raw.provider, reason, "alert rejected");
            metrics::counter!("strands_alerts_rejected_total").increment(1);
        }

        NormalizedAlert {
            alert: Alert {
                received_at,
                provider: raw.provider.clone(),
                fingerprint,
                service,
                severity: severity.unwrap_or_default(),
                description: raw.description.clone(),
                labels: raw.labels.clone(),
                annotations: raw.annotations.clone(),
                status: raw.status,
            },
            validation,
        }
    }

    /// Provider severity map first, then the canonical names.
    fn map_severity(&self, raw: &RawAlert) -> Option<Severity> {
        let key = raw.severity.to_ascii_lowercase();
        if key.is_empty() {
            return None;
        }
        if let Some(map) = self.severity_maps.get(&raw.provider) {
            if let Some(&severity) = map.get(&key) {
                return Some(severity);
            }
        }
        Severity::parse(&key)
    }

    /// First non-empty of: `service` label, matched service pattern in the
    /// description, the literal `unknown`.
    fn extract_service(&self, raw: &RawAlert) -> String {
        if let Some(service) = raw.labels.get("service").filter(|s| !s.is_empty()) {
            return service.clone();
        }
        if let Some(app) = raw.labels.get("app").filter(|s| !s.is_empty()) {
            return app.clone();
        }
        let description = raw.description.to_ascii_lowercase();
        for pattern in &self.service_patterns {
            if description.contains(&pattern.to_ascii_lowercase()) {
                return pattern.clone();
            }
        }
        "unknown".to_string()
    }

    /// `SHA-256(service || canonical-labels || severity || truncated-description)`.
    fn synthesize_fingerprint(service: &str, raw: &RawAlert, severity: Severity) -> String {
        let mut hasher = Sha256::new();
        hasher.update(service.as_bytes());
        // Labels are a sorted map, so iteration order is canonical.
        for (k, v) in &raw.labels {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b";");
        }
        hasher.update(severity.to_string().as_bytes());
        let truncated: String = raw
            .description
            .chars()
            .take(FINGERPRINT_DESCRIPTION_LEN)
            .collect();
        hasher.update(truncated.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strands_core::config::ProviderKind;

    fn provider_with_map() -> ProviderConfig {
        ProviderConfig {
            name: "pager".into(),
            kind: ProviderKind::Static,
            enabled: true,
            endpoint: String::new(),
            timeout_s: 10,
            retries: 3,
            priority: 100,
            severity_map: [
                ("p1".to_string(), Severity::Critical),
                ("p2".to_string(), Severity::High),
                ("p3".to_string(), Severity::Warning),
            ]
            .into_iter()
            .collect(),
            auth_token_env: None,
        }
    }

    fn raw(provider: &str, severity: &str) -> RawAlert {
        RawAlert {
            provider: provider.into(),
            severity: severity.into(),
            description: "checkout latency over threshold".into(),
            starts_at: Utc::now(),
            ..Default::default()
        }
    }

    #[test]
    fn provider_severity_map_applies() {
        let normalizer = AlertNormalizer::new(&[provider_with_map()], vec![]);
        let normalized = normalizer.normalize(&raw("pager", "P1"), Utc::now());
        assert!(normalized.validation.is_valid());
        assert_eq!(normalized.alert.severity, Severity::Critical);
    }

    #[test]
    fn canonical_names_work_without_map() {
        let normalizer = AlertNormalizer::new(&[], vec![]);
        let normalized = normalizer.normalize(&raw("grafana", "warning"), Utc::now());
        assert!(normalized.validation.is_valid());
        assert_eq!(normalized.alert.severity, Severity::Warning);
    }

    #[test]
    fn unmappable_severity_is_rejected_not_fatal() {
        let normalizer = AlertNormalizer::new(&[], vec![]);
        let normalized = normalizer.normalize(&raw("grafana", "sev-unknown-9"), Utc::now());
        assert!(matches!(
            normalized.validation,
            ValidationStatus::Rejected { .. }
        ));
    }

    #[test]
    fn service_label_wins_over_description() {
        let normalizer = AlertNormalizer::new(&[], vec!["checkout".into()]);
        let mut alert = raw("grafana", "high");
        alert.labels = BTreeMap::from([("service".to_string(), "payments".to_string())]);
        let normalized = normalizer.normalize(&alert, Utc::now());
        assert_eq!(normalized.alert.service, "payments");
    }

    #[test]
    fn description_pattern_matches_when_no_label() {
        let normalizer = AlertNormalizer::new(&[], vec!["checkout".into(), "cart".into()]);
        let normalized = normalizer.normalize(&raw("grafana", "high"), Utc::now());
        assert_eq!(normalized.alert.service, "checkout");
    }

    #[test]
    fn unknown_service_fallback() {
        let normalizer = AlertNormalizer::new(&[], vec![]);
        let mut alert = raw("grafana", "high");
        alert.description = "something odd".into();
        let normalized = normalizer.normalize(&alert, Utc::now());
        assert_eq!(normalized.alert.service, "unknown");
    }

    #[test]
    fn provider_fingerprint_is_accepted() {
        let normalizer = AlertNormalizer::new(&[], vec![]);
        let mut alert = raw("grafana", "high");
        alert.fingerprint = Some("given-fp".into());
        let normalized = normalizer.normalize(&alert, Utc::now());
        assert_eq!(normalized.alert.fingerprint, "given-fp");
    }

    #[test]
    fn synthesized_fingerprint_is_stable_and_sensitive() {
        let normalizer = AlertNormalizer::new(&[], vec![]);
        let a = normalizer.normalize(&raw("grafana", "high"), Utc::now());
        let b = normalizer.normalize(&raw("grafana", "high"), Utc::now());
        assert_eq!(a.alert.fingerprint, b.alert.fingerprint);

        let c = normalizer.normalize(&raw("grafana", "critical"), Utc::now());
        assert_ne!(a.alert.fingerprint, c.alert.fingerprint);
    }
}
