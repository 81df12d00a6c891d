//! Alert model: raw provider payloads, validated alerts, normalized alerts
//! and incident clusters.

use crate::types::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Firing state reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Firing,
    Resolved,
}

/// Provider-native alert as returned by `list_active()`, before validation.
///
/// Field contents are whatever the provider emits; the normalizer maps them
/// into the canonical [`Alert`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawAlert {
    /// Provider identifier (e.g. "alertmanager-primary").
    pub provider: String,
    /// Provider-supplied fingerprint, if any.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Provider-native severity string, mapped via the provider's severity map.
    pub severity: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Label mapping. Key order is irrelevant; a sorted map keeps the
    /// fingerprint hash canonical.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotation mapping.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub status: AlertStatus,
    /// When the provider says the alert started firing.
    pub starts_at: DateTime<Utc>,
}

/// Immutable record of a single external notification, frozen after
/// validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// When this process received the alert.
    pub received_at: DateTime<Utc>,
    pub provider: String,
    /// Stable hash used for deduplication.
    pub fingerprint: String,
    pub service: String,
    pub severity: Severity,
    pub description: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub status: AlertStatus,
}

/// Outcome of boundary validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Valid,
    Rejected { reason: String },
}

impl ValidationStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Alert with provider-specific fields harmonized and severity mapped to the
/// canonical enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedAlert {
    #[serde(flatten)]
    pub alert: Alert,
    pub validation: ValidationStatus,
}

impl NormalizedAlert {
    pub fn fingerprint(&self) -> &str {
        &self.alert.fingerprint
    }

    pub fn service(&self) -> &str {
        &self.alert.service
    }
}

/// An ordered set of normalized alerts judged to describe one incident.
///
/// Members are kept in arrival order and are unique by fingerprint. All
/// members share the canonical service unless `correlation_basis` records the
/// explicit rule that joined them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCluster {
    pub cluster_id: Uuid,
    pub service: String,
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
    /// Coarse tag for the cluster (e.g. "service-window").
    pub cluster_type: String,
    pub members: Vec<NormalizedAlert>,
    /// Basis of an explicit cross-service correlation rule, when one applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_basis: Option<String>,
}

impl AlertCluster {
    /// Highest member severity; `Info` for an empty cluster.
    pub fn max_severity(&self) -> Severity {
        self.members
            .iter()
            .map(|m| m.alert.severity)
            .max()
            .unwrap_or(Severity::Info)
    }

    /// Concatenated member descriptions, used for embedding and generation
    /// prompts.
    pub fn combined_description(&self) -> String {
        self.members
            .iter()
            .map(|m| m.alert.description.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Append a member, preserving uniqueness by fingerprint and the
    /// earliest/latest bounds. Returns false if the fingerprint was already
    /// present.
    pub fn push_member(&mut self, alert: NormalizedAlert) -> bool {
        if self
            .members
            .iter()
            .any(|m| m.fingerprint() == alert.fingerprint())
        {
            return false;
        }
        let ts = alert.alert.received_at;
        if ts < self.earliest {
            self.earliest = ts;
        }
        if ts > self.latest {
            self.latest = ts;
        }
        self.members.push(alert);
        true
    }
}
