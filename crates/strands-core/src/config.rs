//! Configuration loading and validation.
//!
//! Environment-first with an optional JSON file (`STRANDS_CONFIG`); explicit
//! environment variables override file values. Invalid configuration aborts
//! startup with exit code 1.

use crate::error::{Error, Result};
use crate::types::{AutomationLevel, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Named threshold policy for the decision gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyName {
    Strict,
    #[default]
    Balanced,
    Permissive,
}

impl PolicyName {
    /// `(confidence, consensus)` thresholds the decision must clear.
    pub fn thresholds(self) -> (f64, f64) {
        match self {
            Self::Strict => (0.90, 0.95),
            Self::Balanced => (0.70, 0.80),
            Self::Permissive => (0.50, 0.60),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STRICT" => Some(Self::Strict),
            "BALANCED" => Some(Self::Balanced),
            "PERMISSIVE" => Some(Self::Permissive),
            _ => None,
        }
    }
}

/// Relative weights for the evidence fusion mean, keyed by specialist domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightMatrix {
    pub metrics: f64,
    pub logs: f64,
    pub graph: f64,
    pub embeddings: f64,
    pub correlator: f64,
}

impl Default for WeightMatrix {
    fn default() -> Self {
        Self {
            metrics: 0.4,
            logs: 0.3,
            graph: 0.1,
            embeddings: 0.1,
            correlator: 0.1,
        }
    }
}

impl WeightMatrix {
    /// Weight for a specialist id; unknown specialists get the smallest
    /// configured weight so they can contribute without dominating.
    pub fn weight_for(&self, specialist_id: &str) -> f64 {
        match specialist_id {
            "metrics" => self.metrics,
            "logs" => self.logs,
            "graph" => self.graph,
            "embeddings" => self.embeddings,
            "correlator" => self.correlator,
            _ => self
                .metrics
                .min(self.logs)
                .min(self.graph)
                .min(self.embeddings)
                .min(self.correlator),
        }
    }

    pub fn sum(&self) -> f64 {
        self.metrics + self.logs + self.graph + self.embeddings + self.correlator
    }
}

/// How an alert provider is spoken to. A static registry of descriptor
/// variants, no runtime discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Alertmanager-compatible HTTP endpoint.
    #[default]
    Alertmanager,
    /// Alerts listed by the configured metrics source.
    MetricsSource,
    /// Fixed in-memory list; tests and replay.
    Static,
}

/// One configured alert provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_s: u64,
    #[serde(default = "default_provider_retries")]
    pub retries: u32,
    /// Higher priority is tried first.
    #[serde(default)]
    pub priority: i32,
    /// Provider-native severity string to canonical severity.
    #[serde(default)]
    pub severity_map: BTreeMap<String, Severity>,
    /// Name of the env var holding the credential, never the credential itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_provider_timeout() -> u64 {
    10
}
fn default_provider_retries() -> u32 {
    3
}

/// Endpoints of the external stores the core consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub graph_url: String,
    #[serde(default)]
    pub vector_url: String,
    #[serde(default)]
    pub metrics_url: String,
    #[serde(default)]
    pub generator_url: String,
    #[serde(default = "default_adapter_timeout")]
    pub timeout_s: u64,
}

fn default_adapter_timeout() -> u64 {
    30
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            graph_url: String::new(),
            vector_url: String::new(),
            metrics_url: String::new(),
            generator_url: String::new(),
            timeout_s: default_adapter_timeout(),
        }
    }
}

/// Decision-engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub weights: WeightMatrix,
    #[serde(default = "default_weights_version")]
    pub weights_version: String,
    #[serde(default = "default_model_version")]
    pub model_version: String,
    #[serde(default)]
    pub policy: PolicyName,
    /// Automation level before the risk downgrade applies.
    #[serde(default = "default_automation")]
    pub default_automation: AutomationLevel,
}

fn default_weights_version() -> String {
    "weights-v1".to_string()
}
fn default_model_version() -> String {
    "strands-v1".to_string()
}
fn default_automation() -> AutomationLevel {
    AutomationLevel::Assisted
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: WeightMatrix::default(),
            weights_version: default_weights_version(),
            model_version: default_model_version(),
            policy: PolicyName::default(),
            default_automation: default_automation(),
        }
    }
}

/// Ingestion windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Per-fingerprint deduplication window in seconds.
    #[serde(default = "default_dedup_window")]
    pub dedup_window_s: u64,
    /// Time-window truncation step for clustering, in seconds.
    #[serde(default = "default_cluster_window")]
    pub cluster_window_s: u64,
}

fn default_dedup_window() -> u64 {
    60
}
fn default_cluster_window() -> u64 {
    300
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_window_s: default_dedup_window(),
            cluster_window_s: default_cluster_window(),
        }
    }
}

/// Correlation-analysis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: usize,
    #[serde(default = "default_max_lag")]
    pub max_lag: i64,
    /// Bayesian prior that a detected correlation is real.
    #[serde(default = "default_prior")]
    pub prior: f64,
    /// Soft CPU budget per correlation, milliseconds. Overruns log a warning.
    #[serde(default = "default_correlation_budget")]
    pub correlation_budget_ms: u64,
    /// Soft CPU budget per decision, milliseconds.
    #[serde(default = "default_decision_budget")]
    pub decision_budget_ms: u64,
}

fn default_min_sample_size() -> usize {
    20
}
fn default_max_lag() -> i64 {
    5
}
fn default_prior() -> f64 {
    0.3
}
fn default_correlation_budget() -> u64 {
    200
}
fn default_decision_budget() -> u64 {
    500
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_sample_size: default_min_sample_size(),
            max_lag: default_max_lag(),
            prior: default_prior(),
            correlation_budget_ms: default_correlation_budget(),
            decision_budget_ms: default_decision_budget(),
        }
    }
}

/// Controller loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_s: u64,
    /// Global investigation deadline per tick.
    #[serde(default = "default_global_deadline")]
    pub global_deadline_s: u64,
}

fn default_tick_interval() -> u64 {
    30
}
fn default_global_deadline() -> u64 {
    30
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_s: default_tick_interval(),
            global_deadline_s: default_global_deadline(),
        }
    }
}

/// Master configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrandsConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub adapters: AdapterConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Audit log path; JSON lines, append-only.
    #[serde(default = "default_audit_path")]
    pub audit_path: String,
    /// Pseudo-random seed pinning replay determinism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_seed: Option<u64>,
}

fn default_audit_path() -> String {
    "strands-audit.jsonl".to_string()
}

impl Default for StrandsConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            adapters: AdapterConfig::default(),
            engine: EngineConfig::default(),
            ingest: IngestConfig::default(),
            analysis: AnalysisConfig::default(),
            controller: ControllerConfig::default(),
            audit_path: default_audit_path(),
            replay_seed: None,
        }
    }
}

impl StrandsConfig {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "cannot read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("malformed config file: {e}")))?;
        Ok(config)
    }

    /// Load from the environment, starting from `STRANDS_CONFIG` if set.
    ///
    /// Recognized variables: `GRAPH_URL`, `VECTOR_URL`, `METRICS_URL`,
    /// `GENERATOR_URL`, `TICK_INTERVAL_S`, `GLOBAL_DEADLINE_S`,
    /// `POLICY_NAME`, `MODEL_VERSION`, `WEIGHTS_FILE`, and
    /// `PROVIDER_<NAME>_ENDPOINT` / `_PRIORITY` / `_TIMEOUT_S` / `_RETRIES`.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("STRANDS_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        let mut set = |target: &mut String, key: &str| {
            if let Ok(v) = std::env::var(key) {
                if !v.is_empty() {
                    *target = v;
                }
            }
        };
        set(&mut config.adapters.graph_url, "GRAPH_URL");
        set(&mut config.adapters.vector_url, "VECTOR_URL");
        set(&mut config.adapters.metrics_url, "METRICS_URL");
        set(&mut config.adapters.generator_url, "GENERATOR_URL");
        set(&mut config.engine.model_version, "MODEL_VERSION");

        if let Ok(v) = std::env::var("TICK_INTERVAL_S") {
            config.controller.tick_interval_s = v
                .parse()
                .map_err(|_| Error::config(format!("TICK_INTERVAL_S '{v}' is not an integer")))?;
        }
        if let Ok(v) = std::env::var("GLOBAL_DEADLINE_S") {
            config.controller.global_deadline_s = v
                .parse()
                .map_err(|_| Error::config(format!("GLOBAL_DEADLINE_S '{v}' is not an integer")))?;
        }
        if let Ok(v) = std::env::var("POLICY_NAME") {
            config.engine.policy = PolicyName::parse(&v)
                .ok_or_else(|| Error::config(format!("unknown POLICY_NAME '{v}'")))?;
        }
        if let Ok(path) = std::env::var("WEIGHTS_FILE") {
            if !path.is_empty() {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| Error::config(format!("cannot read WEIGHTS_FILE {path}: {e}")))?;
                config.engine.weights = serde_json::from_str(&raw)
                    .map_err(|e| Error::config(format!("malformed WEIGHTS_FILE: {e}")))?;
            }
        }

        config.providers.extend(Self::providers_from_env()?);
        Ok(config)
    }

    /// Collect `PROVIDER_<NAME>_*` variables into provider descriptors.
    fn providers_from_env() -> Result<Vec<ProviderConfig>> {
        let mut providers: BTreeMap<String, ProviderConfig> = BTreeMap::new();
        for (key, value) in std::env::vars() {
            let Some(rest) = key.strip_prefix("PROVIDER_") else {
                continue;
            };
            let Some((name, field)) = rest.rsplit_once('_') else {
                continue;
            };
            // Two-token fields (TIMEOUT_S) need a second split.
            let (name, field) = if field == "S" {
                match name.rsplit_once('_') {
                    Some((n, "TIMEOUT")) => (n, "TIMEOUT_S"),
                    _ => (name, field),
                }
            } else {
                (name, field)
            };
            if name.is_empty() {
                continue;
            }
            let entry = providers
                .entry(name.to_string())
                .or_insert_with(|| ProviderConfig {
                    name: name.to_ascii_lowercase(),
                    kind: ProviderKind::Alertmanager,
                    enabled: true,
                    endpoint: String::new(),
                    timeout_s: default_provider_timeout(),
                    retries: default_provider_retries(),
                    priority: 0,
                    severity_map: BTreeMap::new(),
                    auth_token_env: None,
                });
            match field {
                "ENDPOINT" => entry.endpoint = value,
                "PRIORITY" => {
                    entry.priority = value.parse().map_err(|_| {
                        Error::config(format!("{key} '{value}' is not an integer"))
                    })?
                }
                "TIMEOUT_S" => {
                    entry.timeout_s = value.parse().map_err(|_| {
                        Error::config(format!("{key} '{value}' is not an integer"))
                    })?
                }
                "RETRIES" => {
                    entry.retries = value.parse().map_err(|_| {
                        Error::config(format!("{key} '{value}' is not an integer"))
                    })?
                }
                "ENABLED" => entry.enabled = value != "false" && value != "0",
                _ => {}
            }
        }
        Ok(providers.into_values().collect())
    }

    /// Validate the assembled configuration.
    pub fn validate(&self) -> Result<()> {
        if self.controller.tick_interval_s == 0 {
            return Err(Error::config("tick_interval_s must be greater than 0"));
        }
        if self.controller.global_deadline_s == 0 {
            return Err(Error::config("global_deadline_s must be greater than 0"));
        }
        let weights = &self.engine.weights;
        for (name, w) in [
            ("metrics", weights.metrics),
            ("logs", weights.logs),
            ("graph", weights.graph),
            ("embeddings", weights.embeddings),
            ("correlator", weights.correlator),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(Error::config(format!(
                    "weight '{name}' must be within [0, 1], got {w}"
                )));
            }
        }
        if weights.sum() <= 0.0 {
            return Err(Error::config("weight matrix must not sum to zero"));
        }
        if !(0.0..1.0).contains(&self.analysis.prior) {
            return Err(Error::config(format!(
                "bayesian prior must be within [0, 1), got {}",
                self.analysis.prior
            )));
        }
        if self.analysis.min_sample_size < 3 {
            return Err(Error::config("min_sample_size must be at least 3"));
        }
        for provider in &self.providers {
            if provider.enabled
                && provider.kind == ProviderKind::Alertmanager
                && provider.endpoint.is_empty()
            {
                return Err(Error::config(format!(
                    "provider '{}' is enabled but has no endpoint",
                    provider.name
                )));
            }
        }
        Ok(())
    }

    /// Providers in descending priority order, disabled ones dropped.
    pub fn providers_by_priority(&self) -> Vec<&ProviderConfig> {
        let mut enabled: Vec<&ProviderConfig> =
            self.providers.iter().filter(|p| p.enabled).collect();
        enabled.sort_by(|a, b| b.priority.cmp(&a.priority));
        enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        StrandsConfig::default().validate().unwrap();
    }

    #[test]
    fn policy_thresholds() {
        assert_eq!(PolicyName::Strict.thresholds(), (0.90, 0.95));
        assert_eq!(PolicyName::Balanced.thresholds(), (0.70, 0.80));
        assert_eq!(PolicyName::Permissive.thresholds(), (0.50, 0.60));
        assert_eq!(PolicyName::parse("balanced"), Some(PolicyName::Balanced));
        assert_eq!(PolicyName::parse("lenient"), None);
    }

    #[test]
    fn zero_weight_matrix_rejected() {
        let mut config = StrandsConfig::default();
        config.engine.weights = WeightMatrix {
            metrics: 0.0,
            logs: 0.0,
            graph: 0.0,
            embeddings: 0.0,
            correlator: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn enabled_provider_requires_endpoint() {
        let mut config = StrandsConfig::default();
        config.providers.push(ProviderConfig {
            name: "grafana".into(),
            kind: ProviderKind::Alertmanager,
            enabled: true,
            endpoint: String::new(),
            timeout_s: 10,
            retries: 3,
            priority: 100,
            severity_map: BTreeMap::new(),
            auth_token_env: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn providers_sorted_by_priority_desc() {
        let mut config = StrandsConfig::default();
        for (name, priority) in [("low", 10), ("high", 100), ("mid", 50)] {
            config.providers.push(ProviderConfig {
                name: name.into(),
                kind: ProviderKind::Static,
                enabled: true,
                endpoint: "http://example".into(),
                timeout_s: 10,
                retries: 3,
                priority,
                severity_map: BTreeMap::new(),
                auth_token_env: None,
            });
        }
        let ordered: Vec<&str> = config
            .providers_by_priority()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(ordered, vec!["high", "mid", "low"]);
    }

    #[test]
    fn json_round_trip() {
        let config = StrandsConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored: StrandsConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }
}
