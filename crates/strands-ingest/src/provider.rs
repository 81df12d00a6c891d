//! Alert provider contract and the static registry of provider kinds.
//!
//! Providers are declared as configuration descriptors; the registry maps
//! each descriptor onto a concrete implementation. No runtime discovery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strands_adapters::metrics_source::MetricsSource;
use strands_core::config::{ProviderConfig, ProviderKind};
use strands_core::error::{Error, Result};
use strands_core::model::alert::{AlertStatus, RawAlert};
use strands_core::resilience::{ResilienceContext, RetryPolicy};

/// Contract every alert provider implements.
#[async_trait]
pub trait AlertProvider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Higher priority is polled first.
    fn priority(&self) -> i32;

    /// Alerts currently firing at this provider. An empty list is an
    /// explicit success, not an error.
    async fn list_active(&self) -> Result<Vec<RawAlert>>;
}

/// Build concrete providers from configuration descriptors.
///
/// `MetricsSource`-kind descriptors share the process-wide metrics adapter.
pub fn build_providers(
    configs: &[ProviderConfig],
    metrics_source: Arc<dyn MetricsSource>,
) -> Result<Vec<Arc<dyn AlertProvider>>> {
    let mut providers: Vec<Arc<dyn AlertProvider>> = Vec::new();
    for config in configs.iter().filter(|c| c.enabled) {
        match config.kind {
            ProviderKind::Alertmanager => {
                providers.push(Arc::new(HttpAlertProvider::new(config)?));
            }
            ProviderKind::MetricsSource => {
                providers.push(Arc::new(MetricsAlertProvider::new(
                    config,
                    metrics_source.clone(),
                )));
            }
            ProviderKind::Static => {
                providers.push(Arc::new(StaticAlertProvider::new(
                    &config.name,
                    config.priority,
                )));
            }
        }
    }
    Ok(providers)
}

// =============================================================================
// ALERTMANAGER-COMPATIBLE HTTP PROVIDER
// =============================================================================

#[derive(Debug, Deserialize)]
struct AmAlert {
    #[serde(default)]
    fingerprint: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
    #[serde(rename = "startsAt", default)]
    starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    status: AmStatus,
}

#[derive(Debug, Deserialize, Default)]
struct AmStatus {
    #[serde(default)]
    state: String,
}

/// Polls an Alertmanager-compatible `/api/v2/alerts` endpoint.
#[derive(Debug)]
pub struct HttpAlertProvider {
    name: String,
    priority: i32,
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::Client,
    guard: ResilienceContext,
}

impl HttpAlertProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_s);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::upstream(&config.name, e.to_string()))?;
        let auth_token = config
            .auth_token_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok());
        let retry = RetryPolicy {
            max_attempts: config.retries.max(1),
            ..RetryPolicy::default()
        };
        Ok(Self {
            name: config.name.clone(),
            priority: config.priority,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            auth_token,
            client,
            guard: ResilienceContext::new(config.name.clone())
                .with_timeout(timeout)
                .with_retry(retry),
        })
    }

    async fn poll(&self, url: String) -> Result<Vec<AmAlert>> {
        let mut request = self.client.get(&url).query(&[("active", "true")]);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::upstream(&self.name, e.to_string()))?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(Error::upstream(&self.name, format!("status {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::validation(format!(
                "provider '{}' rejected poll: {status}: {body}",
                self.name
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::upstream(&self.name, format!("malformed response: {e}")))
    }
}

#[async_trait]
impl AlertProvider for HttpAlertProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn list_active(&self) -> Result<Vec<RawAlert>> {
        let url = format!("{}/api/v2/alerts", self.endpoint);
        let this = self;
        let alerts: Vec<AmAlert> = self
            .guard
            .execute(None, move || this.poll(url.clone()))
            .await?;

        Ok(alerts
            .into_iter()
            .filter(|a| a.status.state.is_empty() || a.status.state == "active" || a.status.state == "firing")
            .map(|a| RawAlert {
                provider: self.name.clone(),
                fingerprint: a.fingerprint,
                severity: a.labels.get("severity").cloned().unwrap_or_default(),
                description: a
                    .annotations
                    .get("description")
                    .or_else(|| a.annotations.get("summary"))
                    .cloned()
                    .unwrap_or_default(),
                labels: a.labels,
                annotations: a.annotations,
                status: AlertStatus::Firing,
                starts_at: a.starts_at.unwrap_or_else(Utc::now),
            })
            .collect())
    }
}

// =============================================================================
// METRICS-SOURCE PROVIDER
// =============================================================================

/// Provider backed by the metrics source's own alert list.
#[derive(Debug)]
pub struct MetricsAlertProvider {
    name: String,
    priority: i32,
    source: Arc<dyn MetricsSource>,
}

impl MetricsAlertProvider {
    pub fn new(config: &ProviderConfig, source: Arc<dyn MetricsSource>) -> Self {
        Self {
            name: config.name.clone(),
            priority: config.priority,
            source,
        }
    }
}

#[async_trait]
impl AlertProvider for MetricsAlertProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn list_active(&self) -> Result<Vec<RawAlert>> {
        let mut alerts = self.source.list_active_alerts().await?;
        for alert in &mut alerts {
            alert.provider = self.name.clone();
        }
        Ok(alerts)
    }
}

// =============================================================================
// STATIC PROVIDER
// =============================================================================

/// Fixed in-memory provider for tests and replay. Can be scripted to fail.
#[derive(Debug)]
pub struct StaticAlertProvider {
    name: String,
    priority: i32,
    alerts: Mutex<Vec<RawAlert>>,
    failing: Mutex<bool>,
}

impl StaticAlertProvider {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            alerts: Mutex::new(Vec::new()),
            failing: Mutex::new(false),
        }
    }

    pub fn set_alerts(&self, alerts: Vec<RawAlert>) {
        *self.alerts.lock().unwrap() = alerts;
    }

    /// Make the provider fail as if the upstream were unreachable.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl AlertProvider for StaticAlertProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn list_active(&self) -> Result<Vec<RawAlert>> {
        if *self.failing.lock().unwrap() {
            return Err(Error::upstream(&self.name, "scripted failure"));
        }
        Ok(self.alerts.lock().unwrap().clone())
    }
}
