//! Cluster introspection contract: pods, logs and events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use strands_core::error::{Error, Result};
use strands_core::resilience::ResilienceContext;

/// Pod summary returned by `list_pods`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub restart_count: u32,
    pub status: String,
}

/// Cluster event returned by `fetch_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub involved_object: String,
    pub message: String,
}

/// Contract to cluster introspection.
#[async_trait]
pub trait ClusterIntrospection: Send + Sync + std::fmt::Debug {
    /// Pods matching a label selector (e.g. `app=checkout`).
    async fn list_pods(&self, selector: &str) -> Result<Vec<PodInfo>>;

    /// Tail of a pod's log since `since`, capped at `max_lines`.
    async fn fetch_logs(
        &self,
        pod: &str,
        since: DateTime<Utc>,
        max_lines: usize,
    ) -> Result<String>;

    /// Events in a namespace since `since`.
    async fn fetch_events(
        &self,
        namespace: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClusterEvent>>;

    async fn health_check(&self) -> Result<()>;
}

/// REST implementation against a cluster-introspection proxy.
#[derive(Debug)]
pub struct HttpClusterIntrospection {
    base_url: String,
    client: reqwest::Client,
    guard: ResilienceContext,
}

impl HttpClusterIntrospection {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::upstream("cluster", e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            guard: ResilienceContext::new("cluster").with_timeout(timeout),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: String,
        params: Vec<(&'static str, String)>,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::upstream("cluster", e.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(Error::upstream("cluster", format!("status {status}")));
        }
        if !status.is_success() {
            return Err(Error::validation(format!("cluster request rejected: {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::upstream("cluster", format!("malformed response: {e}")))
    }
}

#[async_trait]
impl ClusterIntrospection for HttpClusterIntrospection {
    async fn list_pods(&self, selector: &str) -> Result<Vec<PodInfo>> {
        let selector = selector.to_string();
        let this = self;
        self.guard
            .execute(None, move || {
                this.get(
                    "/v1/pods".to_string(),
                    vec![("selector", selector.clone())],
                )
            })
            .await
    }

    async fn fetch_logs(
        &self,
        pod: &str,
        since: DateTime<Utc>,
        max_lines: usize,
    ) -> Result<String> {
        let pod = pod.to_string();
        let this = self;
        self.guard
            .execute(None, move || {
                this.get(
                    format!("/v1/pods/{pod}/logs"),
                    vec![
                        ("since", since.to_rfc3339()),
                        ("max_lines", max_lines.to_string()),
                    ],
                )
            })
            .await
    }

    async fn fetch_events(
        &self,
        namespace: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClusterEvent>> {
        let namespace = namespace.to_string();
        let this = self;
        self.guard
            .execute(None, move || {
                this.get(
                    format!("/v1/namespaces/{namespace}/events"),
                    vec![("since", since.to_rfc3339())],
                )
            })
            .await
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/healthz", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream("cluster", e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::upstream(
                "cluster",
                format!("unhealthy: {}", response.status()),
            ))
        }
    }
}

/// Fixed in-memory cluster view for tests and replay.
#[derive(Debug, Default)]
pub struct StaticCluster {
    pods: Mutex<Vec<PodInfo>>,
    logs: Mutex<HashMap<String, String>>,
    events: Mutex<Vec<ClusterEvent>>,
}

impl StaticCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, pod: PodInfo) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn set_logs(&self, pod: impl Into<String>, logs: impl Into<String>) {
        self.logs.lock().unwrap().insert(pod.into(), logs.into());
    }

    pub fn add_event(&self, event: ClusterEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ClusterIntrospection for StaticCluster {
    async fn list_pods(&self, selector: &str) -> Result<Vec<PodInfo>> {
        let wanted: Vec<(&str, &str)> = selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| {
                wanted
                    .iter()
                    .all(|(k, v)| p.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .cloned()
            .collect())
    }

    async fn fetch_logs(
        &self,
        pod: &str,
        _since: DateTime<Utc>,
        max_lines: usize,
    ) -> Result<String> {
        let logs = self.logs.lock().unwrap();
        let text = logs.get(pod).cloned().unwrap_or_default();
        let lines: Vec<&str> = text.lines().rev().take(max_lines).collect();
        Ok(lines.into_iter().rev().collect::<Vec<_>>().join("\n"))
    }

    async fn fetch_events(
        &self,
        _namespace: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClusterEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
