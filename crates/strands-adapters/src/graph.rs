//! Graph store contract: transactional nodes + relations with
//! compare-and-set on node properties.
//!
//! Playbook statistics writes go through [`GraphStore::compare_and_set`] so
//! the counters and Welford accumulators update atomically; the store is the
//! only place allowed to mutate them.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use strands_core::error::{Error, Result};
use strands_core::resilience::ResilienceContext;
use tracing::debug;

/// Property bag of one node or relation.
pub type NodeProps = serde_json::Map<String, Value>;

/// Contract to the graph database.
#[async_trait]
pub trait GraphStore: Send + Sync + std::fmt::Debug {
    /// Create or replace a node identified by `(label, id)`.
    async fn upsert_node(&self, label: &str, id: &str, props: NodeProps) -> Result<()>;

    /// Fetch a node's properties.
    async fn get_node(&self, label: &str, id: &str) -> Result<Option<NodeProps>>;

    /// Nodes of `label` whose properties equal every `(key, value)` filter.
    async fn find_nodes(&self, label: &str, filters: &[(&str, Value)]) -> Result<Vec<NodeProps>>;

    /// Create or replace a relation `from -[rel_type]-> to`.
    async fn upsert_relation(
        &self,
        from_id: &str,
        rel_type: &str,
        to_id: &str,
        props: NodeProps,
    ) -> Result<()>;

    /// Atomically replace a node's properties if `guard_prop` still equals
    /// `expected`. Returns false when the guard lost the race.
    async fn compare_and_set(
        &self,
        label: &str,
        id: &str,
        guard_prop: &str,
        expected: &Value,
        props: NodeProps,
    ) -> Result<bool>;

    /// Raw query passthrough, returning one property bag per row.
    async fn query(&self, statement: &str, params: NodeProps) -> Result<Vec<NodeProps>>;

    async fn health_check(&self) -> Result<()>;
}

// =============================================================================
// HTTP GRAPH STORE
// =============================================================================

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<NodeProps>,
}

/// REST implementation against the graph service.
#[derive(Debug)]
pub struct HttpGraphStore {
    base_url: String,
    client: reqwest::Client,
    guard: ResilienceContext,
}

impl HttpGraphStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::upstream("graph", e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            guard: ResilienceContext::new("graph").with_timeout(timeout),
        })
    }

    fn classify(status: reqwest::StatusCode, body: String) -> Error {
        if status.is_server_error() || status.as_u16() == 429 {
            Error::upstream("graph", format!("status {status}: {body}"))
        } else {
            Error::validation(format!("graph request rejected: {status}: {body}"))
        }
    }

    async fn put_json(&self, url: String, body: Value) -> Result<()> {
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::upstream("graph", e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Self::classify(status, body))
        }
    }

    async fn get_optional(&self, url: String) -> Result<Option<NodeProps>> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream("graph", e.to_string()))?;
        match response.status().as_u16() {
            404 => Ok(None),
            s if (200..300).contains(&s) => {
                let props = response
                    .json()
                    .await
                    .map_err(|e| Error::upstream("graph", e.to_string()))?;
                Ok(Some(props))
            }
            _ => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(Self::classify(status, body))
            }
        }
    }

    async fn post_rows(&self, url: String, body: Value) -> Result<Vec<NodeProps>> {
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::upstream("graph", e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            let parsed: QueryResponse = response
                .json()
                .await
                .map_err(|e| Error::upstream("graph", e.to_string()))?;
            Ok(parsed.rows)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Self::classify(status, body))
        }
    }

    async fn post_cas(&self, url: String, body: Value) -> Result<bool> {
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::upstream("graph", e.to_string()))?;
        match response.status().as_u16() {
            s if (200..300).contains(&s) => Ok(true),
            409 => Ok(false),
            _ => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(Self::classify(status, body))
            }
        }
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    async fn upsert_node(&self, label: &str, id: &str, props: NodeProps) -> Result<()> {
        let url = format!("{}/v1/nodes/{label}/{id}", self.base_url);
        let body = Value::Object(props);
        let this = self;
        self.guard
            .execute(None, move || this.put_json(url.clone(), body.clone()))
            .await
    }

    async fn get_node(&self, label: &str, id: &str) -> Result<Option<NodeProps>> {
        let url = format!("{}/v1/nodes/{label}/{id}", self.base_url);
        let this = self;
        self.guard
            .execute(None, move || this.get_optional(url.clone()))
            .await
    }

    async fn find_nodes(&self, label: &str, filters: &[(&str, Value)]) -> Result<Vec<NodeProps>> {
        let url = format!("{}/v1/nodes/{label}/search", self.base_url);
        let body: NodeProps = filters
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let body = Value::Object(body);
        let this = self;
        self.guard
            .execute(None, move || this.post_rows(url.clone(), body.clone()))
            .await
    }

    async fn upsert_relation(
        &self,
        from_id: &str,
        rel_type: &str,
        to_id: &str,
        props: NodeProps,
    ) -> Result<()> {
        let url = format!(
            "{}/v1/relations/{rel_type}/{from_id}/{to_id}",
            self.base_url
        );
        let body = Value::Object(props);
        let this = self;
        self.guard
            .execute(None, move || this.put_json(url.clone(), body.clone()))
            .await
    }

    async fn compare_and_set(
        &self,
        label: &str,
        id: &str,
        guard_prop: &str,
        expected: &Value,
        props: NodeProps,
    ) -> Result<bool> {
        let url = format!("{}/v1/nodes/{label}/{id}/cas", self.base_url);
        let body = json!({
            "guard_prop": guard_prop,
            "expected": expected,
            "props": props,
        });
        let this = self;
        let swapped = self
            .guard
            .execute(None, move || this.post_cas(url.clone(), body.clone()))
            .await?;
        if !swapped {
            debug!(label, id, "compare-and-set lost the race");
        }
        Ok(swapped)
    }

    async fn query(&self, statement: &str, params: NodeProps) -> Result<Vec<NodeProps>> {
        let url = format!("{}/v1/query", self.base_url);
        let body = json!({ "statement": statement, "params": params });
        let this = self;
        self.guard
            .execute(None, move || this.post_rows(url.clone(), body.clone()))
            .await
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream("graph", e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::upstream(
                "graph",
                format!("unhealthy: {}", response.status()),
            ))
        }
    }
}

// =============================================================================
// MEMORY GRAPH STORE
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Relation {
    from_id: String,
    rel_type: String,
    to_id: String,
    props: NodeProps,
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: HashMap<(String, String), NodeProps>,
    relations: Vec<Relation>,
}

/// In-memory graph store with atomic compare-and-set, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: Mutex<MemoryState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relations currently recorded, for assertions.
    pub fn relation_count(&self, rel_type: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .relations
            .iter()
            .filter(|r| r.rel_type == rel_type)
            .count()
    }

    /// Count of nodes with the given label.
    pub fn node_count(&self, label: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .nodes
            .keys()
            .filter(|(l, _)| l == label)
            .count()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(&self, label: &str, id: &str, props: NodeProps) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert((label.to_string(), id.to_string()), props);
        Ok(())
    }

    async fn get_node(&self, label: &str, id: &str) -> Result<Option<NodeProps>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nodes
            .get(&(label.to_string(), id.to_string()))
            .cloned())
    }

    async fn find_nodes(&self, label: &str, filters: &[(&str, Value)]) -> Result<Vec<NodeProps>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<(String, NodeProps)> = state
            .nodes
            .iter()
            .filter(|((l, _), props)| {
                l == label && filters.iter().all(|(k, v)| props.get(*k) == Some(v))
            })
            .map(|((_, id), props)| (id.clone(), props.clone()))
            .collect();
        // Deterministic order for downstream fusion and tests.
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows.into_iter().map(|(_, props)| props).collect())
    }

    async fn upsert_relation(
        &self,
        from_id: &str,
        rel_type: &str,
        to_id: &str,
        props: NodeProps,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .relations
            .retain(|r| !(r.from_id == from_id && r.rel_type == rel_type && r.to_id == to_id));
        state.relations.push(Relation {
            from_id: from_id.to_string(),
            rel_type: rel_type.to_string(),
            to_id: to_id.to_string(),
            props,
        });
        Ok(())
    }

    async fn compare_and_set(
        &self,
        label: &str,
        id: &str,
        guard_prop: &str,
        expected: &Value,
        props: NodeProps,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let key = (label.to_string(), id.to_string());
        let Some(current) = state.nodes.get(&key) else {
            return Ok(false);
        };
        let observed = current.get(guard_prop).unwrap_or(&Value::Null);
        if observed != expected {
            return Ok(false);
        }
        state.nodes.insert(key, props);
        Ok(true)
    }

    async fn query(&self, statement: &str, _params: NodeProps) -> Result<Vec<NodeProps>> {
        debug!(statement, "raw query against memory store returns no rows");
        Ok(Vec::new())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
