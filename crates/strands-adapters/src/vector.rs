//! Vector store contract: fixed-dimension upsert and similarity search.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use strands_core::error::{Error, Result};
use strands_core::resilience::ResilienceContext;

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// Cosine similarity in [-1, 1].
    pub score: f64,
    #[serde(default)]
    pub payload: serde_json::Map<String, Value>,
}

/// Contract to the vector store. The embedding dimension `d` is fixed per
/// deployment.
#[async_trait]
pub trait VectorStore: Send + Sync + std::fmt::Debug {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        payload: serde_json::Map<String, Value>,
    ) -> Result<()>;

    /// Top-`top_k` nearest neighbours with score ≥ `min_score`.
    async fn search(&self, vector: &[f32], top_k: usize, min_score: f64)
        -> Result<Vec<SearchHit>>;

    async fn health_check(&self) -> Result<()>;
}

// =============================================================================
// HTTP VECTOR STORE
// =============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

/// REST implementation against the vector service.
#[derive(Debug)]
pub struct HttpVectorStore {
    base_url: String,
    client: reqwest::Client,
    guard: ResilienceContext,
}

impl HttpVectorStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::upstream("vector", e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            guard: ResilienceContext::new("vector").with_timeout(timeout),
        })
    }

    async fn put_point(&self, url: String, body: Value) -> Result<()> {
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::upstream("vector", e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(Error::upstream("vector", format!("status {status}")))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::validation(format!(
                "vector upsert rejected: {status}: {body}"
            )))
        }
    }

    async fn post_search(&self, url: String, body: Value) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::upstream("vector", e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            let parsed: SearchResponse = response
                .json()
                .await
                .map_err(|e| Error::upstream("vector", e.to_string()))?;
            Ok(parsed.hits)
        } else if status.is_server_error() {
            Err(Error::upstream("vector", format!("status {status}")))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::validation(format!(
                "vector search rejected: {status}: {body}"
            )))
        }
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        payload: serde_json::Map<String, Value>,
    ) -> Result<()> {
        let url = format!("{}/v1/points", self.base_url);
        let body = serde_json::json!({
            "id": id,
            "vector": vector,
            "payload": payload,
        });
        let this = self;
        self.guard
            .execute(None, move || this.put_point(url.clone(), body.clone()))
            .await
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        min_score: f64,
    ) -> Result<Vec<SearchHit>> {
        let url = format!("{}/v1/points/search", self.base_url);
        let body = serde_json::json!({
            "vector": vector,
            "top_k": top_k,
            "min_score": min_score,
        });
        let this = self;
        self.guard
            .execute(None, move || this.post_search(url.clone(), body.clone()))
            .await
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream("vector", e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::upstream(
                "vector",
                format!("unhealthy: {}", response.status()),
            ))
        }
    }
}

// =============================================================================
// MEMORY VECTOR STORE
// =============================================================================

/// In-memory vector store with exact cosine search, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    points: Mutex<HashMap<String, (Vec<f32>, serde_json::Map<String, Value>)>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cosine(a: &[f32], b: &[f32]) -> f64 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let mut dot = 0.0f64;
        let mut na = 0.0f64;
        let mut nb = 0.0f64;
        for (&x, &y) in a.iter().zip(b) {
            dot += x as f64 * y as f64;
            na += (x as f64).powi(2);
            nb += (y as f64).powi(2);
        }
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            dot / (na.sqrt() * nb.sqrt())
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        payload: serde_json::Map<String, Value>,
    ) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::validation("empty vector"));
        }
        self.points
            .lock()
            .unwrap()
            .insert(id.to_string(), (vector, payload));
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        min_score: f64,
    ) -> Result<Vec<SearchHit>> {
        let points = self.points.lock().unwrap();
        let mut hits: Vec<SearchHit> = points
            .iter()
            .map(|(id, (v, payload))| SearchHit {
                id: id.clone(),
                score: Self::cosine(vector, v),
                payload: payload.clone(),
            })
            .filter(|h| h.score >= min_score)
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_ranks_by_cosine() {
        let store = MemoryVectorStore::new();
        store
            .upsert("aligned", vec![1.0, 0.0], Default::default())
            .await
            .unwrap();
        store
            .upsert("orthogonal", vec![0.0, 1.0], Default::default())
            .await
            .unwrap();
        store
            .upsert("opposed", vec![-1.0, 0.0], Default::default())
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 3, -1.0).await.unwrap();
        assert_eq!(hits[0].id, "aligned");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert_eq!(hits[2].id, "opposed");

        let filtered = store.search(&[1.0, 0.0], 3, 0.5).await.unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn top_k_truncates() {
        let store = MemoryVectorStore::new();
        for i in 0..10 {
            store
                .upsert(
                    &format!("p{i}"),
                    vec![1.0, i as f32 * 0.1],
                    Default::default(),
                )
                .await
                .unwrap();
        }
        let hits = store.search(&[1.0, 0.0], 3, -1.0).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn empty_vector_rejected() {
        let store = MemoryVectorStore::new();
        assert!(store.upsert("x", vec![], Default::default()).await.is_err());
    }
}
