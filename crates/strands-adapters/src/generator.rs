//! Text generator contract: embeddings and prompted generation.
//!
//! Both operations may fail transiently; callers treat that as
//! `UPSTREAM_UNAVAILABLE` and degrade (the recommender falls back to the
//! specialist-suggested actions).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use strands_core::error::{Error, Result};
use strands_core::resilience::ResilienceContext;

/// Options recognized by `generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    #[serde(default)]
    pub stop: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "remediation-drafter".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            stop: Vec::new(),
        }
    }
}

/// Contract to the text-generation model service.
#[async_trait]
pub trait TextGenerator: Send + Sync + std::fmt::Debug {
    /// Embed `text` into the deployment's fixed-dimension vector space.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate text for `prompt`.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    async fn health_check(&self) -> Result<()>;
}

// =============================================================================
// HTTP GENERATOR
// =============================================================================

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

/// REST implementation against the model service.
#[derive(Debug)]
pub struct HttpTextGenerator {
    base_url: String,
    client: reqwest::Client,
    guard: ResilienceContext,
}

impl HttpTextGenerator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::upstream("generator", e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            guard: ResilienceContext::new("generator").with_timeout(timeout),
        })
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &'static str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::upstream("generator", e.to_string()))?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(Error::upstream("generator", format!("status {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::validation(format!(
                "generator rejected request: {status}: {text}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::upstream("generator", format!("malformed response: {e}")))
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({ "input": text });
        let this = self;
        let response: EmbedResponse = self
            .guard
            .execute(None, move || this.post_json("/v1/embed", body.clone()))
            .await?;
        if response.embedding.is_empty() {
            return Err(Error::upstream("generator", "empty embedding"));
        }
        Ok(response.embedding)
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let mut body = serde_json::to_value(options)?;
        if let serde_json::Value::Object(map) = &mut body {
            map.insert("prompt".into(), serde_json::json!(prompt));
        }
        let this = self;
        let response: GenerateResponse = self
            .guard
            .execute(None, move || this.post_json("/v1/generate", body.clone()))
            .await?;
        Ok(response.text)
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream("generator", e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::upstream(
                "generator",
                format!("unhealthy: {}", response.status()),
            ))
        }
    }
}

// =============================================================================
// STATIC GENERATOR
// =============================================================================

/// Deterministic generator for tests and replay.
///
/// Embeddings are derived from a byte histogram of the input, so identical
/// text always embeds identically. Generation pops from a queued script; an
/// empty queue fails like an unavailable upstream.
#[derive(Debug, Default)]
pub struct StaticGenerator {
    responses: Mutex<VecDeque<String>>,
}

impl StaticGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next generation response.
    pub fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(text.into());
    }
}

#[async_trait]
impl TextGenerator for StaticGenerator {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 64-bucket byte histogram, L2-normalised.
        let mut buckets = [0.0f32; 64];
        for b in text.bytes() {
            buckets[(b % 64) as usize] += 1.0;
        }
        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut buckets {
                *v /= norm;
            }
        }
        Ok(buckets.to_vec())
    }

    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::upstream("generator", "no scripted response"))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_embeddings_are_deterministic() {
        let generator = StaticGenerator::new();
        let a = generator.embed("checkout latency spike").await.unwrap();
        let b = generator.embed("checkout latency spike").await.unwrap();
        let c = generator.embed("payment errors").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn scripted_generation_drains_then_fails() {
        let generator = StaticGenerator::new();
        generator.push_response("{\"title\": \"restart\"}");
        assert_eq!(
            generator
                .generate("draft a playbook", &GenerationOptions::default())
                .await
                .unwrap(),
            "{\"title\": \"restart\"}"
        );
        let err = generator
            .generate("draft a playbook", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UpstreamUnavailable { .. }
        ));
    }
}
