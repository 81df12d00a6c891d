//! Metrics time-series source contract and implementations.
//!
//! Range responses carry timestamps and values as parallel arrays of equal
//! length, in time-ascending order; gaps are represented by a NaN sentinel
//! the analyzer recognises and drops pairwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use strands_core::error::{Error, Result};
use strands_core::model::alert::RawAlert;
use strands_core::resilience::ResilienceContext;
use tracing::debug;

/// A single instant-query sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricPoint {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// A range-query result: parallel, equal-length, time-ascending arrays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricRange {
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
}

impl MetricRange {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Contract to the metrics time-series source.
#[async_trait]
pub trait MetricsSource: Send + Sync + std::fmt::Debug {
    /// Evaluate `expr` at one instant.
    async fn query_instant(&self, expr: &str, at: DateTime<Utc>) -> Result<MetricPoint>;

    /// Evaluate `expr` over `[start, end]` at `step` resolution.
    async fn query_range(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<MetricRange>;

    /// Raw alerts currently firing at the source.
    async fn list_active_alerts(&self) -> Result<Vec<RawAlert>>;

    /// Probe reachability.
    async fn health_check(&self) -> Result<()>;
}

// =============================================================================
// PROMETHEUS HTTP SOURCE
// =============================================================================

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromResult>,
}

#[derive(Debug, Deserialize)]
struct PromResult {
    #[serde(default)]
    value: Option<(f64, String)>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

#[derive(Debug, Deserialize)]
struct PromAlertsResponse {
    #[serde(default)]
    data: Option<PromAlertsData>,
}

#[derive(Debug, Deserialize)]
struct PromAlertsData {
    #[serde(default)]
    alerts: Vec<PromAlert>,
}

#[derive(Debug, Deserialize)]
struct PromAlert {
    #[serde(default)]
    labels: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    annotations: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    state: String,
    #[serde(rename = "activeAt", default)]
    active_at: Option<DateTime<Utc>>,
}

/// Prometheus-compatible HTTP metrics source.
#[derive(Debug)]
pub struct PrometheusSource {
    base_url: String,
    client: reqwest::Client,
    guard: ResilienceContext,
}

impl PrometheusSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::upstream("metrics", e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            guard: ResilienceContext::new("metrics").with_timeout(timeout),
        })
    }

    fn parse_value(raw: &str) -> f64 {
        // Prometheus encodes gaps and undefined points as "NaN".
        raw.parse::<f64>().unwrap_or(f64::NAN)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        params: Vec<(&'static str, String)>,
    ) -> Result<T> {
        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(Duration::from_secs(30))
                } else {
                    Error::upstream("metrics", e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::upstream("metrics", format!("status {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::validation(format!(
                "metrics source rejected query: {status}: {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::upstream("metrics", format!("malformed response: {e}")))
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query_instant(&self, expr: &str, at: DateTime<Utc>) -> Result<MetricPoint> {
        let url = format!("{}/api/v1/query", self.base_url);
        let expr = expr.to_string();
        let this = self;
        let query_expr = expr.clone();
        let response: PromResponse = self
            .guard
            .execute(None, move || {
                this.get_json(
                    url.clone(),
                    vec![
                        ("query", query_expr.clone()),
                        ("time", at.timestamp().to_string()),
                    ],
                )
            })
            .await?;
        if response.status != "success" {
            return Err(Error::upstream(
                "metrics",
                response.error.unwrap_or_else(|| "query failed".into()),
            ));
        }
        let result = response
            .data
            .and_then(|d| d.result.into_iter().next())
            .and_then(|r| r.value)
            .ok_or_else(|| Error::validation(format!("no sample for expression '{expr}'")))?;
        Ok(MetricPoint {
            value: Self::parse_value(&result.1),
            timestamp: at,
        })
    }

    async fn query_range(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<MetricRange> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let expr = expr.to_string();
        let this = self;
        let query_expr = expr.clone();
        let response: PromResponse = self
            .guard
            .execute(None, move || {
                this.get_json(
                    url.clone(),
                    vec![
                        ("query", query_expr.clone()),
                        ("start", start.timestamp().to_string()),
                        ("end", end.timestamp().to_string()),
                        ("step", step.as_secs().max(1).to_string()),
                    ],
                )
            })
            .await?;
        if response.status != "success" {
            return Err(Error::upstream(
                "metrics",
                response.error.unwrap_or_else(|| "range query failed".into()),
            ));
        }

        let mut range = MetricRange::default();
        if let Some(series) = response.data.and_then(|d| d.result.into_iter().next()) {
            for (ts, raw) in series.values {
                let at = DateTime::<Utc>::from_timestamp(ts as i64, 0)
                    .ok_or_else(|| Error::validation(format!("bad timestamp {ts}")))?;
                range.timestamps.push(at);
                range.values.push(Self::parse_value(&raw));
            }
        }
        debug!(samples = range.len(), expr = %expr, "range query complete");
        Ok(range)
    }

    async fn list_active_alerts(&self) -> Result<Vec<RawAlert>> {
        let url = format!("{}/api/v1/alerts", self.base_url);
        let this = self;
        let response: PromAlertsResponse = self
            .guard
            .execute(None, move || this.get_json(url.clone(), Vec::new()))
            .await?;

        let alerts = response
            .data
            .map(|d| d.alerts)
            .unwrap_or_default()
            .into_iter()
            .filter(|a| a.state == "firing")
            .map(|a| RawAlert {
                provider: "metrics".into(),
                fingerprint: None,
                severity: a.labels.get("severity").cloned().unwrap_or_default(),
                description: a
                    .annotations
                    .get("description")
                    .or_else(|| a.annotations.get("summary"))
                    .cloned()
                    .unwrap_or_default(),
                labels: a.labels,
                annotations: a.annotations,
                status: Default::default(),
                starts_at: a.active_at.unwrap_or_else(Utc::now),
            })
            .collect();
        Ok(alerts)
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/-/healthy", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream("metrics", e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::upstream(
                "metrics",
                format!("unhealthy: {}", response.status()),
            ))
        }
    }
}

// =============================================================================
// STATIC SOURCE
// =============================================================================

/// Fixed in-memory metrics source for tests, replay and dry runs.
#[derive(Debug, Default)]
pub struct StaticMetricsSource {
    ranges: Mutex<HashMap<String, MetricRange>>,
    alerts: Mutex<Vec<RawAlert>>,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the series returned for `expr`.
    pub fn insert_range(&self, expr: impl Into<String>, range: MetricRange) {
        self.ranges.lock().unwrap().insert(expr.into(), range);
    }

    pub fn set_alerts(&self, alerts: Vec<RawAlert>) {
        *self.alerts.lock().unwrap() = alerts;
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn query_instant(&self, expr: &str, at: DateTime<Utc>) -> Result<MetricPoint> {
        let ranges = self.ranges.lock().unwrap();
        let range = ranges
            .get(expr)
            .ok_or_else(|| Error::validation(format!("no sample for expression '{expr}'")))?;
        let value = *range
            .values
            .last()
            .ok_or_else(|| Error::validation(format!("empty series for '{expr}'")))?;
        Ok(MetricPoint {
            value,
            timestamp: at,
        })
    }

    async fn query_range(
        &self,
        expr: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _step: Duration,
    ) -> Result<MetricRange> {
        Ok(self
            .ranges
            .lock()
            .unwrap()
            .get(expr)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_active_alerts(&self) -> Result<Vec<RawAlert>> {
        Ok(self.alerts.lock().unwrap().clone())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_of(values: &[f64]) -> MetricRange {
        let base = Utc::now();
        MetricRange {
            timestamps: (0..values.len())
                .map(|i| base + chrono::Duration::seconds(i as i64 * 15))
                .collect(),
            values: values.to_vec(),
        }
    }

    #[tokio::test]
    async fn static_source_serves_registered_series() {
        let source = StaticMetricsSource::new();
        source.insert_range("up", range_of(&[1.0, 1.0, 0.0]));

        let range = source
            .query_range("up", Utc::now(), Utc::now(), Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range.timestamps.len(), range.values.len());

        let point = source.query_instant("up", Utc::now()).await.unwrap();
        assert_eq!(point.value, 0.0);

        assert!(source.query_instant("missing", Utc::now()).await.is_err());
    }

    #[test]
    fn nan_sentinel_parsing() {
        assert!(PrometheusSource::parse_value("NaN").is_nan());
        assert_eq!(PrometheusSource::parse_value("42.5"), 42.5);
        assert!(PrometheusSource::parse_value("garbage").is_nan());
    }
}
