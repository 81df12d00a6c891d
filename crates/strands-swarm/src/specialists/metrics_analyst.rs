//! Metrics specialist: queries resource and latency series for the cluster's
//! service, filters p95 outliers, fits linear trends and classifies each
//! series as stable, degrading, improving or volatile.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use strands_adapters::metrics_source::MetricsSource;
use strands_core::error::Result;
use strands_core::model::alert::AlertCluster;
use strands_core::model::swarm::{CompletionStatus, EvidenceItem, EvidenceKind, SpecialistResult};
use strands_core::stats;
use tracing::debug;

use crate::specialist::{InvestigationContext, Specialist};

/// Trend classification of one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrendClass {
    Stable,
    Degrading,
    Improving,
    Volatile,
}

impl TrendClass {
    fn describe(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Degrading => "degrading",
            Self::Improving => "improving",
            Self::Volatile => "volatile",
        }
    }
}

/// Classify a series after p95 outlier filtering.
///
/// A confident linear fit (R² ≥ 0.6) whose cumulative relative change over
/// the window exceeds 5% classifies as degrading/improving by slope sign.
/// Otherwise a coefficient of variation below 0.10 is stable; the rest is
/// volatile.
fn classify(values: &[f64]) -> (TrendClass, f64) {
    let (filtered, _) = stats::filter_outliers_p95(values);
    if filtered.len() < 2 {
        return (TrendClass::Stable, 0.0);
    }
    if let Some((slope, r_squared)) = stats::linear_trend(&filtered) {
        let mean = stats::mean(&filtered).abs().max(f64::EPSILON);
        let relative_change = slope * filtered.len() as f64 / mean;
        if r_squared >= 0.6 && relative_change.abs() > 0.05 {
            return if slope > 0.0 {
                (TrendClass::Degrading, r_squared)
            } else {
                (TrendClass::Improving, r_squared)
            };
        }
    }
    let cv = stats::coefficient_of_variation(&filtered);
    if cv < 0.10 {
        (TrendClass::Stable, (1.0 - cv).clamp(0.0, 1.0))
    } else {
        (TrendClass::Volatile, 0.4)
    }
}

/// The metrics-domain specialist.
#[derive(Debug)]
pub struct MetricsAnalystSpecialist {
    source: Arc<dyn MetricsSource>,
    /// Look-back window for range queries.
    lookback: ChronoDuration,
    step: Duration,
}

impl MetricsAnalystSpecialist {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self {
            source,
            lookback: ChronoDuration::minutes(30),
            step: Duration::from_secs(60),
        }
    }

    fn expressions(service: &str) -> Vec<(&'static str, String)> {
        vec![
            (
                "cpu",
                format!("rate(container_cpu_usage_seconds_total{{service=\"{service}\"}}[5m])"),
            ),
            (
                "memory",
                format!("container_memory_working_set_bytes{{service=\"{service}\"}}"),
            ),
            (
                "latency_p95",
                format!(
                    "histogram_quantile(0.95, rate(http_request_duration_seconds_bucket{{service=\"{service}\"}}[5m]))"
                ),
            ),
        ]
    }
}

#[async_trait]
impl Specialist for MetricsAnalystSpecialist {
    fn id(&self) -> &'static str {
        "metrics"
    }

    async fn investigate(
        &self,
        cluster: &AlertCluster,
        ctx: &InvestigationContext,
    ) -> Result<SpecialistResult> {
        let now = ctx.clock.now();
        let start = now - self.lookback;

        let mut evidence = Vec::new();
        let mut degradations: Vec<&'static str> = Vec::new();
        let mut all_stable = true;

        for (name, expr) in Self::expressions(&cluster.service) {
            let range = self.source.query_range(&expr, start, now, self.step).await?;
            if range.is_empty() {
                debug!(series = name, "no samples");
                continue;
            }
            let (class, quality) = classify(&range.values);
            if class != TrendClass::Stable {
                all_stable = false;
            }
            if class == TrendClass::Degrading {
                degradations.push(name);
            }
            let last = *range.values.last().unwrap_or(&f64::NAN);
            evidence.push(
                EvidenceItem::new(
                    EvidenceKind::Metric,
                    expr,
                    format!("{name} trend is {} over the last 30m", class.describe()),
                    quality.clamp(0.0, 1.0),
                    now,
                )
                .with_value(last),
            );
        }

        let (hypothesis, confidence, suggested_actions) = if degradations.is_empty() {
            if all_stable {
                (
                    format!("{} resource metrics are stable; no metric-side cause", cluster.service),
                    0.3,
                    vec![],
                )
            } else {
                (
                    format!("{} metrics are volatile without a clear trend", cluster.service),
                    0.4,
                    vec!["inspect recent deployments and traffic shape".to_string()],
                )
            }
        } else {
            let joined = degradations.join(", ");
            let mut actions = Vec::new();
            if degradations.contains(&"memory") {
                actions.push(format!("check {} for a memory leak", cluster.service));
                actions.push(format!("raise memory limits for {}", cluster.service));
            }
            if degradations.contains(&"cpu") {
                actions.push(format!("scale out {} replicas", cluster.service));
            }
            if degradations.contains(&"latency_p95") {
                actions.push("inspect downstream dependencies for saturation".to_string());
            }
            (
                format!("{} shows sustained degradation in: {joined}", cluster.service),
                (0.5 + 0.15 * degradations.len() as f64).min(0.9),
                actions,
            )
        };

        Ok(SpecialistResult {
            specialist_id: self.id().to_string(),
            hypothesis,
            confidence,
            evidence,
            suggested_actions,
            status: CompletionStatus::Success,
            duration_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strands_adapters::metrics_source::{MetricRange, StaticMetricsSource};
    use strands_core::types::Clock;
    use std::time::Instant;
    use uuid::Uuid;

    fn cluster() -> AlertCluster {
        AlertCluster {
            cluster_id: Uuid::new_v4(),
            service: "checkout".into(),
            earliest: Utc::now(),
            latest: Utc::now(),
            cluster_type: "service-window".into(),
            members: Vec::new(),
            correlation_basis: None,
        }
    }

    fn range_of(values: Vec<f64>) -> MetricRange {
        let base = Utc::now();
        MetricRange {
            timestamps: (0..values.len())
                .map(|i| base + ChronoDuration::seconds(i as i64 * 60))
                .collect(),
            values,
        }
    }

    fn ctx() -> InvestigationContext {
        InvestigationContext::new(Instant::now() + Duration::from_secs(30), Clock::Wall)
    }

    #[test]
    fn classification_rules() {
        let flat = vec![10.0, 10.1, 9.9, 10.0, 10.05, 9.95, 10.0, 10.1];
        assert_eq!(classify(&flat).0, TrendClass::Stable);

        let rising: Vec<f64> = (0..30).map(|i| 10.0 + i as f64 * 2.0).collect();
        assert_eq!(classify(&rising).0, TrendClass::Degrading);

        let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64 * 2.0).collect();
        assert_eq!(classify(&falling).0, TrendClass::Improving);

        let choppy: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 10.0 } else { 100.0 })
            .collect();
        assert_eq!(classify(&choppy).0, TrendClass::Volatile);
    }

    #[tokio::test]
    async fn degrading_memory_drives_hypothesis_and_actions() {
        let source = Arc::new(StaticMetricsSource::new());
        let memory_expr = "container_memory_working_set_bytes{service=\"checkout\"}";
        source.insert_range(
            memory_expr,
            range_of((0..30).map(|i| 1e9 + i as f64 * 1e7).collect()),
        );
        let cpu_expr = "rate(container_cpu_usage_seconds_total{service=\"checkout\"}[5m])";
        source.insert_range(cpu_expr, range_of(vec![0.5; 30]));

        let specialist = MetricsAnalystSpecialist::new(source);
        let result = specialist.investigate(&cluster(), &ctx()).await.unwrap();

        assert!(result.status.is_success());
        assert!(result.hypothesis.contains("memory"));
        assert!(result.confidence > 0.5);
        assert!(result
            .suggested_actions
            .iter()
            .any(|a| a.contains("memory")));
        assert!(result
            .evidence
            .iter()
            .all(|e| e.kind == EvidenceKind::Metric));
    }

    #[tokio::test]
    async fn stable_metrics_give_low_confidence() {
        let source = Arc::new(StaticMetricsSource::new());
        let cpu_expr = "rate(container_cpu_usage_seconds_total{service=\"checkout\"}[5m])";
        source.insert_range(cpu_expr, range_of(vec![0.5; 30]));

        let specialist = MetricsAnalystSpecialist::new(source);
        let result = specialist.investigate(&cluster(), &ctx()).await.unwrap();
        assert!(result.confidence <= 0.4);
        assert!(result.hypothesis.contains("stable"));
    }
}
