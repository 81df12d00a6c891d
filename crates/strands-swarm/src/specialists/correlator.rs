//! Correlation specialist: runs the statistical analyzer over metric pairs
//! for the service and chains cluster events temporally.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use strands_adapters::kube::ClusterIntrospection;
use strands_adapters::metrics_source::{MetricRange, MetricsSource};
use strands_analysis::correlation::{AnalyzeOptions, CorrelationAnalyzer, TimeSeries};
use strands_analysis::temporal::{ChainDetector, TimedEvent};
use strands_core::error::Result;
use strands_core::model::alert::AlertCluster;
use strands_core::model::correlation::{CorrelationPattern, CorrelationType, Strength};
use strands_core::model::swarm::{CompletionStatus, EvidenceItem, EvidenceKind, SpecialistResult};

use crate::specialist::{InvestigationContext, Specialist};

/// The correlation-domain specialist.
#[derive(Debug)]
pub struct CorrelatorSpecialist {
    source: Arc<dyn MetricsSource>,
    cluster_api: Arc<dyn ClusterIntrospection>,
    analyzer: CorrelationAnalyzer,
    chains: ChainDetector,
    lookback: ChronoDuration,
    step: Duration,
}

impl CorrelatorSpecialist {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        cluster_api: Arc<dyn ClusterIntrospection>,
        analyzer: CorrelationAnalyzer,
    ) -> Self {
        Self {
            source,
            cluster_api,
            analyzer,
            chains: ChainDetector::default(),
            lookback: ChronoDuration::minutes(30),
            step: Duration::from_secs(60),
        }
    }

    fn series_pairs(service: &str) -> Vec<((&'static str, String), (&'static str, String))> {
        let cpu = format!("rate(container_cpu_usage_seconds_total{{service=\"{service}\"}}[5m])");
        let memory = format!("container_memory_working_set_bytes{{service=\"{service}\"}}");
        let latency = format!(
            "histogram_quantile(0.95, rate(http_request_duration_seconds_bucket{{service=\"{service}\"}}[5m]))"
        );
        let errors = format!("rate(log_error_lines_total{{service=\"{service}\"}}[5m])");
        vec![
            (("cpu", cpu.clone()), ("latency_p95", latency.clone())),
            (("memory", memory), ("latency_p95", latency)),
            (("log_errors", errors), ("cpu", cpu)),
        ]
    }

    fn to_series(id: &str, range: &MetricRange) -> TimeSeries {
        TimeSeries::new(id, range.timestamps.clone(), range.values.clone())
    }

    /// Remediation hint by pattern shape.
    fn hint(pattern: &CorrelationPattern) -> Option<String> {
        if pattern.strength < Strength::Moderate {
            return None;
        }
        let pair = (pattern.series_a.as_str(), pattern.series_b.as_str());
        let hint = match pair {
            ("cpu", "latency_p95") | ("latency_p95", "cpu") => {
                "scale out replicas to relieve CPU pressure"
            }
            ("memory", "latency_p95") | ("latency_p95", "memory") => {
                "raise memory limits or fix the leak driving GC pressure"
            }
            ("log_errors", _) | (_, "log_errors") => {
                "inspect the dominant error class in logs before scaling"
            }
            _ => "investigate the correlated pair jointly",
        };
        Some(hint.to_string())
    }
}

#[async_trait]
impl Specialist for CorrelatorSpecialist {
    fn id(&self) -> &'static str {
        "correlator"
    }

    async fn investigate(
        &self,
        cluster: &AlertCluster,
        ctx: &InvestigationContext,
    ) -> Result<SpecialistResult> {
        let now = ctx.clock.now();
        let start = now - self.lookback;

        let mut patterns: Vec<CorrelationPattern> = Vec::new();
        for ((name_a, expr_a), (name_b, expr_b)) in Self::series_pairs(&cluster.service) {
            let range_a = self.source.query_range(&expr_a, start, now, self.step).await?;
            let range_b = self.source.query_range(&expr_b, start, now, self.step).await?;
            if range_a.is_empty() || range_b.is_empty() {
                continue;
            }
            let correlation_type = if name_a == "log_errors" || name_b == "log_errors" {
                CorrelationType::LogMetric
            } else {
                CorrelationType::MetricMetric
            };
            let mut pattern = self.analyzer.analyze(
                correlation_type,
                &Self::to_series(name_a, &range_a),
                &Self::to_series(name_b, &range_b),
                AnalyzeOptions::default(),
            );
            pattern.remediation_hint = Self::hint(&pattern);
            patterns.push(pattern);
        }

        // Temporal chains over namespace events.
        let events = self
            .cluster_api
            .fetch_events("default", start)
            .await
            .unwrap_or_default();
        let timed: Vec<TimedEvent> = events
            .iter()
            .map(|e| TimedEvent {
                timestamp: e.timestamp,
                label: e.reason.clone(),
                source: e.involved_object.clone(),
            })
            .collect();
        patterns.extend(self.chains.detect(&timed));

        // Strongest pattern leads the hypothesis.
        patterns.sort_by(|a, b| {
            b.posterior
                .partial_cmp(&a.posterior)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let evidence: Vec<EvidenceItem> = patterns
            .iter()
            .filter(|p| p.degenerate_reason.is_none())
            .map(|p| {
                EvidenceItem::new(
                    EvidenceKind::Metric,
                    format!("{}~{}", p.series_a, p.series_b),
                    format!(
                        "{} correlation r={:.2} lag={} ({:?})",
                        p.correlation_type, p.coefficient, p.lag_offset, p.strength
                    ),
                    p.posterior,
                    now,
                )
                .with_value(p.coefficient)
            })
            .collect();

        let best = patterns
            .iter()
            .find(|p| p.degenerate_reason.is_none() && p.strength >= Strength::Moderate);
        let (hypothesis, confidence, suggested_actions) = match best {
            Some(pattern) => {
                let lag_text = if pattern.lag_offset != 0 {
                    format!(" with {} sample(s) of lag", pattern.lag_offset)
                } else {
                    String::new()
                };
                let actions = pattern
                    .remediation_hint
                    .clone()
                    .map(|h| vec![h])
                    .unwrap_or_default();
                (
                    format!(
                        "{} and {} move together (r={:.2}{lag_text}) for {}",
                        pattern.series_a, pattern.series_b, pattern.coefficient, cluster.service
                    ),
                    pattern.posterior,
                    actions,
                )
            }
            None => (
                format!("no meaningful cross-signal correlation for {}", cluster.service),
                0.2,
                Vec::new(),
            ),
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
    use std::time::Instant;
    use strands_adapters::kube::StaticCluster;
    use strands_adapters::metrics_source::StaticMetricsSource;
    use strands_core::config::AnalysisConfig;
    use strands_core::types::Clock;
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

    fn ctx() -> InvestigationContext {
        InvestigationContext::new(Instant::now() + Duration::from_secs(30), Clock::Wall)
    }

    fn range_of(values: Vec<f64>) -> MetricRange {
        let base = Utc::now() - ChronoDuration::minutes(30);
        MetricRange {
            timestamps: (0..values.len())
                .map(|i| base + ChronoDuration::seconds(i as i64 * 60))
                .collect(),
            values,
        }
    }

    fn specialist(source: Arc<StaticMetricsSource>) -> CorrelatorSpecialist {
        CorrelatorSpecialist::new(
            source,
            Arc::new(StaticCluster::new()),
            CorrelationAnalyzer::new(&AnalysisConfig::default()),
        )
    }

    #[tokio::test]
    async fn correlated_cpu_latency_is_reported() {
        let source = Arc::new(StaticMetricsSource::new());
        let cpu: Vec<f64> = (0..30).map(|i| (i as f64 * 0.3).sin() + 2.0).collect();
        let latency: Vec<f64> = cpu.iter().map(|v| v * 3.0 + 1.0).collect();
        source.insert_range(
            "rate(container_cpu_usage_seconds_total{service=\"checkout\"}[5m])",
            range_of(cpu),
        );
        source.insert_range(
            "histogram_quantile(0.95, rate(http_request_duration_seconds_bucket{service=\"checkout\"}[5m]))",
            range_of(latency),
        );

        let result = specialist(source)
            .investigate(&cluster(), &ctx())
            .await
            .unwrap();

        assert!(result.status.is_success());
        assert!(result.hypothesis.contains("cpu"));
        assert!(result.hypothesis.contains("latency_p95"));
        assert!(result.confidence > 0.7);
        assert!(result
            .suggested_actions
            .iter()
            .any(|a| a.contains("scale")));
    }

    #[tokio::test]
    async fn no_series_means_no_correlation_claim() {
        let source = Arc::new(StaticMetricsSource::new());
        let result = specialist(source)
            .investigate(&cluster(), &ctx())
            .await
            .unwrap();
        assert!(result.hypothesis.contains("no meaningful"));
        assert!(result.confidence <= 0.2);
    }
}
