//! Correlation pattern model produced by the analyzer.

use crate::model::swarm::EvidenceItem;
use serde::{Deserialize, Serialize};

/// Relationship class between two signal domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationType {
    LogMetric,
    MetricMetric,
    TraceEvent,
    Temporal,
    EventSequence,
}

impl std::fmt::Display for CorrelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LogMetric => "LOG_METRIC",
            Self::MetricMetric => "METRIC_METRIC",
            Self::TraceEvent => "TRACE_EVENT",
            Self::Temporal => "TEMPORAL",
            Self::EventSequence => "EVENT_SEQUENCE",
        };
        write!(f, "{s}")
    }
}

/// Statistical significance band from the two-sided t-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Significance {
    VerySignificant,
    Significant,
    Weak,
    NotSignificant,
}

impl Significance {
    /// Band for a p-value: p<0.01, p<0.05, p<0.10, else not significant.
    pub fn from_p_value(p: f64) -> Self {
        if p < 0.01 {
            Self::VerySignificant
        } else if p < 0.05 {
            Self::Significant
        } else if p < 0.10 {
            Self::Weak
        } else {
            Self::NotSignificant
        }
    }

    pub fn is_significant(&self) -> bool {
        !matches!(self, Self::NotSignificant)
    }
}

/// Correlation strength label derived from the Bayesian posterior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strength {
    VeryWeak,
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl Strength {
    /// Thresholds: ≥0.9 very strong, ≥0.7 strong, ≥0.5 moderate, ≥0.3 weak.
    pub fn from_posterior(posterior: f64) -> Self {
        if posterior >= 0.9 {
            Self::VeryStrong
        } else if posterior >= 0.7 {
            Self::Strong
        } else if posterior >= 0.5 {
            Self::Moderate
        } else if posterior >= 0.3 {
            Self::Weak
        } else {
            Self::VeryWeak
        }
    }
}

/// A detected statistical relationship between two signal series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPattern {
    pub correlation_type: CorrelationType,
    /// Identifier of the first series/domain.
    pub series_a: String,
    /// Identifier of the second series/domain.
    pub series_b: String,
    /// Pearson r at the chosen lag.
    pub coefficient: f64,
    /// Lag in samples at which `coefficient` was observed; positive means
    /// `series_b` trails `series_a`.
    pub lag_offset: i64,
    /// Number of aligned samples the statistic was computed over.
    pub sample_count: usize,
    pub p_value: f64,
    pub significance: Significance,
    /// Posterior probability that the correlation is real.
    pub posterior: f64,
    pub strength: Strength,
    /// More than 5% of either series flagged as |z| > 3.
    #[serde(default)]
    pub noisy: bool,
    /// Set when the input was unusable (constant series, too few samples).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degenerate_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<EvidenceItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_hint: Option<String>,
}

impl CorrelationPattern {
    /// Degenerate pattern: posterior pinned to 0 and strength to very weak.
    pub fn degenerate(
        correlation_type: CorrelationType,
        series_a: impl Into<String>,
        series_b: impl Into<String>,
        sample_count: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            correlation_type,
            series_a: series_a.into(),
            series_b: series_b.into(),
            coefficient: 0.0,
            lag_offset: 0,
            sample_count,
            p_value: 1.0,
            significance: Significance::NotSignificant,
            posterior: 0.0,
            strength: Strength::VeryWeak,
            noisy: false,
            degenerate_reason: Some(reason.into()),
            evidence: Vec::new(),
            remediation_hint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn significance_bands() {
        assert_eq!(Significance::from_p_value(0.005), Significance::VerySignificant);
        assert_eq!(Significance::from_p_value(0.03), Significance::Significant);
        assert_eq!(Significance::from_p_value(0.08), Significance::Weak);
        assert_eq!(Significance::from_p_value(0.5), Significance::NotSignificant);
    }

    #[test]
    fn strength_thresholds() {
        assert_eq!(Strength::from_posterior(0.95), Strength::VeryStrong);
        assert_eq!(Strength::from_posterior(0.9), Strength::VeryStrong);
        assert_eq!(Strength::from_posterior(0.7), Strength::Strong);
        assert_eq!(Strength::from_posterior(0.5), Strength::Moderate);
        assert_eq!(Strength::from_posterior(0.3), Strength::Weak);
        assert_eq!(Strength::from_posterior(0.29), Strength::VeryWeak);
    }

    #[test]
    fn degenerate_pattern_is_pinned() {
        let p = CorrelationPattern::degenerate(
            CorrelationType::MetricMetric,
            "cpu",
            "latency",
            8,
            "degenerate-series",
        );
        assert_eq!(p.posterior, 0.0);
        assert_eq!(p.strength, Strength::VeryWeak);
        assert_eq!(p.degenerate_reason.as_deref(), Some("degenerate-series"));
    }
}
