//! Confidence aggregation strategies.
//!
//! Each variant implements `aggregate(scores) -> score` over
//! `(specialist_id, score)` pairs. The decision engine composes the
//! `Weighted` variant for fusion and `Consensus` for the policy gate.

use strands_core::config::WeightMatrix;

/// How a set of per-specialist scores collapses into one number.
#[derive(Debug, Clone)]
pub enum ConfidenceStrategy {
    /// Arithmetic mean.
    Average,
    /// Mean weighted by the configured weight matrix.
    Weighted(WeightMatrix),
    /// Most pessimistic score.
    Minimum,
    /// Most optimistic score.
    Maximum,
    /// Share of specialists within `band` of the leader.
    Consensus { band: f64 },
}

impl ConfidenceStrategy {
    /// Aggregate `(specialist_id, score)` pairs. Empty input yields 0.
    pub fn aggregate(&self, scores: &[(&str, f64)]) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        match self {
            Self::Average => {
                scores.iter().map(|(_, s)| s).sum::<f64>() / scores.len() as f64
            }
            Self::Weighted(weights) => {
                let mut numerator = 0.0;
                let mut denominator = 0.0;
                for (id, score) in scores {
                    let w = weights.weight_for(id);
                    numerator += w * score;
                    denominator += w;
                }
                if denominator == 0.0 {
                    0.0
                } else {
                    numerator / denominator
                }
            }
            Self::Minimum => scores
                .iter()
                .map(|(_, s)| *s)
                .fold(f64::INFINITY, f64::min),
            Self::Maximum => scores
                .iter()
                .map(|(_, s)| *s)
                .fold(f64::NEG_INFINITY, f64::max),
            Self::Consensus { band } => {
                let leader = scores
                    .iter()
                    .map(|(_, s)| *s)
                    .fold(f64::NEG_INFINITY, f64::max);
                let agreeing = scores
                    .iter()
                    .filter(|(_, s)| (leader - s).abs() <= *band)
                    .count();
                agreeing as f64 / scores.len() as f64
            }
        }
    }
}
