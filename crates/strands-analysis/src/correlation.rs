//! Pearson correlation with lag detection over aligned time series.
//!
//! Pipeline: align by timestamp intersection with pairwise NaN drop, optional
//! detrend and z-score normalisation, lag search over `[-max_lag, +max_lag]`,
//! two-sided t-test, Bayesian posterior, anomaly flagging. Sums are Neumaier-
//! compensated so long series stay deterministic regardless of upstream
//! thread ordering.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Instant;
use strands_core::config::AnalysisConfig;
use strands_core::model::correlation::{
    CorrelationPattern, CorrelationType, Significance, Strength,
};
use strands_core::stats::{self, NeumaierSum};
use tracing::{debug, warn};

/// A named series of timestamped samples.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeries {
    pub id: String,
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(id: impl Into<String>, timestamps: Vec<DateTime<Utc>>, values: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            timestamps,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Cleaning options applied before the lag search.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
    /// Remove the least-squares linear fit from each series.
    pub detrend: bool,
    /// Z-score normalise each series.
    pub normalize: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            detrend: false,
            normalize: true,
        }
    }
}

/// Share of |z| > 3 samples above which a series is considered noisy.
const NOISY_RATIO: f64 = 0.05;

/// Correlation analyzer parameterised by the analysis config.
#[derive(Debug, Clone)]
pub struct CorrelationAnalyzer {
    min_sample_size: usize,
    max_lag: i64,
    prior: f64,
    budget_ms: u64,
}

impl CorrelationAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            min_sample_size: config.min_sample_size,
            max_lag: config.max_lag,
            prior: config.prior,
            budget_ms: config.correlation_budget_ms,
        }
    }

    /// Analyze the relationship between two series.
    pub fn analyze(
        &self,
        correlation_type: CorrelationType,
        a: &TimeSeries,
        b: &TimeSeries,
        options: AnalyzeOptions,
    ) -> CorrelationPattern {
        let started = Instant::now();
        let pattern = self.analyze_inner(correlation_type, a, b, options);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.budget_ms {
            warn!(
                series_a = %a.id,
                series_b = %b.id,
                elapsed_ms,
                budget_ms = self.budget_ms,
                "correlation exceeded soft budget"
            );
        }
        pattern
    }

    fn analyze_inner(
        &self,
        correlation_type: CorrelationType,
        a: &TimeSeries,
        b: &TimeSeries,
        options: AnalyzeOptions,
    ) -> CorrelationPattern {
        // Align on the timestamp intersection, dropping NaN pairs.
        let (mut xs, mut ys) = align(a, b);
        if xs.len() < self.min_sample_size {
            return CorrelationPattern::degenerate(
                correlation_type,
                &a.id,
                &b.id,
                xs.len(),
                "degenerate-series",
            );
        }

        if options.detrend {
            detrend(&mut xs);
            detrend(&mut ys);
        }
        if options.normalize {
            if !normalize(&mut xs) || !normalize(&mut ys) {
                return CorrelationPattern::degenerate(
                    correlation_type,
                    &a.id,
                    &b.id,
                    xs.len(),
                    "degenerate-series",
                );
            }
        }

        let Some(best) = self.find_best_lag(&xs, &ys) else {
            return CorrelationPattern::degenerate(
                correlation_type,
                &a.id,
                &b.id,
                xs.len(),
                "degenerate-series",
            );
        };

        let n = best.sample_count;
        let p_value = p_value_for(best.coefficient, n);
        let significance = Significance::from_p_value(p_value);
        let posterior = self.posterior(p_value);
        let strength = Strength::from_posterior(posterior);

        let noisy = noisy_ratio(&xs) > NOISY_RATIO || noisy_ratio(&ys) > NOISY_RATIO;

        debug!(
            series_a = %a.id,
            series_b = %b.id,
            r = best.coefficient,
            lag = best.lag,
            p_value,
            posterior,
            "correlation analyzed"
        );

        CorrelationPattern {
            correlation_type,
            series_a: a.id.clone(),
            series_b: b.id.clone(),
            coefficient: best.coefficient,
            lag_offset: best.lag,
            sample_count: n,
            p_value,
            significance,
            posterior,
            strength,
            noisy,
            degenerate_reason: None,
            evidence: Vec::new(),
            remediation_hint: None,
        }
    }

    /// Search `[-max_lag, +max_lag]` for the lag with maximum |r|.
    ///
    /// Lags are visited in order 0, +1, -1, +2, -2, … with a strict
    /// improvement test, which encodes the tie-break: smallest |lag| first,
    /// then positive over negative. Positive lag means `b` trails `a`.
    fn find_best_lag(&self, xs: &[f64], ys: &[f64]) -> Option<BestLag> {
        let mut best: Option<BestLag> = None;
        for lag in lag_order(self.max_lag) {
            let (ax, by) = shift(xs, ys, lag);
            if ax.len() < self.min_sample_size {
                continue;
            }
            let Some(r) = pearson(ax, by) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some(current) => r.abs() > current.coefficient.abs(),
            };
            if better {
                best = Some(BestLag {
                    lag,
                    coefficient: r,
                    sample_count: ax.len(),
                });
            }
        }
        best
    }

    /// Posterior probability that the correlation is real, by Bayes' rule.
    ///
    /// Likelihood given real: 0.95 if p < 0.05 else 0.40; given spurious:
    /// 0.05 if p < 0.05 else 0.60.
    fn posterior(&self, p_value: f64) -> f64 {
        let (likelihood_real, likelihood_spurious) = if p_value < 0.05 {
            (0.95, 0.05)
        } else {
            (0.40, 0.60)
        };
        let numerator = likelihood_real * self.prior;
        let denominator = numerator + likelihood_spurious * (1.0 - self.prior);
        if denominator == 0.0 {
            0.0
        } else {
            (numerator / denominator).clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BestLag {
    lag: i64,
    coefficient: f64,
    sample_count: usize,
}

/// Intersect timestamps and drop pairs where either side is non-finite.
fn align(a: &TimeSeries, b: &TimeSeries) -> (Vec<f64>, Vec<f64>) {
    let b_index: HashMap<i64, f64> = b
        .timestamps
        .iter()
        .zip(&b.values)
        .map(|(ts, &v)| (ts.timestamp(), v))
        .collect();

    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (ts, &x) in a.timestamps.iter().zip(&a.values) {
        if let Some(&y) = b_index.get(&ts.timestamp()) {
            if x.is_finite() && y.is_finite() {
                xs.push(x);
                ys.push(y);
            }
        }
    }
    (xs, ys)
}

/// Subtract the least-squares linear fit in place.
fn detrend(values: &mut [f64]) {
    let Some((slope, _)) = stats::linear_trend(values) else {
        return;
    };
    let mean = stats::mean(values);
    let x_mean = (values.len() as f64 - 1.0) / 2.0;
    let intercept = mean - slope * x_mean;
    for (i, v) in values.iter_mut().enumerate() {
        *v -= intercept + slope * i as f64;
    }
}

/// Z-score normalise in place. Returns false for a constant series.
fn normalize(values: &mut [f64]) -> bool {
    let mean = stats::mean(values);
    let sd = stats::std_dev(values);
    if sd == 0.0 {
        return false;
    }
    for v in values.iter_mut() {
        *v = (*v - mean) / sd;
    }
    true
}

/// Lags in tie-break order: 0, +1, -1, +2, -2, …
fn lag_order(max_lag: i64) -> Vec<i64> {
    let mut order = vec![0];
    for l in 1..=max_lag {
        order.push(l);
        order.push(-l);
    }
    order
}

/// Slice the series for a given lag. Positive lag pairs `a[i]` with
/// `b[i + lag]`: `b` trails `a`.
fn shift<'a>(xs: &'a [f64], ys: &'a [f64], lag: i64) -> (&'a [f64], &'a [f64]) {
    let n = xs.len();
    if lag >= 0 {
        let l = lag as usize;
        if l >= n {
            (&[], &[])
        } else {
            (&xs[..n - l], &ys[l..])
        }
    } else {
        let l = (-lag) as usize;
        if l >= n {
            (&[], &[])
        } else {
            (&xs[l..], &ys[..n - l])
        }
    }
}

/// Pearson r with compensated sums. None for degenerate input.
fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    if n < 2 || n != ys.len() {
        return None;
    }
    let mx = stats::mean(xs);
    let my = stats::mean(ys);

    let mut sxy = NeumaierSum::new();
    let mut sxx = NeumaierSum::new();
    let mut syy = NeumaierSum::new();
    for (&x, &y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        sxy.add(dx * dy);
        sxx.add(dx * dx);
        syy.add(dy * dy);
    }
    let denominator = (sxx.value() * syy.value()).sqrt();
    if denominator == 0.0 {
        return None;
    }
    Some((sxy.value() / denominator).clamp(-1.0, 1.0))
}

/// Two-sided p-value from the t-statistic `r * sqrt((n-2) / (1-r^2))`.
fn p_value_for(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let r2 = r * r;
    if (1.0 - r2) < f64::EPSILON {
        return 0.0;
    }
    let t = r * (df / (1.0 - r2)).sqrt();
    stats::students_t_p_value(t, df)
}

/// Share of samples with |z| > 3 after normalisation.
fn noisy_ratio(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = stats::mean(values);
    let sd = stats::std_dev(values);
    if sd == 0.0 {
        return 0.0;
    }
    let anomalies = values
        .iter()
        .filter(|&&v| stats::zscore(v, m, sd).abs() > 3.0)
        .count();
    anomalies as f64 / values.len() as f64
}
