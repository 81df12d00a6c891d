//! Numerically stable statistics used by the correlation analyzer, the
//! metrics specialist and the playbook execution counters.
//!
//! Summation is compensated (Neumaier) so that reductions stay deterministic
//! for long series regardless of accumulation order upstream; incremental
//! mean/variance uses Welford's recurrence.

/// Neumaier-compensated running sum.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeumaierSum {
    sum: f64,
    compensation: f64,
}

impl NeumaierSum {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one term.
    pub fn add(&mut self, value: f64) {
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - t) + value;
        } else {
            self.compensation += (value - t) + self.sum;
        }
        self.sum = t;
    }

    /// Compensated total.
    pub fn value(&self) -> f64 {
        self.sum + self.compensation
    }
}

/// Welford incremental mean/variance accumulator.
///
/// `m2` accumulates the sum of squared deviations; sample variance is
/// `m2 / (n - 1)` for `n >= 2`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Welford {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
}

impl Welford {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted components.
    pub fn from_parts(count: u64, mean: f64, m2: f64) -> Self {
        Self { count, mean, m2 }
    }

    /// Fold in one observation.
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Sample variance; 0 below two observations.
    pub fn variance(&self) -> f64 {
        if self.count >= 2 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        }
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Compensated arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut acc = NeumaierSum::new();
    for &v in values {
        acc.add(v);
    }
    acc.value() / values.len() as f64
}

/// Population standard deviation; NaN for fewer than one value.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let mut acc = NeumaierSum::new();
    for &v in values {
        let d = v - m;
        acc.add(d * d);
    }
    (acc.value() / values.len() as f64).sqrt()
}

/// Z-score of `value` relative to `mean`/`std_dev`; 0 when the deviation is 0.
pub fn zscore(value: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev == 0.0 {
        0.0
    } else {
        (value - mean) / std_dev
    }
}

/// Percentile by linear interpolation over a copy of `values`.
/// `p` is in [0, 100]. NaN for an empty slice.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Split a series into values at-or-below the p95 threshold and the outliers
/// above it. Series shorter than 5 points are returned unfiltered.
pub fn filter_outliers_p95(values: &[f64]) -> (Vec<f64>, Vec<f64>) {
    if values.len() < 5 {
        return (values.to_vec(), Vec::new());
    }
    let threshold = percentile(values, 95.0);
    let mut kept = Vec::with_capacity(values.len());
    let mut outliers = Vec::new();
    for &v in values {
        if v <= threshold {
            kept.push(v);
        } else {
            outliers.push(v);
        }
    }
    (kept, outliers)
}

/// Least-squares linear trend over an evenly spaced series.
///
/// Returns `(slope, r_squared)`. Requires at least two points.
pub fn linear_trend(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = mean(values);

    let mut sxy = NeumaierSum::new();
    let mut sxx = NeumaierSum::new();
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy.add(dx * (y - y_mean));
        sxx.add(dx * dx);
    }
    if sxx.value() == 0.0 {
        return None;
    }
    let slope = sxy.value() / sxx.value();
    let intercept = y_mean - slope * x_mean;

    let mut ss_res = NeumaierSum::new();
    let mut ss_tot = NeumaierSum::new();
    for (i, &y) in values.iter().enumerate() {
        let predicted = intercept + slope * i as f64;
        let r = y - predicted;
        let t = y - y_mean;
        ss_res.add(r * r);
        ss_tot.add(t * t);
    }
    let r_squared = if ss_tot.value() > 0.0 {
        1.0 - ss_res.value() / ss_tot.value()
    } else {
        0.0
    };
    Some((slope, r_squared))
}

/// Coefficient of variation (`std_dev / |mean|`); infinite when the mean is 0
/// but the series is not constant.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sd = std_dev(values);
    if m == 0.0 {
        if sd == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        sd / m.abs()
    }
}

/// Two-sided p-value of a Student-t statistic with `df` degrees of freedom,
/// via the regularized incomplete beta function.
pub fn students_t_p_value(t: f64, df: f64) -> f64 {
    if !t.is_finite() || df <= 0.0 {
        return 1.0;
    }
    let x = df / (df + t * t);
    incomplete_beta(df / 2.0, 0.5, x).clamp(0.0, 1.0)
}

/// Regularized incomplete beta function `I_x(a, b)` by continued fraction.
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front =
        ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    // Continued fraction converges quickly for x < (a+1)/(a+b+2); use the
    // symmetry relation otherwise.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_cf(a, b, x) / a
    } else {
        1.0 - incomplete_beta(b, a, 1.0 - x)
    }
}

/// Lentz continued-fraction evaluation for the incomplete beta.
fn beta_cf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3.0e-14;
    const TINY: f64 = 1.0e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation of `ln(Gamma(x))` for `x > 0`.
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000000000190015;
    for c in COEFFS {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_arithmetic_mean() {
        let values = [10.0, 12.0, 15.0, 11.0, 14.0];
        let mut w = Welford::new();
        for v in values {
            w.push(v);
        }
        assert_eq!(w.count, 5);
        assert!((w.mean - 12.4).abs() < 1e-12);
        assert!((w.variance() - 4.3).abs() < 1e-12);
    }

    #[test]
    fn welford_large_sample_relative_error() {
        // Invariant 3: mean equals the arithmetic mean within 1e-9 relative
        // error over 1e5 samples. Deterministic LCG avoids a rand dependency
        // in the accumulator test.
        let mut state: u64 = 0x2545F4914F6CDD1D;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f64 / (1u64 << 31) as f64) * 100.0 + 1.0
        };
        let samples: Vec<f64> = (0..100_000).map(|_| next()).collect();

        let mut w = Welford::new();
        let mut sum = NeumaierSum::new();
        for &s in &samples {
            w.push(s);
            sum.add(s);
        }
        let arithmetic = sum.value() / samples.len() as f64;
        let rel = ((w.mean - arithmetic) / arithmetic).abs();
        assert!(rel < 1e-9, "relative error {rel} too large");
    }

    #[test]
    fn neumaier_keeps_small_terms() {
        let mut acc = NeumaierSum::new();
        acc.add(1.0);
        acc.add(1e100);
        acc.add(1.0);
        acc.add(-1e100);
        assert_eq!(acc.value(), 2.0);
    }

    #[test]
    fn p95_filter_removes_spikes() {
        let mut data: Vec<f64> = (0..19).map(|i| i as f64).collect();
        data.push(1000.0);
        let (kept, outliers) = filter_outliers_p95(&data);
        assert_eq!(outliers, vec![1000.0]);
        assert_eq!(kept.len(), 19);
    }

    #[test]
    fn linear_trend_recovers_slope() {
        let values: Vec<f64> = (0..50).map(|i| 3.0 * i as f64 + 7.0).collect();
        let (slope, r2) = linear_trend(&values).unwrap();
        assert!((slope - 3.0).abs() < 1e-9);
        assert!((r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn t_distribution_tail() {
        // Known reference values: t=2.086, df=20 -> p ~= 0.05.
        let p = students_t_p_value(2.086, 20.0);
        assert!((p - 0.05).abs() < 0.002, "p = {p}");
        // Large |t| drives p toward 0.
        assert!(students_t_p_value(10.0, 20.0) < 1e-6);
        // t = 0 is maximally insignificant.
        assert!((students_t_p_value(0.0, 20.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cv_of_constant_series_is_zero() {
        assert_eq!(coefficient_of_variation(&[5.0, 5.0, 5.0]), 0.0);
    }
}
