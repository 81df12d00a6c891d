//! Temporal correlation over event sequences.
//!
//! Scans an ordered sequence of timestamped events for monotonic chains:
//! runs of events where each member follows the previous one within a fixed
//! sliding window. One pattern is emitted per chain.

use chrono::{DateTime, Duration, Utc};
use strands_core::model::correlation::{
    CorrelationPattern, CorrelationType, Significance, Strength,
};
use tracing::debug;

/// One event in a sequence under temporal analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub timestamp: DateTime<Utc>,
    /// Short label (event reason, log class, alert name).
    pub label: String,
    pub source: String,
}

/// Detects monotonic chains of events within a sliding window.
#[derive(Debug, Clone)]
pub struct ChainDetector {
    /// Maximum gap between consecutive chain members.
    window: Duration,
    /// Minimum events per reported chain.
    min_chain_len: usize,
}

impl Default for ChainDetector {
    fn default() -> Self {
        Self {
            window: Duration::seconds(120),
            min_chain_len: 3,
        }
    }
}

impl ChainDetector {
    pub fn new(window: Duration, min_chain_len: usize) -> Self {
        Self {
            window,
            min_chain_len: min_chain_len.max(2),
        }
    }

    /// Find chains and emit one pattern per chain.
    ///
    /// The posterior grows with chain length (`len / (len + 2)`); a chain of
    /// three events grades moderate, long cascades grade strong.
    pub fn detect(&self, events: &[TimedEvent]) -> Vec<CorrelationPattern> {
        if events.len() < self.min_chain_len {
            return Vec::new();
        }
        let mut sorted: Vec<&TimedEvent> = events.iter().collect();
        sorted.sort_by_key(|e| e.timestamp);

        let mut patterns = Vec::new();
        let mut chain: Vec<&TimedEvent> = vec![sorted[0]];
        for event in &sorted[1..] {
            let previous = chain.last().expect("chain is never empty");
            if event.timestamp - previous.timestamp <= self.window {
                chain.push(event);
            } else {
                self.flush(&chain, &mut patterns);
                chain = vec![event];
            }
        }
        self.flush(&chain, &mut patterns);
        patterns
    }

    fn flush(&self, chain: &[&TimedEvent], patterns: &mut Vec<CorrelationPattern>) {
        if chain.len() < self.min_chain_len {
            return;
        }
        let first = chain.first().expect("non-empty chain");
        let last = chain.last().expect("non-empty chain");
        let posterior = chain.len() as f64 / (chain.len() as f64 + 2.0);
        debug!(
            from = %first.label,
            to = %last.label,
            length = chain.len(),
            "temporal chain detected"
        );
        patterns.push(CorrelationPattern {
            correlation_type: CorrelationType::EventSequence,
            series_a: first.label.clone(),
            series_b: last.label.clone(),
            coefficient: 1.0,
            lag_offset: (last.timestamp - first.timestamp).num_seconds(),
            sample_count: chain.len(),
            p_value: 1.0 - posterior,
            significance: Significance::from_p_value(1.0 - posterior),
            posterior,
            strength: Strength::from_posterior(posterior),
            noisy: false,
            degenerate_reason: None,
            evidence: Vec::new(),
            remediation_hint: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(offset_s: i64, label: &str) -> TimedEvent {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        TimedEvent {
            timestamp: base + Duration::seconds(offset_s),
            label: label.into(),
            source: "events".into(),
        }
    }

    #[test]
    fn contiguous_events_form_one_chain() {
        let detector = ChainDetector::default();
        let events = vec![
            event(0, "OOMKilled"),
            event(30, "BackOff"),
            event(70, "Unhealthy"),
            event(110, "Killing"),
        ];
        let patterns = detector.detect(&events);
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.sample_count, 4);
        assert_eq!(p.series_a, "OOMKilled");
        assert_eq!(p.series_b, "Killing");
        assert_eq!(p.correlation_type, CorrelationType::EventSequence);
    }

    #[test]
    fn gaps_split_chains() {
        let detector = ChainDetector::default();
        let events = vec![
            event(0, "a"),
            event(30, "b"),
            event(60, "c"),
            // 10-minute gap.
            event(660, "d"),
            event(690, "e"),
            event(720, "f"),
        ];
        let patterns = detector.detect(&events);
        assert_eq!(patterns.len(), 2);
    }

    #[test]
    fn short_runs_are_not_reported() {
        let detector = ChainDetector::default();
        let events = vec![event(0, "a"), event(30, "b")];
        assert!(detector.detect(&events).is_empty());
    }

    #[test]
    fn unsorted_input_is_handled() {
        let detector = ChainDetector::default();
        let events = vec![event(70, "c"), event(0, "a"), event(30, "b")];
        let patterns = detector.detect(&events);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].series_a, "a");
        assert_eq!(patterns[0].series_b, "c");
    }

    #[test]
    fn longer_chains_grade_stronger() {
        let detector = ChainDetector::default();
        let short: Vec<TimedEvent> = (0..3).map(|i| event(i * 10, "x")).collect();
        let long: Vec<TimedEvent> = (0..12).map(|i| event(i * 10, "x")).collect();
        let p_short = &detector.detect(&short)[0];
        let p_long = &detector.detect(&long)[0];
        assert!(p_long.posterior > p_short.posterior);
    }
}
