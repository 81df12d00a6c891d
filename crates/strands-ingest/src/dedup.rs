//! Fingerprint deduplication within a sliding window.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Drops repeat fingerprints seen within the configured window and keeps a
/// duplicate count for diagnostics.
#[derive(Debug)]
pub struct Deduplicator {
    window: Duration,
    last_seen: DashMap<String, DateTime<Utc>>,
    duplicates: AtomicU64,
}

impl Deduplicator {
    pub fn new(window_s: u64) -> Self {
        Self {
            window: Duration::seconds(window_s as i64),
            last_seen: DashMap::new(),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Whether an alert with this fingerprint should pass. Records the
    /// sighting either way.
    pub fn admit(&self, fingerprint: &str, at: DateTime<Utc>) -> bool {
        let mut fresh = true;
        if let Some(previous) = self.last_seen.get(fingerprint) {
            if at - *previous < self.window {
                fresh = false;
            }
        }
        if fresh {
            self.last_seen.insert(fingerprint.to_string(), at);
        } else {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("strands_alerts_deduplicated_total").increment(1);
            debug!(fingerprint, "duplicate alert dropped");
        }
        fresh
    }

    /// Drop window entries older than the window relative to `now`.
    pub fn evict_expired(&self, now: DateTime<Utc>) {
        self.last_seen.retain(|_, seen| now - *seen < self.window);
    }

    /// Total duplicates dropped since startup.
    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }
}
