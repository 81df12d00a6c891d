//! Priority-ordered alert collection.
//!
//! Providers are tried highest-priority first; the first successful poll
//! (including an explicit empty result) ends the cycle. A provider that
//! fails its resilience guard counts as unavailable. If every provider
//! fails, the cycle surfaces `NO_PROVIDER_AVAILABLE` and the controller
//! skips the tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strands_core::error::{Error, Result};
use strands_core::model::alert::RawAlert;
use tracing::{info, warn};

use crate::provider::AlertProvider;

/// Per-cycle collection outcome.
#[derive(Debug)]
pub struct CollectedAlerts {
    /// Provider that served this cycle.
    pub provider: String,
    pub alerts: Vec<RawAlert>,
}

/// Polls providers in priority order.
#[derive(Debug)]
pub struct AlertCollector {
    providers: Vec<Arc<dyn AlertProvider>>,
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
}

impl AlertCollector {
    pub fn new(mut providers: Vec<Arc<dyn AlertProvider>>) -> Self {
        providers.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self {
            providers,
            cycles: AtomicU64::new(0),
            failed_cycles: AtomicU64::new(0),
        }
    }

    /// Run one collection cycle.
    pub async fn collect(&self) -> Result<CollectedAlerts> {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if self.providers.is_empty() {
            self.failed_cycles.fetch_add(1, Ordering::Relaxed);
            return Err(Error::NoProviderAvailable);
        }

        for provider in &self.providers {
            match provider.list_active().await {
                Ok(alerts) => {
                    info!(
                        provider = provider.name(),
                        count = alerts.len(),
                        "alert poll succeeded"
                    );
                    metrics::counter!(
                        "strands_provider_polls_total",
                        "provider" => provider.name().to_string(),
                        "outcome" => "success"
                    )
                    .increment(1);
                    return Ok(CollectedAlerts {
                        provider: provider.name().to_string(),
                        alerts,
                    });
                }
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        error = %e,
                        "alert poll failed, trying next provider"
                    );
                    metrics::counter!(
                        "strands_provider_polls_total",
                        "provider" => provider.name().to_string(),
                        "outcome" => "failure"
                    )
                    .increment(1);
                }
            }
        }

        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
        Err(Error::NoProviderAvailable)
    }

    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }
}
