//! The specialist contract.
//!
//! A specialist is a value implementing a small capability set: collect
//! signals from its domain through guarded adapters, analyze them, and emit
//! one [`SpecialistResult`] with supporting evidence. Specialists never talk
//! to each other; the orchestrator is the only coordinator.

use async_trait::async_trait;
use std::time::Instant;
use strands_core::error::Result;
use strands_core::model::alert::AlertCluster;
use strands_core::model::swarm::SpecialistResult;
use strands_core::types::Clock;

/// Shared per-investigation context handed to every specialist.
#[derive(Debug, Clone, Copy)]
pub struct InvestigationContext {
    /// Cooperative deadline propagated from the controller tick.
    pub deadline: Instant,
    /// Time source; pinned during replay.
    pub clock: Clock,
}

impl InvestigationContext {
    pub fn new(deadline: Instant, clock: Clock) -> Self {
        Self { deadline, clock }
    }

    /// Whether the shared deadline has already passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// One analysis unit focused on a single signal domain.
#[async_trait]
pub trait Specialist: Send + Sync + std::fmt::Debug {
    /// Stable identifier; also the key into the fusion weight matrix.
    fn id(&self) -> &'static str;

    /// Investigate the cluster. Adapter failures should propagate as errors;
    /// the orchestrator converts them into an `ERROR` result for this
    /// specialist without failing the swarm.
    async fn investigate(
        &self,
        cluster: &AlertCluster,
        ctx: &InvestigationContext,
    ) -> Result<SpecialistResult>;
}
