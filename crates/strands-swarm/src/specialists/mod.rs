//! The registered specialists.

pub mod correlator;
pub mod embedding_similarity;
pub mod graph_context;
pub mod log_inspector;
pub mod metrics_analyst;

pub use correlator::CorrelatorSpecialist;
pub use embedding_similarity::EmbeddingSimilaritySpecialist;
pub use graph_context::GraphContextSpecialist;
pub use log_inspector::LogInspectorSpecialist;
pub use metrics_analyst::MetricsAnalystSpecialist;
