//! # Strands Adapters
//!
//! Narrow contracts to the external collaborators the core consumes:
//! metrics time-series source, cluster introspection, graph store, vector
//! store and text generator. Every remote implementation routes its calls
//! through a [`strands_core::resilience::ResilienceContext`]; these adapters
//! are the only suspension points in the core.
//!
//! Each contract ships an HTTP implementation and an in-memory
//! implementation. The in-memory variants back tests, replay and dry runs.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod generator;
pub mod graph;
pub mod kube;
pub mod metrics_source;
pub mod vector;

/// Re-export of commonly used contracts and types.
pub mod prelude {
    pub use crate::generator::{GenerationOptions, HttpTextGenerator, StaticGenerator, TextGenerator};
    pub use crate::graph::{GraphStore, HttpGraphStore, MemoryGraphStore, NodeProps};
    pub use crate::kube::{ClusterEvent, ClusterIntrospection, PodInfo, StaticCluster};
    pub use crate::metrics_source::{
        MetricPoint, MetricRange, MetricsSource, PrometheusSource, StaticMetricsSource,
    };
    pub use crate::vector::{HttpVectorStore, MemoryVectorStore, SearchHit, VectorStore};
}
