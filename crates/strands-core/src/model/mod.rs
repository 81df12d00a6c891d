//! Domain model shared across the pipeline.
//!
//! Types here are semantic containers only; the algorithms that produce and
//! consume them live in the component crates.

pub mod alert;
pub mod correlation;
pub mod decision;
pub mod playbook;
pub mod replay;
pub mod swarm;
