//! Orchestrator - per-draw simulation loop and batch draw orchestration
//!
//! `engine` runs one (location, draw) realization end to end; `artifact`
//! persists per-draw outputs atomically into a versioned per-location
//! store; `jobs` drives the (location × draw) Cartesian product to
//! completion against a batch scheduler, with restart of missing draws.

pub mod artifact;
pub mod engine;
pub mod jobs;

// Re-export main types for convenience
pub use artifact::{compute_config_hash, ArtifactStore};
pub use engine::{DrawResult, MeanRrObservation, Orchestrator, SimulationConfig, SimulationError};
pub use jobs::{
    BatchScheduler, DrawOrchestrator, InProcessScheduler, JobId, JobSpec, JobStatus,
    LocationReport, ResourceRequest,
};
