//! CVD Simulator Core - Rust Engine
//!
//! Risk-adjusted multi-state disease simulator with deterministic execution.
//!
//! # Architecture
//!
//! - **core**: Time management (discrete steps, year fractions)
//! - **models**: Domain types (Cause, Simulant, RiskFactor, Event)
//! - **rates**: Rate resolution from age/sex/year lookup tables
//! - **risks**: Risk-effect adjustment, mediation, correlated exposures
//! - **disease**: Per-simulant disease state machine
//! - **paf**: Population-attributable-fraction aggregation
//! - **orchestrator**: Per-draw simulation loop and batch draw orchestration
//! - **rng**: Keyed deterministic random number generation
//!
//! # Critical Invariants
//!
//! 1. All randomness is keyed (seed, location, draw, simulant, label, step)
//!    so results are independent of scheduling order
//! 2. Re-running the same (seed, location, draw) reproduces bit-identical
//!    trajectories and PAF outputs
//! 3. Artifact writes are atomic (write-to-temp, rename-on-success)

// Module declarations
pub mod core;
pub mod disease;
pub mod models;
pub mod orchestrator;
pub mod paf;
pub mod rates;
pub mod risks;
pub mod rng;

// Re-exports for convenience
pub use core::time::SimClock;
pub use disease::{rate_to_probability, DiseaseStateMachine, TransitionError};
pub use models::{
    cause::{Cause, CauseType, ConfigurationError, StateDef, TransitionData, TransitionDef},
    event::{Event, EventLog},
    risk::{
        Exposure, ExposureDistribution, Mediation, RateTarget, RelativeRisk, RiskEffect,
        RiskFactor, RiskKind,
    },
    simulant::{PersonState, Sex, Simulant},
};
pub use orchestrator::{
    ArtifactStore, BatchScheduler, DrawOrchestrator, DrawResult, InProcessScheduler, JobId,
    JobSpec, JobStatus, LocationReport, Orchestrator, ResourceRequest, SimulationConfig,
    SimulationError,
};
pub use paf::{joint_paf, paf_from_mean_relative_risk, JointPafRecord, PafRecord, Stratifier};
pub use rates::{DemographicKey, Interpolation, RateError, RateResolver, RateTable, TableRow};
pub use risks::{CorrelationGroup, CorrelationSampler, ExposureVector, RiskEffectEngine, RiskError};
pub use rng::{DrawKey, Xorshift64Star};
