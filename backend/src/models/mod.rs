//! Domain types for the disease simulation.
//!
//! - **cause**: Cause/State/Transition graph (immutable after load)
//! - **simulant**: Per-person demographic and disease-occupancy records
//! - **risk**: Risk factors, exposures, and risk-effect bindings
//! - **event**: Structured event log for orchestration diagnostics

pub mod cause;
pub mod event;
pub mod risk;
pub mod simulant;

pub use cause::{Cause, CauseType, ConfigurationError, StateDef, TransitionData, TransitionDef};
pub use event::{Event, EventLog};
pub use risk::{
    Exposure, ExposureDistribution, Mediation, RateTarget, RelativeRisk, RiskEffect, RiskFactor,
    RiskKind,
};
pub use simulant::{PersonState, Sex, Simulant};
