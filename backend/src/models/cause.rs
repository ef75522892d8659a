//! Cause model: states and transitions
//!
//! A `Cause` owns a set of disease states and the transitions between them,
//! represented as an explicit graph of indices into a state table. Cycles
//! are valid and common (chronic ⇄ acute re-entry), so nothing here recurses
//! over the graph. The whole structure is fixed at configuration load and
//! immutable afterwards.
//!
//! # Critical Invariants
//!
//! 1. Every transition's source and sink index an existing state
//! 2. A state with a dwell time has exactly one dwell-time transition
//! 3. Self-transitions exist only where `allow_self_transition` is set
//! 4. Transient states cannot be dwelled in, so they must have an exit

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Index into a cause's state table.
pub type StateId = usize;

/// Configuration-time validation failure. Fatal at load, never retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("cause {cause}: transition references unknown state index {index}")]
    UnknownState { cause: String, index: usize },

    #[error("cause {cause}: state {state} has a dwell time but {count} dwell-time transitions")]
    BadDwellTransitions {
        cause: String,
        state: String,
        count: usize,
    },

    #[error("cause {cause}: self-transition on state {state} without allow_self_transition")]
    ForbiddenSelfTransition { cause: String, state: String },

    #[error("cause {cause}: transient state {state} has no outgoing transition")]
    DeadEndTransientState { cause: String, state: String },

    #[error("cause {cause}: entry state index {index} out of range")]
    BadEntryState { cause: String, index: usize },

    #[error("unknown risk factor referenced: {0}")]
    UnknownRiskReference(String),

    #[error("mediation cycle involving risk {0}")]
    MediationCycle(String),

    #[error("risk effect on {risk}: mediation weight {weight} outside [0, 1]")]
    InvalidMediationWeight { risk: String, weight: f64 },

    #[error("risk effect on {risk}: {reason}")]
    InvalidRiskEffect { risk: String, reason: String },

    #[error("correlation group {group}: {reason}")]
    BadCorrelationGroup { group: String, reason: String },
}

/// Whether a state models a full cause or a sequela of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseType {
    Cause,
    Sequela,
}

/// One disease state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDef {
    /// State identifier, unique within the cause (e.g. "acute_ischemic_stroke")
    pub name: String,

    pub cause_type: CauseType,

    /// Transient states cannot be dwelled in past the current step; entry
    /// splits resolve through them immediately
    pub transient: bool,

    pub allow_self_transition: bool,

    /// Fixed sojourn in days before the dwell-time transition fires
    pub dwell_time_days: Option<f64>,

    /// Optional overrides sourced from the data artifact
    pub disability_weight: Option<f64>,
    pub excess_mortality_rate: Option<f64>,
}

impl StateDef {
    /// A plain non-transient state with no dwell time or overrides.
    pub fn new(name: impl Into<String>, cause_type: CauseType) -> Self {
        Self {
            name: name.into(),
            cause_type,
            transient: false,
            allow_self_transition: true,
            dwell_time_days: None,
            disability_weight: None,
            excess_mortality_rate: None,
        }
    }

    pub fn with_dwell_time(mut self, days: f64) -> Self {
        self.dwell_time_days = Some(days);
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

/// Data source driving one transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionData {
    /// Hazard-rate transition; `table_key` names the external lookup table
    /// (incidence_rate, transition_rate, or remission_rate data)
    Rate { table_key: String },

    /// Forced transition after the source state's fixed sojourn
    DwellTime,

    /// Entry split: fraction of the incoming flow routed to this sink at
    /// the moment a simulant enters the source state
    Proportion { value: f64 },
}

/// One edge in the cause's transition graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDef {
    pub source: StateId,
    pub sink: StateId,
    pub data: TransitionData,
}

impl TransitionDef {
    pub fn rate(source: StateId, sink: StateId, table_key: impl Into<String>) -> Self {
        Self {
            source,
            sink,
            data: TransitionData::Rate {
                table_key: table_key.into(),
            },
        }
    }

    pub fn dwell_time(source: StateId, sink: StateId) -> Self {
        Self {
            source,
            sink,
            data: TransitionData::DwellTime,
        }
    }

    pub fn proportion(source: StateId, sink: StateId, value: f64) -> Self {
        Self {
            source,
            sink,
            data: TransitionData::Proportion { value },
        }
    }
}

/// A named disease with its state/transition graph.
///
/// # Example
///
/// ```
/// use cvd_simulator_core_rs::{Cause, CauseType, StateDef, TransitionDef};
///
/// let cause = Cause::new(
///     "ischemic_stroke",
///     vec![
///         StateDef::new("susceptible", CauseType::Cause),
///         StateDef::new("acute", CauseType::Sequela).with_dwell_time(28.0),
///         StateDef::new("chronic", CauseType::Sequela),
///     ],
///     vec![
///         TransitionDef::rate(0, 1, "ischemic_stroke.incidence_rate.acute"),
///         TransitionDef::dwell_time(1, 2),
///         // cyclic re-entry is valid
///         TransitionDef::rate(2, 1, "ischemic_stroke.incidence_rate.acute"),
///     ],
///     0,
/// )
/// .unwrap();
/// assert_eq!(cause.outgoing(0).len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cause {
    name: String,
    states: Vec<StateDef>,
    transitions: Vec<TransitionDef>,
    /// Per-state indices into `transitions`
    outgoing: Vec<Vec<usize>>,
    entry_state: StateId,
}

impl Cause {
    /// Build and validate a cause graph.
    pub fn new(
        name: impl Into<String>,
        states: Vec<StateDef>,
        transitions: Vec<TransitionDef>,
        entry_state: StateId,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();

        if entry_state >= states.len() {
            return Err(ConfigurationError::BadEntryState {
                cause: name,
                index: entry_state,
            });
        }

        let mut outgoing = vec![Vec::new(); states.len()];
        for (idx, transition) in transitions.iter().enumerate() {
            for endpoint in [transition.source, transition.sink] {
                if endpoint >= states.len() {
                    return Err(ConfigurationError::UnknownState {
                        cause: name,
                        index: endpoint,
                    });
                }
            }
            let source = &states[transition.source];
            if transition.source == transition.sink && !source.allow_self_transition {
                return Err(ConfigurationError::ForbiddenSelfTransition {
                    cause: name,
                    state: source.name.clone(),
                });
            }
            outgoing[transition.source].push(idx);
        }

        for (id, state) in states.iter().enumerate() {
            if state.dwell_time_days.is_some() {
                let dwell_count = outgoing[id]
                    .iter()
                    .filter(|t| matches!(transitions[**t].data, TransitionData::DwellTime))
                    .count();
                if dwell_count != 1 {
                    return Err(ConfigurationError::BadDwellTransitions {
                        cause: name,
                        state: state.name.clone(),
                        count: dwell_count,
                    });
                }
            }
            if state.transient && outgoing[id].is_empty() {
                return Err(ConfigurationError::DeadEndTransientState {
                    cause: name,
                    state: state.name.clone(),
                });
            }
        }

        Ok(Self {
            name,
            states,
            transitions,
            outgoing,
            entry_state,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_state(&self) -> StateId {
        self.entry_state
    }

    pub fn state(&self, id: StateId) -> &StateDef {
        &self.states[id]
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn transition(&self, idx: usize) -> &TransitionDef {
        &self.transitions[idx]
    }

    /// Indices of transitions leaving `state`.
    pub fn outgoing(&self, state: StateId) -> &[usize] {
        &self.outgoing[state]
    }

    /// Measure name for a transition, following the pipeline naming used by
    /// the rate tables: `{sink_state}.{table quantity}` falls out of the
    /// table key directly, so the table key doubles as the measure.
    pub fn transition_measure(&self, idx: usize) -> Option<&str> {
        match &self.transitions[idx].data {
            TransitionData::Rate { table_key } => Some(table_key),
            _ => None,
        }
    }
}
