//! Disease state machine
//!
//! Drives per-simulant transitions through a cause's state graph each time
//! step:
//!
//! 1. If the current state has a dwell time and the simulant has occupied
//!    it for at least that long, the dwell-time transition fires
//!    deterministically (no competing-risk draw)
//! 2. Otherwise every rate-type outgoing transition is resolved, adjusted
//!    for the simulant's risk exposures, and converted to a per-step
//!    probability with `p = 1 - exp(-rate * dt)`; a single uniform per
//!    simulant per step selects at most one transition via competing-risk
//!    proportional allocation, with the remaining mass meaning "stay"
//! 3. Proportion-type transitions split the incoming flow at the moment a
//!    simulant enters their source state (entry splits through transient
//!    states), not per step
//!
//! All draws are keyed on (simulant id, cause, step), so trajectories are
//! reproducible and independent of simulant processing order.

use thiserror::Error;

use crate::models::cause::{Cause, StateId, TransitionData};
use crate::models::risk::RateTarget;
use crate::models::simulant::{PersonState, Simulant};
use crate::rates::{DemographicKey, RateError, RateResolver};
use crate::risks::{ExposureVector, RiskEffectEngine, RiskError};
use crate::rng::DrawKey;

/// State-machine logic error. Fatal; indicates a configuration
/// inconsistency, never retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransitionError {
    #[error("cause {cause}: self-transition attempted on state {state} without allow_self_transition")]
    InvalidTransition { cause: String, state: String },

    #[error("cause {cause}: entry split from state {state} did not settle")]
    UnresolvedEntrySplit { cause: String, state: String },

    #[error("cause {cause}: dwell state {state} has no dwell-time transition")]
    MissingDwellTransition { cause: String, state: String },

    #[error("cause {cause}: proportion transitions out of state {state} have non-positive total")]
    BadProportions { cause: String, state: String },
}

/// Any failure while advancing one simulant one step. Aborts the current
/// draw; other draws are unaffected.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error(transparent)]
    Rate(#[from] RateError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Convert a hazard rate over a step of `step_days` to a probability.
///
/// Standard exponential-hazard formula: `p = 1 - exp(-rate * dt)`.
/// Monotonically increasing in both arguments; 0 at rate 0.
pub fn rate_to_probability(rate: f64, step_days: f64) -> f64 {
    1.0 - (-rate * step_days).exp()
}

/// Read-only context for advancing simulants one step.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub resolver: &'a RateResolver,
    pub risks: &'a RiskEffectEngine,
    pub key: &'a DrawKey,
    pub step: usize,
    pub step_size_days: f64,
    /// Fractional calendar year for table lookups
    pub year: f64,
}

/// A realized state change for one simulant.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub simulant: u64,
    pub from: StateId,
    pub to: StateId,
    /// Table key of the rate transition taken; None for dwell-time moves
    pub measure: Option<String>,
}

/// Per-cause state machine. Holds the immutable cause graph; per-simulant
/// occupancy lives in `PersonState`, owned by the caller but only mutated
/// through [`DiseaseStateMachine::advance`].
#[derive(Debug, Clone)]
pub struct DiseaseStateMachine {
    cause: Cause,
}

impl DiseaseStateMachine {
    pub fn new(cause: Cause) -> Self {
        Self { cause }
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Occupancy record for a newly created simulant.
    pub fn initial_state(&self) -> PersonState {
        PersonState::new(self.cause.entry_state())
    }

    /// Advance one simulant one time step.
    ///
    /// Returns the realized transition, or None when the simulant stays.
    pub fn advance(
        &self,
        simulant: &Simulant,
        person: &mut PersonState,
        exposures: &ExposureVector,
        ctx: &StepContext<'_>,
    ) -> Result<Option<TransitionOutcome>, StepError> {
        let from = person.state;
        let state = self.cause.state(from);

        // Dwell-time transitions are deterministic and take precedence
        if let Some(dwell_days) = state.dwell_time_days {
            if person.occupancy_days(ctx.step, ctx.step_size_days) >= dwell_days {
                let sink = self
                    .cause
                    .outgoing(from)
                    .iter()
                    .find_map(|idx| {
                        let t = self.cause.transition(*idx);
                        matches!(t.data, TransitionData::DwellTime).then_some(t.sink)
                    })
                    .ok_or(TransitionError::MissingDwellTransition {
                        cause: self.cause.name().to_string(),
                        state: state.name.clone(),
                    })?;
                let settled = self.settle_entry(simulant, sink, ctx)?;
                person.enter(settled, ctx.step);
                return Ok(Some(TransitionOutcome {
                    simulant: simulant.id,
                    from,
                    to: settled,
                    measure: None,
                }));
            }
        }

        // Competing-risk selection across rate transitions
        let demographic = DemographicKey {
            age: simulant.age,
            sex: simulant.sex,
            year: ctx.year,
        };
        let mut candidates: Vec<(usize, f64)> = Vec::new();
        let mut total_rate = 0.0;
        for idx in self.cause.outgoing(from) {
            if let TransitionData::Rate { table_key } = &self.cause.transition(*idx).data {
                let base = ctx.resolver.resolve(table_key, &demographic)?;
                let target = RateTarget::new(self.cause.name(), table_key.clone());
                let adjusted = ctx.risks.adjust_rate(&target, base, exposures)?;
                if adjusted > 0.0 {
                    candidates.push((*idx, adjusted));
                    total_rate += adjusted;
                }
            }
        }
        if total_rate <= 0.0 {
            return Ok(None);
        }

        // One uniform per simulant per step; probability mass beyond
        // p_any means "stay"
        let label = format!("{}.transition", self.cause.name());
        let uniform = ctx.key.uniform(simulant.id, &label, ctx.step);
        let p_any = rate_to_probability(total_rate, ctx.step_size_days);
        if uniform >= p_any {
            return Ok(None);
        }

        // Allocate among candidates proportional to rate share, reusing
        // the same uniform rescaled into [0, total_rate)
        let scaled = uniform / p_any * total_rate;
        let mut cumulative = 0.0;
        let mut chosen = candidates[candidates.len() - 1].0;
        for (idx, rate) in &candidates {
            cumulative += rate;
            if scaled < cumulative {
                chosen = *idx;
                break;
            }
        }

        let transition = self.cause.transition(chosen);
        let measure = self.cause.transition_measure(chosen).map(str::to_string);
        let settled = self.settle_entry(simulant, transition.sink, ctx)?;
        if settled == from && !state.allow_self_transition {
            return Err(TransitionError::InvalidTransition {
                cause: self.cause.name().to_string(),
                state: state.name.clone(),
            }
            .into());
        }
        person.enter(settled, ctx.step);
        Ok(Some(TransitionOutcome {
            simulant: simulant.id,
            from,
            to: settled,
            measure,
        }))
    }

    /// Resolve entry splits: while the entered state routes incoming flow
    /// through proportion transitions (transient split states), follow
    /// them. Bounded by the state count; a longer chain means the split
    /// graph cycles without settling.
    fn settle_entry(
        &self,
        simulant: &Simulant,
        sink: StateId,
        ctx: &StepContext<'_>,
    ) -> Result<StateId, StepError> {
        let mut current = sink;
        for _ in 0..=self.cause.num_states() {
            let state = self.cause.state(current);
            let splits: Vec<(StateId, f64)> = self
                .cause
                .outgoing(current)
                .iter()
                .filter_map(|idx| {
                    let t = self.cause.transition(*idx);
                    match t.data {
                        TransitionData::Proportion { value } => Some((t.sink, value)),
                        _ => None,
                    }
                })
                .collect();
            if splits.is_empty() {
                return Ok(current);
            }

            let total: f64 = splits.iter().map(|(_, v)| v).sum();
            if total <= 0.0 {
                return Err(TransitionError::BadProportions {
                    cause: self.cause.name().to_string(),
                    state: state.name.clone(),
                }
                .into());
            }
            let label = format!("{}.entry_split.{}", self.cause.name(), state.name);
            let uniform = ctx.key.uniform(simulant.id, &label, ctx.step);
            let scaled = uniform * total;
            let mut cumulative = 0.0;
            let mut next = splits[splits.len() - 1].0;
            for (split_sink, value) in &splits {
                cumulative += value;
                if scaled < cumulative {
                    next = *split_sink;
                    break;
                }
            }
            if next == current && !state.allow_self_transition {
                return Err(TransitionError::InvalidTransition {
                    cause: self.cause.name().to_string(),
                    state: state.name.clone(),
                }
                .into());
            }
            current = next;
        }
        Err(TransitionError::UnresolvedEntrySplit {
            cause: self.cause.name().to_string(),
            state: self.cause.state(sink).name.clone(),
        }
        .into())
    }
}
