//! Simulant: one member of the synthetic population
//!
//! A simulant carries demographic attributes plus, per cause, a record of
//! which state it occupies and when it entered. Occupancy records are owned
//! exclusively by the disease state machine for their cause; risk exposures
//! are owned by the risk-effect engine and read-only here.

use serde::{Deserialize, Serialize};

use crate::models::cause::StateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Female,
    Male,
}

/// Demographic attributes of one simulant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulant {
    /// Stable identifier; random draws key on this, never on iteration order
    pub id: u64,
    /// Age in years
    pub age: f64,
    pub sex: Sex,
}

impl Simulant {
    pub fn new(id: u64, age: f64, sex: Sex) -> Self {
        Self { id, age, sex }
    }

    /// Advance age by a number of days.
    pub fn age_by_days(&mut self, days: f64) {
        self.age += days / crate::core::time::DAYS_PER_YEAR;
    }
}

/// Per-(simulant, cause) occupancy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonState {
    pub state: StateId,
    /// Step at which the simulant entered `state`
    pub entry_step: usize,
}

impl PersonState {
    pub fn new(state: StateId) -> Self {
        Self {
            state,
            entry_step: 0,
        }
    }

    /// Move to a new state at the given step.
    pub fn enter(&mut self, state: StateId, step: usize) {
        self.state = state;
        self.entry_step = step;
    }

    /// Days spent in the current state as of `step`.
    pub fn occupancy_days(&self, step: usize, step_size_days: f64) -> f64 {
        (step - self.entry_step) as f64 * step_size_days
    }
}
