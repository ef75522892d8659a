//! Time management for the simulation
//!
//! The simulation operates in discrete steps of a fixed length in days
//! (28 days by default, matching the acute-event dwell time). This module
//! provides deterministic time advancement and the fractional year used
//! for rate-table lookups.

use serde::{Deserialize, Serialize};

/// Days per year used when converting elapsed days to a year fraction.
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Manages simulation time in discrete steps
///
/// # Example
/// ```
/// use cvd_simulator_core_rs::SimClock;
///
/// let mut clock = SimClock::new(28.0, 2021.0);
/// assert_eq!(clock.current_step(), 0);
///
/// clock.advance_step();
/// assert_eq!(clock.current_step(), 1);
/// assert_eq!(clock.elapsed_days(), 28.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    /// Steps elapsed since simulation start
    current_step: usize,
    /// Length of one step in days
    step_size_days: f64,
    /// Calendar year at simulation start (e.g. 2021.0)
    start_year: f64,
}

impl SimClock {
    /// Create a new clock
    ///
    /// # Panics
    /// Panics if `step_size_days` is not strictly positive.
    pub fn new(step_size_days: f64, start_year: f64) -> Self {
        assert!(step_size_days > 0.0, "step_size_days must be positive");
        Self {
            current_step: 0,
            step_size_days,
            start_year,
        }
    }

    /// Advance time by one step
    pub fn advance_step(&mut self) {
        self.current_step += 1;
    }

    /// Reset the clock to simulation start
    pub fn reset(&mut self) {
        self.current_step = 0;
    }

    /// Steps elapsed since start
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Days elapsed since start
    pub fn elapsed_days(&self) -> f64 {
        self.current_step as f64 * self.step_size_days
    }

    /// Fractional calendar year of the current step, used to index
    /// year-binned lookup tables
    pub fn current_year(&self) -> f64 {
        self.start_year + self.elapsed_days() / DAYS_PER_YEAR
    }

    /// Length of one step in days
    pub fn step_size_days(&self) -> f64 {
        self.step_size_days
    }
}
