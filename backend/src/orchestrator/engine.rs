//! Per-draw simulation engine
//!
//! Runs one full stochastic realization of the population: resolve rates,
//! adjust them for risk exposures, advance every disease state machine each
//! step, and tally incidence. A draw is run once under observed exposures
//! and once per contributor under its TMREL counterfactual; the paired
//! tallies yield the draw's PAF records.
//!
//! # Architecture
//!
//! ```text
//! For each draw:
//! 1. Build the population deterministically from the draw key
//! 2. Sample exposures (correlated groups jointly, the rest independently)
//! 3. Simulate under observed exposures -> observed incidence tally
//! 4. For each contributor: simulate with its risks at TMREL -> paired tally
//! 5. PAF per (target, cell) from each pair; joint PAF across contributors
//! ```
//!
//! Within a step, simulant updates are embarrassingly parallel and run on
//! rayon; every random draw is keyed by simulant id, so the schedule never
//! affects results.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::time::SimClock;
use crate::disease::{DiseaseStateMachine, StepContext, StepError};
use crate::models::cause::{Cause, ConfigurationError, TransitionData};
use crate::models::risk::RateTarget;
use crate::models::simulant::{PersonState, Sex, Simulant};
use crate::paf::{
    joint_records, paf_from_mean_relative_risk, paf_records, IncidenceTally, JointPafRecord,
    PafRecord, Stratifier,
};
use crate::rates::RateResolver;
use crate::risks::{ExposureVector, RiskEffectEngine, RiskError};
use crate::rng::DrawKey;

// ============================================================================
// Configuration
// ============================================================================

/// Complete simulation configuration.
///
/// This is the unit hashed into the artifact version: two runs may share an
/// artifact only when their configs hash identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Simulants per draw
    pub population_size: u32,

    /// Steps per draw
    pub num_steps: usize,

    /// Length of one step in days (28 by default upstream)
    pub step_size_days: f64,

    /// Calendar year at simulation start
    pub start_year: f64,

    /// Global seed; combined with (location, draw) into the draw key
    pub global_seed: u64,

    /// Uniform initial age range [min, max) in years
    pub age_range: (f64, f64),

    /// Locations covered by the batch, in artifact order
    pub locations: Vec<String>,

    /// Draws required per location for a complete artifact (1000 in
    /// production)
    pub expected_draws: u32,

    pub stratifier: Stratifier,
}

// ============================================================================
// Errors
// ============================================================================

/// Top-level simulation error taxonomy.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    /// Malformed top-level configuration
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Malformed cause/transition graph or risk wiring; fatal at load
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Failure while advancing a draw; aborts that draw only
    #[error(transparent)]
    Step(#[from] StepError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("artifact io error: {0}")]
    Io(String),

    /// Scheduler-level failure; recoverable via restart
    #[error("job failure for {location} draw {draw}: {reason}")]
    JobFailure {
        location: String,
        draw: u32,
        reason: String,
    },
}

impl From<RiskError> for SimulationError {
    fn from(err: RiskError) -> Self {
        SimulationError::Step(StepError::Risk(err))
    }
}

impl From<std::io::Error> for SimulationError {
    fn from(err: std::io::Error) -> Self {
        SimulationError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SimulationError {
    fn from(err: serde_json::Error) -> Self {
        SimulationError::Serialization(err.to_string())
    }
}

// ============================================================================
// Draw output
// ============================================================================

/// Supplementary per-target observation: PAF estimated from the population
/// mean relative risk instead of a paired run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanRrObservation {
    pub target: RateTarget,
    pub value: f64,
}

/// Output of one completed (location, draw) job; the append unit of the
/// artifact store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawResult {
    pub location: String,
    pub draw: u32,
    pub paf_records: Vec<PafRecord>,
    pub joint_records: Vec<JointPafRecord>,
    pub mean_rr_observations: Vec<MeanRrObservation>,
    /// Incident events under observed exposure, all targets pooled
    pub observed_events: u64,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs single draws over a fixed component graph.
///
/// # Example
///
/// ```rust,ignore
/// let orchestrator = Orchestrator::new(config, causes, resolver, risks)?;
/// let result = orchestrator.run_draw("Alabama", 0)?;
/// println!("{} PAF records", result.paf_records.len());
/// ```
#[derive(Debug)]
pub struct Orchestrator {
    config: SimulationConfig,
    machines: Vec<DiseaseStateMachine>,
    resolver: RateResolver,
    risks: RiskEffectEngine,
}

impl Orchestrator {
    /// Assemble the component graph and validate it against the loaded
    /// rate tables.
    pub fn new(
        config: SimulationConfig,
        causes: Vec<Cause>,
        resolver: RateResolver,
        risks: RiskEffectEngine,
    ) -> Result<Self, SimulationError> {
        if config.population_size == 0 {
            return Err(SimulationError::InvalidConfig(
                "population_size must be positive".to_string(),
            ));
        }
        if config.num_steps == 0 {
            return Err(SimulationError::InvalidConfig(
                "num_steps must be positive".to_string(),
            ));
        }
        if !(config.step_size_days > 0.0) {
            return Err(SimulationError::InvalidConfig(
                "step_size_days must be positive".to_string(),
            ));
        }
        if !(config.age_range.0 < config.age_range.1) {
            return Err(SimulationError::InvalidConfig(
                "age_range must be a non-empty interval".to_string(),
            ));
        }
        if config.expected_draws == 0 {
            return Err(SimulationError::InvalidConfig(
                "expected_draws must be positive".to_string(),
            ));
        }
        if config.locations.is_empty() {
            return Err(SimulationError::InvalidConfig(
                "at least one location required".to_string(),
            ));
        }
        // zero-width age bins would divide by zero in cell assignment
        if config.stratifier.age_bin_years == 0 {
            return Err(SimulationError::InvalidConfig(
                "stratifier age_bin_years must be positive".to_string(),
            ));
        }

        // Every rate transition must resolve against a loaded table
        for cause in &causes {
            for idx in 0..cause.num_states() {
                for t in cause.outgoing(idx) {
                    if let TransitionData::Rate { table_key } = &cause.transition(*t).data {
                        if !resolver.has_table(table_key) {
                            return Err(SimulationError::InvalidConfig(format!(
                                "cause {}: no rate table loaded for '{}'",
                                cause.name(),
                                table_key
                            )));
                        }
                    }
                }
            }
        }

        Ok(Self {
            config,
            machines: causes.into_iter().map(DiseaseStateMachine::new).collect(),
            resolver,
            risks,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn location_index(&self, location: &str) -> Result<u32, SimulationError> {
        self.config
            .locations
            .iter()
            .position(|l| l == location)
            .map(|i| i as u32)
            .ok_or_else(|| SimulationError::InvalidConfig(format!("unknown location: {location}")))
    }

    /// Run one complete draw: observed scenario, one counterfactual per
    /// contributor, and the derived PAF records.
    pub fn run_draw(&self, location: &str, draw: u32) -> Result<DrawResult, SimulationError> {
        let key = DrawKey::new(self.config.global_seed, self.location_index(location)?, draw);

        let population = self.build_population(&key);
        let exposures = population
            .iter()
            .map(|sim| self.risks.sample_exposures(&key, sim.id))
            .collect::<Result<Vec<_>, _>>()?;

        let observed = self.simulate(&key, &population, &exposures)?;

        let mut records: Vec<PafRecord> = Vec::new();
        for contributor in self.risks.contributors() {
            let counterfactual_exposures = exposures
                .iter()
                .map(|vector| self.risks.counterfactual_exposures(vector, &contributor.risks))
                .collect::<Result<Vec<_>, _>>()?;
            let counterfactual = self.simulate(&key, &population, &counterfactual_exposures)?;
            records.extend(paf_records(
                &contributor.name,
                &self.risks.contributor_targets(&contributor),
                &observed,
                &counterfactual,
                draw,
            ));
        }
        let joint = joint_records(&records, draw);

        let mut mean_rr_observations = Vec::new();
        for target in self.risks.targets() {
            let mean_rr = self.risks.mean_relative_risk(&target, &exposures)?;
            mean_rr_observations.push(MeanRrObservation {
                target,
                value: paf_from_mean_relative_risk(mean_rr),
            });
        }

        Ok(DrawResult {
            location: location.to_string(),
            draw,
            paf_records: records,
            joint_records: joint,
            mean_rr_observations,
            observed_events: observed.total_events(),
        })
    }

    /// Deterministic synthetic population for one draw.
    fn build_population(&self, key: &DrawKey) -> Vec<Simulant> {
        let (age_min, age_max) = self.config.age_range;
        (0..u64::from(self.config.population_size))
            .map(|id| {
                let age = age_min + key.uniform(id, "initial_age", 0) * (age_max - age_min);
                let sex = if key.uniform(id, "sex", 0) < 0.5 {
                    Sex::Female
                } else {
                    Sex::Male
                };
                Simulant::new(id, age, sex)
            })
            .collect()
    }

    /// One scenario pass over the population.
    fn simulate(
        &self,
        key: &DrawKey,
        population: &[Simulant],
        exposures: &[ExposureVector],
    ) -> Result<IncidenceTally, SimulationError> {
        let mut clock = SimClock::new(self.config.step_size_days, self.config.start_year);
        let mut simulants = population.to_vec();
        let mut persons: Vec<Vec<PersonState>> = self
            .machines
            .iter()
            .map(|machine| vec![machine.initial_state(); simulants.len()])
            .collect();
        let mut tally = IncidenceTally::new();

        for step in 0..self.config.num_steps {
            let year = clock.current_year();
            for sim in &simulants {
                tally.record_person_step(self.config.stratifier.cell(sim));
            }

            for (machine, states) in self.machines.iter().zip(persons.iter_mut()) {
                let ctx = StepContext {
                    resolver: &self.resolver,
                    risks: &self.risks,
                    key,
                    step,
                    step_size_days: self.config.step_size_days,
                    year,
                };
                // Parallel over simulants; draws key on simulant id, so
                // the schedule cannot change any outcome
                let outcomes = states
                    .par_iter_mut()
                    .zip(simulants.par_iter())
                    .zip(exposures.par_iter())
                    .map(|((person, sim), vector)| machine.advance(sim, person, vector, &ctx))
                    .collect::<Result<Vec<_>, StepError>>()?;

                for (outcome, sim) in outcomes.iter().zip(&simulants) {
                    if let Some(outcome) = outcome {
                        if let Some(measure) = &outcome.measure {
                            tally.record_event(
                                RateTarget::new(machine.cause().name(), measure.clone()),
                                self.config.stratifier.cell(sim),
                            );
                        }
                    }
                }
            }

            for sim in &mut simulants {
                sim.age_by_days(self.config.step_size_days);
            }
            clock.advance_step();
        }
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cause::{CauseType, StateDef, TransitionDef};
    use crate::rates::RateTable;
    use std::collections::HashMap;

    fn config() -> SimulationConfig {
        SimulationConfig {
            population_size: 500,
            num_steps: 4,
            step_size_days: 28.0,
            start_year: 2021.0,
            global_seed: 42,
            age_range: (30.0, 80.0),
            locations: vec!["Alabama".to_string()],
            expected_draws: 10,
            stratifier: Stratifier::unstratified(),
        }
    }

    fn stroke_cause() -> Cause {
        Cause::new(
            "stroke",
            vec![
                StateDef::new("susceptible", CauseType::Cause),
                StateDef::new("event", CauseType::Sequela),
            ],
            vec![TransitionDef::rate(0, 1, "stroke.incidence_rate")],
            0,
        )
        .unwrap()
    }

    fn resolver(rate: f64) -> RateResolver {
        let mut tables = HashMap::new();
        tables.insert("stroke.incidence_rate".to_string(), RateTable::constant(rate));
        RateResolver::new(tables)
    }

    #[test]
    fn test_missing_table_rejected() {
        let err = Orchestrator::new(
            config(),
            vec![stroke_cause()],
            RateResolver::new(HashMap::new()),
            RiskEffectEngine::unadjusted(),
        )
        .err()
        .expect("must reject missing table");
        assert!(matches!(err, SimulationError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_width_age_bins_rejected() {
        let mut bad = config();
        bad.stratifier = Stratifier {
            age_bin_years: 0,
            by_sex: true,
        };
        let err = Orchestrator::new(
            bad,
            vec![stroke_cause()],
            resolver(0.001),
            RiskEffectEngine::unadjusted(),
        )
        .err()
        .expect("must reject zero-width age bins");
        assert!(matches!(err, SimulationError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_location_rejected() {
        let orchestrator = Orchestrator::new(
            config(),
            vec![stroke_cause()],
            resolver(0.001),
            RiskEffectEngine::unadjusted(),
        )
        .unwrap();
        assert!(orchestrator.run_draw("Atlantis", 0).is_err());
    }

    #[test]
    fn test_run_draw_reproducible() {
        let orchestrator = Orchestrator::new(
            config(),
            vec![stroke_cause()],
            resolver(0.002),
            RiskEffectEngine::unadjusted(),
        )
        .unwrap();
        let a = orchestrator.run_draw("Alabama", 5).unwrap();
        let b = orchestrator.run_draw("Alabama", 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_draws_differ() {
        let orchestrator = Orchestrator::new(
            config(),
            vec![stroke_cause()],
            resolver(0.002),
            RiskEffectEngine::unadjusted(),
        )
        .unwrap();
        let a = orchestrator.run_draw("Alabama", 0).unwrap();
        let b = orchestrator.run_draw("Alabama", 1).unwrap();
        assert_ne!(a.observed_events, 0);
        assert_ne!(a, b);
    }
}
