//! End-to-end two-state scenario: susceptible -> with_condition at a
//! constant hazard of 0.01 per day over one 28-day step. The per-step
//! probability is 1 - exp(-0.28) ~ 0.24420, so a population of 100,000
//! should produce about 24,420 incident events.

use std::collections::HashMap;

use cvd_simulator_core_rs::{
    rate_to_probability, Cause, CauseType, Orchestrator, RateResolver, RateTable,
    RiskEffectEngine, SimulationConfig, StateDef, Stratifier, TransitionDef,
};

const RATE_PER_DAY: f64 = 0.01;
const STEP_DAYS: f64 = 28.0;
const POPULATION: u32 = 100_000;

fn orchestrator() -> Orchestrator {
    let cause = Cause::new(
        "condition",
        vec![
            StateDef::new("susceptible", CauseType::Cause),
            StateDef::new("with_condition", CauseType::Sequela),
        ],
        vec![TransitionDef::rate(0, 1, "condition.incidence_rate")],
        0,
    )
    .unwrap();
    let mut tables = HashMap::new();
    tables.insert(
        "condition.incidence_rate".to_string(),
        RateTable::constant(RATE_PER_DAY),
    );
    let config = SimulationConfig {
        population_size: POPULATION,
        num_steps: 1,
        step_size_days: STEP_DAYS,
        start_year: 2021.0,
        global_seed: 1618,
        age_range: (30.0, 90.0),
        locations: vec!["Alabama".to_string()],
        expected_draws: 10,
        stratifier: Stratifier::unstratified(),
    };
    Orchestrator::new(
        config,
        vec![cause],
        RateResolver::new(tables),
        RiskEffectEngine::unadjusted(),
    )
    .unwrap()
}

#[test]
fn test_expected_probability_value() {
    let p = rate_to_probability(RATE_PER_DAY, STEP_DAYS);
    assert!((p - 0.244_216).abs() < 1e-5);
}

#[test]
fn test_event_count_matches_hazard_formula() {
    let result = orchestrator().run_draw("Alabama", 0).unwrap();
    let expected = f64::from(POPULATION) * rate_to_probability(RATE_PER_DAY, STEP_DAYS);
    let observed = result.observed_events as f64;
    // binomial sd ~ 136; allow five sigma
    assert!(
        (observed - expected).abs() < 700.0,
        "observed {observed}, expected {expected:.0}"
    );
}

#[test]
fn test_draws_vary_but_share_the_mean() {
    let orchestrator = orchestrator();
    let expected = f64::from(POPULATION) * rate_to_probability(RATE_PER_DAY, STEP_DAYS);
    let mut counts = Vec::new();
    for draw in 0..5 {
        let result = orchestrator.run_draw("Alabama", draw).unwrap();
        assert!(
            (result.observed_events as f64 - expected).abs() < 700.0,
            "draw {draw}: {}",
            result.observed_events
        );
        counts.push(result.observed_events);
    }
    // Monte Carlo draws must not be identical realizations
    counts.dedup();
    assert!(counts.len() > 1);
}

#[test]
fn test_no_events_without_hazard() {
    let cause = Cause::new(
        "condition",
        vec![
            StateDef::new("susceptible", CauseType::Cause),
            StateDef::new("with_condition", CauseType::Sequela),
        ],
        vec![TransitionDef::rate(0, 1, "condition.incidence_rate")],
        0,
    )
    .unwrap();
    let mut tables = HashMap::new();
    tables.insert(
        "condition.incidence_rate".to_string(),
        RateTable::constant(0.0),
    );
    let config = SimulationConfig {
        population_size: 10_000,
        num_steps: 3,
        step_size_days: STEP_DAYS,
        start_year: 2021.0,
        global_seed: 1618,
        age_range: (30.0, 90.0),
        locations: vec!["Alabama".to_string()],
        expected_draws: 10,
        stratifier: Stratifier::unstratified(),
    };
    let orchestrator = Orchestrator::new(
        config,
        vec![cause],
        RateResolver::new(tables),
        RiskEffectEngine::unadjusted(),
    )
    .unwrap();
    let result = orchestrator.run_draw("Alabama", 0).unwrap();
    assert_eq!(result.observed_events, 0);
    assert!(result.paf_records.is_empty());
}
