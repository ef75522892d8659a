//! Batch orchestration and restart semantics: missing-draw submission,
//! idempotent restart of complete locations, failure isolation, and the
//! event log record of every scheduling action.

use std::collections::HashMap;
use std::sync::Arc;

use tempfile::TempDir;

use cvd_simulator_core_rs::{
    ArtifactStore, Cause, CauseType, DrawOrchestrator, Event, InProcessScheduler, Orchestrator,
    RateResolver, RateTable, ResourceRequest, RiskEffectEngine, SimulationConfig, StateDef,
    Stratifier, TransitionDef,
};

fn config(expected_draws: u32) -> SimulationConfig {
    SimulationConfig {
        population_size: 200,
        num_steps: 2,
        step_size_days: 28.0,
        start_year: 2021.0,
        global_seed: 77,
        age_range: (40.0, 80.0),
        locations: vec!["Alabama".to_string(), "Alaska".to_string()],
        expected_draws,
        stratifier: Stratifier::unstratified(),
    }
}

fn orchestrator(config: &SimulationConfig) -> Arc<Orchestrator> {
    let cause = Cause::new(
        "stroke",
        vec![
            StateDef::new("susceptible", CauseType::Cause),
            StateDef::new("with_condition", CauseType::Sequela),
        ],
        vec![TransitionDef::rate(0, 1, "stroke.incidence_rate.acute")],
        0,
    )
    .unwrap();
    let mut tables = HashMap::new();
    tables.insert(
        "stroke.incidence_rate.acute".to_string(),
        RateTable::constant(0.001),
    );
    Arc::new(
        Orchestrator::new(
            config.clone(),
            vec![cause],
            RateResolver::new(tables),
            RiskEffectEngine::unadjusted(),
        )
        .unwrap(),
    )
}

fn batch(
    dir: &TempDir,
    expected_draws: u32,
    fail: Vec<u32>,
) -> DrawOrchestrator<InProcessScheduler> {
    let config = config(expected_draws);
    let engine = orchestrator(&config);
    let store = Arc::new(ArtifactStore::open(dir.path(), &config).unwrap());
    let scheduler =
        InProcessScheduler::new(engine, Arc::clone(&store)).with_failing_draws(fail);
    DrawOrchestrator::new(
        scheduler,
        store,
        config.locations,
        expected_draws,
        ResourceRequest::default(),
    )
}

#[test]
fn test_full_batch_runs_to_completion() {
    let dir = TempDir::new().unwrap();
    let mut batch = batch(&dir, 5, Vec::new());

    assert!(!batch.is_complete().unwrap());
    assert_eq!(batch.submit_missing().unwrap(), 10);
    assert_eq!(batch.poll().unwrap(), 0);
    assert!(batch.is_complete().unwrap());

    let completions = batch
        .events()
        .events()
        .iter()
        .filter(|e| matches!(e, Event::LocationComplete { .. }))
        .count();
    assert_eq!(completions, 2);
}

#[test]
fn test_restart_of_complete_location_submits_nothing() {
    let dir = TempDir::new().unwrap();
    let mut batch = batch(&dir, 4, Vec::new());
    batch.submit_missing().unwrap();
    batch.poll().unwrap();
    assert!(batch.is_complete().unwrap());

    assert!(batch.restart_location("Alabama").unwrap().is_empty());
    assert_eq!(batch.submit_missing().unwrap(), 0);
}

#[test]
fn test_restart_submits_exactly_missing_draws() {
    let dir = TempDir::new().unwrap();

    // First pass with injected failures for draws 3 and 7
    let mut batch = batch(&dir, 10, vec![3, 7]);
    assert_eq!(batch.submit_missing().unwrap(), 20);
    batch.poll().unwrap();
    assert!(!batch.is_complete().unwrap());

    let reports = batch.report().unwrap();
    for report in &reports {
        assert_eq!(report.completed, 8);
        assert_eq!(report.missing, vec![3, 7]);
        assert_eq!(report.failed, vec![3, 7]);
    }

    // Fresh orchestrator against the same store, failures gone: restart
    // must submit only the missing indices
    let mut retry = batch_without_failures(&dir, 10);
    let submitted = retry.restart_location("Alabama").unwrap();
    assert_eq!(submitted, vec![3, 7]);
    assert_eq!(retry.submit_missing().unwrap(), 2); // Alaska's two
    retry.poll().unwrap();
    assert!(retry.is_complete().unwrap());
}

fn batch_without_failures(dir: &TempDir, expected_draws: u32) -> DrawOrchestrator<InProcessScheduler> {
    batch(dir, expected_draws, Vec::new())
}

#[test]
fn test_failure_does_not_block_other_jobs() {
    let dir = TempDir::new().unwrap();
    let mut batch = batch(&dir, 6, vec![0]);
    batch.submit_missing().unwrap();
    batch.poll().unwrap();

    // Draw 0 failed everywhere; all other draws landed
    let reports = batch.report().unwrap();
    for report in &reports {
        assert_eq!(report.completed, 5);
        assert_eq!(report.missing, vec![0]);
    }

    let failures = batch
        .events()
        .events()
        .iter()
        .filter(|e| matches!(e, Event::JobFailed { .. }))
        .count();
    assert_eq!(failures, 2);
}

#[test]
fn test_event_log_records_submissions_per_location() {
    let dir = TempDir::new().unwrap();
    let mut batch = batch(&dir, 3, Vec::new());
    batch.submit_missing().unwrap();
    batch.poll().unwrap();

    let submissions = batch
        .events()
        .for_location("Alabama")
        .filter(|e| matches!(e, Event::JobSubmitted { .. }))
        .count();
    assert_eq!(submissions, 3);

    let restart_batches = batch
        .events()
        .for_location("Alabama")
        .filter(|e| matches!(e, Event::RestartSubmitted { .. }))
        .count();
    assert_eq!(restart_batches, 1);
}

#[test]
fn test_stores_with_different_configs_are_disjoint() {
    let dir = TempDir::new().unwrap();
    let mut first = batch(&dir, 2, Vec::new());
    first.submit_missing().unwrap();
    first.poll().unwrap();
    assert!(first.is_complete().unwrap());

    // A different seed hashes to a different version directory: nothing
    // already completed applies
    let mut other_config = config(2);
    other_config.global_seed = 78;
    let engine = orchestrator(&other_config);
    let store = Arc::new(ArtifactStore::open(dir.path(), &other_config).unwrap());
    let scheduler = InProcessScheduler::new(engine, Arc::clone(&store));
    let mut second = DrawOrchestrator::new(
        scheduler,
        store,
        other_config.locations.clone(),
        2,
        ResourceRequest::default(),
    );
    assert!(!second.is_complete().unwrap());
    assert_eq!(second.submit_missing().unwrap(), 4);
}
