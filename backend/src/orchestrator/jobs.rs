//! Batch job orchestration over the (location × draw) Cartesian product.
//!
//! A run needs `expected_draws` completed draws for every location. The
//! `DrawOrchestrator` submits one job per missing (location, draw) pair to
//! a `BatchScheduler`, polls job statuses, and records every scheduling
//! action in the event log. Restart is the same operation as first launch:
//! submit whatever the artifact store does not yet hold. A location with a
//! complete artifact is skipped entirely, so restarts are idempotent.
//!
//! One failed job never blocks the rest of the batch; its (location, draw)
//! pair simply stays missing and is resubmitted on the next restart pass.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::event::{Event, EventLog};
use crate::orchestrator::artifact::ArtifactStore;
use crate::orchestrator::engine::{Orchestrator, SimulationError};

// ============================================================================
// Scheduler Interface
// ============================================================================

/// Opaque scheduler-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// Per-job resource request passed through to the batch system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpus: u32,
    pub memory_gb: u32,
    /// Wall-clock limit in `H:MM:SS` form
    pub runtime: String,
}

impl Default for ResourceRequest {
    /// Production sizing for one draw job.
    fn default() -> Self {
        Self {
            cpus: 1,
            memory_gb: 10,
            runtime: "3:00:00".to_string(),
        }
    }
}

/// One (location, draw) unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub location: String,
    pub draw: u32,
    pub resources: ResourceRequest,
}

/// Abstract batch scheduler.
///
/// `submit` hands over one job and returns its identifier; `status` is
/// polled until every submitted job is `Complete` or `Failed`.
pub trait BatchScheduler {
    fn submit(&mut self, spec: JobSpec) -> Result<JobId, SimulationError>;
    fn status(&self, job: &JobId) -> JobStatus;
}

// ============================================================================
// In-Process Scheduler
// ============================================================================

/// Scheduler that runs each submitted draw synchronously in-process and
/// writes its result to the artifact store.
///
/// `fail_draws` injects scheduler-level failures for specific draw indices;
/// restart and failure-isolation behavior is not reachable otherwise
/// without a real batch system.
pub struct InProcessScheduler {
    orchestrator: Arc<Orchestrator>,
    store: Arc<ArtifactStore>,
    statuses: HashMap<JobId, JobStatus>,
    fail_draws: BTreeSet<u32>,
}

impl InProcessScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<ArtifactStore>) -> Self {
        Self {
            orchestrator,
            store,
            statuses: HashMap::new(),
            fail_draws: BTreeSet::new(),
        }
    }

    /// Make every job for the given draw indices fail at submission.
    pub fn with_failing_draws(mut self, draws: impl IntoIterator<Item = u32>) -> Self {
        self.fail_draws = draws.into_iter().collect();
        self
    }

    /// Stop injecting failures; subsequent submissions run normally.
    pub fn clear_failures(&mut self) {
        self.fail_draws.clear();
    }
}

impl BatchScheduler for InProcessScheduler {
    fn submit(&mut self, spec: JobSpec) -> Result<JobId, SimulationError> {
        let id = JobId::generate();
        if self.fail_draws.contains(&spec.draw) {
            self.statuses.insert(id.clone(), JobStatus::Failed);
            return Ok(id);
        }
        let status = match self
            .orchestrator
            .run_draw(&spec.location, spec.draw)
            .and_then(|result| self.store.write_draw(&result))
        {
            Ok(()) => JobStatus::Complete,
            Err(_) => JobStatus::Failed,
        };
        self.statuses.insert(id.clone(), status);
        Ok(id)
    }

    fn status(&self, job: &JobId) -> JobStatus {
        *self.statuses.get(job).unwrap_or(&JobStatus::Failed)
    }
}

// ============================================================================
// Draw Orchestrator
// ============================================================================

/// Completion state of one location's artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationReport {
    pub location: String,
    pub completed: usize,
    pub expected: u32,
    pub missing: Vec<u32>,
    /// Draws whose most recent job failed; a subset of `missing`
    pub failed: Vec<u32>,
}

/// Drives every location's artifact to `expected_draws` completed draws.
pub struct DrawOrchestrator<S: BatchScheduler> {
    scheduler: S,
    store: Arc<ArtifactStore>,
    locations: Vec<String>,
    expected_draws: u32,
    resources: ResourceRequest,
    events: EventLog,
    /// Jobs submitted and not yet resolved by a poll
    active: HashMap<JobId, (String, u32)>,
    /// Last known failures per location
    failed: HashMap<String, BTreeSet<u32>>,
    /// Locations already announced complete, to log LocationComplete once
    announced: BTreeSet<String>,
}

impl<S: BatchScheduler> DrawOrchestrator<S> {
    pub fn new(
        scheduler: S,
        store: Arc<ArtifactStore>,
        locations: Vec<String>,
        expected_draws: u32,
        resources: ResourceRequest,
    ) -> Self {
        Self {
            scheduler,
            store,
            locations,
            expected_draws,
            resources,
            events: EventLog::new(),
            active: HashMap::new(),
            failed: HashMap::new(),
            announced: BTreeSet::new(),
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Submit jobs for every draw missing from every location's artifact.
    ///
    /// First launch and restart are the same call. Returns the number of
    /// jobs submitted.
    pub fn submit_missing(&mut self) -> Result<usize, SimulationError> {
        let locations = self.locations.clone();
        let mut submitted = 0;
        for location in &locations {
            submitted += self.restart_location(location)?.len();
        }
        Ok(submitted)
    }

    /// Submit jobs for one location's missing draws; complete locations are
    /// a no-op. Returns the draw indices submitted.
    pub fn restart_location(&mut self, location: &str) -> Result<Vec<u32>, SimulationError> {
        let missing = self.store.missing_draws(location, self.expected_draws)?;
        if missing.is_empty() {
            self.announce_if_complete(location)?;
            return Ok(Vec::new());
        }

        let pending: BTreeSet<u32> = self
            .active
            .values()
            .filter(|(l, _)| l == location)
            .map(|(_, d)| *d)
            .collect();
        let to_submit: Vec<u32> = missing
            .into_iter()
            .filter(|d| !pending.contains(d))
            .collect();

        for draw in &to_submit {
            let id = self.scheduler.submit(JobSpec {
                location: location.to_string(),
                draw: *draw,
                resources: self.resources.clone(),
            })?;
            self.events.record(Event::JobSubmitted {
                location: location.to_string(),
                draw: *draw,
                job_id: id.to_string(),
            });
            self.active.insert(id, (location.to_string(), *draw));
        }
        if !to_submit.is_empty() {
            self.events.record(Event::RestartSubmitted {
                location: location.to_string(),
                draws: to_submit.clone(),
            });
        }
        Ok(to_submit)
    }

    /// Resolve finished jobs and log their outcomes. Returns the number of
    /// jobs still pending or running.
    pub fn poll(&mut self) -> Result<usize, SimulationError> {
        let ids: Vec<JobId> = self.active.keys().cloned().collect();
        for id in ids {
            match self.scheduler.status(&id) {
                JobStatus::Pending | JobStatus::Running => {}
                JobStatus::Complete => {
                    if let Some((location, draw)) = self.active.remove(&id) {
                        self.failed.entry(location.clone()).or_default().remove(&draw);
                        self.events.record(Event::DrawCompleted {
                            location: location.clone(),
                            draw,
                        });
                        self.announce_if_complete(&location)?;
                    }
                }
                JobStatus::Failed => {
                    if let Some((location, draw)) = self.active.remove(&id) {
                        self.failed.entry(location.clone()).or_default().insert(draw);
                        self.events.record(Event::JobFailed {
                            location,
                            draw,
                            job_id: id.to_string(),
                            reason: "job reported failed by scheduler".to_string(),
                        });
                    }
                }
            }
        }
        Ok(self.active.len())
    }

    /// True when every location's artifact holds `expected_draws` draws.
    pub fn is_complete(&self) -> Result<bool, SimulationError> {
        for location in &self.locations {
            if !self.store.missing_draws(location, self.expected_draws)?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Completion report per location, in configured location order.
    pub fn report(&self) -> Result<Vec<LocationReport>, SimulationError> {
        let mut reports = Vec::with_capacity(self.locations.len());
        for location in &self.locations {
            let missing = self.store.missing_draws(location, self.expected_draws)?;
            let failed = self
                .failed
                .get(location)
                .map(|set| set.iter().copied().filter(|d| missing.contains(d)).collect())
                .unwrap_or_default();
            reports.push(LocationReport {
                location: location.clone(),
                completed: self.store.draw_count(location)?,
                expected: self.expected_draws,
                missing,
                failed,
            });
        }
        Ok(reports)
    }

    fn announce_if_complete(&mut self, location: &str) -> Result<(), SimulationError> {
        if self.announced.contains(location) {
            return Ok(());
        }
        let completed = self.store.draw_count(location)?;
        if completed >= self.expected_draws as usize {
            self.announced.insert(location.to_string());
            self.events.record(Event::LocationComplete {
                location: location.to_string(),
                completed,
                expected: self.expected_draws as usize,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scheduler stub that records submissions and reports a fixed status.
    struct StubScheduler {
        submitted: Vec<JobSpec>,
        status: JobStatus,
    }

    impl StubScheduler {
        fn new(status: JobStatus) -> Self {
            Self {
                submitted: Vec::new(),
                status,
            }
        }
    }

    impl BatchScheduler for StubScheduler {
        fn submit(&mut self, spec: JobSpec) -> Result<JobId, SimulationError> {
            self.submitted.push(spec);
            Ok(JobId::generate())
        }

        fn status(&self, _job: &JobId) -> JobStatus {
            self.status
        }
    }

    #[test]
    fn test_job_ids_unique() {
        assert_ne!(JobId::generate(), JobId::generate());
    }

    #[test]
    fn test_default_resource_request() {
        let resources = ResourceRequest::default();
        assert_eq!(resources.cpus, 1);
        assert_eq!(resources.memory_gb, 10);
        assert_eq!(resources.runtime, "3:00:00");
    }

    #[test]
    fn test_resubmit_skips_pending_jobs() {
        use crate::orchestrator::engine::SimulationConfig;
        use crate::paf::Stratifier;
        use tempfile::TempDir;

        let config = SimulationConfig {
            population_size: 10,
            num_steps: 1,
            step_size_days: 28.0,
            start_year: 2021.0,
            global_seed: 1,
            age_range: (40.0, 60.0),
            locations: vec!["Alabama".to_string()],
            expected_draws: 3,
            stratifier: Stratifier::unstratified(),
        };
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path(), &config).unwrap());
        let mut orchestrator = DrawOrchestrator::new(
            StubScheduler::new(JobStatus::Pending),
            store,
            vec!["Alabama".to_string()],
            3,
            ResourceRequest::default(),
        );

        assert_eq!(orchestrator.submit_missing().unwrap(), 3);
        // jobs still pending: nothing new to submit
        assert_eq!(orchestrator.submit_missing().unwrap(), 0);
        assert_eq!(orchestrator.scheduler.submitted.len(), 3);
        assert_eq!(orchestrator.poll().unwrap(), 3);
    }
}
