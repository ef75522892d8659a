//! Event logging for batch orchestration diagnostics.
//!
//! The orchestrator records every significant scheduling action as a
//! structured event rather than free-form output. Failure events carry the
//! (location, draw, job id) triple needed to target a restart.

use serde::{Deserialize, Serialize};

/// Orchestration event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A (location, draw) job was handed to the batch scheduler
    JobSubmitted {
        location: String,
        draw: u32,
        job_id: String,
    },

    /// A draw's output landed in the artifact store
    DrawCompleted { location: String, draw: u32 },

    /// Scheduler-level failure; recoverable via restart
    JobFailed {
        location: String,
        draw: u32,
        job_id: String,
        reason: String,
    },

    /// Restart pass submitted replacement jobs for missing draws
    RestartSubmitted { location: String, draws: Vec<u32> },

    /// A location reached its expected draw count
    LocationComplete {
        location: String,
        completed: usize,
        expected: usize,
    },
}

/// Append-only log of orchestration events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Events concerning one location, in record order.
    pub fn for_location<'a>(&'a self, location: &'a str) -> impl Iterator<Item = &'a Event> {
        self.events.iter().filter(move |event| match event {
            Event::JobSubmitted { location: l, .. }
            | Event::DrawCompleted { location: l, .. }
            | Event::JobFailed { location: l, .. }
            | Event::RestartSubmitted { location: l, .. }
            | Event::LocationComplete { location: l, .. } => l == location,
        })
    }
}
