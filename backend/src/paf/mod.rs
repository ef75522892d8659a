//! Population-attributable-fraction aggregation
//!
//! For each target (cause, rate measure) and stratification cell, the PAF
//! of one contributor (a risk factor, or a whole correlation group) is
//! estimated by running the same population twice in one draw — once under
//! observed exposures, once with the contributor at TMREL — and comparing
//! simulated incidence:
//!
//! ```text
//! PAF = 1 - I_counterfactual / I_observed
//! ```
//!
//! Joint PAFs combine the contributors on one target as
//! `1 - prod(1 - PAF_i)`. This multiplicative form ASSUMES each
//! contributor's incremental effect is independent; it is an approximation
//! when risks are correlated or mediated. Correlation is handled upstream
//! by collapsing each correlation group into a single contributor, and
//! mediation by scaling mediated direct effects before they reach the
//! simulation, so the product here never multiplies two terms for the same
//! causal pathway. No further correction term is applied.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::risk::RateTarget;
use crate::models::simulant::{Sex, Simulant};

/// One stratification cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StratumKey {
    /// None when sex is excluded from stratification
    pub sex: Option<Sex>,
    /// Lower bound of the age bin, in years
    pub age_start: u32,
}

/// Maps simulants to stratification cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stratifier {
    pub age_bin_years: u32,
    pub by_sex: bool,
}

impl Default for Stratifier {
    /// Five-year age bins, stratified by sex (the artifact index layout).
    fn default() -> Self {
        Self {
            age_bin_years: 5,
            by_sex: true,
        }
    }
}

impl Stratifier {
    /// A single all-population cell.
    pub fn unstratified() -> Self {
        Self {
            age_bin_years: u32::MAX,
            by_sex: false,
        }
    }

    pub fn cell(&self, simulant: &Simulant) -> StratumKey {
        let age = simulant.age.max(0.0) as u32;
        let age_start = if self.age_bin_years == u32::MAX {
            0
        } else {
            age - age % self.age_bin_years
        };
        StratumKey {
            sex: self.by_sex.then_some(simulant.sex),
            age_start,
        }
    }
}

/// Incidence counts for one simulation run, per target and cell.
///
/// Person-steps stand in for person-time; PAF is a ratio of incidence
/// rates over the same population, so the time unit cancels.
#[derive(Debug, Clone, Default)]
pub struct IncidenceTally {
    events: HashMap<(RateTarget, StratumKey), u64>,
    person_steps: HashMap<StratumKey, u64>,
}

impl IncidenceTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_person_step(&mut self, cell: StratumKey) {
        *self.person_steps.entry(cell).or_insert(0) += 1;
    }

    pub fn record_event(&mut self, target: RateTarget, cell: StratumKey) {
        *self.events.entry((target, cell)).or_insert(0) += 1;
    }

    pub fn events(&self, target: &RateTarget, cell: &StratumKey) -> u64 {
        *self
            .events
            .get(&(target.clone(), *cell))
            .unwrap_or(&0)
    }

    pub fn total_events(&self) -> u64 {
        self.events.values().sum()
    }

    pub fn person_steps(&self, cell: &StratumKey) -> u64 {
        *self.person_steps.get(cell).unwrap_or(&0)
    }

    /// Incidence rate per person-step; None when the cell was never at risk.
    pub fn incidence(&self, target: &RateTarget, cell: &StratumKey) -> Option<f64> {
        let steps = self.person_steps(cell);
        (steps > 0).then(|| self.events(target, cell) as f64 / steps as f64)
    }

    /// Cells with any person-time, sorted for deterministic output.
    pub fn cells(&self) -> Vec<StratumKey> {
        let mut cells: Vec<StratumKey> = self.person_steps.keys().copied().collect();
        cells.sort_by_key(|c| (c.sex.map(|s| s as u8), c.age_start));
        cells
    }
}

/// PAF of one contributor on one target, in one cell, for one draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PafRecord {
    pub target: RateTarget,
    /// Risk factor name, or correlation-group name for jointly-moved risks
    pub contributor: String,
    pub cell: StratumKey,
    pub draw: u32,
    pub value: f64,
}

/// Joint PAF across all contributors on one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointPafRecord {
    pub target: RateTarget,
    pub cell: StratumKey,
    pub draw: u32,
    pub value: f64,
}

/// Joint PAF under the multiplicative-independence approximation (see
/// module docs): `1 - prod(1 - PAF_i)`. For inputs in [0, 1) the result is
/// in [0, 1) and at least as large as any input.
pub fn joint_paf(pafs: &[f64]) -> f64 {
    1.0 - pafs.iter().map(|p| 1.0 - p).product::<f64>()
}

/// Cheap per-step PAF observation from the population mean relative risk:
/// `(mean_rr - 1) / mean_rr`. Non-positive means yield 0.
pub fn paf_from_mean_relative_risk(mean_rr: f64) -> f64 {
    if mean_rr <= 0.0 {
        return 0.0;
    }
    (mean_rr - 1.0) / mean_rr
}

/// Compute one contributor's PAF records from a paired run.
///
/// Cells with no observed incidence are skipped (PAF undefined). Monte
/// Carlo noise can push the raw ratio slightly outside [0, 1); values are
/// clamped back into the half-open interval.
pub fn paf_records(
    contributor: &str,
    targets: &[RateTarget],
    observed: &IncidenceTally,
    counterfactual: &IncidenceTally,
    draw: u32,
) -> Vec<PafRecord> {
    let mut records = Vec::new();
    for target in targets {
        for cell in observed.cells() {
            let Some(obs) = observed.incidence(target, &cell) else {
                continue;
            };
            if obs <= 0.0 {
                continue;
            }
            let cf = counterfactual.incidence(target, &cell).unwrap_or(0.0);
            let value = (1.0 - cf / obs).clamp(0.0, 1.0 - 1e-12);
            records.push(PafRecord {
                target: target.clone(),
                contributor: contributor.to_string(),
                cell,
                draw,
                value,
            });
        }
    }
    records
}

/// Combine per-contributor records into joint records, one per
/// (target, cell). Each contributor appears in the product exactly once;
/// callers must have already collapsed correlation groups into single
/// contributors.
pub fn joint_records(records: &[PafRecord], draw: u32) -> Vec<JointPafRecord> {
    let mut grouped: HashMap<(RateTarget, StratumKey), Vec<f64>> = HashMap::new();
    for record in records {
        grouped
            .entry((record.target.clone(), record.cell))
            .or_default()
            .push(record.value);
    }
    let mut joint: Vec<JointPafRecord> = grouped
        .into_iter()
        .map(|((target, cell), pafs)| JointPafRecord {
            target,
            cell,
            draw,
            value: joint_paf(&pafs),
        })
        .collect();
    joint.sort_by(|a, b| {
        (&a.target.cause, &a.target.measure, a.cell.age_start, a.cell.sex.map(|s| s as u8)).cmp(&(
            &b.target.cause,
            &b.target.measure,
            b.cell.age_start,
            b.cell.sex.map(|s| s as u8),
        ))
    });
    joint
}
