//! Risk-effect engine
//!
//! Adjusts resolved base rates using per-simulant risk exposures:
//!
//! - Continuous / truncated-continuous exposures yield a relative risk of
//!   `exp(beta * (exposure - tmrel))`; truncated exposures are clipped to
//!   their [floor, ceiling], never resampled
//! - Categorical exposures look the relative risk up per category; the
//!   reference category has RR = 1
//! - A mediated effect's direct contribution is scaled by
//!   `(1 - mediator_weight)` so the pathway through the mediator is not
//!   counted twice; the mediator's own effect applies in full
//! - Relative risks combine multiplicatively across independent risks;
//!   risks sharing a correlation group contribute one combined term derived
//!   from their joint exposure sample, never pairwise products of
//!   independently-sampled values
//!
//! All structural consistency (unknown references, mediation cycles,
//! exposure/effect kind mismatches) is rejected at build time.

pub mod correlation;
pub mod stats;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::cause::ConfigurationError;
use crate::models::risk::{
    Exposure, ExposureDistribution, RateTarget, RelativeRisk, RiskEffect, RiskFactor, RiskKind,
    Tmrel,
};
use crate::rng::DrawKey;

pub use correlation::{CorrelationGroup, CorrelationSampler};

/// Runtime risk-adjustment failure. Fatal; indicates a logic or
/// configuration inconsistency, never retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskError {
    #[error("unknown risk factor identifier: {0}")]
    UnknownRisk(String),

    #[error("risk {risk}: exposure value {value} outside supported domain")]
    InvalidExposure { risk: String, value: f64 },

    #[error("risk {risk}: exposure kind does not match relative-risk function")]
    ExposureKindMismatch { risk: String },
}

/// One simulant's realized exposures, keyed by risk factor name.
///
/// Owned by the risk-effect engine; the disease state machine reads
/// exposures but never writes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureVector {
    values: HashMap<String, Exposure>,
}

impl ExposureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, risk: impl Into<String>, exposure: Exposure) {
        self.values.insert(risk.into(), exposure);
    }

    pub fn get(&self, risk: &str) -> Option<&Exposure> {
        self.values.get(risk)
    }
}

/// One counterfactual unit for PAF computation: either a single
/// uncorrelated risk, or a whole correlation group whose members are moved
/// to TMREL jointly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contributor {
    pub name: String,
    pub risks: Vec<String>,
}

/// Applies configured risk effects to resolved rates.
#[derive(Debug, Clone)]
pub struct RiskEffectEngine {
    risks: HashMap<String, RiskFactor>,
    effects: Vec<RiskEffect>,
    by_target: HashMap<RateTarget, Vec<usize>>,
    correlation: CorrelationSampler,
}

impl RiskEffectEngine {
    /// Build and validate the engine.
    ///
    /// Checks, in order: every effect references a known risk; mediation
    /// weights are in [0, 1]; the mediator-before-mediated dependency graph
    /// is acyclic; relative-risk functions match their risk's kind and
    /// TMREL form; correlation-group declarations agree with the sampler.
    pub fn new(
        risks: Vec<RiskFactor>,
        effects: Vec<RiskEffect>,
        correlation: CorrelationSampler,
    ) -> Result<Self, ConfigurationError> {
        let risks: HashMap<String, RiskFactor> =
            risks.into_iter().map(|r| (r.name.clone(), r)).collect();

        for effect in &effects {
            let risk = risks
                .get(&effect.risk)
                .ok_or_else(|| ConfigurationError::UnknownRiskReference(effect.risk.clone()))?;

            if let Some(mediation) = &effect.mediation {
                if !risks.contains_key(&mediation.mediator_risk) {
                    return Err(ConfigurationError::UnknownRiskReference(
                        mediation.mediator_risk.clone(),
                    ));
                }
                if !(0.0..=1.0).contains(&mediation.weight) {
                    return Err(ConfigurationError::InvalidMediationWeight {
                        risk: effect.risk.clone(),
                        weight: mediation.weight,
                    });
                }
            }

            let bad = |reason: &str| ConfigurationError::InvalidRiskEffect {
                risk: effect.risk.clone(),
                reason: reason.to_string(),
            };
            match &effect.relative_risk {
                RelativeRisk::LogLinear { .. } => {
                    if matches!(risk.kind, RiskKind::Categorical) {
                        return Err(bad("log-linear relative risk on a categorical risk"));
                    }
                    if !matches!(risk.tmrel, Tmrel::Level(_)) {
                        return Err(bad("log-linear relative risk requires a TMREL level"));
                    }
                }
                RelativeRisk::PerCategory { .. } => {
                    if !matches!(risk.kind, RiskKind::Categorical) {
                        return Err(bad("per-category relative risk on a continuous risk"));
                    }
                    if !matches!(risk.tmrel, Tmrel::ReferenceCategory(_)) {
                        return Err(bad("per-category relative risk requires a reference category"));
                    }
                }
            }
        }

        validate_mediation_order(&risks, &effects)?;

        for risk in risks.values() {
            if let Some(group) = &risk.correlation_group {
                let members = correlation.group_members(group).ok_or_else(|| {
                    ConfigurationError::BadCorrelationGroup {
                        group: group.clone(),
                        reason: format!("declared by risk {} but not configured", risk.name),
                    }
                })?;
                if !members.contains(&risk.name) {
                    return Err(ConfigurationError::BadCorrelationGroup {
                        group: group.clone(),
                        reason: format!("risk {} is not a member", risk.name),
                    });
                }
            }
        }

        let mut by_target: HashMap<RateTarget, Vec<usize>> = HashMap::new();
        for (idx, effect) in effects.iter().enumerate() {
            by_target.entry(effect.target.clone()).or_default().push(idx);
        }

        Ok(Self {
            risks,
            effects,
            by_target,
            correlation,
        })
    }

    /// Engine with no risks at all; every rate passes through unadjusted.
    pub fn unadjusted() -> Self {
        Self {
            risks: HashMap::new(),
            effects: Vec::new(),
            by_target: HashMap::new(),
            correlation: CorrelationSampler::empty(),
        }
    }

    pub fn correlation(&self) -> &CorrelationSampler {
        &self.correlation
    }

    // ========================================================================
    // Exposure sampling
    // ========================================================================

    /// Sample one simulant's exposure vector.
    ///
    /// Risks in a correlation group take their propensity from the
    /// pre-correlated joint sample; all other risks draw an independent
    /// keyed propensity. Exposures are sampled once per draw (step 0 keys).
    pub fn sample_exposures(
        &self,
        key: &DrawKey,
        simulant: u64,
    ) -> Result<ExposureVector, RiskError> {
        let correlated = self.correlation.sample_propensities(key, simulant);
        let mut exposures = ExposureVector::new();
        for (name, risk) in &self.risks {
            let propensity = match &risk.correlation_group {
                Some(_) => *correlated
                    .get(name)
                    .ok_or_else(|| RiskError::UnknownRisk(name.clone()))?,
                None => key.uniform(simulant, &format!("exposure.{}", name), 0),
            };
            exposures.insert(name.clone(), self.exposure_from_propensity(risk, propensity)?);
        }
        Ok(exposures)
    }

    fn exposure_from_propensity(
        &self,
        risk: &RiskFactor,
        propensity: f64,
    ) -> Result<Exposure, RiskError> {
        let exposure = match &risk.distribution {
            ExposureDistribution::Normal { mean, std_dev } => {
                Exposure::Continuous(mean + std_dev * stats::normal_ppf(propensity))
            }
            ExposureDistribution::LogNormal { mu, sigma } => {
                Exposure::Continuous((mu + sigma * stats::normal_ppf(propensity)).exp())
            }
            ExposureDistribution::Categorical { categories } => {
                let total: f64 = categories.iter().map(|(_, w)| w).sum();
                let mut cumulative = 0.0;
                let scaled = propensity * total;
                let mut chosen = None;
                for (category, weight) in categories {
                    cumulative += weight;
                    if scaled < cumulative {
                        chosen = Some(category.clone());
                        break;
                    }
                }
                // propensity exactly at the top of the range lands in the
                // last category
                let category = chosen.or_else(|| categories.last().map(|(c, _)| c.clone()));
                match category {
                    Some(c) => Exposure::Category(c),
                    None => {
                        return Err(RiskError::InvalidExposure {
                            risk: risk.name.clone(),
                            value: propensity,
                        })
                    }
                }
            }
        };

        match exposure {
            Exposure::Continuous(value) => {
                let clipped = match risk.kind {
                    RiskKind::TruncatedContinuous { floor, ceiling } => {
                        value.clamp(floor, ceiling)
                    }
                    _ => value,
                };
                if !clipped.is_finite() {
                    return Err(RiskError::InvalidExposure {
                        risk: risk.name.clone(),
                        value: clipped,
                    });
                }
                Ok(Exposure::Continuous(clipped))
            }
            categorical => Ok(categorical),
        }
    }

    /// Copy of `observed` with the listed risks moved to their TMREL.
    pub fn counterfactual_exposures(
        &self,
        observed: &ExposureVector,
        at_tmrel: &[String],
    ) -> Result<ExposureVector, RiskError> {
        let mut exposures = observed.clone();
        for name in at_tmrel {
            let risk = self
                .risks
                .get(name)
                .ok_or_else(|| RiskError::UnknownRisk(name.clone()))?;
            let exposure = match &risk.tmrel {
                Tmrel::Level(level) => Exposure::Continuous(*level),
                Tmrel::ReferenceCategory(category) => Exposure::Category(category.clone()),
            };
            exposures.insert(name.clone(), exposure);
        }
        Ok(exposures)
    }

    // ========================================================================
    // Rate adjustment
    // ========================================================================

    /// Combined relative risk on `target` for one exposure vector.
    ///
    /// Effects are bucketed by correlation group first: each group yields a
    /// single combined term evaluated on the joint sample, independent
    /// risks multiply on their own. With no effects on the target the
    /// result is 1.
    pub fn relative_risk(
        &self,
        target: &RateTarget,
        exposures: &ExposureVector,
    ) -> Result<f64, RiskError> {
        let Some(effect_indices) = self.by_target.get(target) else {
            return Ok(1.0);
        };

        // BTreeMap keeps bucket multiplication order stable
        let mut buckets: BTreeMap<Option<String>, f64> = BTreeMap::new();
        for idx in effect_indices {
            let effect = &self.effects[*idx];
            let rr = self.effect_relative_risk(effect, exposures)?;
            let group = self
                .risks
                .get(&effect.risk)
                .and_then(|r| r.correlation_group.clone());
            *buckets.entry(group).or_insert(1.0) *= rr;
        }
        Ok(buckets.values().product())
    }

    /// Adjusted rate = base rate × combined relative risk.
    pub fn adjust_rate(
        &self,
        target: &RateTarget,
        base_rate: f64,
        exposures: &ExposureVector,
    ) -> Result<f64, RiskError> {
        Ok(base_rate * self.relative_risk(target, exposures)?)
    }

    fn effect_relative_risk(
        &self,
        effect: &RiskEffect,
        exposures: &ExposureVector,
    ) -> Result<f64, RiskError> {
        let risk = self
            .risks
            .get(&effect.risk)
            .ok_or_else(|| RiskError::UnknownRisk(effect.risk.clone()))?;
        let exposure = exposures
            .get(&effect.risk)
            .ok_or_else(|| RiskError::UnknownRisk(effect.risk.clone()))?;

        let rr = match (&effect.relative_risk, exposure) {
            (RelativeRisk::LogLinear { beta }, Exposure::Continuous(value)) => {
                let tmrel = match risk.tmrel {
                    Tmrel::Level(level) => level,
                    // rejected at build time
                    Tmrel::ReferenceCategory(_) => {
                        return Err(RiskError::ExposureKindMismatch {
                            risk: effect.risk.clone(),
                        })
                    }
                };
                (beta * (value - tmrel)).exp()
            }
            (RelativeRisk::PerCategory { rr }, Exposure::Category(category)) => {
                *rr.get(category).unwrap_or(&1.0)
            }
            _ => {
                return Err(RiskError::ExposureKindMismatch {
                    risk: effect.risk.clone(),
                })
            }
        };

        // Direct contribution scaled down by the mediated fraction; with
        // weight 1 the direct relative risk collapses to exactly 1
        let rr = match &effect.mediation {
            Some(mediation) => rr.powf(1.0 - mediation.weight),
            None => rr,
        };
        Ok(rr)
    }

    /// Mean relative risk on `target` across a population; feeds the cheap
    /// per-step PAF observation `(mean_rr - 1) / mean_rr`.
    pub fn mean_relative_risk(
        &self,
        target: &RateTarget,
        exposures: &[ExposureVector],
    ) -> Result<f64, RiskError> {
        if exposures.is_empty() {
            return Ok(1.0);
        }
        let mut sum = 0.0;
        for vector in exposures {
            sum += self.relative_risk(target, vector)?;
        }
        Ok(sum / exposures.len() as f64)
    }

    // ========================================================================
    // Contributors (counterfactual units for PAF)
    // ========================================================================

    /// The counterfactual units across all configured effects: one per
    /// uncorrelated risk, one per correlation group. Sorted by name so
    /// callers iterate deterministically.
    pub fn contributors(&self) -> Vec<Contributor> {
        let mut seen = HashSet::new();
        let mut contributors = Vec::new();
        for effect in &self.effects {
            let Some(risk) = self.risks.get(&effect.risk) else {
                continue;
            };
            match &risk.correlation_group {
                Some(group) => {
                    if seen.insert(group.clone()) {
                        let members = self
                            .correlation
                            .group_members(group)
                            .map(<[String]>::to_vec)
                            .unwrap_or_default();
                        contributors.push(Contributor {
                            name: group.clone(),
                            risks: members,
                        });
                    }
                }
                None => {
                    if seen.insert(risk.name.clone()) {
                        contributors.push(Contributor {
                            name: risk.name.clone(),
                            risks: vec![risk.name.clone()],
                        });
                    }
                }
            }
        }
        contributors.sort_by(|a, b| a.name.cmp(&b.name));
        contributors
    }

    /// Targets a contributor's risks act on, sorted for deterministic
    /// iteration.
    pub fn contributor_targets(&self, contributor: &Contributor) -> Vec<RateTarget> {
        let mut targets: Vec<RateTarget> = self
            .effects
            .iter()
            .filter(|e| contributor.risks.contains(&e.risk))
            .map(|e| e.target.clone())
            .collect();
        targets.sort_by(|a, b| (&a.cause, &a.measure).cmp(&(&b.cause, &b.measure)));
        targets.dedup();
        targets
    }

    /// All targets with at least one effect, sorted.
    pub fn targets(&self) -> Vec<RateTarget> {
        let mut targets: Vec<RateTarget> = self.by_target.keys().cloned().collect();
        targets.sort_by(|a, b| (&a.cause, &a.measure).cmp(&(&b.cause, &b.measure)));
        targets
    }
}

/// Resolve the mediation dependency graph (mediator before mediated) to a
/// topological order; a cycle is a configuration bug.
fn validate_mediation_order(
    risks: &HashMap<String, RiskFactor>,
    effects: &[RiskEffect],
) -> Result<Vec<String>, ConfigurationError> {
    // edges: mediator -> mediated
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = risks.keys().map(|k| (k.as_str(), 0)).collect();
    for effect in effects {
        if let Some(mediation) = &effect.mediation {
            dependents
                .entry(mediation.mediator_risk.as_str())
                .or_default()
                .push(effect.risk.as_str());
            *in_degree.entry(effect.risk.as_str()).or_insert(0) += 1;
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(k, _)| *k)
        .collect();
    ready.sort_unstable();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(risk) = ready.pop() {
        order.push(risk.to_string());
        for dependent in dependents.get(risk).into_iter().flatten() {
            let degree = in_degree
                .get_mut(dependent)
                .ok_or_else(|| ConfigurationError::UnknownRiskReference(dependent.to_string()))?;
            *degree -= 1;
            if *degree == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() < in_degree.len() {
        let stuck = in_degree
            .iter()
            .find(|(_, d)| **d > 0)
            .map(|(k, _)| k.to_string())
            .unwrap_or_default();
        return Err(ConfigurationError::MediationCycle(stuck));
    }
    Ok(order)
}
