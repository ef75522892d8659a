//! Risk factors and risk effects
//!
//! A `RiskFactor` describes how an exposure is distributed across the
//! population; a `RiskEffect` binds a risk factor to a target rate with a
//! relative-risk function, an optional mediation weight, and (via the risk
//! factor) an optional correlation group. These are plain configuration
//! data; the adjustment math lives in `crate::risks`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Kind of risk exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    Continuous,

    /// Continuous exposure clipped (not resampled) to [floor, ceiling]
    TruncatedContinuous { floor: f64, ceiling: f64 },

    Categorical,
}

/// Exposure distribution parameters.
///
/// Continuous exposures are sampled by inverting the distribution at a
/// per-simulant propensity in [0, 1); categorical exposures select the
/// category whose cumulative weight brackets the propensity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureDistribution {
    Normal {
        mean: f64,
        std_dev: f64,
    },
    LogNormal {
        /// Mean of the underlying normal
        mu: f64,
        /// Std dev of the underlying normal
        sigma: f64,
    },
    Categorical {
        /// Categories with sampling weights; weights need not sum to 1
        categories: Vec<(String, f64)>,
    },
}

/// One risk factor definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Identifier, e.g. "high_systolic_blood_pressure"
    pub name: String,

    pub kind: RiskKind,

    pub distribution: ExposureDistribution,

    /// Risks sharing a group are jointly sampled via a copula; their
    /// exposures must come pre-correlated from the correlation component
    pub correlation_group: Option<String>,

    /// Theoretical-minimum-risk exposure level: the counterfactual
    /// baseline. For categorical risks this is the reference category.
    pub tmrel: Tmrel,
}

/// Counterfactual baseline exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tmrel {
    Level(f64),
    ReferenceCategory(String),
}

/// Target of a risk effect: a rate on a cause.
///
/// `measure` uses the same naming as the rate tables, e.g.
/// `"acute_myocardial_infarction.incidence_rate"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateTarget {
    pub cause: String,
    pub measure: String,
}

impl RateTarget {
    pub fn new(cause: impl Into<String>, measure: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            measure: measure.into(),
        }
    }
}

impl std::fmt::Display for RateTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.cause, self.measure)
    }
}

/// Relative-risk function of a risk effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativeRisk {
    /// RR = exp(beta * (exposure - tmrel))
    LogLinear { beta: f64 },

    /// RR looked up per category; missing categories (the reference) get 1.0
    PerCategory { rr: HashMap<String, f64> },
}

/// Mediation declaration: `weight` is the fraction of this effect that
/// operates through `mediator_risk` and must not be double-counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mediation {
    pub mediator_risk: String,
    /// In [0, 1]; 1.0 means fully mediated (direct RR collapses to 1)
    pub weight: f64,
}

/// Binds a risk factor to a target rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEffect {
    pub risk: String,
    pub target: RateTarget,
    pub relative_risk: RelativeRisk,
    pub mediation: Option<Mediation>,
}

/// One simulant's realized exposure to one risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Exposure {
    Continuous(f64),
    Category(String),
}
