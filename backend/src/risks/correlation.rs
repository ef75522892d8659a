//! Correlated exposure propensities
//!
//! Risks in one correlation group (e.g. BMI, LDL-C, SBP, FPG) are jointly
//! sampled through a Gaussian copula: a multivariate normal variate keyed on
//! the simulant is pushed through the normal CDF to yield one propensity per
//! risk. The risk-effect engine consumes these pre-correlated propensities;
//! it never samples a grouped risk independently.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::cause::ConfigurationError;
use crate::risks::stats::normal_cdf;
use crate::rng::DrawKey;

/// One correlation group: member risks plus their correlation matrix.
///
/// `matrix[i][j]` is the correlation between `risks[i]` and `risks[j]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationGroup {
    pub name: String,
    pub risks: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
}

/// Samples joint propensities for all correlation groups.
#[derive(Debug, Clone)]
pub struct CorrelationSampler {
    groups: Vec<PreparedGroup>,
}

#[derive(Debug, Clone)]
struct PreparedGroup {
    name: String,
    risks: Vec<String>,
    /// Lower-triangular Cholesky factor of the correlation matrix
    cholesky: Vec<Vec<f64>>,
}

impl CorrelationSampler {
    /// Validate the groups and precompute Cholesky factors.
    ///
    /// Fails with [`ConfigurationError::BadCorrelationGroup`] when a matrix
    /// is not square, not symmetric, lacks a unit diagonal, or is not
    /// positive definite.
    pub fn new(groups: Vec<CorrelationGroup>) -> Result<Self, ConfigurationError> {
        let mut prepared = Vec::with_capacity(groups.len());
        for group in groups {
            let n = group.risks.len();
            let bad = |reason: &str| ConfigurationError::BadCorrelationGroup {
                group: group.name.clone(),
                reason: reason.to_string(),
            };
            if group.matrix.len() != n || group.matrix.iter().any(|row| row.len() != n) {
                return Err(bad("matrix shape does not match member count"));
            }
            for i in 0..n {
                if (group.matrix[i][i] - 1.0).abs() > 1e-9 {
                    return Err(bad("diagonal entries must be 1"));
                }
                for j in 0..i {
                    if (group.matrix[i][j] - group.matrix[j][i]).abs() > 1e-9 {
                        return Err(bad("matrix must be symmetric"));
                    }
                }
            }
            let cholesky =
                cholesky(&group.matrix).ok_or_else(|| bad("matrix is not positive definite"))?;
            prepared.push(PreparedGroup {
                name: group.name,
                risks: group.risks,
                cholesky,
            });
        }
        Ok(Self { groups: prepared })
    }

    /// Sampler with no correlation groups; every risk is independent.
    pub fn empty() -> Self {
        Self { groups: Vec::new() }
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }

    /// Member risks of a group, in matrix order.
    pub fn group_members(&self, name: &str) -> Option<&[String]> {
        self.groups
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.risks.as_slice())
    }

    /// Joint propensities for one simulant across all groups.
    ///
    /// Deterministic in (key, simulant): the underlying normal variate is
    /// drawn from a stream labeled by the group name, so re-sampling is
    /// bit-identical and independent of simulant processing order.
    pub fn sample_propensities(&self, key: &DrawKey, simulant: u64) -> HashMap<String, f64> {
        let mut propensities = HashMap::new();
        for group in &self.groups {
            let label = format!("correlated_propensity.{}", group.name);
            let mut stream = key.stream(simulant, &label, 0);
            let independent: Vec<f64> =
                (0..group.risks.len()).map(|_| stream.next_normal()).collect();
            for (i, risk) in group.risks.iter().enumerate() {
                let z: f64 = group.cholesky[i]
                    .iter()
                    .zip(&independent)
                    .map(|(l, e)| l * e)
                    .sum();
                propensities.insert(risk.clone(), normal_cdf(z));
            }
        }
        propensities
    }
}

/// Lower-triangular Cholesky decomposition; None if not positive definite.
fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let diag = matrix[i][i] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[i][j] = diag.sqrt();
            } else {
                l[i][j] = (matrix[i][j] - sum) / l[j][j];
            }
        }
    }
    Some(l)
}
