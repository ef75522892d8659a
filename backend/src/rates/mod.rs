//! Rate resolution from demographic lookup tables
//!
//! A `RateTable` holds one logical quantity (incidence rate, transition
//! rate, remission rate, proportion) binned by (sex, age, year). The
//! `RateResolver` maps quantity names to tables and resolves a value for a
//! simulant's demographic key at a point in simulated time. Resolution is a
//! pure function of the inputs and the immutable tables.
//!
//! Interpolation is zero-order (nearest bin) by default. Extrapolation past
//! the table's year range either clamps to the boundary year or fails,
//! depending on configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::simulant::Sex;

/// Rate resolution failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RateError {
    /// Configuration bug: no table loaded under this quantity name
    #[error("no rate table loaded for quantity '{0}'")]
    UnknownQuantity(String),

    /// Lookup outside the supported domain without extrapolation allowed;
    /// aborts the current draw
    #[error("{quantity}: {axis} {value} outside table range [{start}, {end})")]
    OutOfRange {
        quantity: String,
        axis: &'static str,
        value: f64,
        start: f64,
        end: f64,
    },
}

/// Interpolation order for table lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Zero-order step function: the bin containing the key wins
    #[default]
    Nearest,

    /// Linear interpolation between adjacent year-bin midpoints
    LinearInYear,
}

/// Demographic coordinates of one lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemographicKey {
    pub age: f64,
    pub sex: Sex,
    pub year: f64,
}

/// One table row: a value over a (sex, age-bin, year-bin) cell.
///
/// Bins are half-open: `[start, end)`. These columns mirror the artifact
/// index (sex, age_start, age_end, year_start, year_end).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub sex: Sex,
    pub age_start: f64,
    pub age_end: f64,
    pub year_start: f64,
    pub year_end: f64,
    pub value: f64,
}

/// Lookup table for one logical quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTable {
    rows: Vec<TableRow>,
    year_start: f64,
    year_end: f64,
}

impl RateTable {
    /// Build a table from its rows.
    ///
    /// # Panics
    /// Panics if `rows` is empty; an empty table is a configuration bug
    /// that should never survive artifact loading.
    pub fn new(rows: Vec<TableRow>) -> Self {
        assert!(!rows.is_empty(), "rate table must have at least one row");
        let year_start = rows.iter().map(|r| r.year_start).fold(f64::MAX, f64::min);
        let year_end = rows.iter().map(|r| r.year_end).fold(f64::MIN, f64::max);
        Self {
            rows,
            year_start,
            year_end,
        }
    }

    /// A single-value table covering all demographics, handy for constant
    /// rates in tests and calibration runs.
    pub fn constant(value: f64) -> Self {
        let row = |sex| TableRow {
            sex,
            age_start: 0.0,
            age_end: 125.0,
            year_start: 1900.0,
            year_end: 2200.0,
            value,
        };
        Self::new(vec![row(Sex::Female), row(Sex::Male)])
    }

    pub fn year_range(&self) -> (f64, f64) {
        (self.year_start, self.year_end)
    }

    fn lookup(
        &self,
        quantity: &str,
        key: &DemographicKey,
        interpolation: Interpolation,
        extrapolate: bool,
    ) -> Result<f64, RateError> {
        let mut year = key.year;
        if year < self.year_start || year >= self.year_end {
            if !extrapolate {
                return Err(RateError::OutOfRange {
                    quantity: quantity.to_string(),
                    axis: "year",
                    value: year,
                    start: self.year_start,
                    end: self.year_end,
                });
            }
            // Clamp to the nearest boundary year, just inside the range
            year = year.clamp(self.year_start, self.year_end - 1e-9);
        }

        let cell = self
            .rows
            .iter()
            .find(|row| {
                row.sex == key.sex
                    && key.age >= row.age_start
                    && key.age < row.age_end
                    && year >= row.year_start
                    && year < row.year_end
            })
            .ok_or(RateError::OutOfRange {
                quantity: quantity.to_string(),
                axis: "age",
                value: key.age,
                start: 0.0,
                end: f64::INFINITY,
            })?;

        match interpolation {
            Interpolation::Nearest => Ok(cell.value),
            Interpolation::LinearInYear => {
                Ok(self.linear_in_year(key, year, cell).unwrap_or(cell.value))
            }
        }
    }

    /// Interpolate between the midpoints of the containing year bin and its
    /// neighbor on the side of the key. Falls back to the cell value at the
    /// table edges.
    fn linear_in_year(&self, key: &DemographicKey, year: f64, cell: &TableRow) -> Option<f64> {
        let mid = (cell.year_start + cell.year_end) / 2.0;
        let neighbor = self
            .rows
            .iter()
            .filter(|row| {
                row.sex == key.sex && key.age >= row.age_start && key.age < row.age_end
            })
            .filter(|row| {
                if year < mid {
                    row.year_end <= cell.year_start + 1e-9
                } else {
                    row.year_start >= cell.year_end - 1e-9
                }
            })
            .min_by(|a, b| {
                let da = (a.year_start - cell.year_start).abs();
                let db = (b.year_start - cell.year_start).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })?;
        let neighbor_mid = (neighbor.year_start + neighbor.year_end) / 2.0;
        let t = (year - mid) / (neighbor_mid - mid);
        Some(cell.value + t * (neighbor.value - cell.value))
    }
}

/// Resolves named rate quantities against loaded tables.
///
/// # Example
/// ```
/// use cvd_simulator_core_rs::{DemographicKey, RateResolver, RateTable, Sex};
/// use std::collections::HashMap;
///
/// let mut tables = HashMap::new();
/// tables.insert("stroke.incidence_rate".to_string(), RateTable::constant(0.01));
/// let resolver = RateResolver::new(tables);
///
/// let key = DemographicKey { age: 60.0, sex: Sex::Female, year: 2022.5 };
/// let rate = resolver.resolve("stroke.incidence_rate", &key).unwrap();
/// assert_eq!(rate, 0.01);
/// ```
#[derive(Debug, Clone)]
pub struct RateResolver {
    tables: HashMap<String, RateTable>,
    interpolation: Interpolation,
    extrapolate: bool,
}

impl RateResolver {
    /// Default resolver: nearest interpolation, extrapolation allowed
    /// (clamped to the boundary year).
    pub fn new(tables: HashMap<String, RateTable>) -> Self {
        Self {
            tables,
            interpolation: Interpolation::default(),
            extrapolate: true,
        }
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Disallow lookups past the table year range; they fail with
    /// [`RateError::OutOfRange`] instead of clamping.
    pub fn strict_year_range(mut self) -> Self {
        self.extrapolate = false;
        self
    }

    pub fn has_table(&self, quantity: &str) -> bool {
        self.tables.contains_key(quantity)
    }

    /// Resolve the unadjusted value of `quantity` for a demographic key.
    pub fn resolve(&self, quantity: &str, key: &DemographicKey) -> Result<f64, RateError> {
        let table = self
            .tables
            .get(quantity)
            .ok_or_else(|| RateError::UnknownQuantity(quantity.to_string()))?;
        table.lookup(quantity, key, self.interpolation, self.extrapolate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(age: f64, year: f64) -> DemographicKey {
        DemographicKey {
            age,
            sex: Sex::Female,
            year,
        }
    }

    fn banded_table() -> RateTable {
        let row = |year_start: f64, value: f64| TableRow {
            sex: Sex::Female,
            age_start: 0.0,
            age_end: 125.0,
            year_start,
            year_end: year_start + 1.0,
            value,
        };
        RateTable::new(vec![row(2020.0, 0.10), row(2021.0, 0.20), row(2022.0, 0.40)])
    }

    fn resolver(table: RateTable) -> RateResolver {
        let mut tables = HashMap::new();
        tables.insert("q".to_string(), table);
        RateResolver::new(tables)
    }

    #[test]
    fn test_unknown_quantity() {
        let r = resolver(banded_table());
        let err = r.resolve("nope", &key(50.0, 2020.5)).unwrap_err();
        assert!(matches!(err, RateError::UnknownQuantity(_)));
    }

    #[test]
    fn test_nearest_picks_containing_bin() {
        let r = resolver(banded_table());
        assert_eq!(r.resolve("q", &key(50.0, 2021.9)).unwrap(), 0.20);
        assert_eq!(r.resolve("q", &key(50.0, 2022.0)).unwrap(), 0.40);
    }

    #[test]
    fn test_extrapolation_clamps_to_boundary() {
        let r = resolver(banded_table());
        assert_eq!(r.resolve("q", &key(50.0, 1995.0)).unwrap(), 0.10);
        assert_eq!(r.resolve("q", &key(50.0, 2030.0)).unwrap(), 0.40);
    }

    #[test]
    fn test_strict_range_fails_out_of_range() {
        let r = resolver(banded_table()).strict_year_range();
        let err = r.resolve("q", &key(50.0, 2030.0)).unwrap_err();
        assert!(matches!(err, RateError::OutOfRange { axis: "year", .. }));
    }

    #[test]
    fn test_missing_sex_rows_are_out_of_range() {
        // Table has only Female rows
        let r = resolver(banded_table());
        let male = DemographicKey {
            age: 50.0,
            sex: Sex::Male,
            year: 2020.5,
        };
        assert!(r.resolve("q", &male).is_err());
    }

    #[test]
    fn test_linear_in_year_interpolates_between_midpoints() {
        let r = resolver(banded_table()).with_interpolation(Interpolation::LinearInYear);
        // Midpoints: 2020.5 → 0.10, 2021.5 → 0.20
        let v = r.resolve("q", &key(50.0, 2021.0)).unwrap();
        assert!((v - 0.15).abs() < 1e-12, "got {}", v);
    }
}
