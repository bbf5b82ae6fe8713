//! Accumulated fit results across profiles.

use crate::degradation::{DegradationResult, post_process_with_std};
use crate::fitter::{FitSummary, PARAM_NAMES};
use af_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One fitted profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRow {
    /// Measured full-cell capacity [Ah]
    pub ah: f64,
    /// `[xn0, xn1, xp0, xp1, iR]`
    pub x: [f64; 5],
    /// Standard deviations of `x`; NaN where unavailable
    pub x_std: [f64; 5],
    /// Final cost
    pub fun: f64,
    /// Fit success flag
    pub success: bool,
    /// Fit termination message
    pub message: String,
    /// Caller-declared columns; NaN when not supplied for this row
    pub extra: BTreeMap<String, f64>,
}

/// Table of fit results with optional caller-defined numeric columns.
///
/// Extra columns are declared once at construction; appending a value for
/// an undeclared column is rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitTable {
    extra_columns: Vec<String>,
    rows: Vec<FitRow>,
}

const BASE_COLUMNS: [&str; 14] = [
    "Ah", "xn0", "xn0_std", "xn1", "xn1_std", "xp0", "xp0_std", "xp1", "xp1_std", "iR", "iR_std",
    "fun", "success", "message",
];

impl FitTable {
    /// Empty table without extra columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table with the given extra columns (e.g. `"cycle"`, `"days"`).
    pub fn with_extra_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut extra_columns: Vec<String> = Vec::new();
        for name in columns.into_iter().map(Into::into) {
            if BASE_COLUMNS.contains(&name.as_str()) || extra_columns.contains(&name) {
                return Err(Error::Validation(format!("duplicate column '{name}'")));
            }
            extra_columns.push(name);
        }
        Ok(Self { extra_columns, rows: Vec::new() })
    }

    /// Declared extra column names.
    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    /// Append a fit with its measured capacity and any extra column values.
    pub fn append(&mut self, ah: f64, summary: &FitSummary, extra: &[(&str, f64)]) -> Result<()> {
        let mut values: BTreeMap<String, f64> =
            self.extra_columns.iter().map(|c| (c.clone(), f64::NAN)).collect();
        for (name, value) in extra {
            match values.get_mut(*name) {
                Some(slot) => *slot = *value,
                None => {
                    return Err(Error::Validation(format!(
                        "column '{name}' does not exist; extra columns must be declared when the \
                         table is created"
                    )));
                }
            }
        }
        self.rows.push(FitRow {
            ah,
            x: summary.x,
            x_std: summary.x_std.unwrap_or([f64::NAN; 5]),
            fun: summary.fun,
            success: summary.success,
            message: summary.message.clone(),
            extra: values,
        });
        Ok(())
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[FitRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no row has been appended.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A numeric column by name: `Ah`, a parameter, `<param>_std`, `fun`, or an extra column.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let pick = |f: &dyn Fn(&FitRow) -> f64| -> Option<Vec<f64>> {
            Some(self.rows.iter().map(f).collect())
        };
        if name == "Ah" {
            return pick(&|r| r.ah);
        }
        if name == "fun" {
            return pick(&|r| r.fun);
        }
        if let Some(i) = PARAM_NAMES.iter().position(|p| *p == name) {
            return pick(&|r| r.x[i]);
        }
        if let Some(i) = name
            .strip_suffix("_std")
            .and_then(|base| PARAM_NAMES.iter().position(|p| *p == base))
        {
            return pick(&|r| r.x_std[i]);
        }
        if self.extra_columns.iter().any(|c| c == name) {
            return pick(&|r| r.extra.get(name).copied().unwrap_or(f64::NAN));
        }
        None
    }

    /// Degradation metrics of all rows, first row as reference, with
    /// uncertainties propagated from the window standard deviations.
    pub fn degradation(&self) -> Result<Vec<DegradationResult>> {
        let capacity: Vec<f64> = self.rows.iter().map(|r| r.ah).collect();
        let x: Vec<[f64; 4]> = self.rows.iter().map(|r| [r.x[0], r.x[1], r.x[2], r.x[3]]).collect();
        let x_std: Vec<[f64; 4]> =
            self.rows.iter().map(|r| [r.x_std[0], r.x_std[1], r.x_std[2], r.x_std[3]]).collect();
        post_process_with_std(&capacity, &x, &x_std)
    }
}
