//! Options for GITT and ICI parameter extraction.

use af_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Recognised options for [`crate::extract_params`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GittOptions {
    /// Minimum r^2 of the sqrt(t) regression before a pulse's diffusivity
    /// is marked undefined. Must lie in (0, 1].
    #[serde(rename = "R2_lim")]
    pub r2_lim: f64,
    /// Fill undefined diffusivities by makima interpolation over the
    /// intercalation fraction of the valid pulses.
    pub replace_nans: bool,
}

impl Default for GittOptions {
    fn default() -> Self {
        Self { r2_lim: 0.95, replace_nans: true }
    }
}

impl GittOptions {
    /// Parse a keyword map such as `{"R2_lim": 0.9, "replace_nans": false}`.
    ///
    /// Missing keys take their defaults; unknown keys or wrongly typed values
    /// are configuration errors.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let options: Self = serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("invalid GITT options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if !(self.r2_lim > 0.0 && self.r2_lim <= 1.0) {
            return Err(Error::Config(format!("'R2_lim' must be in (0, 1], got {}", self.r2_lim)));
        }
        Ok(())
    }
}

/// Recognised options for [`crate::extract_ici`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IciOptions {
    /// Earliest time into a rest used by the relaxation fit [s]
    pub tmin: f64,
    /// Latest time into a rest used by the relaxation fit [s]
    pub tmax: f64,
}

impl Default for IciOptions {
    fn default() -> Self {
        Self { tmin: 1.0, tmax: 10.0 }
    }
}

impl IciOptions {
    /// Parse a keyword map such as `{"tmin": 2, "tmax": 20}`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let options: Self = serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("invalid ICI options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Reject an empty or negative fitting window.
    pub fn validate(&self) -> Result<()> {
        if !(self.tmin.is_finite() && self.tmax.is_finite()) {
            return Err(Error::Config("'tmin' and 'tmax' must be finite".to_string()));
        }
        if self.tmin < 0.0 || self.tmax <= self.tmin {
            return Err(Error::Config(format!(
                "expected 0 <= tmin < tmax, got tmin={} tmax={}",
                self.tmin, self.tmax
            )));
        }
        Ok(())
    }
}
