//! Common data types for ampfit

use crate::constants::{FARADAY, SECONDS_PER_HOUR};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Physical description of one electrode and its active material.
///
/// Fields are public so a caller can reassign them; every derived quantity is
/// recomputed on each call, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellGeometry {
    /// Electrode thickness [m]
    pub thick_ed: f64,
    /// Projected electrode area [m2]
    pub area_ed: f64,
    /// Electrolyte/pore volume fraction [-]
    pub eps_el: f64,
    /// Carbon-binder-domain volume fraction [-]
    pub eps_cbd: f64,
    /// Active material particle radius [m]
    pub radius_am: f64,
    /// Active material mass density [kg/m3]
    pub rho_am: f64,
    /// Total active material mass [kg]
    pub mass_am: f64,
    /// Active material molar mass [kg/kmol]
    pub molar_mass_am: f64,
}

impl CellGeometry {
    /// Create a validated cell description.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thick_ed: f64,
        area_ed: f64,
        eps_el: f64,
        eps_cbd: f64,
        radius_am: f64,
        rho_am: f64,
        mass_am: f64,
        molar_mass_am: f64,
    ) -> Result<Self> {
        let geometry = Self {
            thick_ed,
            area_ed,
            eps_el,
            eps_cbd,
            radius_am,
            rho_am,
            mass_am,
            molar_mass_am,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Check the volume-fraction invariant and positivity of the physical sizes.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("thick_ed", self.thick_ed),
            ("area_ed", self.area_ed),
            ("radius_am", self.radius_am),
            ("rho_am", self.rho_am),
            ("mass_am", self.mass_am),
            ("molar_mass_am", self.molar_mass_am),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Validation(format!(
                    "'{name}' must be finite and > 0, got {value}"
                )));
            }
        }
        for (name, value) in [("eps_el", self.eps_el), ("eps_cbd", self.eps_cbd)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Validation(format!(
                    "'{name}' must be in [0, 1], got {value}"
                )));
            }
        }
        if self.eps_el + self.eps_cbd > 1.0 {
            return Err(Error::Validation(format!(
                "eps_el + eps_cbd must not exceed 1, got {}",
                self.eps_el + self.eps_cbd
            )));
        }
        Ok(())
    }

    /// Electrode volume [m3].
    pub fn volume_ed(&self) -> f64 {
        self.thick_ed * self.area_ed
    }

    /// Theoretical specific capacity [Ah/kg].
    pub fn spec_capacity_am(&self) -> f64 {
        FARADAY / (SECONDS_PER_HOUR * self.molar_mass_am)
    }

    /// Active material molar volume [m3/kmol].
    pub fn molar_vol_am(&self) -> f64 {
        self.molar_mass_am / self.rho_am
    }

    /// Active material volume fraction [-].
    pub fn eps_am(&self) -> f64 {
        1.0 - self.eps_el - self.eps_cbd
    }

    /// Total active material surface area [m2].
    pub fn surf_area_am(&self) -> f64 {
        3.0 * self.eps_am() * self.volume_ed() / self.radius_am
    }
}

/// GITT time series: time [s], current [A], voltage [V], and mean temperature [K].
///
/// Charge current is positive. Pass `invert_current = true` to flip an instrument
/// that records the opposite convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    time: Vec<f64>,
    current: Vec<f64>,
    voltage: Vec<f64>,
    avg_temperature: f64,
}

impl TimeSeries {
    /// Build a series, rejecting ragged arrays, non-finite samples, and
    /// non-increasing time.
    pub fn new(
        time: Vec<f64>,
        current: Vec<f64>,
        voltage: Vec<f64>,
        avg_temperature: f64,
        invert_current: bool,
    ) -> Result<Self> {
        let n = time.len();
        if n == 0 {
            return Err(Error::Validation("time series must be non-empty".to_string()));
        }
        if current.len() != n || voltage.len() != n {
            return Err(Error::Validation(format!(
                "time/current/voltage length mismatch: {}/{}/{}",
                n,
                current.len(),
                voltage.len()
            )));
        }
        if !(avg_temperature.is_finite() && avg_temperature > 0.0) {
            return Err(Error::Validation(format!(
                "avg_temperature must be finite and > 0 K, got {avg_temperature}"
            )));
        }
        for (name, values) in [("time", &time), ("current", &current), ("voltage", &voltage)] {
            if let Some(i) = values.iter().position(|v| !v.is_finite()) {
                return Err(Error::Validation(format!(
                    "'{name}' contains a non-finite value at index {i}"
                )));
            }
        }
        if let Some(i) = time.windows(2).position(|w| w[1] <= w[0]) {
            return Err(Error::Validation(format!(
                "'time' must be strictly increasing (t[{}]={} >= t[{}]={})",
                i,
                time[i],
                i + 1,
                time[i + 1]
            )));
        }

        let current =
            if invert_current { current.into_iter().map(|i| -i).collect() } else { current };

        Ok(Self { time, current, voltage, avg_temperature })
    }

    /// Recorded times [s].
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Current [A], positive for charge.
    pub fn current(&self) -> &[f64] {
        &self.current
    }

    /// Voltage [V].
    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    /// Average experiment temperature [K].
    pub fn avg_temperature(&self) -> f64 {
        self.avg_temperature
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Always false for a constructed series; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn nmc_geometry() -> CellGeometry {
        CellGeometry::new(75e-6, 1.767e-4, 0.3, 0.15, 1.8e-6, 4.7e3, 1.5e-5, 96.5).unwrap()
    }

    #[test]
    fn test_derived_geometry() {
        let cell = nmc_geometry();

        assert_relative_eq!(cell.volume_ed(), 75e-6 * 1.767e-4, max_relative = 1e-12);
        assert_relative_eq!(cell.eps_am(), 0.55, epsilon = 1e-12);
        assert_relative_eq!(cell.molar_vol_am(), 96.5 / 4.7e3, max_relative = 1e-12);
        assert_relative_eq!(
            cell.spec_capacity_am(),
            96485.33e3 / (3600.0 * 96.5),
            max_relative = 1e-12
        );
        assert_relative_eq!(
            cell.surf_area_am(),
            3.0 * 0.55 * cell.volume_ed() / 1.8e-6,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_derived_values_follow_reassignment() {
        let mut cell = nmc_geometry();
        let before = cell.surf_area_am();
        cell.radius_am *= 2.0;
        assert_relative_eq!(cell.surf_area_am(), 0.5 * before, max_relative = 1e-12);
    }

    #[test]
    fn test_volume_fractions_never_exceed_one() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let eps_el: f64 = rng.random_range(0.0..1.0);
            let eps_cbd: f64 = rng.random_range(0.0..=(1.0 - eps_el));
            let cell =
                CellGeometry::new(50e-6, 1e-4, eps_el, eps_cbd, 5e-6, 2.2e3, 1e-5, 72.0).unwrap();
            let total = cell.eps_am() + cell.eps_el + cell.eps_cbd;
            assert!(total <= 1.0 + 1e-12, "total volume fraction {total}");
            assert!(cell.eps_am() >= -1e-12);
        }
    }

    #[test]
    fn test_invalid_fractions_rejected() {
        let err = CellGeometry::new(50e-6, 1e-4, 0.7, 0.4, 5e-6, 2.2e3, 1e-5, 72.0).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = CellGeometry::new(50e-6, 1e-4, -0.1, 0.1, 5e-6, 2.2e3, 1e-5, 72.0).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = CellGeometry::new(0.0, 1e-4, 0.3, 0.1, 5e-6, 2.2e3, 1e-5, 72.0).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_time_series_rejects_non_increasing_time() {
        let err = TimeSeries::new(
            vec![0.0, 1.0, 1.0],
            vec![0.0, 1.0, 0.0],
            vec![3.7, 3.8, 3.7],
            298.15,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_time_series_rejects_length_mismatch() {
        let err =
            TimeSeries::new(vec![0.0, 1.0], vec![0.0], vec![3.7, 3.8], 298.15, false).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_time_series_invert_current() {
        let ts = TimeSeries::new(
            vec![0.0, 1.0, 2.0],
            vec![0.0, -1e-3, 0.0],
            vec![3.7, 3.8, 3.7],
            298.15,
            true,
        )
        .unwrap();
        assert_eq!(ts.current(), &[-0.0, 1e-3, -0.0]);
        assert_eq!(ts.len(), 3);
        assert!(!ts.is_empty());
    }
}
