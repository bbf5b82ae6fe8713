//! Half-cell and full-cell OCV tables.
//!
//! Tables are plain column records. SOC is expected in `[0, 1]` but need not be
//! sorted; interpolation sorts and merges duplicated SOC values. A full-cell
//! table can also be built straight from a charge or discharge record with
//! [`FullCellCurve::from_cycling`].

use af_core::constants::SECONDS_PER_HOUR;
use af_core::math::{cumulative_trapezoid, moving_average};
use af_core::{Error, Makima, Result, TimeSeries};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn check_columns(columns: &[(&str, &[f64])]) -> Result<()> {
    let n = columns[0].1.len();
    if n < 2 {
        return Err(Error::Validation(format!("curve needs at least 2 rows, got {n}")));
    }
    for (name, col) in columns {
        if col.len() != n {
            return Err(Error::Validation(format!(
                "column '{name}' has {} rows, expected {n}",
                col.len()
            )));
        }
        if let Some(i) = col.iter().position(|v| !v.is_finite()) {
            return Err(Error::Validation(format!("column '{name}' is non-finite at row {i}")));
        }
    }
    Ok(())
}

fn take_column(columns: &BTreeMap<String, Vec<f64>>, name: &str, role: &str) -> Result<Vec<f64>> {
    columns
        .get(name)
        .cloned()
        .ok_or_else(|| Error::Validation(format!("'{role}' curve is missing column '{name}'")))
}

/// Half-cell OCV curve: voltage against electrode SOC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalfCellCurve {
    soc: Vec<f64>,
    voltage: Vec<f64>,
}

impl HalfCellCurve {
    /// Build from equal-length `soc` and `voltage` columns.
    pub fn new(soc: Vec<f64>, voltage: Vec<f64>) -> Result<Self> {
        check_columns(&[("soc", &soc), ("voltage", &voltage)])?;
        Ok(Self { soc, voltage })
    }

    /// Build from named columns; `soc` and `voltage` are required, others ignored.
    pub fn from_columns(columns: &BTreeMap<String, Vec<f64>>) -> Result<Self> {
        Self::new(take_column(columns, "soc", "half-cell")?, take_column(columns, "voltage", "half-cell")?)
    }

    /// SOC column.
    pub fn soc(&self) -> &[f64] {
        &self.soc
    }

    /// Voltage column [V].
    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.soc.len()
    }

    /// Always false for a constructed curve.
    pub fn is_empty(&self) -> bool {
        self.soc.is_empty()
    }

    pub(crate) fn interpolant(&self) -> Result<Makima> {
        Makima::new(&self.soc, &self.voltage)
    }
}

/// Full-cell curve: voltage and both differential curves against cell SOC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullCellCurve {
    soc: Vec<f64>,
    voltage: Vec<f64>,
    dsoc_dv: Vec<f64>,
    dv_dsoc: Vec<f64>,
}

impl FullCellCurve {
    /// Build from four equal-length columns.
    pub fn new(
        soc: Vec<f64>,
        voltage: Vec<f64>,
        dsoc_dv: Vec<f64>,
        dv_dsoc: Vec<f64>,
    ) -> Result<Self> {
        check_columns(&[
            ("soc", &soc),
            ("voltage", &voltage),
            ("dsoc_dV", &dsoc_dv),
            ("dV_dsoc", &dv_dsoc),
        ])?;
        Ok(Self { soc, voltage, dsoc_dv, dv_dsoc })
    }

    /// Derive both differential columns from a makima fit of voltage vs. SOC.
    ///
    /// Rows where the slope vanishes get an infinite dSOC/dV and are rejected.
    pub fn from_voltage(soc: Vec<f64>, voltage: Vec<f64>) -> Result<Self> {
        check_columns(&[("soc", &soc), ("voltage", &voltage)])?;
        let ocv = Makima::new(&soc, &voltage)?;
        let dv_dsoc = ocv.derivative_many(&soc);
        let dsoc_dv = dv_dsoc.iter().map(|d| 1.0 / d).collect();
        Self::new(soc, voltage, dsoc_dv, dv_dsoc)
    }

    /// Build from named columns `soc`, `voltage`, `dsoc_dV`, `dV_dsoc`.
    ///
    /// When both derivative columns are absent they are derived with
    /// [`FullCellCurve::from_voltage`].
    pub fn from_columns(columns: &BTreeMap<String, Vec<f64>>) -> Result<Self> {
        let soc = take_column(columns, "soc", "full-cell")?;
        let voltage = take_column(columns, "voltage", "full-cell")?;
        match (columns.get("dsoc_dV"), columns.get("dV_dsoc")) {
            (None, None) => Self::from_voltage(soc, voltage),
            (Some(a), Some(b)) => Self::new(soc, voltage, a.clone(), b.clone()),
            (None, Some(_)) => Err(Error::Validation("'full-cell' curve is missing column 'dsoc_dV'".into())),
            (Some(_), None) => Err(Error::Validation("'full-cell' curve is missing column 'dV_dsoc'".into())),
        }
    }

    /// Build from a single charge or discharge record.
    ///
    /// Charge is recognised by the voltage rising over the record and must
    /// carry positive mean current; discharge the reverse. The throughput
    /// `Ah` is the running integral of `|I|` over hours, and SOC is `Ah/max(Ah)`
    /// on charge or `1 - Ah/max(Ah)` on discharge. Rows are sorted by SOC
    /// (first sample kept for a repeated SOC), the voltage is smoothed with a
    /// centred moving average of width `smoothing` (1 = off), and the
    /// differential columns come from [`FullCellCurve::from_voltage`].
    pub fn from_cycling(series: &TimeSeries, smoothing: usize) -> Result<CyclingCurve> {
        if smoothing == 0 {
            return Err(Error::Validation("'smoothing' must be >= 1".to_string()));
        }
        let (time, current, voltage) = (series.time(), series.current(), series.voltage());
        let n = voltage.len();
        if n < 2 {
            return Err(Error::Validation(format!("cycling record needs at least 2 rows, got {n}")));
        }

        let charging = voltage[0] < voltage[n - 1];
        let mean_current = current.iter().sum::<f64>() / n as f64;
        if charging && mean_current <= 0.0 {
            return Err(Error::Validation(format!(
                "expected positive current for charge data (voltage rises), mean is {mean_current}"
            )));
        }
        if !charging && mean_current >= 0.0 {
            return Err(Error::Validation(format!(
                "expected negative current for discharge data (voltage falls), mean is {mean_current}"
            )));
        }

        let sign = if charging { 1.0 } else { -1.0 };
        let hours: Vec<f64> = time.iter().map(|t| t / SECONDS_PER_HOUR).collect();
        let amps: Vec<f64> = current.iter().map(|i| sign * i).collect();
        let ah = cumulative_trapezoid(&hours, &amps);
        let ah_max = ah.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(ah_max > 0.0) {
            return Err(Error::Validation("cycling record passes no charge".to_string()));
        }

        let mut rows: Vec<(f64, f64, f64)> = ah
            .iter()
            .zip(voltage)
            .map(|(&a, &v)| (if charging { a / ah_max } else { 1.0 - a / ah_max }, a, v))
            .collect();
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        rows.dedup_by(|later, kept| later.0 == kept.0);

        let soc: Vec<f64> = rows.iter().map(|r| r.0).collect();
        let ah: Vec<f64> = rows.iter().map(|r| r.1).collect();
        let raw: Vec<f64> = rows.iter().map(|r| r.2).collect();
        let smooth = moving_average(&raw, smoothing);
        let score = (raw.iter().zip(&smooth).map(|(r, s)| (s - r).powi(2)).sum::<f64>()
            / raw.len() as f64)
            .sqrt();

        tracing::debug!(charging, rows = soc.len(), ah_max, score, "full-cell curve from cycling");
        let curve = Self::from_voltage(soc, smooth)?;
        Ok(CyclingCurve { curve, ah, raw_voltage: raw, score })
    }

    /// SOC column.
    pub fn soc(&self) -> &[f64] {
        &self.soc
    }

    /// Voltage column [V].
    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    /// Differential capacity column dSOC/dV [1/V].
    pub fn dsoc_dv(&self) -> &[f64] {
        &self.dsoc_dv
    }

    /// Differential voltage column dV/dSOC [V].
    pub fn dv_dsoc(&self) -> &[f64] {
        &self.dv_dsoc
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.soc.len()
    }

    /// Always false for a constructed curve.
    pub fn is_empty(&self) -> bool {
        self.soc.is_empty()
    }

    /// Rows sorted by SOC, as `(soc, voltage, dsoc_dv, dv_dsoc)` columns.
    pub(crate) fn sorted_columns(&self) -> [Vec<f64>; 4] {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.soc[a].total_cmp(&self.soc[b]));
        let pick = |col: &[f64]| order.iter().map(|&i| col[i]).collect::<Vec<f64>>();
        [pick(&self.soc), pick(&self.voltage), pick(&self.dsoc_dv), pick(&self.dv_dsoc)]
    }
}

/// A full-cell curve derived from a cycling record, with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclingCurve {
    /// Curve on the smoothed voltage, rows sorted by SOC
    pub curve: FullCellCurve,
    /// Throughput at each row [Ah]
    pub ah: Vec<f64>,
    /// Unsmoothed voltage at each row [V]
    pub raw_voltage: Vec<f64>,
    /// Root-mean-square difference between smoothed and raw voltage [V]
    pub score: f64,
}
