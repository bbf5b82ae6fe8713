//! Incremental current interruption (ICI) analysis.
//!
//! A slow charge or discharge is interrupted by short rests. Within each rest
//! the voltage relaxes as `V = Eeq + dU/dsqrt(t) * sqrt(t)`, so a regression
//! over `[tmin, tmax]` seconds into the rest gives the equilibrium potential
//! and the relaxation slope. With `dE/dt` the drift of the end-of-load voltage
//! across the experiment,
//!
//! ```text
//! Ds = 4 / (9 pi) * (r * dE/dt / (dU/dsqrt(t)))^2
//! ```
//!
//! Rest samples must carry a current of exactly zero.

use crate::options::IciOptions;
use af_core::math::{gradient_over, linregress};
use af_core::{Error, Result, TimeSeries};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::ops::Range;

/// Per-step ICI results in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IciParams {
    /// Time of the last loaded sample before each rest [s]
    pub time: Vec<f64>,
    /// Voltage at that sample [V]
    pub voltage: Vec<f64>,
    /// Current at that sample [A]
    pub current: Vec<f64>,
    /// Equilibrium potential, the regression intercept [V]
    pub eeq: Vec<f64>,
    /// Standard error of `eeq`
    pub eeq_err: Vec<f64>,
    /// Relaxation slope dU/dsqrt(t) [V/s^0.5]
    pub dudrt: Vec<f64>,
    /// Standard error of `dudrt`
    pub dudrt_err: Vec<f64>,
    /// Drift of the end-of-load voltage [V/s]
    pub de_dt: Vec<f64>,
    /// Solid-phase diffusivity [m2/s]
    pub ds: Vec<f64>,
}

impl IciParams {
    /// Number of analysed steps.
    pub fn len(&self) -> usize {
        self.eeq.len()
    }

    /// True when no step was analysed.
    pub fn is_empty(&self) -> bool {
        self.eeq.is_empty()
    }

    /// Named columns: `Eeq`, `Eeq_err`, `dUdrt`, `dUdrt_err`, `dEdt`, `Ds`.
    pub fn to_map(&self) -> BTreeMap<&'static str, Vec<f64>> {
        BTreeMap::from([
            ("Eeq", self.eeq.clone()),
            ("Eeq_err", self.eeq_err.clone()),
            ("dUdrt", self.dudrt.clone()),
            ("dUdrt_err", self.dudrt_err.clone()),
            ("dEdt", self.de_dt.clone()),
            ("Ds", self.ds.clone()),
        ])
    }
}

/// One load segment and the rest that follows it.
struct Step {
    load_end: usize,
    rest: Range<usize>,
}

fn split_steps(current: &[f64]) -> Vec<Step> {
    let n = current.len();
    let mut steps = Vec::new();
    let mut i = 0;
    while i < n {
        if current[i] == 0.0 {
            i += 1;
            continue;
        }
        while i < n && current[i] != 0.0 {
            i += 1;
        }
        let load_end = i - 1;
        let rest_start = i;
        while i < n && current[i] == 0.0 {
            i += 1;
        }
        steps.push(Step { load_end, rest: rest_start..i });
    }
    steps
}

/// Extract equilibrium potential and diffusivity from every rest of an ICI
/// record.
///
/// A record that ends while still under load loses that last step. The
/// record must be all charge or all discharge. Rests with fewer than two
/// samples inside `[tmin, tmax]` yield NaN for that step.
pub fn extract_ici(series: &TimeSeries, radius: f64, options: &IciOptions) -> Result<IciParams> {
    options.validate()?;
    if !(radius.is_finite() && radius > 0.0) {
        return Err(Error::Validation(format!("'radius' must be finite and > 0, got {radius}")));
    }

    let time = series.time();
    let current = series.current();
    let voltage = series.voltage();

    if current.iter().any(|&i| i > 0.0) && current.iter().any(|&i| i < 0.0) {
        return Err(Error::Validation(
            "ICI record mixes charge and discharge current; slice it to one direction".to_string(),
        ));
    }

    let mut steps = split_steps(current);
    if steps.last().is_some_and(|s| s.rest.is_empty()) {
        tracing::debug!("record ends under load; dropping the incomplete final step");
        steps.pop();
    }
    if steps.is_empty() {
        return Err(Error::Validation("no complete load/rest step in the ICI record".to_string()));
    }

    let n = steps.len();
    let mut out = IciParams {
        time: Vec::with_capacity(n),
        voltage: Vec::with_capacity(n),
        current: Vec::with_capacity(n),
        eeq: Vec::with_capacity(n),
        eeq_err: Vec::with_capacity(n),
        dudrt: Vec::with_capacity(n),
        dudrt_err: Vec::with_capacity(n),
        de_dt: Vec::new(),
        ds: Vec::with_capacity(n),
    };

    for (k, step) in steps.iter().enumerate() {
        let t0 = time[step.rest.start];
        let (root_t, v): (Vec<f64>, Vec<f64>) = step
            .rest
            .clone()
            .map(|j| (time[j] - t0, voltage[j]))
            .filter(|(dt, _)| *dt >= options.tmin && *dt <= options.tmax)
            .map(|(dt, vj)| (dt.sqrt(), vj))
            .unzip();
        let fit = linregress(&root_t, &v);
        if fit.slope.is_nan() {
            tracing::warn!(step = k, n_points = root_t.len(), "rest too short for relaxation fit");
        }

        out.time.push(time[step.load_end]);
        out.voltage.push(voltage[step.load_end]);
        out.current.push(current[step.load_end]);
        out.eeq.push(fit.intercept);
        out.eeq_err.push(fit.intercept_stderr);
        out.dudrt.push(fit.slope);
        out.dudrt_err.push(fit.stderr);
    }

    out.de_dt = gradient_over(&out.time, &out.voltage);
    out.ds = out
        .de_dt
        .iter()
        .zip(&out.dudrt)
        .map(|(de, du)| 4.0 / (9.0 * PI) * (radius * de / du).powi(2))
        .collect();

    tracing::info!(
        n_steps = n,
        n_undefined = out.ds.iter().filter(|d| !d.is_finite()).count(),
        "ICI extraction complete"
    );
    Ok(out)
}
