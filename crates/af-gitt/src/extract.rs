//! Per-pulse diffusivity, exchange current density, and OCV extraction.
//!
//! For every pulse the voltage response is regressed against `sqrt(t)`
//! (time since the pulse started). The early part of each pulse is skipped
//! because it is dominated by charge transfer rather than solid diffusion:
//! the fit starts a quarter of the way in and walks forward one sample at a
//! time until r^2 reaches the configured limit, giving up at the half-way
//! point. The slope feeds the semi-infinite diffusion relation
//!
//! ```text
//! D = 4/pi * (I * Vm / (As * F))^2 * (dOCV/dx / (dV/dsqrt(t)))^2
//! ```
//!
//! and the voltage jump at the first fitted sample gives a linearised
//! Butler-Volmer exchange current density `i0 = (R T / F) * I / (eta * As)`.

use crate::options::GittOptions;
use crate::segment::{PulseSign, Pulses, find_pulses};
use af_core::constants::{FARADAY, GAS_CONSTANT, SECONDS_PER_HOUR};
use af_core::math::{gradient, linregress, trapezoid};
use af_core::{CellGeometry, Error, Makima, Result, TimeSeries};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Per-pulse extraction results, one entry per pulse in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GittParams {
    /// Intercalation fraction at the start of each pulse [-]
    pub xs: Vec<f64>,
    /// Solid-phase diffusivity [m2/s]; NaN where the regression was rejected
    pub ds: Vec<f64>,
    /// Exchange current density [A/m2]
    pub i0: Vec<f64>,
    /// Relaxed open-circuit voltage before each pulse [V]
    pub ocv: Vec<f64>,
    /// r^2 of the final sqrt(t) regression
    pub r_squared: Vec<f64>,
    /// Samples skipped after the pulse start before the regression window
    pub shift: Vec<usize>,
}

impl GittParams {
    /// Number of pulses.
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// True when no pulse was extracted.
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Named columns: `xs`, `Ds`, `i0`, `OCV`.
    pub fn to_map(&self) -> BTreeMap<&'static str, Vec<f64>> {
        BTreeMap::from([
            ("xs", self.xs.clone()),
            ("Ds", self.ds.clone()),
            ("i0", self.i0.clone()),
            ("OCV", self.ocv.clone()),
        ])
    }
}

/// Protocol summary of the analysed pulses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GittStats {
    /// Number of pulses
    pub n_pulses: usize,
    /// Mean pulse current [A]
    pub i_pulse: f64,
    /// Mean pulse current density over the projected area [A/m2]
    pub i_pulse_density: f64,
    /// Mean pulse duration [s]
    pub t_pulse: f64,
    /// Mean rest duration between consecutive pulses [s]; NaN for one pulse
    pub t_rest: f64,
}

/// Extract per-pulse parameters for pulses of the given sign.
pub fn extract_params(
    sign: PulseSign,
    cell: &CellGeometry,
    series: &TimeSeries,
    options: &GittOptions,
) -> Result<GittParams> {
    extract_params_with_stats(sign, cell, series, options).map(|(params, _)| params)
}

/// [`extract_params`] plus the protocol summary.
pub fn extract_params_with_stats(
    sign: PulseSign,
    cell: &CellGeometry,
    series: &TimeSeries,
    options: &GittOptions,
) -> Result<(GittParams, GittStats)> {
    options.validate()?;
    cell.validate()?;

    let pulses = find_pulses(series, sign)?;
    if pulses.is_empty() {
        return Err(Error::Validation(format!("no {sign:?} pulses found in the time series")));
    }

    let time = series.time();
    let current = series.current();
    let voltage = series.voltage();
    let i_pulse = pulses.current;

    let ocv: Vec<f64> = pulses.start.iter().map(|&s| voltage[s]).collect();
    let xs = intercalation_fractions(&pulses, time, current, cell);

    let docv_dxs: Vec<f64> =
        gradient(&ocv).into_iter().zip(gradient(&xs)).map(|(dv, dx)| dv / dx).collect();

    let mut slopes = Vec::with_capacity(pulses.len());
    let mut r_squared = Vec::with_capacity(pulses.len());
    let mut shifts = Vec::with_capacity(pulses.len());
    for (k, (start, stop)) in pulses.iter().enumerate() {
        let fit = sqrt_time_regression(time, voltage, start, stop, options.r2_lim);
        if fit.slope.is_nan() {
            tracing::warn!(
                pulse = k,
                r_squared = fit.r_squared,
                r2_lim = options.r2_lim,
                "sqrt(t) regression below r^2 limit; diffusivity undefined"
            );
        } else {
            tracing::debug!(pulse = k, shift = fit.shift, slope = fit.slope, "pulse regression");
        }
        slopes.push(fit.slope);
        r_squared.push(fit.r_squared);
        shifts.push(fit.shift);
    }

    let scale = i_pulse * cell.molar_vol_am() / (cell.surf_area_am() * FARADAY);
    let mut ds: Vec<f64> = docv_dxs
        .iter()
        .zip(&slopes)
        .map(|(&d, &m)| {
            let v = 4.0 / PI * scale.powi(2) * (d / m).powi(2);
            if v.is_finite() { v } else { f64::NAN }
        })
        .collect();

    if options.replace_nans {
        fill_undefined(&xs, &mut ds);
    }

    let rt_f = GAS_CONSTANT * series.avg_temperature() / FARADAY;
    let i0: Vec<f64> = pulses
        .start
        .iter()
        .zip(&shifts)
        .map(|(&s, &shift)| {
            let eta = voltage[s + shift] - voltage[s];
            rt_f * i_pulse / (eta * cell.surf_area_am())
        })
        .collect();

    let stats = summary_stats(&pulses, time, cell);
    tracing::info!(
        n_pulses = stats.n_pulses,
        i_pulse = stats.i_pulse,
        n_undefined = ds.iter().filter(|d| d.is_nan()).count(),
        "GITT extraction complete"
    );

    let params = GittParams { xs, ds, i0, ocv, r_squared, shift: shifts };
    Ok((params, stats))
}

/// Coulomb-count each pulse and step the intercalation fraction down from 1.
fn intercalation_fractions(
    pulses: &Pulses,
    time: &[f64],
    current: &[f64],
    cell: &CellGeometry,
) -> Vec<f64> {
    let capacity = cell.spec_capacity_am();
    let mut xs = Vec::with_capacity(pulses.len());
    xs.push(1.0);
    for (start, stop) in pulses.iter().take(pulses.len() - 1) {
        let hours: Vec<f64> = time[start..=stop].iter().map(|t| t / SECONDS_PER_HOUR).collect();
        let specific: Vec<f64> = current[start..=stop].iter().map(|i| i / cell.mass_am).collect();
        let delta_capacity = trapezoid(&hours, &specific);
        let last = xs[xs.len() - 1];
        xs.push(last - delta_capacity / capacity);
    }
    xs
}

struct PulseFit {
    slope: f64,
    r_squared: f64,
    shift: usize,
}

fn sqrt_time_regression(
    time: &[f64],
    voltage: &[f64],
    start: usize,
    stop: usize,
    r2_lim: f64,
) -> PulseFit {
    let n = stop - start + 1;
    let max_shift = n / 2;
    let mut shift = n.div_ceil(4);

    let fit_from = |shift: usize| {
        let root_t: Vec<f64> =
            time[start + shift..=stop].iter().map(|t| (t - time[start]).sqrt()).collect();
        linregress(&root_t, &voltage[start + shift..=stop])
    };

    let mut fit = fit_from(shift);
    loop {
        if fit.r_squared >= r2_lim {
            return PulseFit { slope: fit.slope, r_squared: fit.r_squared, shift };
        }
        if shift < max_shift {
            shift += 1;
            fit = fit_from(shift);
        } else {
            return PulseFit { slope: f64::NAN, r_squared: fit.r_squared, shift };
        }
    }
}

/// Replace NaN diffusivities by interpolation over the valid pulses.
///
/// Pulses outside the span of valid ones stay NaN, as do all of them when
/// fewer than two valid pulses exist.
fn fill_undefined(xs: &[f64], ds: &mut [f64]) {
    let missing: Vec<usize> = (0..ds.len()).filter(|&i| ds[i].is_nan()).collect();
    if missing.is_empty() {
        return;
    }
    let (x, y): (Vec<f64>, Vec<f64>) =
        xs.iter().zip(ds.iter()).filter(|(_, d)| !d.is_nan()).map(|(&x, &d)| (x, d)).unzip();

    match Makima::new(&x, &y) {
        Ok(interp) => {
            for i in missing {
                ds[i] = interp.eval(xs[i]);
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot interpolate undefined diffusivities; left as NaN");
        }
    }
}

fn summary_stats(pulses: &Pulses, time: &[f64], cell: &CellGeometry) -> GittStats {
    let n = pulses.len();
    let t_pulse = pulses.iter().map(|(a, b)| time[b] - time[a]).sum::<f64>() / n as f64;
    let t_rest = if n > 1 {
        pulses.start[1..].iter().zip(&pulses.stop[..n - 1]).map(|(&a, &b)| time[a] - time[b]).sum::<f64>()
            / (n - 1) as f64
    } else {
        f64::NAN
    };
    GittStats {
        n_pulses: n,
        i_pulse: pulses.current,
        i_pulse_density: pulses.current / cell.area_ed,
        t_pulse,
        t_rest,
    }
}
