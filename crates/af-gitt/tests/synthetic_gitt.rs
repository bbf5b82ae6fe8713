//! End-to-end GITT extraction on a synthetic pulse train with a known answer.
//!
//! Each pulse responds as `V = OCV_k + eta0 + m * sqrt(t - t_start)` and the
//! relaxed OCV is linear in the intercalation fraction, so the extracted
//! diffusivity must equal `4/pi * (I Vm / (As F))^2 * (dOCV/dx / m)^2`.

use af_core::constants::{FARADAY, GAS_CONSTANT};
use af_core::{CellGeometry, Error, TimeSeries};
use af_gitt::{GittOptions, PulseSign, extract_params, extract_params_with_stats, find_pulses};
use approx::assert_relative_eq;
use std::f64::consts::PI;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const I_PULSE: f64 = 1e-4;
const REST: usize = 60;
const PULSE: usize = 100;
const V0: f64 = 3.4;
const OCV_SLOPE: f64 = -1.0;
const SQRT_SLOPE: f64 = 2e-3;
const ETA0: f64 = 5e-3;
const TEMPERATURE: f64 = 298.15;

fn cell() -> CellGeometry {
    CellGeometry::new(75e-6, 1.5e-4, 0.3, 0.1, 5e-6, 4700.0, 1.5e-5, 97.9).unwrap()
}

/// Intercalation fraction after each full pulse, as the extractor counts it.
fn expected_xs(cell: &CellGeometry, n_pulses: usize) -> Vec<f64> {
    let dq = I_PULSE * (PULSE as f64 - 0.5) / 3600.0 / cell.mass_am;
    (0..=n_pulses).map(|k| 1.0 - k as f64 * dq / cell.spec_capacity_am()).collect()
}

/// Rest, then `n_pulses` x (pulse, rest). Pulses listed in `flat` have no
/// sqrt(t) response.
fn pulse_train(cell: &CellGeometry, n_pulses: usize, flat: &[usize]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let xs = expected_xs(cell, n_pulses);
    let ocv: Vec<f64> = xs.iter().map(|x| V0 + OCV_SLOPE * x).collect();

    let mut current = Vec::new();
    let mut voltage = Vec::new();
    current.extend(std::iter::repeat_n(0.0, REST));
    voltage.extend(std::iter::repeat_n(ocv[0], REST));
    for k in 0..n_pulses {
        for m in 0..PULSE {
            let t_rel = (m + 1) as f64;
            let diffusion = if flat.contains(&k) { 0.0 } else { SQRT_SLOPE * t_rel.sqrt() };
            current.push(I_PULSE);
            voltage.push(ocv[k] + ETA0 + diffusion);
        }
        current.extend(std::iter::repeat_n(0.0, REST));
        voltage.extend(std::iter::repeat_n(ocv[k + 1], REST));
    }
    let time = (0..current.len()).map(|i| i as f64).collect();
    (time, current, voltage)
}

fn expected_diffusivity(cell: &CellGeometry) -> f64 {
    let scale = I_PULSE * cell.molar_vol_am() / (cell.surf_area_am() * FARADAY);
    4.0 / PI * scale.powi(2) * (OCV_SLOPE / SQRT_SLOPE).powi(2)
}

fn expected_i0(cell: &CellGeometry, shift: usize) -> f64 {
    let eta = ETA0 + SQRT_SLOPE * (shift as f64).sqrt();
    GAS_CONSTANT * TEMPERATURE / FARADAY * I_PULSE / (eta * cell.surf_area_am())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_recovers_diffusivity_and_exchange_current() {
    let cell = cell();
    let (t, i, v) = pulse_train(&cell, 5, &[]);
    let series = TimeSeries::new(t, i, v, TEMPERATURE, false).unwrap();

    let params = extract_params(PulseSign::Charge, &cell, &series, &GittOptions::default()).unwrap();
    assert_eq!(params.len(), 5);

    let xs = expected_xs(&cell, 5);
    let d = expected_diffusivity(&cell);
    // 101-sample window (last rest sample + pulse): regression starts at ceil(101/4)
    let shift = 26;
    for k in 0..5 {
        assert_relative_eq!(params.xs[k], xs[k], max_relative = 1e-12);
        assert_relative_eq!(params.ocv[k], V0 + OCV_SLOPE * xs[k], max_relative = 1e-12);
        assert_eq!(params.shift[k], shift);
        assert!(params.r_squared[k] > 0.999_999);
        assert_relative_eq!(params.ds[k], d, max_relative = 1e-6);
        assert_relative_eq!(params.i0[k], expected_i0(&cell, shift), max_relative = 1e-9);
    }

    let map = params.to_map();
    assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["Ds", "OCV", "i0", "xs"]);
    assert_eq!(map["Ds"], params.ds);
}

#[test]
fn test_stats_describe_protocol() {
    let cell = cell();
    let (t, i, v) = pulse_train(&cell, 4, &[]);
    let series = TimeSeries::new(t, i, v, TEMPERATURE, false).unwrap();

    let (_, stats) =
        extract_params_with_stats(PulseSign::Charge, &cell, &series, &GittOptions::default())
            .unwrap();
    assert_eq!(stats.n_pulses, 4);
    assert_relative_eq!(stats.i_pulse, I_PULSE, max_relative = 1e-12);
    assert_relative_eq!(stats.i_pulse_density, I_PULSE / cell.area_ed, max_relative = 1e-12);
    assert_relative_eq!(stats.t_pulse, PULSE as f64, epsilon = 1e-12);
    assert_relative_eq!(stats.t_rest, REST as f64, epsilon = 1e-12);
}

#[test]
fn test_flat_pulse_left_undefined_or_filled() {
    let cell = cell();
    let (t, i, v) = pulse_train(&cell, 5, &[2]);
    let series = TimeSeries::new(t, i, v, TEMPERATURE, false).unwrap();
    let d = expected_diffusivity(&cell);

    let keep = GittOptions { replace_nans: false, ..GittOptions::default() };
    let raw = extract_params(PulseSign::Charge, &cell, &series, &keep).unwrap();
    assert!(raw.ds[2].is_nan());
    // walked forward to the half-way point before giving up
    assert_eq!(raw.shift[2], 101 / 2);
    assert_relative_eq!(raw.ds[1], d, max_relative = 1e-6);

    let filled = extract_params(PulseSign::Charge, &cell, &series, &GittOptions::default()).unwrap();
    assert_relative_eq!(filled.ds[2], d, max_relative = 1e-6);
}

#[test]
fn test_inverted_record_as_discharge() {
    let cell = cell();
    let (t, i, v) = pulse_train(&cell, 3, &[]);
    let charge = TimeSeries::new(t.clone(), i.clone(), v.clone(), TEMPERATURE, false).unwrap();
    let inverted = TimeSeries::new(t, i, v, TEMPERATURE, true).unwrap();

    let opts = GittOptions::default();
    let a = extract_params(PulseSign::Charge, &cell, &charge, &opts).unwrap();
    let b = extract_params(PulseSign::Discharge, &cell, &inverted, &opts).unwrap();
    for k in 0..3 {
        assert_relative_eq!(a.ds[k], b.ds[k], max_relative = 1e-9);
        assert_relative_eq!(a.i0[k], -b.i0[k], max_relative = 1e-12);
    }
    // discharge counting runs the fraction upward
    assert!(b.xs[1] > b.xs[0]);
}

#[test]
fn test_truncated_record_is_segmentation_error() {
    let cell = cell();
    let (mut t, mut i, mut v) = pulse_train(&cell, 3, &[]);
    let n = t.len() - REST;
    t.truncate(n);
    i.truncate(n);
    v.truncate(n);
    let series = TimeSeries::new(t, i, v, TEMPERATURE, false).unwrap();

    let err = find_pulses(&series, PulseSign::Charge).unwrap_err();
    assert!(matches!(err, Error::Segmentation { starts: 3, stops: 2 }), "{err}");
    assert!(extract_params(PulseSign::Charge, &cell, &series, &GittOptions::default()).is_err());
}

#[test]
fn test_no_pulses_of_requested_sign() {
    let cell = cell();
    let (t, i, v) = pulse_train(&cell, 2, &[]);
    let series = TimeSeries::new(t, i, v, TEMPERATURE, false).unwrap();
    let err =
        extract_params(PulseSign::Discharge, &cell, &series, &GittOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");
}

#[test]
fn test_invalid_options_rejected() {
    let cell = cell();
    let (t, i, v) = pulse_train(&cell, 2, &[]);
    let series = TimeSeries::new(t, i, v, TEMPERATURE, false).unwrap();
    let opts = GittOptions { r2_lim: 1.5, ..GittOptions::default() };
    assert!(matches!(
        extract_params(PulseSign::Charge, &cell, &series, &opts),
        Err(Error::Config(_))
    ));
}
