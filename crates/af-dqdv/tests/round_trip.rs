//! dQ/dV fitting round trip on noiseless synthetic curves.
//!
//! Two analytic half cells are tabulated finely; the full cell is built from
//! a known window `[xn0, xn1, xp0, xp1]` with exact derivatives. Grid search
//! followed by the bounded fit must land back on that window.

use af_core::Error;
use af_core::math::linspace;
use af_dqdv::{
    CostTerms, DqdvFitter, FitterConfig, FullCellCurve, HalfCellCurve, N_SOC, post_process,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TRUTH: [f64; 4] = [0.1, 0.8, 0.2, 0.9];

fn sech2(z: f64) -> f64 {
    1.0 / z.cosh().powi(2)
}

fn up(x: f64) -> f64 {
    3.6 + 0.5 * x + 0.05 * ((x - 0.5) / 0.08).tanh()
}

fn dup(x: f64) -> f64 {
    0.5 + 0.05 / 0.08 * sech2((x - 0.5) / 0.08)
}

fn un(x: f64) -> f64 {
    0.1 + 0.4 * (-8.0 * x).exp() - 0.02 * ((x - 0.6) / 0.06).tanh()
}

fn dun(x: f64) -> f64 {
    -3.2 * (-8.0 * x).exp() - 0.02 / 0.06 * sech2((x - 0.6) / 0.06)
}

fn half_cells() -> (HalfCellCurve, HalfCellCurve) {
    let x = linspace(0.0, 1.0, 4001);
    let neg = HalfCellCurve::new(x.clone(), x.iter().map(|&v| un(v)).collect()).unwrap();
    let pos = HalfCellCurve::new(x.clone(), x.iter().map(|&v| up(v)).collect()).unwrap();
    (neg, pos)
}

/// Full cell on the fitter's own SOC grid, so the measured columns are exact.
fn full_cell(window: [f64; 4], ir: f64) -> FullCellCurve {
    let [xn0, xn1, xp0, xp1] = window;
    let soc = linspace(0.0, 1.0, N_SOC);
    let mut voltage = Vec::with_capacity(N_SOC);
    let mut dv_dsoc = Vec::with_capacity(N_SOC);
    for &s in &soc {
        let xn = xn0 + (xn1 - xn0) * s;
        let xp = xp0 + (xp1 - xp0) * s;
        voltage.push(up(xp) - un(xn) - ir);
        dv_dsoc.push(dup(xp) * (xp1 - xp0) - dun(xn) * (xn1 - xn0));
    }
    let dsoc_dv = dv_dsoc.iter().map(|d| 1.0 / d).collect();
    FullCellCurve::new(soc, voltage, dsoc_dv, dv_dsoc).unwrap()
}

fn fitter(config: FitterConfig, ir: f64) -> DqdvFitter {
    let (neg, pos) = half_cells();
    DqdvFitter::with_curves(neg, pos, full_cell(TRUTH, ir), config).unwrap()
}

fn unsmoothed() -> FitterConfig {
    FitterConfig { smoothing: 1, ..FitterConfig::default() }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_grid_then_fit_recovers_window() {
    let fitter = fitter(unsmoothed(), 0.0);

    let seed = fitter.coarse_search(11).unwrap();
    assert!(seed.success);
    assert_eq!(seed.niter, None);
    assert_eq!(seed.nfev, 55 * 55);
    assert!(seed.x_std.unwrap().iter().all(|v| v.is_nan()));
    for (got, want) in seed.window().iter().zip(TRUTH) {
        assert!((got - want).abs() < 1e-9, "seed {:?}", seed.x);
    }

    let fit = fitter.constrained_fit(&seed.x).unwrap();
    println!("{fit}");
    for (got, want) in fit.window().iter().zip(TRUTH) {
        assert!((got - want).abs() < 1e-3, "fit {:?}", fit.x);
    }
    assert_eq!(fit.ir(), 0.0);
    assert!(fit.fun <= seed.fun + 1e-15, "{} > {}", fit.fun, seed.fun);
    assert!(fit.niter.is_some());
    let std = fit.x_std.expect("Hessian should invert near the optimum");
    assert_eq!(std[4], 0.0);
}

#[test]
fn test_voltage_term_fits_resistance() {
    let config = FitterConfig { cost_terms: CostTerms::all(), ..unsmoothed() };
    let fitter = fitter(config, 0.01);

    let seed = fitter.coarse_search(11).unwrap();
    for (got, want) in seed.window().iter().zip(TRUTH) {
        assert!((got - want).abs() < 1e-9, "seed {:?}", seed.x);
    }

    let fit = fitter.constrained_fit(&seed.window()).unwrap();
    assert!((fit.ir() - 0.01).abs() < 1e-3, "iR = {}", fit.ir());
    for (got, want) in fit.window().iter().zip(TRUTH) {
        assert!((got - want).abs() < 1e-3, "fit {:?}", fit.x);
    }
}

#[test]
fn test_fit_stays_inside_bounds() {
    let config = FitterConfig { bounds: [0.02; 4], ..unsmoothed() };
    let fitter = fitter(config, 0.0);
    // seed deliberately off by more than the bounds allow
    let seed = [0.15, 0.8, 0.2, 0.9];
    let fit = fitter.constrained_fit(&seed).unwrap();
    assert!(fit.x[0] >= 0.13 - 1e-12 && fit.x[0] <= 0.17 + 1e-12, "{:?}", fit.x);
    for i in 1..4 {
        assert!((fit.x[i] - seed[i]).abs() <= 0.02 + 1e-12, "{:?}", fit.x);
    }
}

#[test]
fn test_grid_never_misordered() {
    let fitter = fitter(unsmoothed(), 0.0);
    for nx in 2..=7 {
        let s = fitter.coarse_search(nx).unwrap();
        assert!(s.x[0] < s.x[1] && s.x[2] < s.x[3], "nx={nx}: {:?}", s.x);
        let pairs = nx * (nx - 1) / 2;
        assert_eq!(s.nfev, pairs * pairs);
    }
    assert!(matches!(fitter.coarse_search(1), Err(Error::Validation(_))));
}

#[test]
fn test_parallel_grid_matches_sequential_scan() {
    let fitter = fitter(unsmoothed(), 0.0);
    let nx = 6;
    let span = linspace(0.0, 1.0, nx);

    let mut best: Option<([f64; 4], f64)> = None;
    for a in 0..nx {
        for b in (a + 1)..nx {
            for c in 0..nx {
                for d in (c + 1)..nx {
                    let w = [span[a], span[b], span[c], span[d]];
                    let e = fitter.err_func(&w).unwrap();
                    if e.is_finite() && best.is_none_or(|(_, f)| e < f) {
                        best = Some((w, e));
                    }
                }
            }
        }
    }
    let (w, e) = best.unwrap();
    let s = fitter.coarse_search(nx).unwrap();
    assert_eq!(s.window(), w);
    assert_eq!(s.fun, e);
}

#[test]
fn test_err_func_is_repeatable() {
    let fitter = fitter(FitterConfig::default(), 0.0);
    let p = [0.12, 0.77, 0.18, 0.93];
    let a = fitter.err_func(&p).unwrap();
    let b = fitter.err_func(&p).unwrap();
    assert_eq!(a.to_bits(), b.to_bits());
}

#[test]
fn test_fit_requires_all_curves() {
    let (neg, pos) = half_cells();
    let mut fitter = DqdvFitter::new(FitterConfig::default()).unwrap();
    fitter.set_neg(neg).unwrap();
    fitter.set_pos(pos).unwrap();
    let err = fitter.constrained_fit(&TRUTH).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("cell"), "{err}");

    fitter.set_cell(full_cell(TRUTH, 0.0)).unwrap();
    assert!(fitter.is_ready());
    assert!(fitter.err_func(&TRUTH).is_ok());
}

#[test]
fn test_fitted_windows_feed_degradation() {
    let fitter = fitter(unsmoothed(), 0.0);
    let seed = fitter.coarse_search(11).unwrap();
    let fit = fitter.constrained_fit(&seed.x).unwrap();
    let rows = [fit.window(), fit.window()];
    let aging = post_process(&[4.8, 4.6], &rows).unwrap();
    assert_eq!(aging[0].lam_neg, 0.0);
    assert!(aging[1].lam_neg > 0.0 && aging[1].tli > 0.0);
}
