//! Modified-Akima ("makima") interpolation.
//!
//! Piecewise cubic Hermite interpolant whose node tangents are weighted
//! averages of the neighbouring secant slopes. Flat runs stay flat and
//! the curve does not overshoot near abrupt slope changes, which matters
//! for OCV tables with plateau/step structure.

use crate::{Error, Result};

/// Behaviour outside the tabulated domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extrapolate {
    /// Return NaN for value and derivative.
    #[default]
    Nan,
    /// Evaluate at the nearest domain boundary (value and derivative alike).
    Clamp,
}

/// Modified-Akima interpolant over sorted, de-duplicated samples.
#[derive(Debug, Clone)]
pub struct Makima {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Node tangents dy/dx.
    ts: Vec<f64>,
    extrapolate: Extrapolate,
}

impl Makima {
    /// Build an interpolant from unsorted samples.
    ///
    /// Samples are sorted by `x`; repeated `x` values are merged by averaging
    /// their `y`. At least two distinct `x` values are required.
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::Validation(format!(
                "interpolation x/y length mismatch: {} != {}",
                x.len(),
                y.len()
            )));
        }
        if let Some(i) = x.iter().zip(y).position(|(a, b)| !(a.is_finite() && b.is_finite())) {
            return Err(Error::Validation(format!(
                "interpolation samples must be finite (index {i})"
            )));
        }

        let mut pairs: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut xs: Vec<f64> = Vec::with_capacity(pairs.len());
        let mut ys: Vec<f64> = Vec::with_capacity(pairs.len());
        let mut run = 0usize;
        for (px, py) in pairs {
            match xs.last() {
                Some(&last) if last == px => {
                    run += 1;
                    if let Some(acc) = ys.last_mut() {
                        *acc += (py - *acc) / run as f64;
                    }
                }
                _ => {
                    xs.push(px);
                    ys.push(py);
                    run = 1;
                }
            }
        }

        if xs.len() < 2 {
            return Err(Error::Validation(format!(
                "interpolation needs at least 2 distinct x values, got {}",
                xs.len()
            )));
        }

        let ts = makima_tangents(&xs, &ys);
        Ok(Self { xs, ys, ts, extrapolate: Extrapolate::default() })
    }

    /// Set the out-of-domain policy.
    pub fn with_extrapolate(mut self, extrapolate: Extrapolate) -> Self {
        self.extrapolate = extrapolate;
        self
    }

    /// Current out-of-domain policy.
    pub fn extrapolate(&self) -> Extrapolate {
        self.extrapolate
    }

    /// Tabulated domain `(min, max)`.
    pub fn domain(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    /// Knot positions after sorting and de-duplication.
    pub fn knots(&self) -> &[f64] {
        &self.xs
    }

    fn locate(&self, x: f64) -> Option<(usize, f64)> {
        let (lo, hi) = self.domain();
        let x = if x.is_nan() {
            return None;
        } else if x < lo || x > hi {
            match self.extrapolate {
                Extrapolate::Nan => return None,
                Extrapolate::Clamp => x.clamp(lo, hi),
            }
        } else {
            x
        };
        let n = self.xs.len();
        let k = self.xs.partition_point(|&v| v <= x).saturating_sub(1).min(n - 2);
        Some((k, x))
    }

    /// Interpolated value at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        let Some((k, x)) = self.locate(x) else {
            return f64::NAN;
        };
        let h = self.xs[k + 1] - self.xs[k];
        let s = (x - self.xs[k]) / h;
        let s2 = s * s;
        let s3 = s2 * s;

        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;

        h00 * self.ys[k] + h10 * h * self.ts[k] + h01 * self.ys[k + 1] + h11 * h * self.ts[k + 1]
    }

    /// First derivative dy/dx at `x`.
    pub fn derivative(&self, x: f64) -> f64 {
        let Some((k, x)) = self.locate(x) else {
            return f64::NAN;
        };
        let h = self.xs[k + 1] - self.xs[k];
        let s = (x - self.xs[k]) / h;
        let s2 = s * s;

        let d00 = 6.0 * s2 - 6.0 * s;
        let d10 = 3.0 * s2 - 4.0 * s + 1.0;
        let d01 = -6.0 * s2 + 6.0 * s;
        let d11 = 3.0 * s2 - 2.0 * s;

        (d00 * self.ys[k] + d01 * self.ys[k + 1]) / h + d10 * self.ts[k] + d11 * self.ts[k + 1]
    }

    /// Evaluate at many points.
    pub fn eval_many(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&v| self.eval(v)).collect()
    }

    /// Derivative at many points.
    pub fn derivative_many(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&v| self.derivative(v)).collect()
    }
}

fn makima_tangents(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let secants: Vec<f64> = (0..n - 1).map(|i| (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i])).collect();

    if n == 2 {
        return vec![secants[0]; 2];
    }

    // m[k] holds secant k-2; two linear-extrapolated ghost slopes on each side.
    let mut m = Vec::with_capacity(n + 3);
    let m0 = secants[0];
    let m1 = secants[1];
    let ghost_lo1 = 2.0 * m0 - m1;
    let ghost_lo2 = 2.0 * ghost_lo1 - m0;
    m.push(ghost_lo2);
    m.push(ghost_lo1);
    m.extend_from_slice(&secants);
    let ml = secants[n - 2];
    let ml1 = secants[n - 3];
    let ghost_hi1 = 2.0 * ml - ml1;
    let ghost_hi2 = 2.0 * ghost_hi1 - ml;
    m.push(ghost_hi1);
    m.push(ghost_hi2);

    (0..n)
        .map(|i| {
            let (mm2, mm1, mi, mp1) = (m[i], m[i + 1], m[i + 2], m[i + 3]);
            let w1 = (mp1 - mi).abs() + 0.5 * (mp1 + mi).abs();
            let w2 = (mm1 - mm2).abs() + 0.5 * (mm1 + mm2).abs();
            if w1 + w2 == 0.0 { 0.5 * (mm1 + mi) } else { (w1 * mm1 + w2 * mi) / (w1 + w2) }
        })
        .collect()
}
