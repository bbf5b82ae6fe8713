//! Parameter uncertainty from the curvature of a least-squares objective.
//!
//! Treating the sum of squared residuals as locally quadratic, the inverse
//! Hessian approximates the parameter covariance. A tiny ridge proportional
//! to the largest eigenvalue keeps the inversion away from exact singularity
//! (parameters the objective does not depend on get a huge, not infinite,
//! variance).

use nalgebra::{DMatrix, SymmetricEigen};

/// Central-difference Hessian of `f` at `x`.
///
/// Step per coordinate is `eps^(1/4) * max(|x_i|, 1)`.
pub fn numerical_hessian<F>(f: F, x: &[f64]) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let n = x.len();
    let steps: Vec<f64> = x.iter().map(|v| f64::EPSILON.powf(0.25) * v.abs().max(1.0)).collect();
    let f0 = f(x);
    let mut work = x.to_vec();
    let mut hess = DMatrix::zeros(n, n);

    for i in 0..n {
        let hi = steps[i];
        work[i] = x[i] + hi;
        let fp = f(&work);
        work[i] = x[i] - hi;
        let fm = f(&work);
        work[i] = x[i];
        hess[(i, i)] = (fp - 2.0 * f0 + fm) / (hi * hi);

        for j in (i + 1)..n {
            let hj = steps[j];
            let mut corner = |si: f64, sj: f64| {
                work[i] = x[i] + si * hi;
                work[j] = x[j] + sj * hj;
                let v = f(&work);
                work[i] = x[i];
                work[j] = x[j];
                v
            };
            let v = (corner(1.0, 1.0) - corner(1.0, -1.0) - corner(-1.0, 1.0)
                + corner(-1.0, -1.0))
                / (4.0 * hi * hj);
            hess[(i, j)] = v;
            hess[(j, i)] = v;
        }
    }
    hess
}

/// Standard deviations `sqrt(|diag(H + ridge I)^-1|)`.
///
/// `None` when the Hessian is non-finite or the regularised matrix cannot be
/// inverted.
pub fn std_from_hessian(hess: &DMatrix<f64>) -> Option<Vec<f64>> {
    if hess.iter().any(|v| !v.is_finite()) {
        tracing::warn!("non-finite Hessian; parameter uncertainties unavailable");
        return None;
    }
    let n = hess.nrows();
    let eig = SymmetricEigen::new(hess.clone());
    let max_abs = eig.eigenvalues.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let ridge = 1e-16 * max_abs;

    let regularised = hess + DMatrix::identity(n, n) * ridge;
    let Some(cov) = regularised.try_inverse() else {
        tracing::warn!("singular Hessian; parameter uncertainties unavailable");
        return None;
    };
    Some((0..n).map(|i| cov[(i, i)].abs().sqrt()).collect())
}
