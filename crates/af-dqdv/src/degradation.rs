//! Electrode capacities and loss metrics across a series of fitted profiles.
//!
//! For each profile with measured capacity `Ah` and window
//! `[xn0, xn1, xp0, xp1]`:
//!
//! ```text
//! Q_ed  = Ah / (x1_ed - x0_ed)          LAM_ed = 1 - Q_ed / Q_ed[ref]
//! Inv   = xn1 Q_n + xp1 Q_p             TLI    = 1 - Inv / Inv[ref]
//! offset = xn0 - xp0
//! ```
//!
//! The reference row is the first profile unless given explicitly.

use af_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// First-order uncertainties of the derived quantities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationStd {
    /// Negative electrode capacity [Ah]
    pub q_neg: f64,
    /// Positive electrode capacity [Ah]
    pub q_pos: f64,
    /// Negative electrode LAM [-]
    pub lam_neg: f64,
    /// Positive electrode LAM [-]
    pub lam_pos: f64,
    /// Inventory [Ah]
    pub inventory: f64,
    /// TLI [-]
    pub tli: f64,
}

/// Degradation metrics of one profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationResult {
    /// Negative electrode capacity [Ah]
    pub q_neg: f64,
    /// Positive electrode capacity [Ah]
    pub q_pos: f64,
    /// Loss of negative active material [-]
    pub lam_neg: f64,
    /// Loss of positive active material [-]
    pub lam_pos: f64,
    /// Cyclable inventory [Ah]
    pub inventory: f64,
    /// Total loss of inventory [-]
    pub tli: f64,
    /// `xn0 - xp0`
    pub offset: f64,
    /// Propagated uncertainties, when window standard deviations were given
    pub std: Option<DegradationStd>,
}

fn windows<R: AsRef<[f64]>>(capacity: &[f64], x: &[R], what: &str) -> Result<Vec<[f64; 4]>> {
    if x.is_empty() {
        return Err(Error::Validation("post_process needs at least one profile".to_string()));
    }
    if capacity.len() != x.len() {
        return Err(Error::Validation(format!(
            "capacity has {} entries but '{what}' has {} rows",
            capacity.len(),
            x.len()
        )));
    }
    x.iter()
        .enumerate()
        .map(|(i, row)| {
            <[f64; 4]>::try_from(row.as_ref()).map_err(|_| {
                Error::Validation(format!(
                    "'{what}' row {i} has {} columns, expected 4 [xn0, xn1, xp0, xp1]",
                    row.as_ref().len()
                ))
            })
        })
        .collect()
}

/// Metrics for every profile, first profile as reference.
pub fn post_process<R: AsRef<[f64]>>(capacity: &[f64], x: &[R]) -> Result<Vec<DegradationResult>> {
    post_process_with_reference(capacity, x, 0)
}

/// Metrics for every profile relative to profile `reference`.
pub fn post_process_with_reference<R: AsRef<[f64]>>(
    capacity: &[f64],
    x: &[R],
    reference: usize,
) -> Result<Vec<DegradationResult>> {
    let x = windows(capacity, x, "x")?;
    compute(capacity, &x, None, reference)
}

/// [`post_process`] plus first-order propagation of the window standard
/// deviations `x_std` (same shape as `x`). NaN deviations propagate as NaN.
pub fn post_process_with_std<R: AsRef<[f64]>, S: AsRef<[f64]>>(
    capacity: &[f64],
    x: &[R],
    x_std: &[S],
) -> Result<Vec<DegradationResult>> {
    let x = windows(capacity, x, "x")?;
    let x_std = windows(capacity, x_std, "x_std")?;
    compute(capacity, &x, Some(&x_std), 0)
}

fn compute(
    capacity: &[f64],
    x: &[[f64; 4]],
    x_std: Option<&[[f64; 4]]>,
    reference: usize,
) -> Result<Vec<DegradationResult>> {
    if reference >= x.len() {
        return Err(Error::Validation(format!(
            "reference profile {reference} out of range for {} profiles",
            x.len()
        )));
    }

    let electrode = |ah: f64, w: &[f64; 4]| {
        let q_neg = ah / (w[1] - w[0]);
        let q_pos = ah / (w[3] - w[2]);
        (q_neg, q_pos, w[1] * q_neg + w[3] * q_pos)
    };
    let (qn_ref, qp_ref, inv_ref) = electrode(capacity[reference], &x[reference]);

    let results = capacity
        .iter()
        .zip(x)
        .enumerate()
        .map(|(i, (&ah, w))| {
            let (q_neg, q_pos, inventory) = electrode(ah, w);
            let std = x_std.map(|s| {
                let [sn0, sn1, sp0, sp1] = s[i];
                let dqn = ah / (w[1] - w[0]).powi(2);
                let dqp = ah / (w[3] - w[2]).powi(2);
                let q_neg_std = dqn * sn0.hypot(sn1);
                let q_pos_std = dqp * sp0.hypot(sp1);
                let inv_terms = [
                    w[1] * dqn * sn0,
                    (q_neg - w[1] * dqn) * sn1,
                    w[3] * dqp * sp0,
                    (q_pos - w[3] * dqp) * sp1,
                ];
                let inv_std = inv_terms.iter().map(|t| t * t).sum::<f64>().sqrt();
                DegradationStd {
                    q_neg: q_neg_std,
                    q_pos: q_pos_std,
                    lam_neg: q_neg_std / qn_ref,
                    lam_pos: q_pos_std / qp_ref,
                    inventory: inv_std,
                    tli: inv_std / inv_ref,
                }
            });
            DegradationResult {
                q_neg,
                q_pos,
                lam_neg: 1.0 - q_neg / qn_ref,
                lam_pos: 1.0 - q_pos / qp_ref,
                inventory,
                tli: 1.0 - inventory / inv_ref,
                offset: w[0] - w[2],
                std,
            }
        })
        .collect();

    tracing::debug!(n_profiles = x.len(), reference, "degradation metrics computed");
    Ok(results)
}
