//! dQ/dV three-curve fitting.
//!
//! The full-cell OCV is modelled as the difference of the two half-cell OCVs,
//! each traversing a window `[x0, x100]` of its own SOC as the cell goes from
//! empty to full:
//!
//! ```text
//! x_neg = xn0 + (xn1 - xn0) * soc        x_pos = xp0 + (xp1 - xp0) * soc
//! V     = Up(x_pos) - Un(x_neg) - iR
//! dV/dsoc = Up'(x_pos) (xp1 - xp0) - Un'(x_neg) (xn1 - xn0)
//! ```
//!
//! Fitting runs in two stages. [`DqdvFitter::coarse_search`] scans a uniform
//! grid of ordered windows for a good basin, then
//! [`DqdvFitter::constrained_fit`] refines it with bounded L-BFGS.

use crate::config::{CostTerm, CostTerms, FitterConfig};
use crate::curves::{FullCellCurve, HalfCellCurve};
use crate::optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizerConfig};
use crate::uncertainty::{numerical_hessian, std_from_hessian};
use af_core::math::{linspace, moving_average};
use af_core::{Error, Extrapolate, Makima, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Names of the entries of a parameter vector.
pub const PARAM_NAMES: [&str; 5] = ["xn0", "xn1", "xp0", "xp1", "iR"];

/// Number of SOC points the cost is evaluated on.
pub const N_SOC: usize = 201;

/// Added per misordered window (`x0 >= x100`) during the constrained fit.
const ORDER_PENALTY: f64 = 1e3;
/// Cost reported to the optimizer where the model cannot be evaluated.
const UNEVALUABLE_COST: f64 = 1e6;

/// Which curve an evaluation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Negative electrode half cell
    Neg,
    /// Positive electrode half cell
    Pos,
    /// Full cell
    Cell,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Neg => "neg",
            Self::Pos => "pos",
            Self::Cell => "cell",
        })
    }
}

/// Outcome of either fitting stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    /// `[xn0, xn1, xp0, xp1, iR]`
    pub x: [f64; 5],
    /// Standard deviations in the order of `x`; all NaN after a coarse search,
    /// `None` when the Hessian could not be inverted.
    pub x_std: Option<[f64; 5]>,
    /// Cost at `x` (sum of enabled error terms, as fractions)
    pub fun: f64,
    /// Whether the stage met its stopping criterion
    pub success: bool,
    /// Termination message
    pub message: String,
    /// Number of cost evaluations
    pub nfev: usize,
    /// Optimizer iterations; `None` for the grid search
    pub niter: Option<u64>,
}

impl FitSummary {
    /// The four window parameters.
    pub fn window(&self) -> [f64; 4] {
        [self.x[0], self.x[1], self.x[2], self.x[3]]
    }

    /// The fitted iR offset [V].
    pub fn ir(&self) -> f64 {
        self.x[4]
    }
}

impl fmt::Display for FitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FitSummary(x=[{:.6}, {:.6}, {:.6}, {:.6}, {:.3e}], fun={:.4e}, success={}, nfev={})",
            self.x[0], self.x[1], self.x[2], self.x[3], self.x[4], self.fun, self.success, self.nfev
        )
    }
}

/// Fitted and measured curves on the evaluation grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitCurves {
    /// Cell SOC grid
    pub soc: Vec<f64>,
    /// Model voltage
    pub volt_fit: Vec<f64>,
    /// Measured voltage
    pub volt_data: Vec<f64>,
    /// Model dSOC/dV
    pub dqdv_fit: Vec<f64>,
    /// Measured (smoothed) dSOC/dV
    pub dqdv_data: Vec<f64>,
    /// Model dV/dSOC
    pub dvdq_fit: Vec<f64>,
    /// Measured (smoothed) dV/dSOC
    pub dvdq_data: Vec<f64>,
}

/// Per-term relative errors, each `mean(|fit - data| / |data|)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrTerms {
    /// Voltage term
    pub volt_err: f64,
    /// dSOC/dV term
    pub dqdv_err: f64,
    /// dV/dSOC term
    pub dvdq_err: f64,
    /// Curves behind the errors, when requested
    pub curves: Option<FitCurves>,
}

impl ErrTerms {
    /// Error of a single term.
    pub fn get(&self, term: CostTerm) -> f64 {
        match term {
            CostTerm::Voltage => self.volt_err,
            CostTerm::Dqdv => self.dqdv_err,
            CostTerm::Dvdq => self.dvdq_err,
        }
    }
}

/// Interpolants and the sampled measurement for the full cell.
#[derive(Debug, Clone)]
struct CellModel {
    ocv: Makima,
    dsoc_dv: Makima,
    dv_dsoc: Makima,
    soc: Vec<f64>,
    volt: Vec<f64>,
    dqdv: Vec<f64>,
    dvdq: Vec<f64>,
}

impl CellModel {
    fn build(curve: &FullCellCurve, smoothing: usize) -> Result<Self> {
        let [soc, voltage, dsoc_dv, dv_dsoc] = curve.sorted_columns();
        let dsoc_dv = moving_average(&dsoc_dv, smoothing);
        let dv_dsoc = moving_average(&dv_dsoc, smoothing);

        let ocv = Makima::new(&soc, &voltage)?;
        let dsoc_dv = Makima::new(&soc, &dsoc_dv)?;
        let dv_dsoc = Makima::new(&soc, &dv_dsoc)?;

        let (lo, hi) = ocv.domain();
        let grid = linspace(lo, hi, N_SOC);
        let volt = ocv.eval_many(&grid);
        let dqdv = dsoc_dv.eval_many(&grid);
        let dvdq = dv_dsoc.eval_many(&grid);

        Ok(Self { ocv, dsoc_dv, dv_dsoc, soc: grid, volt, dqdv, dvdq })
    }
}

/// Borrowed view of everything a cost evaluation needs.
#[derive(Clone, Copy)]
struct Model<'a> {
    neg: &'a Makima,
    pos: &'a Makima,
    cell: &'a CellModel,
}

struct ModelCurves {
    volt: Vec<f64>,
    dvdq: Vec<f64>,
    dqdv: Vec<f64>,
}

impl Model<'_> {
    fn curves(&self, p: &[f64; 5]) -> ModelCurves {
        let [xn0, xn1, xp0, xp1, ir] = *p;
        let (dxn, dxp) = (xn1 - xn0, xp1 - xp0);
        let n = self.cell.soc.len();
        let mut volt = Vec::with_capacity(n);
        let mut dvdq = Vec::with_capacity(n);
        for &s in &self.cell.soc {
            let x_neg = xn0 + dxn * s;
            let x_pos = xp0 + dxp * s;
            volt.push(self.pos.eval(x_pos) - self.neg.eval(x_neg) - ir);
            dvdq.push(self.pos.derivative(x_pos) * dxp - self.neg.derivative(x_neg) * dxn);
        }
        let dqdv = dvdq.iter().map(|d| 1.0 / d).collect();
        ModelCurves { volt, dvdq, dqdv }
    }

    fn terms(&self, m: &ModelCurves) -> [f64; 3] {
        [
            relative_error(&m.volt, &self.cell.volt),
            relative_error(&m.dqdv, &self.cell.dqdv),
            relative_error(&m.dvdq, &self.cell.dvdq),
        ]
    }

    fn cost(&self, p: &[f64; 5], enabled: CostTerms) -> f64 {
        let terms = self.terms(&self.curves(p));
        CostTerm::ALL.iter().zip(terms).filter(|(t, _)| enabled.contains(**t)).map(|(_, e)| e).sum()
    }

    fn ssr(&self, p: &[f64; 5], enabled: CostTerms) -> f64 {
        let m = self.curves(p);
        let sq = |fit: &[f64], data: &[f64]| -> f64 {
            fit.iter().zip(data).map(|(f, d)| (f - d).powi(2)).sum()
        };
        let mut total = 0.0;
        if enabled.contains(CostTerm::Voltage) {
            total += sq(&m.volt, &self.cell.volt);
        }
        if enabled.contains(CostTerm::Dqdv) {
            total += sq(&m.dqdv, &self.cell.dqdv);
        }
        if enabled.contains(CostTerm::Dvdq) {
            total += sq(&m.dvdq, &self.cell.dvdq);
        }
        total
    }
}

fn relative_error(fit: &[f64], data: &[f64]) -> f64 {
    fit.iter().zip(data).map(|(f, d)| ((f - d) / d).abs()).sum::<f64>() / data.len() as f64
}

/// Window parameters clamped to `[0, 1]`; a 4-vector gets `iR = 0`.
fn unpack(params: &[f64]) -> Result<[f64; 5]> {
    let ir = match params.len() {
        4 => 0.0,
        5 => params[4],
        n => {
            return Err(Error::Validation(format!(
                "parameter vector must have 4 or 5 entries [xn0, xn1, xp0, xp1, (iR)], got {n}"
            )));
        }
    };
    let w = |i: usize| params[i].clamp(0.0, 1.0);
    Ok([w(0), w(1), w(2), w(3), ir])
}

/// Grid candidate ordering: finite before non-finite, then by cost, then index.
fn prefer(a: (usize, f64), b: (usize, f64)) -> (usize, f64) {
    let key = |(k, e): (usize, f64)| (!e.is_finite(), if e.is_finite() { e } else { 0.0 }, k);
    let (ka, kb) = (key(a), key(b));
    let order = ka.0.cmp(&kb.0).then(ka.1.total_cmp(&kb.1)).then(ka.2.cmp(&kb.2));
    if order == Ordering::Greater { b } else { a }
}

/// Bounded-L-BFGS objective: cost plus ordering penalty, never non-finite.
struct FitObjective<'a> {
    model: Model<'a>,
    terms: CostTerms,
}

impl ObjectiveFunction for FitObjective<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let p = unpack(params)?;
        let mut cost = self.model.cost(&p, self.terms);
        if !cost.is_finite() {
            cost = UNEVALUABLE_COST;
        }
        for (lo, hi) in [(p[0], p[1]), (p[2], p[3])] {
            if lo >= hi {
                cost += ORDER_PENALTY * (1.0 + (lo - hi));
            }
        }
        Ok(cost)
    }
}

/// `maxiter` caps iterations and `xtol` bounds the per-iteration change in cost.
fn optimizer_config(config: &FitterConfig) -> OptimizerConfig {
    OptimizerConfig {
        max_iter: config.maxiter,
        tol_cost: config.xtol,
        ..OptimizerConfig::default()
    }
}

/// Aligns two half-cell OCV curves against a measured full cell.
///
/// Curves can be supplied at construction or set one at a time; every setter
/// rebuilds that curve's interpolants. Fitting operations fail with
/// [`Error::Validation`] until all three curves are present.
#[derive(Debug, Clone)]
pub struct DqdvFitter {
    config: FitterConfig,
    neg: Option<(HalfCellCurve, Makima)>,
    pos: Option<(HalfCellCurve, Makima)>,
    cell: Option<(FullCellCurve, CellModel)>,
}

impl DqdvFitter {
    /// Empty fitter with a validated configuration.
    pub fn new(config: FitterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, neg: None, pos: None, cell: None })
    }

    /// Fitter with all three curves set.
    pub fn with_curves(
        neg: HalfCellCurve,
        pos: HalfCellCurve,
        cell: FullCellCurve,
        config: FitterConfig,
    ) -> Result<Self> {
        let mut fitter = Self::new(config)?;
        fitter.set_neg(neg)?;
        fitter.set_pos(pos)?;
        fitter.set_cell(cell)?;
        Ok(fitter)
    }

    /// Current configuration.
    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    /// Replace the configuration. A new smoothing width rebuilds the full-cell data.
    pub fn set_config(&mut self, config: FitterConfig) -> Result<()> {
        config.validate()?;
        let resmooth = config.smoothing != self.config.smoothing;
        self.config = config;
        if resmooth && let Some((curve, _)) = self.cell.take() {
            self.set_cell(curve)?;
        }
        Ok(())
    }

    /// Replace the enabled cost terms.
    pub fn set_cost_terms(&mut self, terms: CostTerms) {
        self.config.cost_terms = terms;
    }

    /// Set the negative electrode curve.
    pub fn set_neg(&mut self, curve: HalfCellCurve) -> Result<()> {
        let interp = curve.interpolant()?.with_extrapolate(Extrapolate::Clamp);
        self.neg = Some((curve, interp));
        Ok(())
    }

    /// Set the positive electrode curve.
    pub fn set_pos(&mut self, curve: HalfCellCurve) -> Result<()> {
        let interp = curve.interpolant()?.with_extrapolate(Extrapolate::Clamp);
        self.pos = Some((curve, interp));
        Ok(())
    }

    /// Set the full-cell curve; derivative columns are smoothed before interpolation.
    pub fn set_cell(&mut self, curve: FullCellCurve) -> Result<()> {
        let model = CellModel::build(&curve, self.config.smoothing)?;
        self.cell = Some((curve, model));
        Ok(())
    }

    /// Negative electrode curve, if set.
    pub fn neg(&self) -> Option<&HalfCellCurve> {
        self.neg.as_ref().map(|(c, _)| c)
    }

    /// Positive electrode curve, if set.
    pub fn pos(&self) -> Option<&HalfCellCurve> {
        self.pos.as_ref().map(|(c, _)| c)
    }

    /// Full-cell curve, if set.
    pub fn cell(&self) -> Option<&FullCellCurve> {
        self.cell.as_ref().map(|(c, _)| c)
    }

    /// True once all three curves are set.
    pub fn is_ready(&self) -> bool {
        self.neg.is_some() && self.pos.is_some() && self.cell.is_some()
    }

    fn model(&self, op: &str) -> Result<Model<'_>> {
        match (&self.neg, &self.pos, &self.cell) {
            (Some((_, neg)), Some((_, pos)), Some((_, cell))) => Ok(Model { neg, pos, cell }),
            _ => {
                let missing: Vec<String> = [
                    (Domain::Neg, self.neg.is_none()),
                    (Domain::Pos, self.pos.is_none()),
                    (Domain::Cell, self.cell.is_none()),
                ]
                .into_iter()
                .filter(|(_, absent)| *absent)
                .map(|(d, _)| d.to_string())
                .collect();
                Err(Error::Validation(format!(
                    "can't run '{op}' until all curves are set; missing [{}]",
                    missing.join(", ")
                )))
            }
        }
    }

    fn missing(domain: Domain) -> Error {
        Error::Validation(format!("'{domain}' curve is not set"))
    }

    fn half_cell(&self, domain: Domain) -> Result<Option<&Makima>> {
        let slot = match domain {
            Domain::Neg => &self.neg,
            Domain::Pos => &self.pos,
            Domain::Cell => return Ok(None),
        };
        slot.as_ref().map(|(_, m)| Some(m)).ok_or_else(|| Self::missing(domain))
    }

    fn cell_model(&self) -> Result<&CellModel> {
        self.cell.as_ref().map(|(_, m)| m).ok_or_else(|| Self::missing(Domain::Cell))
    }

    /// OCV of `domain` at `soc`.
    pub fn get_ocv(&self, domain: Domain, soc: &[f64]) -> Result<Vec<f64>> {
        match self.half_cell(domain)? {
            Some(m) => Ok(m.eval_many(soc)),
            None => Ok(self.cell_model()?.ocv.eval_many(soc)),
        }
    }

    /// dV/dSOC of `domain` at `soc`.
    pub fn get_dvdq(&self, domain: Domain, soc: &[f64]) -> Result<Vec<f64>> {
        match self.half_cell(domain)? {
            Some(m) => Ok(m.derivative_many(soc)),
            None => Ok(self.cell_model()?.dv_dsoc.eval_many(soc)),
        }
    }

    /// dSOC/dV of `domain` at `soc`.
    pub fn get_dqdv(&self, domain: Domain, soc: &[f64]) -> Result<Vec<f64>> {
        match self.half_cell(domain)? {
            Some(m) => Ok(m.derivative_many(soc).into_iter().map(|d| 1.0 / d).collect()),
            None => Ok(self.cell_model()?.dsoc_dv.eval_many(soc)),
        }
    }

    /// Per-term errors at `params` (`[xn0, xn1, xp0, xp1]` or with `iR`).
    ///
    /// With `full_output` the fitted and measured curves are included.
    pub fn err_terms(&self, params: &[f64], full_output: bool) -> Result<ErrTerms> {
        let model = self.model("err_terms")?;
        let p = unpack(params)?;
        let m = model.curves(&p);
        let [volt_err, dqdv_err, dvdq_err] = model.terms(&m);
        let curves = full_output.then(|| FitCurves {
            soc: model.cell.soc.clone(),
            volt_fit: m.volt,
            volt_data: model.cell.volt.clone(),
            dqdv_fit: m.dqdv,
            dqdv_data: model.cell.dqdv.clone(),
            dvdq_fit: m.dvdq,
            dvdq_data: model.cell.dvdq.clone(),
        });
        Ok(ErrTerms { volt_err, dqdv_err, dvdq_err, curves })
    }

    /// Sum of the enabled error terms at `params`.
    pub fn err_func(&self, params: &[f64]) -> Result<f64> {
        let model = self.model("err_func")?;
        Ok(model.cost(&unpack(params)?, self.config.cost_terms))
    }

    /// Exhaustive search over an `nx`-point grid per window parameter.
    ///
    /// Only ordered windows (`x0 < x100` for both electrodes) are evaluated.
    /// Candidates are scored in parallel; the lowest cost wins, ties going to
    /// the earliest candidate, so the result matches a sequential scan.
    pub fn coarse_search(&self, nx: usize) -> Result<FitSummary> {
        let model = self.model("coarse_search")?;
        if nx < 2 {
            return Err(Error::Validation(format!("coarse_search needs nx >= 2, got {nx}")));
        }
        let span = linspace(0.0, 1.0, nx);
        let pairs: Vec<(f64, f64)> = (0..nx)
            .flat_map(|i| ((i + 1)..nx).map(move |j| (i, j)))
            .map(|(i, j)| (span[i], span[j]))
            .collect();
        let n_pairs = pairs.len();
        let n_candidates = n_pairs * n_pairs;
        let terms = self.config.cost_terms;

        let candidate = |k: usize| -> [f64; 5] {
            let (xn0, xn1) = pairs[k / n_pairs];
            let (xp0, xp1) = pairs[k % n_pairs];
            [xn0, xn1, xp0, xp1, 0.0]
        };

        let (best, fun) = (0..n_candidates)
            .into_par_iter()
            .map(|k| (k, model.cost(&candidate(k), terms)))
            .reduce_with(prefer)
            .ok_or_else(|| Error::Computation("coarse_search produced no candidates".into()))?;

        tracing::debug!(nx, n_candidates, fun, "coarse search finished");
        let success = fun.is_finite();
        Ok(FitSummary {
            x: candidate(best),
            x_std: Some([f64::NAN; 5]),
            fun,
            success,
            message: if success {
                "Done searching.".to_string()
            } else {
                "No candidate produced a finite cost.".to_string()
            },
            nfev: n_candidates,
            niter: None,
        })
    }

    /// Bounded local refinement starting from `x0`.
    ///
    /// Each window parameter may move by at most its configured bound (kept
    /// inside `[0, 1]`). With the voltage term enabled, `iR` is free and seeded
    /// from the mean voltage residual; otherwise it is fixed at zero. Window
    /// ordering is enforced with a penalty. Parameter standard deviations come
    /// from the Hessian of the squared residuals at the optimum.
    pub fn constrained_fit(&self, x0: &[f64]) -> Result<FitSummary> {
        let model = self.model("constrained_fit")?;
        let seed = unpack(x0)?;
        if let Some(i) = x0.iter().position(|v| !v.is_finite()) {
            return Err(Error::Validation(format!("'x0[{i}]' must be finite, got {}", x0[i])));
        }

        let terms = self.config.cost_terms;
        let fit_ir = terms.contains(CostTerm::Voltage);

        let mut start = seed;
        start[4] = 0.0;
        if fit_ir {
            let m = model.curves(&start);
            let n = m.volt.len() as f64;
            start[4] = m.volt.iter().zip(&model.cell.volt).map(|(f, d)| f - d).sum::<f64>() / n;
        }

        let mut bounds = [(0.0, 0.0); 5];
        for i in 0..4 {
            let b = self.config.bounds[i].clamp(1e-3, 1.0);
            bounds[i] = ((start[i] - b).max(0.0), (start[i] + b).min(1.0));
        }
        bounds[4] = if fit_ir { (f64::NEG_INFINITY, f64::INFINITY) } else { (0.0, 0.0) };

        let objective = FitObjective { model, terms };
        let optimizer = LbfgsbOptimizer::new(optimizer_config(&self.config));
        let result = optimizer.minimize(&objective, &start, &bounds)?;

        let mut x = [0.0; 5];
        x.copy_from_slice(&result.parameters);
        if !fit_ir {
            x[4] = 0.0;
        }
        let fun = model.cost(&x, terms);

        let hess = numerical_hessian(
            |p| unpack(p).map(|p| model.ssr(&p, terms)).unwrap_or(f64::NAN),
            &x,
        );
        let x_std = std_from_hessian(&hess).map(|s| {
            let mut std = [0.0; 5];
            std.copy_from_slice(&s);
            if !fit_ir {
                std[4] = 0.0;
            }
            std
        });

        tracing::info!(
            fun,
            converged = result.converged,
            nfev = result.n_fev,
            niter = result.n_iter,
            "constrained fit finished"
        );

        Ok(FitSummary {
            x,
            x_std,
            fun,
            success: result.converged,
            message: result.message,
            nfev: result.n_fev,
            niter: Some(result.n_iter),
        })
    }
}
