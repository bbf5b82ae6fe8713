//! Box-bounded L-BFGS on top of argmin.
//!
//! argmin's L-BFGS is unconstrained, so every point it asks about is clamped
//! into the box first and gradient components pushing out of an active bound
//! are zeroed. The fitter's objective is piecewise smooth (absolute relative
//! errors), which can make the More-Thuente line search give up; the lowest
//! point evaluated so far is tracked and returned, flagged as not converged,
//! when that happens.

use af_core::{Error, Result};
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stopping rules and memory size for [`LbfgsbOptimizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    /// Iteration cap
    pub max_iter: u64,
    /// Stop once the projected gradient norm drops below this
    pub tol_grad: f64,
    /// Stop once the cost changes by less than this between iterations
    pub tol_cost: f64,
    /// L-BFGS history length
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol_grad: 1e-9, tol_cost: 1e-10, m: 10 }
    }
}

/// Outcome of [`LbfgsbOptimizer::minimize`].
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Lowest point found, inside the bounds
    pub parameters: Vec<f64>,
    /// Objective at `parameters`
    pub fval: f64,
    /// Iterations taken
    pub n_iter: u64,
    /// Objective evaluations
    pub n_fev: usize,
    /// Gradient evaluations
    pub n_gev: usize,
    /// True when a stopping rule (not the iteration cap or a failure) ended the run
    pub converged: bool,
    /// Why the run ended
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fval={:.6e} after {} iterations ({} f / {} g evals, converged={}): {}",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged, self.message
        )
    }
}

/// A scalar function to minimise.
pub trait ObjectiveFunction: Send + Sync {
    /// Value at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at `params`. Central differences with step
    /// `1e-8 * max(|x_i|, 1)` unless overridden.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut x = params.to_vec();
        let mut grad = Vec::with_capacity(params.len());
        for i in 0..params.len() {
            let h = 1e-8 * params[i].abs().max(1.0);
            x[i] = params[i] + h;
            let up = self.eval(&x)?;
            x[i] = params[i] - h;
            let down = self.eval(&x)?;
            x[i] = params[i];
            grad.push((up - down) / (2.0 * h));
        }
        Ok(grad)
    }
}

/// Validated box `[lo_i, hi_i]`; `lo == hi` pins a parameter.
struct Bounds<'a>(&'a [(f64, f64)]);

impl<'a> Bounds<'a> {
    fn new(bounds: &'a [(f64, f64)], n_params: usize) -> Result<Self> {
        if bounds.len() != n_params {
            return Err(Error::Validation(format!(
                "{n_params} parameters but {} bounds",
                bounds.len()
            )));
        }
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(Error::Validation(format!("bound {i} is empty: [{lo}, {hi}]")));
            }
        }
        Ok(Self(bounds))
    }

    fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter().zip(self.0).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
    }

    /// Zero gradient components at `x` that point out of the box.
    fn project(&self, x: &[f64], grad: &mut [f64]) {
        const EDGE: f64 = 1e-12;
        for ((g, &v), &(lo, hi)) in grad.iter_mut().zip(x).zip(self.0) {
            let pushes_below = v <= lo + EDGE && *g > 0.0;
            let pushes_above = v >= hi - EDGE && *g < 0.0;
            if pushes_below || pushes_above {
                *g = 0.0;
            }
        }
    }
}

/// Evaluation counters plus the lowest finite point seen.
#[derive(Default)]
struct Tracker {
    n_fev: AtomicUsize,
    n_gev: AtomicUsize,
    best: Mutex<Option<(f64, Vec<f64>)>>,
}

impl Tracker {
    fn record(&self, cost: f64, x: &[f64]) {
        self.n_fev.fetch_add(1, Ordering::Relaxed);
        if !cost.is_finite() {
            return;
        }
        if let Ok(mut best) = self.best.lock()
            && best.as_ref().is_none_or(|(c, _)| cost < *c)
        {
            *best = Some((cost, x.to_vec()));
        }
    }

    fn take_best(&self) -> Option<(f64, Vec<f64>)> {
        self.best.lock().ok().and_then(|mut b| b.take())
    }
}

/// What argmin sees: the objective restricted to the box.
struct Boxed<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a Bounds<'a>,
    tracker: &'a Tracker,
}

fn to_argmin(e: Error) -> argmin::core::Error {
    argmin::core::Error::msg(e.to_string())
}

impl CostFunction for Boxed<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Vec<f64>) -> std::result::Result<f64, argmin::core::Error> {
        let x = self.bounds.clamp(p);
        let cost = self.objective.eval(&x).map_err(to_argmin)?;
        self.tracker.record(cost, &x);
        Ok(cost)
    }
}

impl Gradient for Boxed<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, p: &Vec<f64>) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        self.tracker.n_gev.fetch_add(1, Ordering::Relaxed);
        let x = self.bounds.clamp(p);
        let mut grad = self.objective.gradient(&x).map_err(to_argmin)?;
        self.bounds.project(&x, &mut grad);
        Ok(grad)
    }
}

/// L-BFGS restricted to a box.
#[derive(Debug, Clone, Default)]
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    /// Optimizer with the given stopping rules.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimise `objective` from `x0` (clamped into `bounds`).
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        x0: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        let bounds = Bounds::new(bounds, x0.len())?;
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
            .with_tolerance_grad(self.config.tol_grad)
            .and_then(|s| s.with_tolerance_cost(self.config.tol_cost))
            .map_err(|e| Error::Config(format!("invalid optimizer tolerance: {e}")))?;

        let tracker = Tracker::default();
        let problem = Boxed { objective, bounds: &bounds, tracker: &tracker };
        let start = bounds.clamp(x0);
        let run = Executor::new(problem, solver)
            .configure(|state| state.param(start).max_iters(self.config.max_iter))
            .run();

        let n_fev = tracker.n_fev.load(Ordering::Relaxed);
        let n_gev = tracker.n_gev.load(Ordering::Relaxed);
        let best_seen = tracker.take_best();

        let (parameters, fval, n_iter, converged, message) = match run {
            Ok(res) => {
                let state = res.state();
                let status = state.get_termination_status();
                let converged = matches!(
                    status,
                    TerminationStatus::Terminated(
                        TerminationReason::SolverConverged | TerminationReason::TargetCostReached
                    )
                );
                let from_state = state
                    .get_best_param()
                    .map(|p| (bounds.clamp(p), state.get_best_cost()))
                    .filter(|(_, c)| c.is_finite());
                let (parameters, fval) = match (from_state, best_seen) {
                    (Some((p, c)), Some((seen, q))) => {
                        if seen < c { (q, seen) } else { (p, c) }
                    }
                    (Some((p, c)), None) => (p, c),
                    (None, Some((seen, q))) => (q, seen),
                    (None, None) => {
                        return Err(Error::Computation(
                            "optimizer finished without a finite objective value".to_string(),
                        ));
                    }
                };
                (parameters, fval, state.get_iter(), converged, status.to_string())
            }
            Err(e) => {
                let Some((fval, parameters)) = best_seen else {
                    return Err(Error::Computation(format!(
                        "optimization failed before any finite evaluation: {e}"
                    )));
                };
                tracing::warn!(error = %e, fval, "line search broke down; keeping best point seen");
                // executor state is gone; one gradient is taken per accepted step
                (parameters, fval, n_gev as u64, false, format!("stopped early: {e}"))
            }
        };

        Ok(OptimizationResult { parameters, fval, n_iter, n_fev, n_gev, converged, message })
    }
}
