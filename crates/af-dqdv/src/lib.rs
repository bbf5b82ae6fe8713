//! # af-dqdv
//!
//! Differential-capacity fitting for ampfit.
//!
//! This crate provides:
//! - half-cell / full-cell OCV tables ([`HalfCellCurve`], [`FullCellCurve`]),
//!   including full-cell tables built from raw cycling records
//! - the three-curve fitter ([`DqdvFitter`]): grid search then bounded L-BFGS
//! - Hessian-based parameter uncertainties
//! - degradation post-processing (electrode capacities, LAM, TLI)
//!
//! Typical use:
//!
//! ```no_run
//! # use af_dqdv::{DqdvFitter, FitterConfig, FitTable, FullCellCurve, HalfCellCurve};
//! # fn run(neg: HalfCellCurve, pos: HalfCellCurve, cell: FullCellCurve) -> af_core::Result<()> {
//! let fitter = DqdvFitter::with_curves(neg, pos, cell, FitterConfig::default())?;
//! let seed = fitter.coarse_search(11)?;
//! let fit = fitter.constrained_fit(&seed.x)?;
//!
//! let mut table = FitTable::new();
//! table.append(4.8, &fit, &[])?;
//! let aging = table.degradation()?;
//! # let _ = aging;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Fitter options.
pub mod config;
/// OCV tables.
pub mod curves;
/// Capacity / LAM / TLI post-processing.
pub mod degradation;
/// The dQ/dV fitter.
pub mod fitter;
/// Bounded L-BFGS wrapper.
pub mod optimizer;
/// Fit result table.
pub mod table;
/// Hessian-based standard deviations.
pub mod uncertainty;

pub use config::{CostTerm, CostTerms, FitterConfig};
pub use curves::{CyclingCurve, FullCellCurve, HalfCellCurve};
pub use degradation::{
    DegradationResult, DegradationStd, post_process, post_process_with_reference,
    post_process_with_std,
};
pub use fitter::{Domain, DqdvFitter, ErrTerms, FitCurves, FitSummary, N_SOC, PARAM_NAMES};
pub use optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use table::{FitRow, FitTable};
