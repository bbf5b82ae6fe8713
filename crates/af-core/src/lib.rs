//! # af-core
//!
//! Shared foundation for the ampfit extraction engines:
//! - error taxonomy (`Error`, `Result`)
//! - cell geometry and GITT time series value types
//! - modified-Akima curve interpolation
//! - small numeric helpers (trapezoid, gradient, OLS line)
//!
//! Nothing in this crate performs I/O; every function works on caller-owned
//! slices and returns fresh allocations.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Physical constants.
pub mod constants;
/// Error types.
pub mod error;
/// Monotone-friendly curve interpolation.
pub mod interp;
/// Numeric helpers.
pub mod math;
/// Cell and time-series value types.
pub mod types;

pub use error::{Error, Result};
pub use interp::{Extrapolate, Makima};
pub use types::{CellGeometry, TimeSeries};
