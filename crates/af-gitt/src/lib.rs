//! # af-gitt
//!
//! Galvanostatic intermittent titration (GITT) analysis: locate current
//! pulses in a time series and extract per-pulse solid-phase diffusivity,
//! exchange current density, and open-circuit voltage as a function of the
//! intercalation fraction. Incremental current interruption (ICI) records
//! are handled by [`extract_ici`].
//!
//! ```no_run
//! use af_core::{CellGeometry, TimeSeries};
//! use af_gitt::{GittOptions, PulseSign, extract_params};
//!
//! # fn main() -> af_core::Result<()> {
//! let cell = CellGeometry::new(1.8e-4, 1e-4, 0.3, 0.1, 1.8e-6, 5000.0, 1.5e-5, 97.9)?;
//! # let (t, i, v) = (vec![0.0], vec![0.0], vec![0.0]);
//! let series = TimeSeries::new(t, i, v, 298.15, false)?;
//! let params = extract_params(PulseSign::Discharge, &cell, &series, &GittOptions::default())?;
//! println!("{:?}", params.ds);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Per-pulse parameter extraction.
pub mod extract;
/// ICI relaxation analysis.
pub mod ici;
/// Extraction options.
pub mod options;
/// Pulse boundary detection.
pub mod segment;

pub use extract::{GittParams, GittStats, extract_params, extract_params_with_stats};
pub use ici::{IciParams, extract_ici};
pub use options::{GittOptions, IciOptions};
pub use segment::{PulseSign, Pulses, find_pulses};
