//! Error types for ampfit

use thiserror::Error;

/// ampfit error type
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-invariant input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Pulse start/stop detection produced unmatched boundaries
    #[error(
        "Segmentation error: found {starts} pulse starts but {stops} pulse stops; \
         remove incomplete pulses before extracting"
    )]
    Segmentation {
        /// Number of detected pulse starts
        starts: usize,
        /// Number of detected pulse stops
        stops: usize,
    },

    /// Unrecognized or malformed option
    #[error("Configuration error: {0}")]
    Config(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
