//! Physical constants in kilomole units.

/// Faraday's constant [C/kmol]
pub const FARADAY: f64 = 96485.33e3;

/// Universal gas constant [J/kmol/K]
pub const GAS_CONSTANT: f64 = 8.314e3;

/// Seconds per hour, for converting coulombs to amp-hours.
pub const SECONDS_PER_HOUR: f64 = 3600.0;
