//! Pulse boundary detection for GITT current records.

use af_core::{Error, Result, TimeSeries};
use serde::{Deserialize, Serialize};

/// Current direction of the pulses to analyse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PulseSign {
    /// Positive (charge) pulses.
    Charge,
    /// Negative (discharge) pulses.
    Discharge,
}

impl PulseSign {
    /// `+1.0` for charge, `-1.0` for discharge.
    pub fn signum(self) -> f64 {
        match self {
            Self::Charge => 1.0,
            Self::Discharge => -1.0,
        }
    }
}

impl TryFrom<i32> for PulseSign {
    type Error = Error;

    fn try_from(flag: i32) -> Result<Self> {
        match flag {
            1 => Ok(Self::Charge),
            -1 => Ok(Self::Discharge),
            other => Err(Error::Config(format!("pulse sign must be +1 or -1, got {other}"))),
        }
    }
}

/// Matched pulse windows in chronological order.
///
/// `start[k]` is the last rest sample before pulse `k`; `stop[k]` is the last
/// sample of the pulse itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pulses {
    /// Index of the rest sample preceding each pulse.
    pub start: Vec<usize>,
    /// Index of the final in-pulse sample.
    pub stop: Vec<usize>,
    /// Mean current over all samples of the requested sign [A].
    pub current: f64,
}

impl Pulses {
    /// Number of pulses.
    pub fn len(&self) -> usize {
        self.start.len()
    }

    /// True when no pulse of the requested sign was found.
    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    /// Iterate `(start, stop)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.start.iter().copied().zip(self.stop.iter().copied())
    }
}

/// Locate current pulses of the given sign.
///
/// A sample belongs to a pulse when its current exceeds half the mean current
/// of all same-sign samples (in the pulse direction). Everything else counts
/// as rest, including current of the opposite sign whatever its magnitude.
/// Every pulse must be preceded and followed by at least one rest sample;
/// otherwise the start and stop counts disagree and an
/// [`Error::Segmentation`] is returned. The record is never repaired here:
/// trim incomplete pulses before calling.
pub fn find_pulses(series: &TimeSeries, sign: PulseSign) -> Result<Pulses> {
    let current = series.current();
    let s = sign.signum();

    let (sum, count) = current
        .iter()
        .filter(|&&i| i * s > 0.0)
        .fold((0.0, 0usize), |(sum, count), &i| (sum + i, count + 1));
    if count == 0 {
        return Ok(Pulses { start: Vec::new(), stop: Vec::new(), current: f64::NAN });
    }
    let i_pulse = sum / count as f64;
    let threshold = 0.5 * i_pulse.abs();

    let active: Vec<bool> = current.iter().map(|&i| i * s > threshold).collect();

    let mut start = Vec::new();
    let mut stop = Vec::new();
    for (k, w) in active.windows(2).enumerate() {
        match (w[0], w[1]) {
            (false, true) => start.push(k),
            (true, false) => stop.push(k),
            _ => {}
        }
    }

    if start.len() != stop.len() {
        return Err(Error::Segmentation { starts: start.len(), stops: stop.len() });
    }
    if let Some(k) = start.iter().zip(&stop).position(|(a, b)| a >= b) {
        return Err(Error::Validation(format!(
            "pulse {k} stops (index {}) before it starts (index {}); the record begins \
             inside a pulse",
            stop[k], start[k]
        )));
    }

    tracing::debug!(n_pulses = start.len(), i_pulse, "pulses located");
    Ok(Pulses { start, stop, current: i_pulse })
}
