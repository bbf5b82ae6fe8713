//! Fitter configuration.

use af_core::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One term of the fitting cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTerm {
    /// Full-cell voltage. Enables the iR offset parameter.
    Voltage,
    /// Differential capacity dSOC/dV.
    Dqdv,
    /// Differential voltage dV/dSOC.
    Dvdq,
}

impl CostTerm {
    /// Every term, in canonical order.
    pub const ALL: [CostTerm; 3] = [CostTerm::Voltage, CostTerm::Dqdv, CostTerm::Dvdq];

    /// Lowercase option name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Voltage => "voltage",
            Self::Dqdv => "dqdv",
            Self::Dvdq => "dvdq",
        }
    }

    fn parse(name: &str) -> Result<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name).ok_or_else(|| {
            Error::Config(format!(
                "unknown cost term '{name}'; expected 'all' or a subset of [voltage, dqdv, dvdq]"
            ))
        })
    }
}

impl fmt::Display for CostTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Non-empty set of enabled cost terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CostTermsRepr", into = "Vec<CostTerm>")]
pub struct CostTerms {
    voltage: bool,
    dqdv: bool,
    dvdq: bool,
}

impl CostTerms {
    /// Build from a list of terms; duplicates are ignored, an empty list is rejected.
    pub fn new(terms: &[CostTerm]) -> Result<Self> {
        if terms.is_empty() {
            return Err(Error::Config(
                "cost_terms is empty; use 'all' or a subset of [voltage, dqdv, dvdq]".to_string(),
            ));
        }
        Ok(Self {
            voltage: terms.contains(&CostTerm::Voltage),
            dqdv: terms.contains(&CostTerm::Dqdv),
            dvdq: terms.contains(&CostTerm::Dvdq),
        })
    }

    /// All three terms.
    pub fn all() -> Self {
        Self { voltage: true, dqdv: true, dvdq: true }
    }

    /// Whether `term` is enabled.
    pub fn contains(&self, term: CostTerm) -> bool {
        match term {
            CostTerm::Voltage => self.voltage,
            CostTerm::Dqdv => self.dqdv,
            CostTerm::Dvdq => self.dvdq,
        }
    }

    /// Enabled terms in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = CostTerm> + '_ {
        CostTerm::ALL.into_iter().filter(|t| self.contains(*t))
    }

    /// Parse `"all"`, a single term name, or a list of names.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if let [one] = names
            && one.as_ref() == "all"
        {
            return Ok(Self::all());
        }
        let terms = names.iter().map(|n| CostTerm::parse(n.as_ref())).collect::<Result<Vec<_>>>()?;
        Self::new(&terms)
    }
}

impl Default for CostTerms {
    fn default() -> Self {
        Self { voltage: false, dqdv: true, dvdq: true }
    }
}

impl fmt::Display for CostTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(CostTerm::name).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CostTermsRepr {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<CostTermsRepr> for CostTerms {
    type Error = Error;

    fn try_from(repr: CostTermsRepr) -> Result<Self> {
        match repr {
            CostTermsRepr::One(name) => Self::parse(&[name]),
            CostTermsRepr::Many(names) => Self::parse(&names),
        }
    }
}

impl From<CostTerms> for Vec<CostTerm> {
    fn from(terms: CostTerms) -> Self {
        terms.iter().collect()
    }
}

/// Configuration for [`crate::DqdvFitter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FitterConfig {
    /// Width of the centred moving average applied to the measured full-cell
    /// derivative columns. `1` disables smoothing.
    pub smoothing: usize,
    /// Half-width of the box around the seed for `xn0, xn1, xp0, xp1`.
    /// Clipped to `[1e-3, 1]` when the fit runs.
    #[serde(deserialize_with = "deserialize_bounds")]
    pub bounds: [f64; 4],
    /// Maximum optimizer iterations.
    pub maxiter: u64,
    /// Stop once the cost changes by less than this between iterations.
    pub xtol: f64,
    /// Terms summed into the objective.
    pub cost_terms: CostTerms,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            smoothing: 3,
            bounds: [0.1; 4],
            maxiter: 100_000,
            xtol: 1e-9,
            cost_terms: CostTerms::default(),
        }
    }
}

impl FitterConfig {
    /// Parse a keyword map such as `{"bounds": 0.05, "cost_terms": "all"}`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("invalid fitter options: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.smoothing == 0 {
            return Err(Error::Config("'smoothing' must be >= 1".to_string()));
        }
        if let Some(b) = self.bounds.iter().find(|b| !(b.is_finite() && **b > 0.0)) {
            return Err(Error::Config(format!("'bounds' entries must be finite and > 0, got {b}")));
        }
        if self.maxiter == 0 {
            return Err(Error::Config("'maxiter' must be >= 1".to_string()));
        }
        if !(self.xtol.is_finite() && self.xtol >= 0.0) {
            return Err(Error::Config(format!("'xtol' must be finite and >= 0, got {}", self.xtol)));
        }
        Ok(())
    }
}

fn deserialize_bounds<'de, D>(deserializer: D) -> std::result::Result<[f64; 4], D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Scalar(f64),
        List(Vec<f64>),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Scalar(b) => Ok([b; 4]),
        Repr::List(v) => <[f64; 4]>::try_from(v.as_slice()).map_err(|_| {
            D::Error::custom(format!("'bounds' must be a number or a list of length 4, got {}", v.len()))
        }),
    }
}
