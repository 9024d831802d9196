//! Quality-filtering parameters handed to the external pipeline, and the
//! grids the sweeps iterate over.

use crate::errors::{RepeatabilityError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A configuration that can be written as a row of a sweep result table.
pub trait SweepPoint {
    /// Column headers describing the configuration.
    fn column_names() -> Vec<&'static str>;

    /// Values for [`SweepPoint::column_names`], in the same order.
    fn column_values(&self) -> Vec<String>;

    /// Short filesystem-safe name, used for per-configuration scratch directories.
    fn label(&self) -> String;
}

/// Maximum expected errors allowed per read, forward and reverse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedErrors {
    pub fwd: f64,
    pub rev: f64,
}

impl ExpectedErrors {
    pub fn new(fwd: f64, rev: f64) -> Self {
        ExpectedErrors { fwd, rev }
    }

    pub fn symmetric(value: f64) -> Self {
        ExpectedErrors {
            fwd: value,
            rev: value,
        }
    }
}

impl Default for ExpectedErrors {
    fn default() -> Self {
        ExpectedErrors::symmetric(2.0)
    }
}

impl fmt::Display for ExpectedErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fwd == self.rev {
            write!(f, "{}", self.fwd)
        } else {
            write!(f, "{}:{}", self.fwd, self.rev)
        }
    }
}

/// Parses `2` (both directions) or `2:4` (forward:reverse).
impl FromStr for ExpectedErrors {
    type Err = RepeatabilityError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| -> Result<f64> {
            let value: f64 = v.trim().parse().map_err(|_| {
                RepeatabilityError::Configuration(format!("invalid expected-error value '{}'", v))
            })?;
            if value.is_nan() || value <= 0.0 {
                return Err(RepeatabilityError::Configuration(format!(
                    "expected-error ceiling must be positive, got '{}'",
                    v
                )));
            }
            Ok(value)
        };
        match s.split_once(':') {
            Some((fwd, rev)) => Ok(ExpectedErrors::new(parse(fwd)?, parse(rev)?)),
            None => Ok(ExpectedErrors::symmetric(parse(s)?)),
        }
    }
}

/// Quality-filtering parameters for one run of the external pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Truncate reads at the first base with quality at or below this value.
    pub trunc_q: u8,
    /// Expected-error ceilings; reads above are discarded.
    pub max_ee: ExpectedErrors,
    /// Fixed truncation length of forward reads, 0 for none.
    pub trunc_len_fwd: usize,
    /// Fixed truncation length of reverse reads, 0 for none.
    pub trunc_len_rev: usize,
    /// Reads shorter than this after truncation are discarded.
    pub min_len: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            trunc_q: 2,
            max_ee: ExpectedErrors::default(),
            trunc_len_fwd: 0,
            trunc_len_rev: 0,
            min_len: 50,
        }
    }
}

impl FilterParams {
    pub fn with_trunc_q(&self, trunc_q: u8) -> Self {
        FilterParams {
            trunc_q,
            ..self.clone()
        }
    }

    pub fn with_max_ee(&self, max_ee: ExpectedErrors) -> Self {
        FilterParams {
            max_ee,
            ..self.clone()
        }
    }
}

impl SweepPoint for FilterParams {
    fn column_names() -> Vec<&'static str> {
        vec![
            "trunc_q",
            "max_ee_fwd",
            "max_ee_rev",
            "trunc_len_fwd",
            "trunc_len_rev",
            "min_len",
        ]
    }

    fn column_values(&self) -> Vec<String> {
        vec![
            self.trunc_q.to_string(),
            self.max_ee.fwd.to_string(),
            self.max_ee.rev.to_string(),
            self.trunc_len_fwd.to_string(),
            self.trunc_len_rev.to_string(),
            self.min_len.to_string(),
        ]
    }

    fn label(&self) -> String {
        format!(
            "truncq{}_maxee{}-{}_len{}-{}_min{}",
            self.trunc_q,
            self.max_ee.fwd,
            self.max_ee.rev,
            self.trunc_len_fwd,
            self.trunc_len_rev,
            self.min_len
        )
    }
}

/// One configuration per truncation quality, everything else from `base`.
pub fn trunc_q_grid(base: &FilterParams, values: &[u8]) -> Vec<FilterParams> {
    values.iter().map(|&q| base.with_trunc_q(q)).collect()
}

/// One configuration per expected-error ceiling, everything else from `base`.
pub fn max_ee_grid(base: &FilterParams, values: &[ExpectedErrors]) -> Vec<FilterParams> {
    values.iter().map(|&ee| base.with_max_ee(ee)).collect()
}
