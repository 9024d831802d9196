//! Run configuration.
//!
//! A tuning run can be described by a JSON file; every field has a default
//! so a file only needs to name what differs. Command-line flags override
//! file values (see [`crate::cli`]).

use crate::errors::{RepeatabilityError, Result};
use crate::pipeline::qc::{ExpectedErrors, FilterParams};
use crate::pipeline::sweep::SweepMode;
use crate::pipeline::tuning::TuningPlan;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// CSV sample sheet declaring replicate groups.
    pub sample_sheet: Option<PathBuf>,
    /// External pipeline program.
    pub program: Option<PathBuf>,
    /// Fixed arguments passed to the program before the filter options.
    pub program_args: Vec<String>,
    /// Where per-configuration scratch directories go; a temporary directory if unset.
    pub work_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Threads handed to the external pipeline.
    pub threads: usize,
    /// Grid points run concurrently within one sweep; 1 means sequential.
    pub parallel_points: usize,
    /// Counts at or below this are not a call.
    pub min_abundance: u64,
    /// Parameters not being swept.
    pub base: FilterParams,
    pub trunc_q_values: Vec<u8>,
    pub max_ee_values: Vec<ExpectedErrors>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            sample_sheet: None,
            program: None,
            program_args: Vec::new(),
            work_dir: None,
            output_dir: PathBuf::from("results"),
            threads: 1,
            parallel_points: 1,
            min_abundance: 0,
            base: FilterParams::default(),
            trunc_q_values: (2..=30).step_by(2).collect(),
            max_ee_values: [1.0, 2.0, 3.0, 4.0, 5.0]
                .into_iter()
                .map(ExpectedErrors::symmetric)
                .collect(),
        }
    }
}

impl RunConfig {
    /// Loads a JSON run file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let config: RunConfig = serde_json::from_reader(BufReader::new(file))?;
        log::info!("Loaded run configuration from {}", path.display());
        Ok(config)
    }

    /// Checks that the configuration is complete enough to run a tuning.
    pub fn validate(&self) -> Result<()> {
        if self.sample_sheet.is_none() {
            return Err(RepeatabilityError::Configuration(
                "no sample sheet given".to_string(),
            ));
        }
        if self.program.is_none() {
            return Err(RepeatabilityError::Configuration(
                "no pipeline program given".to_string(),
            ));
        }
        if self.trunc_q_values.is_empty() {
            return Err(RepeatabilityError::Configuration(
                "truncation-quality grid is empty".to_string(),
            ));
        }
        if self.parallel_points == 0 {
            return Err(RepeatabilityError::Configuration(
                "parallel_points must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sweep_mode(&self) -> SweepMode {
        if self.parallel_points > 1 {
            SweepMode::Parallel {
                threads: self.parallel_points,
            }
        } else {
            SweepMode::Sequential
        }
    }

    pub fn tuning_plan(&self) -> TuningPlan {
        TuningPlan {
            base: self.base.clone(),
            trunc_q_values: self.trunc_q_values.clone(),
            max_ee_values: self.max_ee_values.clone(),
            mode: self.sweep_mode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(
            &path,
            r#"{
                "sample_sheet": "samples.csv",
                "program": "dada2_run.R",
                "trunc_q_values": [18, 20, 22],
                "base": {"min_len": 100},
                "max_ee_values": [{"fwd": 2.0, "rev": 4.0}]
            }"#,
        )
        .unwrap();

        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.trunc_q_values, vec![18, 20, 22]);
        assert_eq!(config.base.min_len, 100);
        assert_eq!(config.base.trunc_q, 2);
        assert_eq!(config.max_ee_values, vec![ExpectedErrors::new(2.0, 4.0)]);
        assert_eq!(config.threads, 1);
        assert_eq!(config.sweep_mode(), SweepMode::Sequential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{"trunc_q": 3}"#).unwrap();
        assert!(matches!(
            RunConfig::from_file(&path),
            Err(RepeatabilityError::JsonError(_))
        ));
    }

    #[test]
    fn test_validate_requires_inputs() {
        let config = RunConfig::default();
        assert!(matches!(
            config.validate(),
            Err(RepeatabilityError::Configuration(_))
        ));
    }

    #[test]
    fn test_parallel_points_select_mode() {
        let config = RunConfig {
            parallel_points: 4,
            ..RunConfig::default()
        };
        assert_eq!(config.sweep_mode(), SweepMode::Parallel { threads: 4 });
        assert_eq!(config.tuning_plan().trunc_q_values.first(), Some(&2));
    }
}
