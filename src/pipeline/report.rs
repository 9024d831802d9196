//! Read tracking: how many reads of each sample survive each pipeline stage
//! for the chosen configuration.

use crate::errors::{RepeatabilityError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline stages, in the order reads pass through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Input,
    Filtered,
    DenoisedFwd,
    DenoisedRev,
    Merged,
    NonChimeric,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Input,
        Stage::Filtered,
        Stage::DenoisedFwd,
        Stage::DenoisedRev,
        Stage::Merged,
        Stage::NonChimeric,
    ];

    /// Column header used in read-tracking tables.
    pub fn column_name(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Filtered => "filtered",
            Stage::DenoisedFwd => "denoisedF",
            Stage::DenoisedRev => "denoisedR",
            Stage::Merged => "merged",
            Stage::NonChimeric => "nonchim",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for Stage {
    type Err = RepeatabilityError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .iter()
            .find(|stage| stage.column_name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| RepeatabilityError::Data(format!("unknown pipeline stage '{}'", s)))
    }
}

/// Per-stage read count vectors, each aligned with `samples`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub samples: Vec<String>,
    pub stages: IndexMap<Stage, Vec<u64>>,
}

/// One sample's read counts through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadTrackingRow {
    pub sample: String,
    pub input: u64,
    pub filtered: u64,
    #[serde(rename = "denoisedF")]
    pub denoised_fwd: u64,
    #[serde(rename = "denoisedR")]
    pub denoised_rev: u64,
    pub merged: u64,
    #[serde(rename = "nonchim")]
    pub non_chimeric: u64,
}

impl ReadTrackingRow {
    /// Fraction of input reads left after chimera removal; `None` without input.
    pub fn retained_fraction(&self) -> Option<f64> {
        if self.input == 0 {
            None
        } else {
            Some(self.non_chimeric as f64 / self.input as f64)
        }
    }
}

/// Read-tracking table, one row per sample in the given sample order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadTrackingTable {
    pub rows: Vec<ReadTrackingRow>,
}

/// Assembles per-stage count vectors into a per-sample table.
///
/// Every stage of [`Stage::ALL`] must be present and every vector must have
/// one entry per sample; anything else is a data error.
pub fn assemble_read_tracking(counts: &StageCounts) -> Result<ReadTrackingTable> {
    let n_samples = counts.samples.len();
    let mut columns = Vec::with_capacity(Stage::ALL.len());
    for stage in Stage::ALL {
        let column = counts.stages.get(&stage).ok_or_else(|| {
            RepeatabilityError::Data(format!("read tracking is missing stage '{}'", stage))
        })?;
        if column.len() != n_samples {
            return Err(RepeatabilityError::Data(format!(
                "stage '{}' has {} count(s) but there are {} sample(s)",
                stage,
                column.len(),
                n_samples
            )));
        }
        columns.push(column);
    }

    let rows = counts
        .samples
        .iter()
        .enumerate()
        .map(|(i, sample)| ReadTrackingRow {
            sample: sample.clone(),
            input: columns[0][i],
            filtered: columns[1][i],
            denoised_fwd: columns[2][i],
            denoised_rev: columns[3][i],
            merged: columns[4][i],
            non_chimeric: columns[5][i],
        })
        .collect();

    Ok(ReadTrackingTable { rows })
}

/// Human-readable summary of a read-tracking table.
pub fn generate_report(table: &ReadTrackingTable) -> String {
    let mut report = String::new();
    report.push_str("Read tracking\n");
    report.push_str("=============\n\n");
    report.push_str(&format!(
        "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>9}\n",
        "sample", "input", "filtered", "denoisedF", "denoisedR", "merged", "nonchim", "retained"
    ));
    for row in &table.rows {
        let retained = row
            .retained_fraction()
            .map_or("NA".to_string(), |f| format!("{:.1}%", f * 100.0));
        report.push_str(&format!(
            "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>9}\n",
            row.sample,
            row.input,
            row.filtered,
            row.denoised_fwd,
            row.denoised_rev,
            row.merged,
            row.non_chimeric,
            retained
        ));
    }
    report
}
