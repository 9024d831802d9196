//! Repeatability statistics.
//!
//! Replicate matching lives in [`matching`]; this module reduces the
//! per-group match results of one abundance table to the single
//! repeatability score the parameter sweep maximizes.
//!
//! The overall score is the unweighted mean of per-group rates, not a pooled
//! ratio of matched over all variants. Pooling would let one large replicate
//! group dominate the metric and can change which configuration wins.

pub mod matching;

pub use matching::{match_replicates, presence_set, DetectionRule, MatchResult, MinAbundance};

use crate::count_table::AbundanceTable;
use crate::errors::{RepeatabilityError, Result};
use crate::metadata::ReplicateGroups;
use itertools::Itertools;
use serde::Serialize;

/// Score of one replicate group within a scored table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupScore {
    pub group: String,
    pub matched: usize,
    pub discordant: usize,
    pub score: f64,
}

impl From<&MatchResult> for GroupScore {
    fn from(result: &MatchResult) -> Self {
        GroupScore {
            group: result.group.clone(),
            matched: result.matched.len(),
            discordant: result.discordant.len(),
            score: result.group_score(),
        }
    }
}

/// Repeatability of one abundance table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepeatabilityReport {
    /// Mean of the per-group scores, in [0, 1].
    pub score: f64,
    /// Per-group breakdown, in group declaration order.
    pub groups: Vec<GroupScore>,
}

/// Reduces per-group match results to the overall repeatability score.
pub fn repeatability_score(results: &[MatchResult]) -> Result<f64> {
    if results.is_empty() {
        return Err(RepeatabilityError::Configuration(
            "cannot score repeatability without replicate groups".to_string(),
        ));
    }
    // Summed in ascending order so group declaration order cannot change the bits.
    let sum: f64 = results
        .iter()
        .map(MatchResult::group_score)
        .sorted_by(f64::total_cmp)
        .sum();
    Ok(sum / results.len() as f64)
}

/// Matches replicates in `table` and scores the result.
pub fn score_table(
    table: &AbundanceTable,
    groups: &ReplicateGroups,
    rule: &dyn DetectionRule,
) -> Result<RepeatabilityReport> {
    let results = match_replicates(table, groups, rule)?;
    let score = repeatability_score(&results)?;
    Ok(RepeatabilityReport {
        score,
        groups: results.iter().map(GroupScore::from).collect(),
    })
}
