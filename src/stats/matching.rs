//! Replicate matching: which sequence variants are called consistently
//! across all members of a replicate group.

use crate::count_table::AbundanceTable;
use crate::errors::{RepeatabilityError, Result};
use crate::metadata::ReplicateGroups;
use serde::Serialize;
use std::collections::BTreeSet;

/// Decides whether a read count counts as a call of that variant.
pub trait DetectionRule: Send + Sync {
    fn is_called(&self, count: u64) -> bool;
}

/// Calls a variant when its count is strictly above `threshold`.
///
/// The default threshold of 0 calls any nonzero count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MinAbundance {
    pub threshold: u64,
}

impl MinAbundance {
    pub fn new(threshold: u64) -> Self {
        MinAbundance { threshold }
    }
}

impl DetectionRule for MinAbundance {
    fn is_called(&self, count: u64) -> bool {
        count > self.threshold
    }
}

impl<F> DetectionRule for F
where
    F: Fn(u64) -> bool + Send + Sync,
{
    fn is_called(&self, count: u64) -> bool {
        self(count)
    }
}

/// Per-group outcome of replicate matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub group: String,
    /// Variants called in every member of the group.
    pub matched: BTreeSet<String>,
    /// Variants called in some but not all members.
    pub discordant: BTreeSet<String>,
}

impl MatchResult {
    /// |matched| / (|matched| + |discordant|), or 1.0 if the group called nothing.
    pub fn group_score(&self) -> f64 {
        let total = self.matched.len() + self.discordant.len();
        if total == 0 {
            1.0
        } else {
            self.matched.len() as f64 / total as f64
        }
    }
}

/// Variants called in `sample`; `None` if the sample is not a table column.
pub fn presence_set<'a>(
    table: &'a AbundanceTable,
    sample: &str,
    rule: &dyn DetectionRule,
) -> Option<BTreeSet<&'a str>> {
    let counts = table.get_sample_counts(sample)?;
    Some(
        table
            .sequences()
            .iter()
            .zip(counts.iter())
            .filter(|(_, &count)| rule.is_called(count))
            .map(|(sequence, _)| sequence.as_str())
            .collect(),
    )
}

/// Matches every replicate group against one abundance table.
///
/// Fails with a configuration error if a group references a sample that is
/// not a column of the table. Results come back in group declaration order.
pub fn match_replicates(
    table: &AbundanceTable,
    groups: &ReplicateGroups,
    rule: &dyn DetectionRule,
) -> Result<Vec<MatchResult>> {
    let missing: Vec<&str> = groups
        .samples()
        .filter(|sample| !table.contains_sample(sample))
        .collect();
    if !missing.is_empty() {
        return Err(RepeatabilityError::Configuration(format!(
            "replicate group sample(s) not found in abundance table: {}",
            missing.join(", ")
        )));
    }

    groups
        .iter()
        .map(|(name, samples)| match_group(table, name, samples, rule))
        .collect()
}

fn match_group(
    table: &AbundanceTable,
    name: &str,
    samples: &[String],
    rule: &dyn DetectionRule,
) -> Result<MatchResult> {
    if samples.len() < 2 {
        return Err(RepeatabilityError::Configuration(format!(
            "replicate group '{}' needs ≥ 2 samples",
            name
        )));
    }

    let mut presence = Vec::with_capacity(samples.len());
    for sample in samples {
        let set = presence_set(table, sample, rule).ok_or_else(|| {
            RepeatabilityError::Configuration(format!(
                "sample '{}' of replicate group '{}' not found in abundance table",
                sample, name
            ))
        })?;
        presence.push(set);
    }

    let union: BTreeSet<&str> = presence.iter().flatten().copied().collect();
    let (matched, discordant): (BTreeSet<String>, BTreeSet<String>) = union
        .into_iter()
        .map(String::from)
        .partition(|sequence| presence.iter().all(|set| set.contains(sequence.as_str())));

    log::debug!(
        "Replicate group '{}': {} matched, {} discordant variant(s)",
        name,
        matched.len(),
        discordant.len()
    );

    Ok(MatchResult {
        group: name.to_string(),
        matched,
        discordant,
    })
}
