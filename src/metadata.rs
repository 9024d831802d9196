//! Replicate group declarations.
//!
//! A replicate group is a set of samples that derive from the same
//! biological source and are expected to yield the same true set of
//! sequence variants. Groups are declared up front (usually in a CSV sample
//! sheet) and are read-only for the rest of a run.

use crate::errors::{RepeatabilityError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Validated replicate groups, in declaration order.
///
/// Every group holds at least two distinct samples and every sample belongs
/// to exactly one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IndexMap<String, Vec<String>>", into = "IndexMap<String, Vec<String>>")]
pub struct ReplicateGroups {
    groups: IndexMap<String, Vec<String>>,
}

impl ReplicateGroups {
    /// Validates and wraps a group name -> sample list mapping.
    pub fn new(groups: IndexMap<String, Vec<String>>) -> Result<Self> {
        if groups.is_empty() {
            return Err(RepeatabilityError::Configuration(
                "no replicate groups declared".to_string(),
            ));
        }

        let mut owner: HashMap<&str, &str> = HashMap::new();
        for (name, samples) in &groups {
            if samples.len() < 2 {
                return Err(RepeatabilityError::Configuration(format!(
                    "replicate group '{}' needs ≥ 2 samples, found {}",
                    name,
                    samples.len()
                )));
            }
            for sample in samples {
                if sample.is_empty() {
                    return Err(RepeatabilityError::Configuration(format!(
                        "replicate group '{}' contains an empty sample id",
                        name
                    )));
                }
                if let Some(previous) = owner.insert(sample.as_str(), name.as_str()) {
                    return Err(RepeatabilityError::Configuration(if previous == name.as_str() {
                        format!("sample '{}' is listed twice in group '{}'", sample, name)
                    } else {
                        format!(
                            "sample '{}' is declared in both group '{}' and group '{}'",
                            sample, previous, name
                        )
                    }));
                }
            }
        }

        Ok(ReplicateGroups { groups })
    }

    /// Builds groups from (sample, group) pairs, grouping in first-seen order.
    pub fn from_assignments<I, S, G>(assignments: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, G)>,
        S: Into<String>,
        G: Into<String>,
    {
        let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
        for (sample, group) in assignments {
            groups.entry(group.into()).or_default().push(sample.into());
        }
        Self::new(groups)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups
            .iter()
            .map(|(name, samples)| (name.as_str(), samples.as_slice()))
    }

    pub fn get(&self, group: &str) -> Option<&[String]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    /// Number of declared groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// All samples across groups, in declaration order.
    pub fn samples(&self) -> impl Iterator<Item = &str> {
        self.groups.values().flatten().map(String::as_str)
    }

    /// Group a sample belongs to.
    pub fn group_of(&self, sample: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, samples)| samples.iter().any(|s| s == sample))
            .map(|(name, _)| name.as_str())
    }
}

impl TryFrom<IndexMap<String, Vec<String>>> for ReplicateGroups {
    type Error = RepeatabilityError;

    fn try_from(groups: IndexMap<String, Vec<String>>) -> Result<Self> {
        ReplicateGroups::new(groups)
    }
}

impl From<ReplicateGroups> for IndexMap<String, Vec<String>> {
    fn from(groups: ReplicateGroups) -> Self {
        groups.groups
    }
}

/// Loads replicate groups from a CSV sample sheet.
///
/// The sheet needs a sample column (`SampleID` or `Sample`) and a group
/// column (`ReplicateGroup`, `Group` or `Individual`); header matching is
/// case-insensitive and other columns are ignored.
pub fn load_replicate_groups(path: impl AsRef<Path>) -> Result<ReplicateGroups> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)?;

    // Find column indices for required fields
    let headers = rdr.headers()?.clone();
    let sample_col = find_column(&headers, &["sampleid", "sample"]).ok_or_else(|| {
        RepeatabilityError::Configuration(format!(
            "sample sheet '{}' is missing a 'SampleID'/'Sample' column",
            path.display()
        ))
    })?;
    let group_col = find_column(&headers, &["replicategroup", "group", "individual"])
        .ok_or_else(|| {
            RepeatabilityError::Configuration(format!(
                "sample sheet '{}' is missing a 'ReplicateGroup'/'Group'/'Individual' column",
                path.display()
            ))
        })?;

    let mut assignments = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result?;
        let sample_id = record.get(sample_col).unwrap_or("").trim().to_string();
        let group = record.get(group_col).unwrap_or("").trim().to_string();

        if sample_id.is_empty() {
            log::warn!("Skipping sample sheet row {} with empty sample ID.", line + 2);
            continue;
        }
        if group.is_empty() {
            return Err(RepeatabilityError::Configuration(format!(
                "sample '{}' has no replicate group in '{}'",
                sample_id,
                path.display()
            )));
        }
        assignments.push((sample_id, group));
    }

    let groups = ReplicateGroups::from_assignments(assignments)?;
    log::info!(
        "Loaded {} replicate group(s) covering {} sample(s) from {}",
        groups.len(),
        groups.samples().count(),
        path.display()
    );
    Ok(groups)
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    names.iter().find_map(|name| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn create_test_sheet(path: &Path, content: &str) {
        let mut file = File::create(path).unwrap();
        writeln!(file, "{}", content).unwrap();
    }

    #[test]
    fn test_load_replicate_groups_basic() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("samples.csv");
        create_test_sheet(
            &file_path,
            "SampleID,Individual,Plate\nA1,A,P1\nA2,A,P2\nB1,B,P1\nB2,B,P2\nB3,B,P3",
        );

        let groups = load_replicate_groups(&file_path).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.get("A").unwrap(), ["A1", "A2"]);
        assert_eq!(groups.get("B").unwrap().len(), 3);
        assert_eq!(groups.group_of("B3"), Some("B"));
        assert_eq!(groups.group_of("C1"), None);
    }

    #[test]
    fn test_load_replicate_groups_missing_columns() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("invalid.csv");
        create_test_sheet(&file_path, "Sample,OtherField\nS1,Value1\n");

        let result = load_replicate_groups(&file_path);
        assert!(matches!(result, Err(RepeatabilityError::Configuration(_))));

        // Alternative header spellings
        let file_path2 = dir.path().join("valid_alt_names.csv");
        create_test_sheet(&file_path2, "sample,group\nS1,G\nS2,G\n");
        assert!(load_replicate_groups(&file_path2).is_ok());
    }

    #[test]
    fn test_single_sample_group_is_rejected() {
        let result = ReplicateGroups::from_assignments([("A1", "A"), ("B1", "B"), ("B2", "B")]);
        match result {
            Err(RepeatabilityError::Configuration(msg)) => {
                assert!(msg.contains("'A' needs ≥ 2 samples"), "{}", msg)
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_sample_in_two_groups_is_rejected() {
        let result =
            ReplicateGroups::from_assignments([("A1", "A"), ("A2", "A"), ("A1", "B"), ("B2", "B")]);
        assert!(matches!(result, Err(RepeatabilityError::Configuration(_))));
    }

    #[test]
    fn test_empty_declaration_is_rejected() {
        let result = ReplicateGroups::new(IndexMap::new());
        assert!(matches!(result, Err(RepeatabilityError::Configuration(_))));
    }

    #[test]
    fn test_json_round_trip_validates() {
        let groups: ReplicateGroups =
            serde_json::from_str(r#"{"A": ["A1", "A2"], "B": ["B1", "B2"]}"#).unwrap();
        assert_eq!(groups.len(), 2);

        let bad: std::result::Result<ReplicateGroups, _> = serde_json::from_str(r#"{"A": ["A1"]}"#);
        assert!(bad.is_err());
    }
}
