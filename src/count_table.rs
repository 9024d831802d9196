//! Sequence-variant abundance tables.
//!
//! One table is produced by the external pipeline for every configuration
//! of a sweep. Rows are sequence variants keyed by their nucleotide
//! sequence, columns are samples. Tables are immutable once built: the
//! sweep builds a fresh one per grid point and drops it after scoring.

use crate::errors::{RepeatabilityError, Result};
use indexmap::{IndexMap, IndexSet};
use ndarray::{Array2, ArrayView1};
use serde::Serialize;

/// Abundance matrix (sequence variants x samples) of nonnegative read counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbundanceTable {
    /// Read counts, one row per sequence variant, one column per sample.
    counts: Array2<u64>,

    /// Row keys. A variant is identified by its sequence content.
    sequences: IndexSet<String>,

    /// Column keys.
    samples: IndexSet<String>,
}

impl AbundanceTable {
    /// Builds a table from a dense matrix plus its row and column keys.
    ///
    /// Fails with a data error when the matrix shape does not match the key
    /// counts, or when a sequence or sample appears twice.
    pub fn from_counts(
        sequences: Vec<String>,
        samples: Vec<String>,
        counts: Array2<u64>,
    ) -> Result<Self> {
        let (n_rows, n_cols) = counts.dim();
        if n_rows != sequences.len() || n_cols != samples.len() {
            return Err(RepeatabilityError::Data(format!(
                "count matrix is {}x{} but {} sequence(s) and {} sample(s) were given",
                n_rows,
                n_cols,
                sequences.len(),
                samples.len()
            )));
        }

        let sequences = unique_keys(sequences, "sequence")?;
        let samples = unique_keys(samples, "sample")?;

        Ok(AbundanceTable {
            counts,
            sequences,
            samples,
        })
    }

    /// Builds a table from per-sample count maps (sample -> sequence -> count).
    ///
    /// Samples keep the map order, sequences are ordered by first appearance.
    /// A sequence missing from a sample's map counts as zero in that sample.
    pub fn build_from_data(data: &IndexMap<String, IndexMap<String, u64>>) -> Result<Self> {
        let mut sequences: IndexSet<String> = IndexSet::new();
        for sample_counts in data.values() {
            for sequence in sample_counts.keys() {
                sequences.insert(sequence.clone());
            }
        }

        let mut counts = Array2::<u64>::zeros((sequences.len(), data.len()));
        for (col, sample_counts) in data.values().enumerate() {
            for (sequence, &count) in sample_counts {
                // Every key was inserted above.
                if let Some(row) = sequences.get_index_of(sequence) {
                    counts[[row, col]] = count;
                }
            }
        }

        Ok(AbundanceTable {
            counts,
            sequences,
            samples: data.keys().cloned().collect(),
        })
    }

    /// Returns the dimensions of the table (sequence variants, samples).
    pub fn dimensions(&self) -> (usize, usize) {
        self.counts.dim()
    }

    /// Returns a reference to the underlying count matrix.
    pub fn counts_matrix(&self) -> &Array2<u64> {
        &self.counts
    }

    pub fn sequences(&self) -> &IndexSet<String> {
        &self.sequences
    }

    pub fn sample_names(&self) -> &IndexSet<String> {
        &self.samples
    }

    pub fn contains_sample(&self, sample: &str) -> bool {
        self.samples.contains(sample)
    }

    /// Retrieves the counts of every variant in one sample (a column view).
    pub fn get_sample_counts(&self, sample: &str) -> Option<ArrayView1<'_, u64>> {
        self.samples
            .get_index_of(sample)
            .map(|idx| self.counts.column(idx))
    }

    /// Retrieves the counts of one variant across all samples (a row view).
    pub fn get_sequence_counts(&self, sequence: &str) -> Option<ArrayView1<'_, u64>> {
        self.sequences
            .get_index_of(sequence)
            .map(|idx| self.counts.row(idx))
    }

    /// Count of `sequence` in `sample`, or `None` if either key is unknown.
    pub fn abundance(&self, sample: &str, sequence: &str) -> Option<u64> {
        let col = self.samples.get_index_of(sample)?;
        let row = self.sequences.get_index_of(sequence)?;
        Some(self.counts[[row, col]])
    }

    /// Total reads per sample, in column order.
    pub fn sample_totals(&self) -> Vec<u64> {
        self.counts.columns().into_iter().map(|c| c.sum()).collect()
    }

    /// Samples whose column sums to zero.
    pub fn empty_samples(&self) -> Vec<&str> {
        self.samples
            .iter()
            .zip(self.sample_totals())
            .filter(|(_, total)| *total == 0)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl AsRef<AbundanceTable> for AbundanceTable {
    fn as_ref(&self) -> &AbundanceTable {
        self
    }
}

fn unique_keys(keys: Vec<String>, what: &str) -> Result<IndexSet<String>> {
    let mut set = IndexSet::with_capacity(keys.len());
    for key in keys {
        if !set.insert(key.clone()) {
            return Err(RepeatabilityError::Data(format!(
                "duplicate {} '{}' in abundance table",
                what, key
            )));
        }
    }
    Ok(set)
}
