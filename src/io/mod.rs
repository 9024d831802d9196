//! Input/Output operations module.
//!
//! Reads abundance tables and per-stage read counts produced by the external
//! pipeline, and writes the artifacts of a tuning run: sweep result tables,
//! the chosen configuration, the final abundance table and read tracking.

use crate::count_table::AbundanceTable;
use crate::errors::{RepeatabilityError, Result};
use crate::pipeline::qc::SweepPoint;
use crate::pipeline::report::{ReadTrackingTable, Stage, StageCounts};
use crate::pipeline::sweep::SweepResultSet;
use indexmap::IndexMap;
use ndarray::Array2;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Writes an abundance table as CSV: `sequence,<sample…>`, one row per variant.
pub fn write_abundance_table(table: &AbundanceTable, output_path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(output_path.as_ref())?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    let mut header = vec!["sequence".to_string()];
    header.extend(table.sample_names().iter().cloned());
    writer.write_record(&header)?;

    let counts = table.counts_matrix();
    for (r, sequence) in table.sequences().iter().enumerate() {
        let mut record = Vec::with_capacity(header.len());
        record.push(sequence.clone());
        record.extend(counts.row(r).iter().map(u64::to_string));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Reads an abundance table written by [`write_abundance_table`] or by the
/// external pipeline.
pub fn read_abundance_table(path: impl AsRef<Path>) -> Result<AbundanceTable> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        return Err(RepeatabilityError::Data(format!(
            "abundance table '{}' has no sample columns",
            path.display()
        )));
    }
    let samples: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

    let mut sequences = Vec::new();
    let mut values = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let sequence = record.get(0).unwrap_or("").trim().to_string();
        if sequence.is_empty() {
            return Err(RepeatabilityError::Data(format!(
                "abundance table '{}' has a row without a sequence",
                path.display()
            )));
        }
        for field in record.iter().skip(1) {
            values.push(parse_count(field, &sequence, path)?);
        }
        sequences.push(sequence);
    }

    let counts = Array2::from_shape_vec((sequences.len(), samples.len()), values)
        .map_err(|e| RepeatabilityError::Data(format!("{}: {}", path.display(), e)))?;
    AbundanceTable::from_counts(sequences, samples, counts)
}

/// Reads per-stage read counts: a `sample` column plus one column per stage.
///
/// Unknown columns are ignored; missing stages are left for
/// [`crate::pipeline::report::assemble_read_tracking`] to reject.
pub fn read_stage_counts(path: impl AsRef<Path>) -> Result<StageCounts> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.clone();

    let sample_col = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("sample"))
        .ok_or_else(|| {
            RepeatabilityError::Data(format!(
                "read tracking '{}' is missing a 'sample' column",
                path.display()
            ))
        })?;
    let stage_cols: Vec<(usize, Stage)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != sample_col)
        .filter_map(|(i, h)| h.parse::<Stage>().ok().map(|stage| (i, stage)))
        .collect();

    let mut counts = StageCounts {
        samples: Vec::new(),
        stages: stage_cols.iter().map(|(_, stage)| (*stage, Vec::new())).collect::<IndexMap<_, _>>(),
    };
    for result in rdr.records() {
        let record = result?;
        let sample = record.get(sample_col).unwrap_or("").trim().to_string();
        for (col, stage) in &stage_cols {
            let value = parse_count(record.get(*col).unwrap_or(""), &sample, path)?;
            if let Some(column) = counts.stages.get_mut(stage) {
                column.push(value);
            }
        }
        counts.samples.push(sample);
    }
    Ok(counts)
}

/// Writes a read-tracking table as CSV.
pub fn write_read_tracking(table: &ReadTrackingTable, output_path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(output_path.as_ref())?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for row in &table.rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a sweep result set as CSV: `index,<config columns…>,score,status`.
///
/// Undefined scores are written as `NA`; the status column holds `ok` or the
/// reason the configuration was skipped.
pub fn write_sweep_results<C>(results: &SweepResultSet<C>, output_path: impl AsRef<Path>) -> Result<()>
where
    C: SweepPoint + PartialEq,
{
    let file = File::create(output_path.as_ref())?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    let mut header = vec!["index"];
    header.extend(C::column_names());
    header.extend(["score", "status"]);
    writer.write_record(&header)?;

    for row in results.rows() {
        let mut record = vec![row.index.to_string()];
        record.extend(row.config.column_values());
        record.push(row.score.map_or("NA".to_string(), |s| s.to_string()));
        record.push(match &row.failure {
            Some(reason) => format!("skipped: {}", reason),
            None => "ok".to_string(),
        });
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes any serializable value as pretty-printed JSON.
pub fn write_json<T: Serialize>(value: &T, output_path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(output_path.as_ref())?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

fn parse_count(field: &str, row: &str, path: &Path) -> Result<u64> {
    let field = field.trim();
    // R writes integer-valued doubles like "12.0" in some setups.
    let value = field
        .parse::<u64>()
        .ok()
        .or_else(|| {
            field
                .parse::<f64>()
                .ok()
                // u64::MAX as f64 rounds up to 2^64, itself out of range.
                .filter(|v| *v >= 0.0 && *v < u64::MAX as f64 && v.fract() == 0.0)
                .map(|v| v as u64)
        });
    value.ok_or_else(|| {
        RepeatabilityError::Data(format!(
            "invalid read count '{}' in row '{}' of '{}'",
            field,
            row,
            path.display()
        ))
    })
}
