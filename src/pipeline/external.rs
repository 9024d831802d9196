//! The external sequence-processing pipeline.
//!
//! Primer trimming, quality filtering, error-model learning, denoising, pair
//! merging and chimera removal all happen outside this crate. The sweep only
//! needs a [`PipelineRunner`] that turns one [`FilterParams`] into an
//! abundance table. [`CommandRunner`] does that by invoking an external
//! program (typically an R script) in a fresh scratch directory per
//! invocation and reading back the CSV files it writes.

use crate::count_table::AbundanceTable;
use crate::io::{read_abundance_table, read_stage_counts};
use crate::pipeline::qc::{FilterParams, SweepPoint};
use crate::pipeline::report::StageCounts;
use itertools::Itertools;
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use thiserror::Error;

/// File the external program must write its abundance table to.
pub const ABUNDANCE_TABLE_FILE: &str = "seqtab.csv";

/// File the external program may write per-stage read counts to.
pub const READ_TRACKING_FILE: &str = "track.csv";

// --- Error Type ---
/// Failure of one pipeline invocation. Recoverable: the sweep skips the
/// configuration and continues.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("failed to launch '{program}': {source}")]
    LaunchError {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("pipeline exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },

    #[error("pipeline produced no {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("unreadable pipeline output: {0}")]
    InvalidOutput(String),

    #[error("no reads left for sample(s): {}", .0.join(", "))]
    EmptySamples(Vec<String>),
}

/// What one pipeline run hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub table: AbundanceTable,
    /// Reads surviving each stage, when the pipeline reports them.
    pub tracking: Option<StageCounts>,
}

impl AsRef<AbundanceTable> for PipelineOutput {
    fn as_ref(&self) -> &AbundanceTable {
        &self.table
    }
}

/// Runs the external pipeline for one configuration.
///
/// Implementations used with a parallel sweep must tolerate concurrent
/// calls; each call has to use its own working area.
pub trait PipelineRunner: Sync {
    fn run(&self, params: &FilterParams) -> Result<PipelineOutput, PipelineError>;
}

/// Invokes an external program once per configuration.
///
/// The program receives the filter parameters as `--truncq`, `--maxee-f`,
/// `--maxee-r`, `--trunc-len-f`, `--trunc-len-r`, `--min-len`, `--threads`
/// and `--outdir` options after any fixed arguments, and must write
/// [`ABUNDANCE_TABLE_FILE`] (and optionally [`READ_TRACKING_FILE`]) into the
/// output directory.
pub struct CommandRunner {
    program: PathBuf,
    args: Vec<String>,
    threads: usize,
    work_dir: PathBuf,
    /// Samples every output table must contain.
    expected_samples: Vec<String>,
    /// Keeps an auto-created work dir alive for the runner's lifetime.
    _scratch: Option<tempfile::TempDir>,
}

impl CommandRunner {
    /// Create a runner. Without `work_dir` a temporary directory is used and
    /// removed when the runner is dropped.
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        threads: usize,
        work_dir: Option<PathBuf>,
    ) -> Result<Self, PipelineError> {
        let (work_dir, scratch) = match work_dir {
            Some(dir) => {
                fs::create_dir_all(&dir)?;
                (dir, None)
            }
            None => {
                let tmp = tempfile::Builder::new().prefix("amplicon-tune-").tempdir()?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };
        let program = program.into();
        info!(
            "External pipeline '{}' will run in {}",
            program.display(),
            work_dir.display()
        );
        Ok(CommandRunner {
            program,
            args,
            threads: threads.max(1),
            work_dir,
            expected_samples: Vec::new(),
            _scratch: scratch,
        })
    }

    /// Samples the pipeline must report. One missing from the output table
    /// lost all its reads, and the run fails like any other empty sample.
    pub fn with_expected_samples<I, S>(mut self, samples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_samples = samples.into_iter().map(Into::into).collect();
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Creates a fresh output directory for one invocation.
    ///
    /// Named after the configuration label plus a random suffix, so repeated
    /// or concurrent runs of equal parameters never share files and never
    /// see output left behind by an earlier run. The directory is kept after
    /// the run for inspection.
    pub fn create_output_dir(&self, params: &FilterParams) -> Result<PathBuf, PipelineError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}.", params.label()))
            .keep(true)
            .tempdir_in(&self.work_dir)?;
        Ok(dir.path().to_path_buf())
    }

    fn command(&self, params: &FilterParams, out_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--truncq")
            .arg(params.trunc_q.to_string())
            .arg("--maxee-f")
            .arg(params.max_ee.fwd.to_string())
            .arg("--maxee-r")
            .arg(params.max_ee.rev.to_string())
            .arg("--trunc-len-f")
            .arg(params.trunc_len_fwd.to_string())
            .arg("--trunc-len-r")
            .arg(params.trunc_len_rev.to_string())
            .arg("--min-len")
            .arg(params.min_len.to_string())
            .arg("--threads")
            .arg(self.threads.to_string())
            .arg("--outdir")
            .arg(out_dir);
        cmd
    }
}

impl PipelineRunner for CommandRunner {
    fn run(&self, params: &FilterParams) -> Result<PipelineOutput, PipelineError> {
        let out_dir = self.create_output_dir(params)?;
        let start_time = Instant::now();

        let mut cmd = self.command(params, &out_dir);
        debug!("Running {:?}", cmd);
        let output = cmd.output().map_err(|source| PipelineError::LaunchError {
            program: self.program.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Last lines carry the actual R/Python error.
            let lines: Vec<&str> = stderr.lines().collect();
            return Err(PipelineError::ExitStatus {
                status: output.status.to_string(),
                stderr: lines[lines.len().saturating_sub(5)..].iter().join(" | "),
            });
        }

        let output = collect_outputs(&out_dir, &self.expected_samples)?;
        info!(
            "Pipeline for {} finished in {:.1}s ({} variants x {} samples)",
            params.label(),
            start_time.elapsed().as_secs_f64(),
            output.table.dimensions().0,
            output.table.dimensions().1
        );
        Ok(output)
    }
}

/// Reads the files an external pipeline run left in `out_dir`.
///
/// A sample with no reads left is a failed run: the sweep skips the
/// configuration instead of scoring a degenerate table. That covers samples
/// in `expected_samples` the table dropped as well as all-zero columns.
pub fn collect_outputs(
    out_dir: &Path,
    expected_samples: &[String],
) -> Result<PipelineOutput, PipelineError> {
    let table_path = out_dir.join(ABUNDANCE_TABLE_FILE);
    if !table_path.is_file() {
        return Err(PipelineError::MissingOutput(table_path));
    }
    let table = read_abundance_table(&table_path)
        .map_err(|e| PipelineError::InvalidOutput(e.to_string()))?;

    let mut empty: Vec<String> = expected_samples
        .iter()
        .filter(|sample| !table.contains_sample(sample))
        .cloned()
        .collect();
    empty.extend(table.empty_samples().into_iter().map(String::from));
    if !empty.is_empty() {
        return Err(PipelineError::EmptySamples(empty));
    }

    let tracking_path = out_dir.join(READ_TRACKING_FILE);
    let tracking = if tracking_path.is_file() {
        Some(
            read_stage_counts(&tracking_path)
                .map_err(|e| PipelineError::InvalidOutput(e.to_string()))?,
        )
    } else {
        warn!(
            "No {} in {}; read tracking will be unavailable",
            READ_TRACKING_FILE,
            out_dir.display()
        );
        None
    };

    Ok(PipelineOutput { table, tracking })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_collect_outputs_reads_table_and_tracking() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(ABUNDANCE_TABLE_FILE), "sequence,A1,A2\nACGT,3,4\n").unwrap();
        fs::write(
            dir.path().join(READ_TRACKING_FILE),
            "sample,input,filtered,denoisedF,denoisedR,merged,nonchim\nA1,10,9,9,9,8,3\nA2,10,9,9,9,8,4\n",
        )
        .unwrap();

        let output = collect_outputs(dir.path(), &[]).unwrap();
        assert_eq!(output.table.abundance("A2", "ACGT"), Some(4));
        assert_eq!(output.tracking.unwrap().samples.len(), 2);
    }

    #[test]
    fn test_collect_outputs_missing_table() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            collect_outputs(dir.path(), &[]),
            Err(PipelineError::MissingOutput(_))
        ));
    }

    #[test]
    fn test_collect_outputs_rejects_empty_sample() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(ABUNDANCE_TABLE_FILE), "sequence,A1,A2\nACGT,3,0\n").unwrap();
        match collect_outputs(dir.path(), &[]) {
            Err(PipelineError::EmptySamples(samples)) => assert_eq!(samples, vec!["A2"]),
            other => panic!("expected empty sample error, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_outputs_rejects_dropped_sample() {
        let dir = tempdir().unwrap();
        // B3 lost all reads in filtering and the pipeline left it out.
        fs::write(
            dir.path().join(ABUNDANCE_TABLE_FILE),
            "sequence,A1,A2,B1,B2
ACGT,3,4,5,6
",
        )
        .unwrap();
        let expected: Vec<String> = ["A1", "A2", "B1", "B2", "B3"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match collect_outputs(dir.path(), &expected) {
            Err(PipelineError::EmptySamples(samples)) => assert_eq!(samples, vec!["B3"]),
            other => panic!("expected empty sample error, got {:?}", other),
        }
        assert!(collect_outputs(dir.path(), &expected[..4]).is_ok());
    }

    #[test]
    fn test_output_dirs_are_distinct_per_invocation() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        let runner = CommandRunner::new("/bin/true", Vec::new(), 2, Some(work.clone())).unwrap();
        let params = FilterParams::default().with_trunc_q(20);

        let first = runner.create_output_dir(&params).unwrap();
        let second = runner.create_output_dir(&params).unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
        assert!(first.starts_with(&work));
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("truncq20_maxee2-2_len0-0_min50."));
    }

    #[cfg(unix)]
    #[test]
    fn test_earlier_output_is_never_rescored() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        let params = FilterParams::default().with_trunc_q(20);

        // Output of an earlier run in the same work dir, both under the bare
        // label and in a directory of a previous invocation.
        let old = work.join(params.label());
        fs::create_dir_all(&old).unwrap();
        fs::write(old.join(ABUNDANCE_TABLE_FILE), "sequence,A1,A2
STALE,3,4
").unwrap();
        let writer = CommandRunner::new(
            "/bin/sh",
            vec![
                "-c".to_string(),
                "while [ $# -gt 0 ]; do [ \"$1\" = --outdir ] && out=\"$2\"; shift; done;                  printf 'sequence,A1,A2\nSTALE,3,4\n' > \"$out/seqtab.csv\""
                    .to_string(),
                "pipeline".to_string(),
            ],
            1,
            Some(work.clone()),
        )
        .unwrap();
        assert!(writer.run(&params).is_ok());

        // A program that exits cleanly without writing anything.
        let silent = CommandRunner::new("/bin/true", Vec::new(), 1, Some(work)).unwrap();
        assert!(matches!(
            silent.run(&params),
            Err(PipelineError::MissingOutput(_))
        ));
    }

    #[test]
    fn test_launch_failure_is_pipeline_error() {
        let dir = tempdir().unwrap();
        let runner = CommandRunner::new(
            dir.path().join("does-not-exist"),
            Vec::new(),
            1,
            Some(dir.path().to_path_buf()),
        )
        .unwrap();
        let result = runner.run(&FilterParams::default());
        assert!(matches!(result, Err(PipelineError::LaunchError { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_runner_runs_script() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("pipeline.sh");
        fs::write(
            &script,
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in --outdir) out=\"$2\"; shift;; --truncq) q=\"$2\"; shift;; esac\n\
               shift\n\
             done\n\
             if [ \"$q\" = \"30\" ]; then echo 'all reads filtered' >&2; exit 1; fi\n\
             printf 'sequence,A1,A2\\nACGT,%s,5\\n' \"$q\" > \"$out/seqtab.csv\"\n",
        )
        .unwrap();

        let runner = CommandRunner::new(
            "/bin/sh",
            vec![script.display().to_string()],
            1,
            None,
        )
        .unwrap();
        let output = runner.run(&FilterParams::default().with_trunc_q(12)).unwrap();
        assert_eq!(output.table.abundance("A1", "ACGT"), Some(12));
        assert!(output.tracking.is_none());

        match runner.run(&FilterParams::default().with_trunc_q(30)) {
            Err(PipelineError::ExitStatus { stderr, .. }) => {
                assert!(stderr.contains("all reads filtered"))
            }
            other => panic!("expected exit status error, got {:?}", other),
        }
    }
}
