use crate::config::RunConfig;
use crate::io::{
    read_abundance_table, read_stage_counts, write_abundance_table, write_json,
    write_read_tracking, write_sweep_results,
};
use crate::metadata::load_replicate_groups;
use crate::pipeline::external::CommandRunner;
use crate::pipeline::qc::ExpectedErrors;
use crate::pipeline::report::{assemble_read_tracking, generate_report};
use crate::pipeline::tuning::{run_tuning, TuningOutcome};
use crate::stats::{score_table, MinAbundance};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tune amplicon quality filtering for replicate repeatability", long_about = None)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sweep truncation quality, then expected errors, and keep the most repeatable result
    Tune {
        /// JSON run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// CSV sample sheet with sample and replicate-group columns
        #[arg(short, long)]
        samples: Option<PathBuf>,

        /// External pipeline program
        #[arg(short, long)]
        program: Option<PathBuf>,

        /// Fixed argument passed to the program before the filter options (repeatable)
        #[arg(long = "program-arg", allow_hyphen_values = true)]
        program_args: Vec<String>,

        /// Directory for per-configuration pipeline output
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Path to the output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads handed to the external pipeline
        #[arg(short, long)]
        threads: Option<usize>,

        /// Grid points run concurrently within a sweep
        #[arg(long)]
        parallel_points: Option<usize>,

        /// Truncation qualities to sweep, e.g. 18,20,22
        #[arg(long, value_delimiter = ',')]
        truncq: Vec<u8>,

        /// Expected-error ceilings to sweep, e.g. 1,2,2:4
        #[arg(long, value_delimiter = ',')]
        maxee: Vec<String>,

        /// Counts at or below this value are not a call
        #[arg(long)]
        min_abundance: Option<u64>,
    },

    /// Score the repeatability of an existing abundance table
    Score {
        /// Abundance table CSV (sequence,<samples…>)
        #[arg(short, long)]
        table: PathBuf,

        /// CSV sample sheet with sample and replicate-group columns
        #[arg(short, long)]
        samples: PathBuf,

        /// Counts at or below this value are not a call
        #[arg(long, default_value_t = 0)]
        min_abundance: u64,

        /// Write the per-group breakdown as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Assemble a read-tracking table from per-stage counts
    Track {
        /// CSV with a sample column and one column per stage
        #[arg(short, long)]
        input: PathBuf,

        /// Read-tracking CSV to write
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Main entry point for CLI
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Tune {
            config,
            samples,
            program,
            program_args,
            work_dir,
            output,
            threads,
            parallel_points,
            truncq,
            maxee,
            min_abundance,
        } => {
            let mut run_config = match config {
                Some(path) => RunConfig::from_file(&path)
                    .with_context(|| format!("reading run configuration {}", path.display()))?,
                None => RunConfig::default(),
            };

            // Command-line values override the file.
            if samples.is_some() {
                run_config.sample_sheet = samples;
            }
            if program.is_some() {
                run_config.program = program;
            }
            if !program_args.is_empty() {
                run_config.program_args = program_args;
            }
            if work_dir.is_some() {
                run_config.work_dir = work_dir;
            }
            if let Some(output) = output {
                run_config.output_dir = output;
            }
            if let Some(threads) = threads {
                run_config.threads = threads;
            }
            if let Some(points) = parallel_points {
                run_config.parallel_points = points;
            }
            if !truncq.is_empty() {
                run_config.trunc_q_values = truncq;
            }
            if !maxee.is_empty() {
                run_config.max_ee_values = maxee
                    .iter()
                    .map(|v| v.parse::<ExpectedErrors>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .context("parsing --maxee")?;
            }
            if let Some(min_abundance) = min_abundance {
                run_config.min_abundance = min_abundance;
            }

            tune(&run_config)
        }

        Commands::Score {
            table,
            samples,
            min_abundance,
            output,
        } => {
            let groups = load_replicate_groups(&samples)
                .with_context(|| format!("loading sample sheet {}", samples.display()))?;
            let abundance = read_abundance_table(&table)
                .with_context(|| format!("reading abundance table {}", table.display()))?;
            let report = score_table(&abundance, &groups, &MinAbundance::new(min_abundance))?;

            for group in &report.groups {
                println!(
                    "{}\tmatched={}\tdiscordant={}\tscore={:.4}",
                    group.group, group.matched, group.discordant, group.score
                );
            }
            println!("repeatability\t{:.4}", report.score);

            if let Some(output) = output {
                write_json(&report, &output)?;
                info!("Wrote repeatability report to {}", output.display());
            }
            Ok(())
        }

        Commands::Track { input, output } => {
            let counts = read_stage_counts(&input)
                .with_context(|| format!("reading stage counts {}", input.display()))?;
            let table = assemble_read_tracking(&counts)?;
            println!("{}", generate_report(&table));
            if let Some(output) = output {
                write_read_tracking(&table, &output)?;
                info!("Wrote read tracking to {}", output.display());
            }
            Ok(())
        }
    }
}

fn tune(run_config: &RunConfig) -> Result<()> {
    run_config.validate()?;
    let sample_sheet = run_config
        .sample_sheet
        .as_ref()
        .context("no sample sheet given")?;
    let program = run_config
        .program
        .as_ref()
        .context("no pipeline program given")?;

    let groups = load_replicate_groups(sample_sheet)
        .with_context(|| format!("loading sample sheet {}", sample_sheet.display()))?;
    let runner = CommandRunner::new(
        program,
        run_config.program_args.clone(),
        run_config.threads,
        run_config.work_dir.clone(),
    )?
    .with_expected_samples(groups.samples());
    let rule = MinAbundance::new(run_config.min_abundance);

    let outcome = run_tuning(&runner, &groups, &rule, &run_config.tuning_plan())?;
    println!(
        "Chosen configuration: truncQ={} maxEE={} (repeatability {:.4})",
        outcome.chosen.trunc_q, outcome.chosen.max_ee, outcome.score
    );

    write_outcome(&outcome, &run_config.output_dir)
}

/// Persists sweep tables, the chosen configuration, the final abundance
/// table and read tracking into `output_dir`.
pub fn write_outcome(outcome: &TuningOutcome, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    write_sweep_results(&outcome.trunc_q_sweep, output_dir.join("sweep_truncq.csv"))?;
    if let Some(max_ee_sweep) = &outcome.max_ee_sweep {
        write_sweep_results(max_ee_sweep, output_dir.join("sweep_maxee.csv"))?;
    }
    write_json(&outcome.chosen, output_dir.join("chosen_config.json"))?;
    write_abundance_table(&outcome.output.table, output_dir.join("seqtab.csv"))?;

    match outcome.read_tracking()? {
        Some(tracking) => {
            write_read_tracking(&tracking, output_dir.join("track.csv"))?;
            println!("{}", generate_report(&tracking));
        }
        None => warn!("Pipeline reported no per-stage read counts; skipping track.csv"),
    }

    let (n_variants, n_samples) = outcome.output.table.dimensions();
    info!(
        "Wrote results to {} ({} variants x {} samples in final table)",
        output_dir.display(),
        n_variants,
        n_samples
    );
    Ok(())
}
