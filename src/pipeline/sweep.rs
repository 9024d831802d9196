//! Parameter sweep controller.
//!
//! A sweep runs the external pipeline once per configuration of a grid,
//! scores every resulting abundance table for repeatability, and picks the
//! configuration with the highest score. A configuration whose pipeline run
//! fails is recorded with an undefined score and skipped; only when every
//! configuration fails does the sweep itself fail.
//!
//! Each call owns its result set; nothing is shared between sweeps.

use crate::count_table::AbundanceTable;
use crate::errors::{RepeatabilityError, Result};
use crate::metadata::ReplicateGroups;
use crate::stats::{score_table, DetectionRule, GroupScore};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::fmt::{Debug, Display};
use std::sync::Mutex;

/// How grid points of one sweep are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepMode {
    /// One grid point after the other, in grid order.
    #[default]
    Sequential,
    /// Grid points on a dedicated thread pool. The pipeline callback must be
    /// safe to call concurrently and must isolate its own scratch space.
    Parallel { threads: usize },
}

/// Outcome of one grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRow<C> {
    /// Position in the grid.
    pub index: usize,
    pub config: C,
    /// Repeatability score, `None` when the pipeline failed for this point.
    pub score: Option<f64>,
    /// Per-group breakdown of the score; empty for skipped points.
    pub groups: Vec<GroupScore>,
    /// Pipeline failure message for skipped points.
    pub failure: Option<String>,
}

impl<C> SweepRow<C> {
    pub fn is_skipped(&self) -> bool {
        self.score.is_none()
    }
}

/// Ordered (configuration, score) rows, one per grid point, in grid order.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResultSet<C> {
    rows: Vec<SweepRow<C>>,
}

impl<C: PartialEq> SweepResultSet<C> {
    pub fn rows(&self) -> &[SweepRow<C>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row with the highest defined score; ties go to the earliest grid position.
    pub fn best(&self) -> Option<&SweepRow<C>> {
        let mut best: Option<(&SweepRow<C>, f64)> = None;
        for row in &self.rows {
            let Some(score) = row.score else { continue };
            let replace = match best {
                None => true,
                Some((current, current_score)) => {
                    outranks(score, row.index, current_score, current.index)
                }
            };
            if replace {
                best = Some((row, score));
            }
        }
        best.map(|(row, _)| row)
    }

    /// Score recorded for `config`: `None` if it is not in the grid,
    /// `Some(None)` if its pipeline run failed.
    pub fn score_of(&self, config: &C) -> Option<Option<f64>> {
        self.rows
            .iter()
            .find(|row| &row.config == config)
            .map(|row| row.score)
    }

    /// Skipped configurations with the reason each was skipped.
    pub fn skipped(&self) -> Vec<(&C, &str)> {
        self.rows
            .iter()
            .filter_map(|row| match (&row.score, &row.failure) {
                (None, Some(reason)) => Some((&row.config, reason.as_str())),
                (None, None) => Some((&row.config, "")),
                _ => None,
            })
            .collect()
    }
}

/// Result of a sweep with at least one scored configuration.
#[derive(Debug)]
pub struct SweepOutcome<C, T> {
    pub results: SweepResultSet<C>,
    /// Grid index of the chosen configuration.
    pub best_index: usize,
    /// Pipeline output of the chosen configuration, kept for persistence.
    pub best_output: T,
}

impl<C: PartialEq, T> SweepOutcome<C, T> {
    pub fn best_config(&self) -> &C {
        &self.results.rows[self.best_index].config
    }

    pub fn best_score(&self) -> f64 {
        // The chosen row is always scored.
        self.results.rows[self.best_index].score.unwrap_or(f64::NAN)
    }
}

/// Whether (`score`, `index`) beats the current best. Ties go to the lower
/// grid index so concurrent completion order cannot change the choice.
fn outranks(score: f64, index: usize, best_score: f64, best_index: usize) -> bool {
    score > best_score || (score == best_score && index < best_index)
}

/// Best-so-far tracker.
struct Leader<T> {
    index: usize,
    score: f64,
    output: T,
}

fn offer<T>(leader: &mut Option<Leader<T>>, index: usize, score: f64, output: T) {
    let replace = match leader {
        None => true,
        Some(current) => outranks(score, index, current.score, current.index),
    };
    if replace {
        *leader = Some(Leader {
            index,
            score,
            output,
        });
    }
}

/// Scores one grid point. Pipeline errors become a skipped row; matcher and
/// scorer errors propagate.
fn evaluate<C, T, E, F>(
    index: usize,
    config: &C,
    groups: &ReplicateGroups,
    rule: &dyn DetectionRule,
    pipeline: F,
) -> Result<(SweepRow<C>, Option<T>)>
where
    C: Clone + Debug,
    T: AsRef<AbundanceTable>,
    E: Display,
    F: FnOnce(&C) -> std::result::Result<T, E>,
{
    debug!("Running pipeline for grid point {}: {:?}", index, config);
    match pipeline(config) {
        Ok(output) => {
            let report = score_table(output.as_ref(), groups, rule)?;
            info!(
                "Grid point {} {:?}: repeatability {:.4}",
                index, config, report.score
            );
            Ok((
                SweepRow {
                    index,
                    config: config.clone(),
                    score: Some(report.score),
                    groups: report.groups,
                    failure: None,
                },
                Some(output),
            ))
        }
        Err(err) => {
            warn!(
                "Grid point {} {:?}: pipeline failed, skipping ({})",
                index, config, err
            );
            Ok((
                SweepRow {
                    index,
                    config: config.clone(),
                    score: None,
                    groups: Vec::new(),
                    failure: Some(err.to_string()),
                },
                None,
            ))
        }
    }
}

fn finish<C, T>(rows: Vec<SweepRow<C>>, leader: Option<Leader<T>>) -> Result<SweepOutcome<C, T>>
where
    C: Debug,
{
    match leader {
        Some(leader) => {
            let skipped = rows.iter().filter(|r| r.is_skipped()).count();
            if skipped > 0 {
                warn!(
                    "{} of {} configuration(s) were skipped after pipeline failures",
                    skipped,
                    rows.len()
                );
            }
            info!(
                "Best configuration {:?} with repeatability {:.4}",
                rows[leader.index].config, leader.score
            );
            Ok(SweepOutcome {
                results: SweepResultSet { rows },
                best_index: leader.index,
                best_output: leader.output,
            })
        }
        None => Err(RepeatabilityError::SweepExhausted {
            attempted: rows.len(),
            failures: rows
                .into_iter()
                .map(|r| format!("{:?}: {}", r.config, r.failure.unwrap_or_default()))
                .collect(),
        }),
    }
}

/// Runs the sweep sequentially in grid order.
///
/// `pipeline` is invoked once per configuration and returns the pipeline
/// output (anything exposing an [`AbundanceTable`]). Only the output of the
/// current best configuration is retained.
pub fn run_sweep<C, T, E, F>(
    grid: &[C],
    groups: &ReplicateGroups,
    rule: &dyn DetectionRule,
    mut pipeline: F,
) -> Result<SweepOutcome<C, T>>
where
    C: Clone + Debug,
    T: AsRef<AbundanceTable>,
    E: Display,
    F: FnMut(&C) -> std::result::Result<T, E>,
{
    info!("Starting sequential sweep over {} configuration(s)", grid.len());
    let mut rows = Vec::with_capacity(grid.len());
    let mut leader: Option<Leader<T>> = None;

    for (index, config) in grid.iter().enumerate() {
        let (row, output) = evaluate(index, config, groups, rule, &mut pipeline)?;
        if let (Some(score), Some(output)) = (row.score, output) {
            offer(&mut leader, index, score, output);
        }
        rows.push(row);
    }

    finish(rows, leader)
}

/// Runs the sweep with grid points executing concurrently on `threads`
/// worker threads (0 lets rayon decide). Rows are still reported in grid
/// order and the choice is identical to [`run_sweep`].
pub fn run_sweep_parallel<C, T, E, F>(
    grid: &[C],
    groups: &ReplicateGroups,
    rule: &dyn DetectionRule,
    threads: usize,
    pipeline: F,
) -> Result<SweepOutcome<C, T>>
where
    C: Clone + Debug + Send + Sync,
    T: AsRef<AbundanceTable> + Send,
    E: Display,
    F: Fn(&C) -> std::result::Result<T, E> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()?;
    info!(
        "Starting parallel sweep over {} configuration(s) on {} thread(s)",
        grid.len(),
        pool.current_num_threads()
    );

    let leader: Mutex<Option<Leader<T>>> = Mutex::new(None);
    let rows = pool.install(|| {
        grid.par_iter()
            .enumerate()
            .map(|(index, config)| -> Result<SweepRow<C>> {
                let (row, output) = evaluate(index, config, groups, rule, &pipeline)?;
                if let (Some(score), Some(output)) = (row.score, output) {
                    let mut guard = leader.lock().map_err(|e| {
                        RepeatabilityError::Data(format!("sweep leader lock poisoned: {}", e))
                    })?;
                    offer(&mut guard, index, score, output);
                }
                Ok(row)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let leader = leader
        .into_inner()
        .map_err(|e| RepeatabilityError::Data(format!("sweep leader lock poisoned: {}", e)))?;
    finish(rows, leader)
}

/// Dispatches to [`run_sweep`] or [`run_sweep_parallel`].
pub fn run_sweep_with_mode<C, T, E, F>(
    mode: SweepMode,
    grid: &[C],
    groups: &ReplicateGroups,
    rule: &dyn DetectionRule,
    pipeline: F,
) -> Result<SweepOutcome<C, T>>
where
    C: Clone + Debug + Send + Sync,
    T: AsRef<AbundanceTable> + Send,
    E: Display,
    F: Fn(&C) -> std::result::Result<T, E> + Sync,
{
    match mode {
        SweepMode::Sequential => run_sweep(grid, groups, rule, pipeline),
        SweepMode::Parallel { threads } => run_sweep_parallel(grid, groups, rule, threads, pipeline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::MinAbundance;
    use indexmap::IndexMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn presence_table(presence: &[(&str, &[&str])]) -> AbundanceTable {
        let data: IndexMap<String, IndexMap<String, u64>> = presence
            .iter()
            .map(|(sample, seqs)| {
                (
                    sample.to_string(),
                    seqs.iter().map(|s| (s.to_string(), 10)).collect(),
                )
            })
            .collect();
        AbundanceTable::build_from_data(&data).unwrap()
    }

    fn group_a() -> ReplicateGroups {
        ReplicateGroups::from_assignments([("A1", "A"), ("A2", "A")]).unwrap()
    }

    /// Stub pipeline for the worked truncation-quality example.
    fn truncq_pipeline(q: &u8) -> std::result::Result<AbundanceTable, String> {
        match q {
            18 => Ok(presence_table(&[("A1", &["x", "y"]), ("A2", &["x"])])),
            20 => Ok(presence_table(&[("A1", &["x", "y"]), ("A2", &["x", "y"])])),
            22 => Ok(presence_table(&[("A1", &["x"]), ("A2", &["y"])])),
            _ => Err(format!("no stub for truncq {}", q)),
        }
    }

    #[test]
    fn test_worked_example_selects_twenty() {
        let grid = vec![18u8, 20, 22];
        let outcome = run_sweep(&grid, &group_a(), &MinAbundance::default(), truncq_pipeline).unwrap();

        let scores: Vec<Option<f64>> = outcome.results.rows().iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![Some(0.5), Some(1.0), Some(0.0)]);
        assert_eq!(*outcome.best_config(), 20);
        assert_eq!(outcome.best_score(), 1.0);
        assert_eq!(outcome.best_output.abundance("A2", "y"), Some(10));
    }

    #[test]
    fn test_ties_resolve_to_earliest() {
        let grid = vec![1u8, 2, 3];
        let outcome = run_sweep(&grid, &group_a(), &MinAbundance::default(), |_: &u8| {
            Ok::<_, String>(presence_table(&[("A1", &["x"]), ("A2", &["x"])]))
        })
        .unwrap();
        assert_eq!(outcome.best_index, 0);
        assert_eq!(*outcome.best_config(), 1);
        assert_eq!(outcome.results.best().map(|r| r.index), Some(0));
    }

    #[test]
    fn test_failures_are_skipped_not_zero() {
        let grid = vec![16u8, 18, 19, 20];
        let outcome = run_sweep(&grid, &group_a(), &MinAbundance::default(), truncq_pipeline).unwrap();

        let rows = outcome.results.rows();
        assert_eq!(rows.len(), 4);
        assert!(rows[0].is_skipped());
        assert!(rows[2].is_skipped());
        assert_eq!(outcome.results.score_of(&19), Some(None));
        assert_eq!(outcome.results.score_of(&18), Some(Some(0.5)));
        assert_eq!(outcome.results.score_of(&99), None);

        let skipped = outcome.results.skipped();
        assert_eq!(skipped.len(), 2);
        assert_eq!(*skipped[0].0, 16);
        assert!(skipped[1].1.contains("truncq 19"));
        assert_eq!(*outcome.best_config(), 20);
    }

    #[test]
    fn test_all_failures_exhaust_sweep() {
        let grid = vec![1u8, 2];
        let result = run_sweep(&grid, &group_a(), &MinAbundance::default(), |q: &u8| {
            Err::<AbundanceTable, _>(format!("filtering removed all reads at {}", q))
        });
        match result {
            Err(RepeatabilityError::SweepExhausted { attempted, failures }) => {
                assert_eq!(attempted, 2);
                assert!(failures[1].contains("removed all reads at 2"));
            }
            other => panic!("expected exhausted sweep, got {:?}", other.map(|o| o.best_index)),
        }
    }

    #[test]
    fn test_empty_grid_exhausts_sweep() {
        let grid: Vec<u8> = Vec::new();
        let result = run_sweep(&grid, &group_a(), &MinAbundance::default(), truncq_pipeline);
        assert!(matches!(
            result,
            Err(RepeatabilityError::SweepExhausted { attempted: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_sample_aborts_sweep() {
        let calls = AtomicUsize::new(0);
        let groups = ReplicateGroups::from_assignments([("A1", "A"), ("A3", "A")]).unwrap();
        let result = run_sweep(&[18u8, 20], &groups, &MinAbundance::default(), |q: &u8| {
            calls.fetch_add(1, Ordering::SeqCst);
            truncq_pipeline(q)
        });
        assert!(matches!(result, Err(RepeatabilityError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pipeline_runs_in_grid_order() {
        let mut seen = Vec::new();
        let grid = vec![22u8, 18, 20];
        let outcome = run_sweep(&grid, &group_a(), &MinAbundance::default(), |q: &u8| {
            seen.push(*q);
            truncq_pipeline(q)
        })
        .unwrap();
        assert_eq!(seen, grid);
        let order: Vec<u8> = outcome.results.rows().iter().map(|r| r.config).collect();
        assert_eq!(order, grid);
        assert_eq!(outcome.best_index, 2);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let grid = vec![16u8, 18, 20, 22, 20];
        let sequential =
            run_sweep(&grid, &group_a(), &MinAbundance::default(), truncq_pipeline).unwrap();
        let parallel = run_sweep_parallel(
            &grid,
            &group_a(),
            &MinAbundance::default(),
            4,
            truncq_pipeline,
        )
        .unwrap();

        assert_eq!(sequential.results, parallel.results);
        assert_eq!(sequential.best_index, parallel.best_index);
        assert_eq!(parallel.best_index, 2);
        assert_eq!(sequential.best_output, parallel.best_output);
        assert_eq!(parallel.results.best().map(|r| r.index), Some(parallel.best_index));
    }

    #[test]
    fn test_mode_dispatch() {
        let grid = vec![18u8, 20];
        for mode in [SweepMode::Sequential, SweepMode::Parallel { threads: 2 }] {
            let outcome =
                run_sweep_with_mode(mode, &grid, &group_a(), &MinAbundance::default(), truncq_pipeline)
                    .unwrap();
            assert_eq!(*outcome.best_config(), 20);
        }
    }

    #[test]
    fn test_best_skips_undefined_rows() {
        let results = SweepResultSet {
            rows: vec![
                SweepRow {
                    index: 0,
                    config: 'a',
                    score: None,
                    groups: Vec::new(),
                    failure: Some("crash".to_string()),
                },
                SweepRow {
                    index: 1,
                    config: 'b',
                    score: Some(0.0),
                    groups: Vec::new(),
                    failure: None,
                },
            ],
        };
        assert_eq!(results.best().map(|r| r.config), Some('b'));
    }
}
