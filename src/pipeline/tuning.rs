//! Two-stage parameter tuning.
//!
//! The truncation-quality sweep runs first. Its winner is fixed and the
//! expected-error sweep runs on top of it, so the second stage depends on the
//! result of the first and the two can never run concurrently. Grid points
//! inside one stage may run in parallel when the plan asks for it.

use crate::errors::Result;
use crate::metadata::ReplicateGroups;
use crate::pipeline::external::{PipelineOutput, PipelineRunner};
use crate::pipeline::qc::{max_ee_grid, trunc_q_grid, ExpectedErrors, FilterParams};
use crate::pipeline::report::{assemble_read_tracking, ReadTrackingTable};
use crate::pipeline::sweep::{run_sweep_with_mode, SweepMode, SweepResultSet};
use crate::stats::DetectionRule;
use itertools::Itertools;
use log::info;

/// Grids and shared settings of a tuning run.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningPlan {
    /// Parameters not being swept.
    pub base: FilterParams,
    pub trunc_q_values: Vec<u8>,
    /// Expected-error ceilings to try once truncation quality is fixed.
    /// Empty skips the second stage.
    pub max_ee_values: Vec<ExpectedErrors>,
    pub mode: SweepMode,
}

/// Everything a finished tuning run produced.
#[derive(Debug)]
pub struct TuningOutcome {
    pub trunc_q_sweep: SweepResultSet<FilterParams>,
    pub max_ee_sweep: Option<SweepResultSet<FilterParams>>,
    pub chosen: FilterParams,
    pub score: f64,
    /// Pipeline output of the chosen configuration (final abundance table).
    pub output: PipelineOutput,
}

impl TuningOutcome {
    /// Read tracking of the chosen configuration, if the pipeline reported it.
    pub fn read_tracking(&self) -> Result<Option<ReadTrackingTable>> {
        self.output
            .tracking
            .as_ref()
            .map(assemble_read_tracking)
            .transpose()
    }
}

/// Runs the truncation-quality sweep, then the expected-error sweep with the
/// winning truncation quality fixed.
pub fn run_tuning<R: PipelineRunner>(
    runner: &R,
    groups: &ReplicateGroups,
    rule: &dyn DetectionRule,
    plan: &TuningPlan,
) -> Result<TuningOutcome> {
    let pipeline = |params: &FilterParams| runner.run(params);

    info!(
        "Stage 1: sweeping truncation quality over {:?}",
        plan.trunc_q_values
    );
    let grid = trunc_q_grid(&plan.base, &plan.trunc_q_values);
    let stage1 = run_sweep_with_mode(plan.mode, &grid, groups, rule, pipeline)?;
    let fixed = stage1.best_config().clone();
    info!(
        "Stage 1 chose truncQ={} (repeatability {:.4})",
        fixed.trunc_q,
        stage1.best_score()
    );

    if plan.max_ee_values.is_empty() {
        info!("No expected-error grid given; keeping stage 1 result");
        let score = stage1.best_score();
        return Ok(TuningOutcome {
            trunc_q_sweep: stage1.results,
            max_ee_sweep: None,
            chosen: fixed,
            score,
            output: stage1.best_output,
        });
    }

    info!(
        "Stage 2: sweeping maxEE over [{}] with truncQ={}",
        plan.max_ee_values.iter().join(", "),
        fixed.trunc_q
    );
    let grid = max_ee_grid(&fixed, &plan.max_ee_values);
    // The stage-1 table is no longer needed once stage 2 starts.
    let trunc_q_sweep = stage1.results;
    let stage2 = run_sweep_with_mode(plan.mode, &grid, groups, rule, pipeline)?;
    let chosen = stage2.best_config().clone();
    let score = stage2.best_score();
    info!(
        "Stage 2 chose maxEE={} (repeatability {:.4})",
        chosen.max_ee, score
    );

    Ok(TuningOutcome {
        trunc_q_sweep,
        max_ee_sweep: Some(stage2.results),
        chosen,
        score,
        output: stage2.best_output,
    })
}
