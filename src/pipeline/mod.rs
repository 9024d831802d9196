pub mod external;
pub mod qc;
pub mod report;
pub mod sweep;
pub mod tuning;

pub use external::{CommandRunner, PipelineError, PipelineOutput, PipelineRunner};
pub use qc::{ExpectedErrors, FilterParams, SweepPoint};
pub use report::{assemble_read_tracking, generate_report, ReadTrackingTable, Stage, StageCounts};
pub use sweep::{
    run_sweep, run_sweep_parallel, run_sweep_with_mode, SweepMode, SweepOutcome, SweepResultSet,
    SweepRow,
};
pub use tuning::{run_tuning, TuningOutcome, TuningPlan};
