//! Tuning of amplicon quality-filtering parameters by replicate repeatability.
//!
//! The external pipeline (primer trimming, filtering, denoising, merging,
//! chimera removal) is run once per configuration of a parameter grid. Each
//! resulting sequence-variant table is scored by how consistently replicate
//! samples call the same variants, and the most repeatable configuration is
//! kept together with its final abundance table and read tracking.

pub mod cli;
pub mod config;
pub mod count_table;
pub mod errors;
pub mod io;
pub mod metadata;
pub mod pipeline;
pub mod stats;

pub use count_table::AbundanceTable;
pub use errors::{RepeatabilityError, Result};
pub use metadata::{load_replicate_groups, ReplicateGroups};
