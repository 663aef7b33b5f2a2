//! The derivation pipeline: stage DAG, runner and published snapshots.

pub mod runner;
pub mod snapshot;
pub mod tables;

pub use runner::{Pipeline, PipelineInputs, RunReport, StageOutcome, StageReport};
pub use snapshot::SnapshotStore;
pub use tables::{DerivedTables, Stage};
