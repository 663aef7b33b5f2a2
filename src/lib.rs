//! Apexline - lap-time derivation pipeline
//!
//! Turns lap, micro-sector and telemetry rows into ideal laps, time-loss
//! deltas, driving-style physics features, class-reference comparisons and a
//! per-driver insights document. Every stage is a pure batch transformation
//! that fully replaces its output on each run.

pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod timing;

// Re-export commonly used types
pub use metrics::analytics::{AnalyticsError, InsightsDocument, SessionData};
pub use pipeline::{DerivedTables, Pipeline, PipelineInputs, RunReport, SnapshotStore, Stage};
pub use storage::config::AppConfig;
pub use storage::database::Database;
