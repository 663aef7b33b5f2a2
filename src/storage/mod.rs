//! Storage module for database, derived tables, exports and configuration.

pub mod config;
pub mod database;
pub mod derived_store;
pub mod insights_export;
pub mod schema;

pub use config::{AppConfig, InsightSettings, PhysicsSettings, StorageSettings, TimingSettings};
pub use database::{ColumnInfo, Database, DatabaseError, PipelineRunRecord, SchemaSummary};
pub use derived_store::{DerivedStore, TableRow};
pub use insights_export::{read_insights, write_insights};
