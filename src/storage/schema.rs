//! Database schema definitions for apexline.
//!
//! Input tables are written by ingestion. Derived tables are generated from
//! their row types (see `derived_store`) and replaced wholesale on publish.

/// SQL schema for the input and bookkeeping tables.
pub const SCHEMA: &str = r#"
-- One row per timed lap. lap_time holds either seconds or a clock string.
CREATE TABLE IF NOT EXISTS laps (
    driver_id TEXT NOT NULL,
    car_no INTEGER NOT NULL,
    lap_no INTEGER NOT NULL,
    class TEXT NOT NULL,
    race_id TEXT NOT NULL DEFAULT '',
    lap_time,
    is_valid INTEGER,
    PRIMARY KEY (driver_id, lap_no)
);

-- One row per (lap, micro-sector) split. sector_time is untyped like lap_time.
CREATE TABLE IF NOT EXISTS sectors (
    driver_id TEXT NOT NULL,
    car_no INTEGER NOT NULL,
    lap_no INTEGER NOT NULL,
    sector_id TEXT NOT NULL,
    sector_time,
    PRIMARY KEY (driver_id, lap_no, sector_id)
);

-- Pivoted telemetry, one row per sample
CREATE TABLE IF NOT EXISTS telemetry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    driver_id TEXT NOT NULL,
    lap_no INTEGER NOT NULL,
    lap_progress REAL NOT NULL,
    throttle_pct REAL,
    brake_pressure REAL,
    steering_angle REAL,
    longitudinal_accel REAL,
    lateral_accel REAL,
    speed REAL
);

CREATE INDEX IF NOT EXISTS idx_telemetry_lap ON telemetry(driver_id, lap_no, lap_progress);

-- Pipeline run history
CREATE TABLE IF NOT EXISTS pipeline_runs (
    run_id TEXT PRIMARY KEY,
    generation INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    completed_stages TEXT NOT NULL,
    stages_json TEXT NOT NULL
);
"#;

/// Schema version tracking table
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;

/// Tables the read-only helpers never describe.
pub const INTERNAL_TABLES: &[&str] = &["schema_version", "sqlite_sequence"];
