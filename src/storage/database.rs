//! Database operations using rusqlite.
//!
//! Holds the ingestion input tables, the published derived tables and the
//! pipeline run history. Consumers get two read-only helpers: a memoised
//! schema summary and a guarded `SELECT` runner.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::pipeline::{DerivedTables, PipelineInputs, RunReport, StageOutcome};
use crate::storage::config::TimingSettings;
use crate::storage::derived_store::{derived_schema, DerivedStore};
use crate::storage::schema::{CURRENT_VERSION, INTERNAL_TABLES, SCHEMA, SCHEMA_VERSION_TABLE};
use crate::timing::{
    to_seconds, LapRecord, LapWindow, MicroSector, MicroSectorRecord, RawTime, TelemetrySample,
};

/// Column of a table as reported by SQLite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
}

/// Table name → columns, for consumers that need to know what they can query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSummary {
    pub tables: BTreeMap<String, Vec<ColumnInfo>>,
}

impl SchemaSummary {
    pub fn columns(&self, table: &str) -> Option<&[ColumnInfo]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    /// One `table(col TYPE, ...)` line per table.
    pub fn to_text(&self) -> String {
        self.tables
            .iter()
            .map(|(table, columns)| {
                let cols: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        if c.sql_type.is_empty() {
                            c.name.clone()
                        } else {
                            format!("{} {}", c.name, c.sql_type)
                        }
                    })
                    .collect();
                format!("{}({})", table, cols.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A row of `pipeline_runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRunRecord {
    pub run_id: String,
    pub generation: u64,
    pub started_at: String,
    pub finished_at: String,
    pub completed_stages: Vec<String>,
}

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Connection,
    schema_cache: RefCell<Option<SchemaSummary>>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self::with_connection(conn);
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self::with_connection(conn);
        db.initialize()?;

        Ok(db)
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            schema_cache: RefCell::new(None),
        }
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        let current_version = self.get_schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    fn get_schema_version(&self) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(&self, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            self.conn
                .execute_batch(SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
            self.conn
                .execute_batch(&derived_schema())
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            self.conn
                .execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                    [CURRENT_VERSION],
                )
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            tracing::info!("Database migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========== Input tables ==========

    /// Insert or replace lap records.
    pub fn insert_laps(&mut self, laps: &[LapRecord]) -> Result<(), DatabaseError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO laps (driver_id, car_no, lap_no, class, race_id,
                     lap_time, is_valid) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            for lap in laps {
                stmt.execute(params![
                    lap.driver_id,
                    lap.car_no,
                    lap.lap_no,
                    lap.class,
                    lap.race_id,
                    lap.lap_time_s,
                    lap.is_valid,
                ])
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(())
    }

    /// Insert or replace micro-sector splits.
    pub fn insert_sectors(&mut self, sectors: &[MicroSectorRecord]) -> Result<(), DatabaseError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO sectors (driver_id, car_no, lap_no, sector_id, sector_time)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            for split in sectors {
                stmt.execute(params![
                    split.driver_id,
                    split.car_no,
                    split.lap_no,
                    split.sector_id.as_str(),
                    split.sector_time_s,
                ])
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(())
    }

    /// Append telemetry samples in bulk.
    pub fn insert_telemetry(&mut self, samples: &[TelemetrySample]) -> Result<(), DatabaseError> {
        if samples.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO telemetry (driver_id, lap_no, lap_progress, throttle_pct,
                     brake_pressure, steering_angle, longitudinal_accel, lateral_accel, speed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            for sample in samples {
                stmt.execute(params![
                    sample.driver_id,
                    sample.lap_no,
                    sample.lap_progress,
                    sample.throttle_pct,
                    sample.brake_pressure,
                    sample.steering_angle,
                    sample.longitudinal_accel,
                    sample.lateral_accel,
                    sample.speed,
                ])
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(())
    }

    /// Read the input tables into pipeline inputs.
    ///
    /// Raw lap and sector times go through the time normalizer. Rows whose
    /// time cannot be parsed, or whose sector id is unknown, are skipped with
    /// a warning. A lap stored without a validity flag is judged against the
    /// configured lap window.
    pub fn load_inputs(&self, timing: &TimingSettings) -> Result<PipelineInputs, DatabaseError> {
        let window = timing.lap_window();
        let laps = self.load_laps(&window)?;
        let sectors = self.load_sectors()?;
        let telemetry = self.load_telemetry()?;

        tracing::info!(
            "Loaded {} laps, {} sector splits, {} telemetry samples",
            laps.len(),
            sectors.len(),
            telemetry.len()
        );

        Ok(PipelineInputs {
            laps,
            sectors,
            telemetry,
        })
    }

    fn load_laps(&self, window: &LapWindow) -> Result<Vec<LapRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT driver_id, car_no, lap_no, class, race_id, lap_time, is_valid
                 FROM laps ORDER BY driver_id, lap_no",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let map_row = |row: &Row| -> rusqlite::Result<Option<LapRecord>> {
            let driver_id: String = row.get(0)?;
            let lap_no: u32 = row.get(2)?;
            let Some(lap_time_s) = to_seconds(&raw_time(row.get_ref(5)?)) else {
                tracing::warn!("Skipping lap {} of {}: unparseable lap time", lap_no, driver_id);
                return Ok(None);
            };
            let stored_valid: Option<bool> = row.get(6)?;

            let mut lap = LapRecord::new(
                row.get(1)?,
                lap_no,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                lap_time_s,
                window,
            );
            lap.driver_id = driver_id;
            if let Some(valid) = stored_valid {
                lap.is_valid = valid;
            }
            Ok(Some(lap))
        };

        let rows = stmt
            .query_map([], map_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut laps = Vec::new();
        for row in rows {
            if let Some(lap) = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))? {
                laps.push(lap);
            }
        }

        Ok(laps)
    }

    fn load_sectors(&self) -> Result<Vec<MicroSectorRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT driver_id, car_no, lap_no, sector_id, sector_time
                 FROM sectors ORDER BY driver_id, lap_no, sector_id",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let map_row = |row: &Row| -> rusqlite::Result<Option<MicroSectorRecord>> {
            let driver_id: String = row.get(0)?;
            let sector_id: String = row.get(3)?;
            let Ok(sector) = sector_id.parse::<MicroSector>() else {
                tracing::warn!("Skipping split for {}: unknown sector {}", driver_id, sector_id);
                return Ok(None);
            };
            let Some(sector_time_s) = to_seconds(&raw_time(row.get_ref(4)?)) else {
                return Ok(None);
            };

            Ok(Some(MicroSectorRecord {
                driver_id,
                car_no: row.get(1)?,
                lap_no: row.get(2)?,
                sector_id: sector,
                sector_time_s,
            }))
        };

        let rows = stmt
            .query_map([], map_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut sectors = Vec::new();
        for row in rows {
            if let Some(split) = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))? {
                sectors.push(split);
            }
        }

        Ok(sectors)
    }

    fn load_telemetry(&self) -> Result<Vec<TelemetrySample>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT driver_id, lap_no, lap_progress, throttle_pct, brake_pressure,
                 steering_angle, longitudinal_accel, lateral_accel, speed
                 FROM telemetry ORDER BY driver_id, lap_no, lap_progress, id",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(TelemetrySample {
                    driver_id: row.get(0)?,
                    lap_no: row.get(1)?,
                    lap_progress: row.get(2)?,
                    throttle_pct: row.get(3)?,
                    brake_pressure: row.get(4)?,
                    steering_angle: row.get(5)?,
                    longitudinal_accel: row.get(6)?,
                    lateral_accel: row.get(7)?,
                    speed: row.get(8)?,
                })
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut samples = Vec::new();
        for row in rows {
            samples.push(row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?);
        }

        Ok(samples)
    }

    // ========== Derived tables ==========

    /// Replace the tables of every stage that completed in `report` and record
    /// the run, all in one transaction. Tables of stages that failed or were
    /// skipped keep their previous contents.
    pub fn publish(&mut self, tables: &DerivedTables, report: &RunReport) -> Result<usize, DatabaseError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let completed = report.completed_stages();
        let mut rows = 0;
        {
            let store = DerivedStore::new(&tx);
            for stage in &completed {
                rows += store.replace_stage(*stage, tables)?;
            }
        }

        let stages_json = serde_json::to_string(&stage_summaries(report))
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
        let completed_names: Vec<&str> = completed.iter().map(|s| s.as_str()).collect();

        tx.execute(
            "INSERT INTO pipeline_runs (run_id, generation, started_at, finished_at,
             completed_stages, stages_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                report.run_id.to_string(),
                i64::try_from(report.generation).unwrap_or(i64::MAX),
                report.started_at.to_rfc3339(),
                report.finished_at.to_rfc3339(),
                completed_names.join(","),
                stages_json,
            ],
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        self.invalidate_schema_cache();
        tracing::info!(
            "Published generation {} ({} rows across {} stages)",
            report.generation,
            rows,
            completed.len()
        );

        Ok(rows)
    }

    /// The most recent pipeline run, if any.
    pub fn last_run(&self) -> Result<Option<PipelineRunRecord>, DatabaseError> {
        let result = self.conn.query_row(
            "SELECT run_id, generation, started_at, finished_at, completed_stages
             FROM pipeline_runs ORDER BY generation DESC, finished_at DESC LIMIT 1",
            [],
            |row| {
                let completed: String = row.get(4)?;
                Ok(PipelineRunRecord {
                    run_id: row.get(0)?,
                    generation: row.get::<_, i64>(1)?.max(0) as u64,
                    started_at: row.get(2)?,
                    finished_at: row.get(3)?,
                    completed_stages: completed
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                })
            },
        );

        match result {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    // ========== Read-only consumer helpers ==========

    /// Tables and columns, computed once and reused until the next publish.
    pub fn schema_summary(&self) -> Result<SchemaSummary, DatabaseError> {
        if let Some(cached) = self.schema_cache.borrow().as_ref() {
            return Ok(cached.clone());
        }

        let summary = self.read_schema()?;
        *self.schema_cache.borrow_mut() = Some(summary.clone());
        Ok(summary)
    }

    /// Drop the memoised schema summary.
    pub fn invalidate_schema_cache(&self) {
        self.schema_cache.borrow_mut().take();
    }

    fn read_schema(&self) -> Result<SchemaSummary, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
            .collect::<SqliteResult<_>>()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut tables = BTreeMap::new();
        for name in names.into_iter().filter(|n| !INTERNAL_TABLES.contains(&n.as_str())) {
            let mut info = self
                .conn
                .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            let columns: Vec<ColumnInfo> = info
                .query_map([&name], |row| {
                    Ok(ColumnInfo {
                        name: row.get(0)?,
                        sql_type: row.get(1)?,
                    })
                })
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
                .collect::<SqliteResult<_>>()
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            tables.insert(name, columns);
        }

        Ok(SchemaSummary { tables })
    }

    /// Run a single `SELECT`/`WITH` statement and return rows as JSON objects.
    pub fn query_read_only(
        &self,
        sql: &str,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, DatabaseError> {
        let statement = sql.trim().trim_end_matches(';').trim();
        let keyword = statement
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        if !matches!(keyword.as_str(), "select" | "with") || statement.contains(';') {
            return Err(DatabaseError::ReadOnlyViolation(truncate(statement, 60)));
        }

        let mut stmt = self
            .conn
            .prepare(statement)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if !stmt.readonly() {
            return Err(DatabaseError::ReadOnlyViolation(truncate(statement, 60)));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query([])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
        {
            let mut object = serde_json::Map::new();
            for (idx, column) in columns.iter().enumerate() {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
                object.insert(column.clone(), json_value(value));
            }
            out.push(object);
        }

        Ok(out)
    }
}

/// Interpret an untyped SQLite cell as a raw time.
fn raw_time(value: ValueRef<'_>) -> RawTime {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => RawTime::Missing,
        ValueRef::Integer(i) => RawTime::Number(i as f64),
        ValueRef::Real(f) => RawTime::Number(f),
        ValueRef::Text(bytes) => RawTime::Text(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<{} bytes>", bytes.len())),
    }
}

fn stage_summaries(report: &RunReport) -> Vec<serde_json::Value> {
    report
        .stages
        .iter()
        .map(|r| {
            let (status, detail) = match &r.outcome {
                StageOutcome::Completed { rows } => ("completed", serde_json::json!({ "rows": rows })),
                StageOutcome::Failed(e) => ("failed", serde_json::json!({ "error": e.to_string() })),
                StageOutcome::Skipped { dependency } => (
                    "skipped",
                    serde_json::json!({ "dependency": dependency.as_str() }),
                ),
            };
            serde_json::json!({
                "stage": r.stage.as_str(),
                "status": status,
                "detail": detail,
                "duration_ms": r.duration_ms as u64,
            })
        })
        .collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Only SELECT/WITH statements are allowed: {0}")]
    ReadOnlyViolation(String),
}
