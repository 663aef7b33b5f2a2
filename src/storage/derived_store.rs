//! Relational persistence for derived tables.
//!
//! Every derived row type describes its own table through [`TableRow`]; the
//! DDL and the insert statement are both generated from that column list so
//! the two cannot drift apart.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::metrics::analytics::{
    ClassBestSegment, ClassIdealLap, DriverBestMainSector, DriverOpportunity, IdealLap, LapDelta,
    LapPhysics, LapSectorSum, MainSectorDelta, PhysicsFeature, PhysicsSectorMetric, SectorDelta,
    SectorPhysics,
};
use crate::pipeline::{DerivedTables, Stage};
use crate::storage::database::DatabaseError;

/// A row of a derived relational table.
pub trait TableRow {
    const TABLE: &'static str;
    /// (column name, SQL type), in insert order
    const COLUMNS: &'static [(&'static str, &'static str)];

    fn values(&self) -> Vec<Value>;
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn int(n: impl Into<i64>) -> Value {
    Value::Integer(n.into())
}

fn real(v: f64) -> Value {
    Value::Real(v)
}

fn opt(v: Option<f64>) -> Value {
    v.map_or(Value::Null, Value::Real)
}

fn count(n: usize) -> Value {
    Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

const SECTOR_PHYSICS_COLUMNS: [(&str, &str); 7] = [
    ("brake_start_progress", "REAL"),
    ("brake_max_pressure", "REAL"),
    ("throttle_full_ratio", "REAL"),
    ("hesitation_count", "INTEGER"),
    ("steering_std", "REAL"),
    ("accel_min", "REAL"),
    ("accel_max", "REAL"),
];

fn sector_physics_values(p: &SectorPhysics) -> [Value; 7] {
    [
        opt(p.brake_start_progress),
        opt(p.brake_max_pressure),
        opt(p.throttle_full_ratio),
        int(p.hesitation_count),
        opt(p.steering_std),
        opt(p.accel_min),
        opt(p.accel_max),
    ]
}

impl TableRow for ClassBestSegment {
    const TABLE: &'static str = "ideal_lap_segments_class";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("class", "TEXT"),
        ("sector_id", "TEXT"),
        ("best_sector_time_s", "REAL"),
        ("source_driver_id", "TEXT"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.class),
            text(self.sector_id.as_str()),
            real(self.best_sector_time_s),
            text(&self.source_driver_id),
        ]
    }
}

impl TableRow for ClassIdealLap {
    const TABLE: &'static str = "ideal_lap_class";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("class", "TEXT"),
        ("ideal_lap_time_s", "REAL"),
        ("sector_count", "INTEGER"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.class),
            real(self.ideal_lap_time_s),
            count(self.sector_count),
        ]
    }
}

impl TableRow for LapSectorSum {
    const TABLE: &'static str = "lap_sector_sums";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("driver_id", "TEXT"),
        ("car_no", "INTEGER"),
        ("lap_no", "INTEGER"),
        ("main_sector", "TEXT"),
        ("sector_time_sum", "REAL"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.driver_id),
            int(self.car_no),
            int(self.lap_no),
            text(self.main_sector.as_str()),
            real(self.sector_time_sum),
        ]
    }
}

impl TableRow for DriverBestMainSector {
    const TABLE: &'static str = "ideal_lap_driver";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("driver_id", "TEXT"),
        ("class", "TEXT"),
        ("best_s1", "REAL"),
        ("best_s2", "REAL"),
        ("best_s3", "REAL"),
        ("ideal_lap_time_s", "REAL"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.driver_id),
            text(&self.class),
            opt(self.best_s1),
            opt(self.best_s2),
            opt(self.best_s3),
            opt(self.ideal_lap_time_s()),
        ]
    }
}

impl TableRow for IdealLap {
    const TABLE: &'static str = "ideal_lap";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("driver_id", "TEXT"),
        ("lap_no", "INTEGER"),
        ("lap_time_s", "REAL"),
        ("class", "TEXT"),
        ("best_s1", "REAL"),
        ("best_s2", "REAL"),
        ("best_s3", "REAL"),
        ("ideal_lap_time_s", "REAL"),
        ("delta_to_ideal_s", "REAL"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.driver_id),
            int(self.lap_no),
            real(self.lap_time_s),
            text(&self.class),
            real(self.best_s1),
            real(self.best_s2),
            real(self.best_s3),
            real(self.ideal_lap_time_s),
            real(self.delta_to_ideal_s),
        ]
    }
}

impl TableRow for SectorDelta {
    const TABLE: &'static str = "sector_deltas";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("driver_id", "TEXT"),
        ("car_no", "INTEGER"),
        ("lap_no", "INTEGER"),
        ("class", "TEXT"),
        ("sector_id", "TEXT"),
        ("main_sector", "TEXT"),
        ("sector_time_s", "REAL"),
        ("ideal_class_s", "REAL"),
        ("delta_class_s", "REAL"),
        ("ideal_driver_s", "REAL"),
        ("delta_driver_s", "REAL"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.driver_id),
            int(self.car_no),
            int(self.lap_no),
            text(&self.class),
            text(self.sector_id.as_str()),
            text(self.main_sector.as_str()),
            real(self.sector_time_s),
            real(self.ideal_class_s),
            real(self.delta_class_s),
            real(self.ideal_driver_s),
            real(self.delta_driver_s),
        ]
    }
}

impl TableRow for MainSectorDelta {
    const TABLE: &'static str = "main_sector_deltas";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("driver_id", "TEXT"),
        ("car_no", "INTEGER"),
        ("lap_no", "INTEGER"),
        ("main_sector", "TEXT"),
        ("actual_main_s", "REAL"),
        ("ideal_main_s", "REAL"),
        ("delta_main_s", "REAL"),
        ("ideal_class_main_s", "REAL"),
        ("delta_class_main_s", "REAL"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.driver_id),
            int(self.car_no),
            int(self.lap_no),
            text(self.main_sector.as_str()),
            real(self.actual_main_s),
            real(self.ideal_main_s),
            real(self.delta_main_s),
            real(self.ideal_class_main_s),
            real(self.delta_class_main_s),
        ]
    }
}

impl TableRow for LapDelta {
    const TABLE: &'static str = "lap_deltas";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("driver_id", "TEXT"),
        ("lap_no", "INTEGER"),
        ("class", "TEXT"),
        ("lap_time_s", "REAL"),
        ("ideal_lap_time_s", "REAL"),
        ("delta_lap_s", "REAL"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.driver_id),
            int(self.lap_no),
            text(&self.class),
            real(self.lap_time_s),
            real(self.ideal_lap_time_s),
            real(self.delta_lap_s),
        ]
    }
}

impl TableRow for DriverOpportunity {
    const TABLE: &'static str = "driver_opportunities";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("driver_id", "TEXT"),
        ("main_sector", "TEXT"),
        ("avg_loss_s", "REAL"),
        ("consistency_s", "REAL"),
        ("best_gain_s", "REAL"),
        ("laps", "INTEGER"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.driver_id),
            text(self.main_sector.as_str()),
            real(self.avg_loss_s),
            real(self.consistency_s),
            real(self.best_gain_s),
            count(self.laps),
        ]
    }
}

impl TableRow for PhysicsFeature {
    const TABLE: &'static str = "telemetry_features";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("race_id", "TEXT"),
        ("session_id", "TEXT"),
        ("driver_id", "TEXT"),
        ("car_no", "INTEGER"),
        ("lap_no", "INTEGER"),
        ("sector_id", "TEXT"),
        ("samples", "INTEGER"),
        SECTOR_PHYSICS_COLUMNS[0],
        SECTOR_PHYSICS_COLUMNS[1],
        SECTOR_PHYSICS_COLUMNS[2],
        SECTOR_PHYSICS_COLUMNS[3],
        SECTOR_PHYSICS_COLUMNS[4],
        SECTOR_PHYSICS_COLUMNS[5],
        SECTOR_PHYSICS_COLUMNS[6],
    ];

    fn values(&self) -> Vec<Value> {
        let mut values = vec![
            text(&self.race_id),
            text(&self.session_id),
            text(&self.driver_id),
            int(self.car_no),
            int(self.lap_no),
            text(self.sector_id.as_str()),
            count(self.samples),
        ];
        values.extend(sector_physics_values(&self.physics));
        values
    }
}

impl TableRow for LapPhysics {
    const TABLE: &'static str = "valid_lap_physics";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("driver_id", "TEXT"),
        ("lap_no", "INTEGER"),
        ("lap_time_s", "REAL"),
        ("samples", "INTEGER"),
        ("avg_speed", "REAL"),
        ("avg_throttle", "REAL"),
        ("full_throttle_ratio", "REAL"),
        ("coasting_ratio", "REAL"),
        ("max_brake_pressure", "REAL"),
        ("avg_brake_pressure", "REAL"),
        ("braking_ratio", "REAL"),
        ("steering_variability", "REAL"),
        ("max_braking_g", "REAL"),
        ("max_accel_g", "REAL"),
        ("max_cornering_g", "REAL"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.driver_id),
            int(self.lap_no),
            real(self.lap_time_s),
            count(self.samples),
            opt(self.avg_speed),
            opt(self.avg_throttle),
            opt(self.full_throttle_ratio),
            opt(self.coasting_ratio),
            opt(self.max_brake_pressure),
            opt(self.avg_brake_pressure),
            opt(self.braking_ratio),
            opt(self.steering_variability),
            opt(self.max_braking_g),
            opt(self.max_accel_g),
            opt(self.max_cornering_g),
        ]
    }
}

impl TableRow for PhysicsSectorMetric {
    const TABLE: &'static str = "physics_sector_metrics";
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("race_id", "TEXT"),
        ("session_id", "TEXT"),
        ("class", "TEXT"),
        ("driver_id", "TEXT"),
        ("car_no", "INTEGER"),
        ("lap_no", "INTEGER"),
        ("sector_id", "TEXT"),
        ("main_sector", "TEXT"),
        ("sector_time_s", "REAL"),
        SECTOR_PHYSICS_COLUMNS[0],
        SECTOR_PHYSICS_COLUMNS[1],
        SECTOR_PHYSICS_COLUMNS[2],
        SECTOR_PHYSICS_COLUMNS[3],
        SECTOR_PHYSICS_COLUMNS[4],
        SECTOR_PHYSICS_COLUMNS[5],
        SECTOR_PHYSICS_COLUMNS[6],
        ("ref_driver_id", "TEXT"),
        ("ref_lap_no", "INTEGER"),
        ("ref_sector_time_s", "REAL"),
        ("ref_brake_start_progress", "REAL"),
        ("ref_brake_max_pressure", "REAL"),
        ("ref_throttle_full_ratio", "REAL"),
        ("ref_hesitation_count", "INTEGER"),
        ("ref_steering_std", "REAL"),
        ("ref_accel_min", "REAL"),
        ("ref_accel_max", "REAL"),
        ("delta_class_s", "REAL"),
        ("brake_point_diff_vs_ref", "REAL"),
        ("brake_max_bar_diff_vs_ref", "REAL"),
        ("throttle_full_ratio_diff_vs_ref", "REAL"),
        ("steering_std_diff_vs_ref", "REAL"),
        ("accel_min_diff_vs_ref", "REAL"),
        ("accel_max_diff_vs_ref", "REAL"),
        ("ref_type", "TEXT"),
    ];

    fn values(&self) -> Vec<Value> {
        let mut values = vec![
            text(&self.race_id),
            text(&self.session_id),
            text(&self.class),
            text(&self.driver_id),
            int(self.car_no),
            int(self.lap_no),
            text(self.sector_id.as_str()),
            text(self.main_sector.as_str()),
            real(self.sector_time_s),
        ];
        values.extend(sector_physics_values(&self.physics));
        values.extend([
            text(&self.reference.driver_id),
            int(self.reference.lap_no),
            real(self.reference.sector_time_s),
        ]);
        values.extend(sector_physics_values(&self.reference.physics));
        values.extend([
            real(self.delta_class_s),
            opt(self.brake_point_diff_vs_ref),
            opt(self.brake_max_bar_diff_vs_ref),
            opt(self.throttle_full_ratio_diff_vs_ref),
            opt(self.steering_std_diff_vs_ref),
            opt(self.accel_min_diff_vs_ref),
            opt(self.accel_max_diff_vs_ref),
            text(&self.ref_type),
        ]);
        values
    }
}

/// `CREATE TABLE IF NOT EXISTS` statement for a row type.
pub fn create_table_sql<T: TableRow>() -> String {
    let columns: Vec<String> = T::COLUMNS
        .iter()
        .map(|(name, ty)| format!("    {} {}", name, ty))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        T::TABLE,
        columns.join(",\n")
    )
}

/// DDL for every derived table.
pub fn derived_schema() -> String {
    [
        create_table_sql::<ClassBestSegment>(),
        create_table_sql::<ClassIdealLap>(),
        create_table_sql::<LapSectorSum>(),
        create_table_sql::<DriverBestMainSector>(),
        create_table_sql::<IdealLap>(),
        create_table_sql::<SectorDelta>(),
        create_table_sql::<MainSectorDelta>(),
        create_table_sql::<LapDelta>(),
        create_table_sql::<DriverOpportunity>(),
        create_table_sql::<PhysicsFeature>(),
        create_table_sql::<LapPhysics>(),
        create_table_sql::<PhysicsSectorMetric>(),
    ]
    .join("\n")
}

/// Writes derived tables through a borrowed connection (usually a transaction).
pub struct DerivedStore<'a> {
    conn: &'a Connection,
}

impl<'a> DerivedStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Replace the full contents of `T::TABLE` with `rows`.
    pub fn replace_table<T: TableRow>(&self, rows: &[T]) -> Result<usize, DatabaseError> {
        self.conn
            .execute(&format!("DELETE FROM {}", T::TABLE), [])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let columns: Vec<&str> = T::COLUMNS.iter().map(|(name, _)| *name).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            T::TABLE,
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        for row in rows {
            stmt.execute(params_from_iter(row.values()))
                .map_err(|e| DatabaseError::QueryFailed(format!("{}: {}", T::TABLE, e)))?;
        }

        Ok(rows.len())
    }

    /// Replace the tables owned by `stage` from the given generation.
    ///
    /// A stage with no tables in the generation leaves its tables untouched.
    pub fn replace_stage(&self, stage: Stage, tables: &DerivedTables) -> Result<usize, DatabaseError> {
        let rows = match stage {
            Stage::IdealLap => match tables.ideal_lap.as_deref() {
                Some(t) => {
                    self.replace_table(&t.segments_class)?
                        + self.replace_table(&t.class_ideal)?
                        + self.replace_table(&t.lap_sector_sums)?
                        + self.replace_table(&t.driver_best)?
                        + self.replace_table(&t.ideal_laps)?
                }
                None => 0,
            },
            Stage::Deltas => match tables.deltas.as_deref() {
                Some(t) => {
                    self.replace_table(&t.sector_deltas)?
                        + self.replace_table(&t.main_sector_deltas)?
                        + self.replace_table(&t.lap_deltas)?
                        + self.replace_table(&t.driver_opportunities)?
                }
                None => 0,
            },
            Stage::PhysicsFeatures => match tables.physics.as_deref() {
                Some(t) => {
                    self.replace_table(&t.telemetry_features)?
                        + self.replace_table(&t.valid_lap_physics)?
                }
                None => 0,
            },
            Stage::PhysicsReference => match tables.physics_reference.as_deref() {
                Some(t) => self.replace_table(&t.sector_metrics)?,
                None => 0,
            },
            Stage::Insights => 0,
        };

        tracing::debug!("Replaced {} rows for stage {}", rows, stage);
        Ok(rows)
    }
}
