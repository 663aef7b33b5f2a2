//! Publishing derived tables to SQLite and exporting insights.

use apexline::pipeline::{Pipeline, SnapshotStore, Stage};
use apexline::storage::config::AppConfig;
use apexline::storage::{read_insights, write_insights, Database, DatabaseError};

use super::fixtures::session_inputs;

fn seeded_database(path: &std::path::Path) -> Database {
    let inputs = session_inputs();
    let mut db = Database::open(path).unwrap();
    db.insert_laps(&inputs.laps).unwrap();
    db.insert_sectors(&inputs.sectors).unwrap();
    db.insert_telemetry(&inputs.telemetry).unwrap();
    db
}

fn count(db: &Database, table: &str) -> i64 {
    let rows = db
        .query_read_only(&format!("SELECT COUNT(*) AS n FROM {}", table))
        .unwrap();
    rows[0]["n"].as_i64().unwrap()
}

fn run_and_publish(
    store: &SnapshotStore,
    pipeline: &Pipeline,
    db: &mut Database,
) -> apexline::RunReport {
    let inputs = db.load_inputs(&pipeline.config().timing).unwrap();
    let (report, _rows) = store
        .run_and_publish(pipeline, &inputs, |tables, report| db.publish(tables, report))
        .unwrap();
    report
}

#[test]
fn test_publish_writes_every_derived_table() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = seeded_database(&dir.path().join("session.sqlite"));
    let store = SnapshotStore::new();
    let pipeline = Pipeline::new(AppConfig::default());

    let report = run_and_publish(&store, &pipeline, &mut db);
    assert!(report.all_completed());

    for stage in Stage::ALL {
        for table in stage.output_tables() {
            assert!(count(&db, table) > 0, "{} is empty", table);
        }
    }
    // Three drivers with four valid laps each
    assert_eq!(count(&db, "ideal_lap"), 12);
    assert_eq!(count(&db, "valid_lap_physics"), 12);

    let run = db.last_run().unwrap().unwrap();
    assert_eq!(run.generation, 1);
    assert_eq!(run.completed_stages.len(), Stage::ALL.len());
}

#[test]
fn test_failed_stage_keeps_published_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = seeded_database(&dir.path().join("session.sqlite"));
    let store = SnapshotStore::new();
    let pipeline = Pipeline::new(AppConfig::default());

    run_and_publish(&store, &pipeline, &mut db);
    let features_before = count(&db, "telemetry_features");
    let metrics_before = count(&db, "physics_sector_metrics");

    db.connection().execute("DELETE FROM telemetry", []).unwrap();
    let report = run_and_publish(&store, &pipeline, &mut db);

    assert!(!report.all_completed());
    assert_eq!(count(&db, "telemetry_features"), features_before);
    assert_eq!(count(&db, "physics_sector_metrics"), metrics_before);
    assert_eq!(count(&db, "pipeline_runs"), 2);

    let run = db.last_run().unwrap().unwrap();
    assert_eq!(run.generation, 2);
    assert_eq!(run.completed_stages, vec!["ideal_lap", "deltas"]);
}

#[test]
fn test_invalid_lap_flag_survives_storage() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_database(&dir.path().join("session.sqlite"));

    let inputs = db.load_inputs(&AppConfig::default().timing).unwrap();
    let invalid: Vec<_> = inputs.laps.iter().filter(|l| !l.is_valid).collect();
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0].driver_id, "D_7");
    assert_eq!(invalid[0].lap_time_s, 300.0);
}

#[test]
fn test_consumers_cannot_write() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_database(&dir.path().join("session.sqlite"));

    let result = db.query_read_only("DELETE FROM laps");
    assert!(matches!(result, Err(DatabaseError::ReadOnlyViolation(_))));
    assert_eq!(count(&db, "laps"), 13);
}

#[test]
fn test_schema_summary_lists_derived_tables() {
    let db = Database::open_in_memory().unwrap();
    let summary = db.schema_summary().unwrap();

    let columns = summary.columns("physics_sector_metrics").unwrap();
    assert!(columns.iter().any(|c| c.name == "ref_driver_id"));
    assert!(summary.columns("driver_opportunities").is_some());
    assert!(summary.columns("schema_version").is_none());
    assert!(summary.to_text().contains("ideal_lap_class("));
}

#[test]
fn test_insights_export_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new();
    let pipeline = Pipeline::new(AppConfig::default());
    store.run(&pipeline, &session_inputs());

    let current = store.current();
    let document = current.insights.as_ref().unwrap();
    let path = dir.path().join("driver_insights.json");
    write_insights(document, &path).unwrap();

    let loaded = read_insights(&path).unwrap();
    assert_eq!(&loaded, &**document);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let drivers: Vec<&String> = json.as_object().unwrap().keys().collect();
    assert_eq!(drivers, vec!["D_12", "D_7", "D_9"]);

    let d9 = &json["D_9"];
    for key in [
        "race_id",
        "session_id",
        "car_no",
        "class",
        "best_lap_s",
        "ideal_lap_s",
        "delta_to_ideal_s",
        "total_time_opportunity_s",
        "opportunities",
    ] {
        assert!(d9.get(key).is_some(), "missing {}", key);
    }
    let first = &d9["opportunities"][0];
    assert!(first["turn_name"].is_string());
    assert!(first["physics_avg"].get("brake_bar").is_some());
    assert!(first["physics_vs_class"].get("avg_delta_class_s").is_some());
}
