//! End-to-end runs of the derivation pipeline over the fixture session.

use std::collections::BTreeMap;

use apexline::metrics::analytics::{AnalyticsError, PhysicsAvg};
use apexline::metrics::stats::{mean_present, round_to};
use apexline::pipeline::{DerivedTables, Pipeline, PipelineInputs, SnapshotStore, Stage, StageOutcome};
use apexline::storage::config::AppConfig;
use apexline::timing::{MainSector, MicroSector};

use super::fixtures::{session_inputs, INVALID_LAP, SAMPLES_PER_LAP, VALID_LAPS};

fn run_once(inputs: &PipelineInputs) -> DerivedTables {
    let pipeline = Pipeline::new(AppConfig::default());
    let (tables, report) = pipeline.run(inputs, &DerivedTables::default());
    assert!(report.all_completed(), "stages: {:?}", report.stages);
    tables
}

#[test]
fn test_full_run_completes_every_stage() {
    let tables = run_once(&session_inputs());

    for stage in Stage::ALL {
        assert!(tables.has(stage), "{} missing", stage);
        assert_eq!(tables.stage_generation(stage), Some(1));
    }

    let insights = tables.insights.as_ref().unwrap();
    assert_eq!(insights.len(), 3);
}

#[test]
fn test_runs_are_idempotent() {
    let inputs = session_inputs();
    let first = run_once(&inputs);
    let second = run_once(&inputs);

    assert_eq!(first.ideal_lap, second.ideal_lap);
    assert_eq!(first.deltas, second.deltas);
    assert_eq!(first.physics, second.physics);
    assert_eq!(first.physics_reference, second.physics_reference);
    assert_eq!(first.insights, second.insights);
}

#[test]
fn test_invalid_lap_never_reaches_derived_tables() {
    let tables = run_once(&session_inputs());
    let (car, lap_no) = INVALID_LAP;
    let driver = format!("D_{}", car);
    let is_invalid = |d: &str, l: u32| d == driver && l == lap_no;

    let ideal = tables.ideal_lap.as_ref().unwrap();
    assert!(!ideal.lap_sector_sums.iter().any(|s| is_invalid(&s.driver_id, s.lap_no)));
    assert!(!ideal.ideal_laps.iter().any(|s| is_invalid(&s.driver_id, s.lap_no)));

    let deltas = tables.deltas.as_ref().unwrap();
    assert!(!deltas.sector_deltas.iter().any(|s| is_invalid(&s.driver_id, s.lap_no)));
    assert!(!deltas.lap_deltas.iter().any(|s| is_invalid(&s.driver_id, s.lap_no)));

    let physics = tables.physics.as_ref().unwrap();
    assert!(!physics.telemetry_features.iter().any(|s| is_invalid(&s.driver_id, s.lap_no)));
    assert!(!physics.valid_lap_physics.iter().any(|s| is_invalid(&s.driver_id, s.lap_no)));

    // Four valid laps for each of three cars
    assert_eq!(physics.valid_lap_physics.len(), 3 * VALID_LAPS as usize);
    assert!(physics
        .valid_lap_physics
        .iter()
        .all(|l| l.samples == SAMPLES_PER_LAP));
}

#[test]
fn test_composite_ideal_not_slower_than_any_lap() {
    let tables = run_once(&session_inputs());
    let ideal = tables.ideal_lap.as_ref().unwrap();

    for best in &ideal.driver_best {
        let composite = best.ideal_lap_time_s().unwrap();
        let mut laps: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for sum in ideal.lap_sector_sums.iter().filter(|s| s.driver_id == best.driver_id) {
            laps.entry(sum.lap_no).or_default().push(sum.sector_time_sum);
        }
        for sums in laps.values().filter(|sums| sums.len() == MainSector::ALL.len()) {
            assert!(composite <= sums.iter().sum::<f64>() + 1e-9);
        }
    }

    let deltas = tables.deltas.as_ref().unwrap();
    assert!(deltas.lap_deltas.iter().all(|l| l.delta_lap_s >= -1e-9));
}

#[test]
fn test_glitched_split_does_not_shrink_ideal() {
    let tables = run_once(&session_inputs());
    let ideal = tables.ideal_lap.as_ref().unwrap();

    // Lap 4 of car 12 lost S3b to the noise floor, so it has no S3 sum
    assert!(!ideal
        .lap_sector_sums
        .iter()
        .any(|s| s.driver_id == "D_12" && s.lap_no == 4 && s.main_sector == MainSector::S3));

    let d12 = ideal.driver_best("D_12").unwrap();
    assert!((d12.best(MainSector::S3).unwrap() - 39.6).abs() < 1e-9);

    let insight = tables.insights.as_ref().unwrap().get("D_12").unwrap();
    assert!(insight.best_lap_s - insight.ideal_lap_s < 1.0);
    assert!(insight.opportunities.iter().all(|o| o.time_loss_avg < 1.0));
}

#[test]
fn test_class_bests_stay_within_class_and_above_noise_floor() {
    let tables = run_once(&session_inputs());
    let ideal = tables.ideal_lap.as_ref().unwrap();

    let tcr_s3b = ideal.class_best("TCR", MicroSector::S3b).unwrap();
    assert!(tcr_s3b.best_sector_time_s > 1.0);
    assert_eq!(tcr_s3b.source_driver_id, "D_12");

    for segment in ideal.segments_class.iter().filter(|s| s.class == "GT") {
        assert_ne!(segment.source_driver_id, "D_12");
    }
    assert_eq!(ideal.class_ideal.len(), 2);

    // D_9 is quicker through S1a in the GT class
    let gt_s1a = ideal.class_best("GT", MicroSector::S1a).unwrap();
    assert_eq!(gt_s1a.source_driver_id, "D_9");
}

#[test]
fn test_insights_document_shape() {
    let tables = run_once(&session_inputs());
    let insights = tables.insights.as_ref().unwrap();

    let d7 = insights.get("D_7").unwrap();
    assert_eq!(d7.class, "GT");
    assert_eq!(d7.car_no, 7);
    assert_eq!(d7.race_id, "sebring_R1");
    assert!(d7.opportunities.len() <= 3);
    assert!(d7.best_lap_s >= d7.ideal_lap_s);

    let losses: Vec<f64> = d7.opportunities.iter().map(|o| o.time_loss_avg).collect();
    assert!(losses.windows(2).all(|w| w[0] >= w[1]));

    // Three main sectors and a top-3 cut keep every sector
    assert_eq!(d7.opportunities.len(), 3);
    let s1 = d7
        .opportunities
        .iter()
        .find(|o| o.main_sector == MainSector::S1)
        .unwrap();
    assert_eq!(s1.sector, MainSector::S1);
    assert_eq!(s1.turn_name.as_deref(), Some("Opening sector (Turns 1-3)"));
    assert!(s1.physics_avg.brake_bar.is_some());
}

#[test]
fn test_physics_falls_back_to_class_then_to_none() {
    let mut config = AppConfig::default();
    config.insights.min_driver_physics_laps = 100;
    let pipeline = Pipeline::new(config);

    let mut inputs = session_inputs();
    inputs.telemetry.retain(|t| t.driver_id != "D_12");

    let (tables, report) = pipeline.run(&inputs, &DerivedTables::default());
    assert!(report.all_completed(), "stages: {:?}", report.stages);

    let physics = tables.physics.as_ref().unwrap();
    let gt_laps: Vec<_> = physics
        .valid_lap_physics
        .iter()
        .filter(|l| l.driver_id == "D_7" || l.driver_id == "D_9")
        .collect();
    assert_eq!(gt_laps.len(), 2 * VALID_LAPS as usize);

    let expected_brake = round_to(
        mean_present(gt_laps.iter().map(|l| l.avg_brake_pressure)).unwrap(),
        1,
    );
    let expected_throttle =
        round_to(mean_present(gt_laps.iter().map(|l| l.avg_throttle)).unwrap(), 1);
    let expected_cornering =
        round_to(mean_present(gt_laps.iter().map(|l| l.max_cornering_g)).unwrap(), 2);

    // D_7 has too few laps for its own style, so it gets the GT class average
    let insights = tables.insights.as_ref().unwrap();
    let d7 = insights.get("D_7").unwrap();
    assert!(!d7.opportunities.is_empty());
    for opp in &d7.opportunities {
        let brake = opp.physics_avg.brake_bar.unwrap();
        let throttle = opp.physics_avg.throttle_pct.unwrap();
        let cornering = opp.physics_avg.cornering_g.unwrap();
        assert!((brake - expected_brake).abs() < 1e-9);
        assert!((throttle - expected_throttle).abs() < 1e-9);
        assert!((cornering - expected_cornering).abs() < 1e-9);
    }

    // TCR has no telemetry at all: the entry stays, every physics field is null
    let d12 = insights.get("D_12").unwrap();
    assert!(!d12.opportunities.is_empty());
    for opp in &d12.opportunities {
        assert_eq!(opp.physics_avg, PhysicsAvg::default());
    }

    let json = serde_json::to_value(&**insights).unwrap();
    assert!(json["D_12"]["opportunities"][0]["physics_avg"]["brake_bar"].is_null());
}

#[test]
fn test_missing_telemetry_keeps_previous_physics() {
    let store = SnapshotStore::new();
    let pipeline = Pipeline::new(AppConfig::default());

    let mut inputs = session_inputs();
    let first = store.run(&pipeline, &inputs);
    assert!(first.all_completed());
    let physics_before = store.current().physics.clone().unwrap();

    inputs.telemetry.clear();
    let second = store.run(&pipeline, &inputs);

    assert_eq!(second.generation, 2);
    assert_eq!(
        second.outcome(Stage::PhysicsFeatures),
        Some(&StageOutcome::Failed(AnalyticsError::missing("telemetry")))
    );
    assert_eq!(
        second.outcome(Stage::PhysicsReference),
        Some(&StageOutcome::Skipped {
            dependency: Stage::PhysicsFeatures
        })
    );
    assert!(matches!(
        second.outcome(Stage::Insights),
        Some(StageOutcome::Skipped { .. })
    ));

    let current = store.current();
    assert_eq!(current.generation, 2);
    assert_eq!(current.stage_generation(Stage::IdealLap), Some(2));
    assert_eq!(current.stage_generation(Stage::Deltas), Some(2));
    assert_eq!(current.stage_generation(Stage::PhysicsFeatures), Some(1));
    assert_eq!(current.stage_generation(Stage::Insights), Some(1));
    assert_eq!(current.physics.as_ref().unwrap(), &physics_before);
}

#[test]
fn test_missing_sectors_skip_delta_branch_only() {
    let pipeline = Pipeline::new(AppConfig::default());
    let mut inputs = session_inputs();
    inputs.sectors.clear();

    let (tables, report) = pipeline.run(&inputs, &DerivedTables::default());

    assert_eq!(
        report.outcome(Stage::IdealLap),
        Some(&StageOutcome::Failed(AnalyticsError::missing("sectors")))
    );
    assert_eq!(
        report.outcome(Stage::Deltas),
        Some(&StageOutcome::Skipped {
            dependency: Stage::IdealLap
        })
    );
    assert!(report.outcome(Stage::PhysicsFeatures).unwrap().is_completed());
    assert!(tables.physics.is_some());
    assert!(tables.deltas.is_none());
}
