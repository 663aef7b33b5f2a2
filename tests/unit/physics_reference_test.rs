//! Unit tests for class-best reference selection.

use apexline::metrics::analytics::{
    DeltaTables, PhysicsFeature, PhysicsReferenceEngine, PhysicsTables, SectorDelta,
    SectorPhysics,
};
use apexline::timing::{MainSector, MicroSector};

fn delta(driver: &str, car: u32, lap: u32, time: f64) -> SectorDelta {
    SectorDelta {
        driver_id: driver.into(),
        car_no: car,
        lap_no: lap,
        class: "GT".into(),
        sector_id: MicroSector::S1a,
        main_sector: MainSector::S1,
        sector_time_s: time,
        ideal_class_s: 18.2,
        delta_class_s: time - 18.2,
        ideal_driver_s: 36.0,
        delta_driver_s: 0.0,
    }
}

fn feature(driver: &str, car: u32, lap: u32, brake_start: f64) -> PhysicsFeature {
    PhysicsFeature {
        race_id: "sebring".into(),
        session_id: "R1".into(),
        driver_id: driver.into(),
        car_no: car,
        lap_no: lap,
        sector_id: MicroSector::S1a,
        samples: 12,
        physics: SectorPhysics {
            brake_start_progress: Some(brake_start),
            brake_max_pressure: Some(90.0),
            throttle_full_ratio: Some(0.5),
            ..Default::default()
        },
    }
}

fn reference_driver(deltas: Vec<SectorDelta>, features: Vec<PhysicsFeature>) -> (String, u32) {
    let deltas = DeltaTables {
        sector_deltas: deltas,
        ..Default::default()
    };
    let physics = PhysicsTables {
        telemetry_features: features,
        ..Default::default()
    };
    let tables = PhysicsReferenceEngine::new().compute(&deltas, &physics).unwrap();
    let reference = tables
        .reference_for("sebring", "GT", MicroSector::S1a)
        .unwrap();
    (reference.driver_id.clone(), reference.lap_no)
}

#[test]
fn test_tie_goes_to_lowest_driver_id_regardless_of_order() {
    let features = vec![feature("D_9", 9, 4, 0.12), feature("D_12", 12, 2, 0.11)];

    let forward = reference_driver(
        vec![delta("D_9", 9, 4, 18.2), delta("D_12", 12, 2, 18.2)],
        features.clone(),
    );
    let reversed = reference_driver(
        vec![delta("D_12", 12, 2, 18.2), delta("D_9", 9, 4, 18.2)],
        features.into_iter().rev().collect(),
    );

    // String order: "D_12" < "D_9"
    assert_eq!(forward, ("D_12".to_string(), 2));
    assert_eq!(forward, reversed);
}

#[test]
fn test_same_driver_tie_goes_to_lowest_lap() {
    let reference = reference_driver(
        vec![delta("D_7", 7, 5, 18.2), delta("D_7", 7, 3, 18.2)],
        vec![feature("D_7", 7, 5, 0.1), feature("D_7", 7, 3, 0.1)],
    );
    assert_eq!(reference, ("D_7".to_string(), 3));
}

#[test]
fn test_diffs_against_reference() {
    let deltas = DeltaTables {
        sector_deltas: vec![delta("D_1", 1, 1, 18.2), delta("D_2", 2, 1, 18.9)],
        ..Default::default()
    };
    let physics = PhysicsTables {
        telemetry_features: vec![feature("D_1", 1, 1, 0.10), feature("D_2", 2, 1, 0.08)],
        ..Default::default()
    };

    let tables = PhysicsReferenceEngine::new().compute(&deltas, &physics).unwrap();
    assert_eq!(tables.row_count(), 2);

    let reference_row = tables.sector_metrics.iter().find(|m| m.driver_id == "D_1").unwrap();
    assert_eq!(reference_row.delta_class_s, 0.0);
    assert_eq!(reference_row.brake_point_diff_vs_ref, Some(0.0));

    let slower = tables.sector_metrics.iter().find(|m| m.driver_id == "D_2").unwrap();
    assert!((slower.delta_class_s - 0.7).abs() < 1e-9);
    // Braking earlier than the reference is negative
    assert!((slower.brake_point_diff_vs_ref.unwrap() + 0.02).abs() < 1e-9);
    assert_eq!(slower.throttle_full_ratio_diff_vs_ref, Some(0.0));
    assert_eq!(slower.steering_std_diff_vs_ref, None);
    assert_eq!(slower.reference.driver_id, "D_1");
}
