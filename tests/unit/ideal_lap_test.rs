//! Unit tests for the ideal-lap engine.

use apexline::metrics::analytics::{IdealLapEngine, SessionData};
use apexline::storage::config::TimingSettings;
use apexline::timing::{LapRecord, LapWindow, MainSector, MicroSector, MicroSectorRecord};

fn lap_splits(car: u32, lap: u32, times: [f64; 6]) -> Vec<MicroSectorRecord> {
    MicroSector::ALL
        .iter()
        .zip(times)
        .map(|(sector, t)| MicroSectorRecord::new(car, lap, *sector, t))
        .collect()
}

#[test]
fn test_ideal_lap_from_main_sector_bests() {
    let w = LapWindow::default();
    let laps = vec![
        LapRecord::new(7, 1, "GT", "sebring_R1", 115.2, &w),
        LapRecord::new(7, 2, "GT", "sebring_R1", 116.0, &w),
    ];
    // Lap 1 holds the best S1 (34.0); lap 2 the best S2 (40.0) and S3 (38.0)
    let mut sectors = lap_splits(7, 1, [17.0, 17.0, 21.0, 21.0, 19.5, 19.5]);
    sectors.extend(lap_splits(7, 2, [18.0, 17.0, 20.0, 20.0, 19.0, 19.0]));

    let data = SessionData::prepare(&laps, &sectors, &[], &TimingSettings::default(), "R1");
    let tables = IdealLapEngine::new().compute(&data).unwrap();

    let best = tables.driver_best("D_7").unwrap();
    assert_eq!(best.best(MainSector::S1), Some(34.0));
    assert_eq!(best.best(MainSector::S2), Some(40.0));
    assert_eq!(best.best(MainSector::S3), Some(38.0));

    let lap1 = tables.ideal_laps.iter().find(|l| l.lap_no == 1).unwrap();
    assert!((lap1.ideal_lap_time_s - 112.0).abs() < 1e-9);
    assert!((lap1.delta_to_ideal_s - 3.2).abs() < 1e-9);

    // Constant per driver across laps
    assert!(tables
        .ideal_laps
        .iter()
        .all(|l| (l.ideal_lap_time_s - 112.0).abs() < 1e-9));
}

#[test]
fn test_composite_ideal_is_faster_than_any_single_lap() {
    let w = LapWindow::default();
    let laps = vec![
        LapRecord::new(3, 1, "GT", "r", 120.0, &w),
        LapRecord::new(3, 2, "GT", "r", 120.0, &w),
        LapRecord::new(3, 3, "GT", "r", 120.0, &w),
    ];
    let mut sectors = lap_splits(3, 1, [15.0, 15.0, 25.0, 25.0, 25.0, 25.0]);
    sectors.extend(lap_splits(3, 2, [25.0, 25.0, 15.0, 15.0, 25.0, 25.0]));
    sectors.extend(lap_splits(3, 3, [25.0, 25.0, 25.0, 25.0, 15.0, 15.0]));

    let data = SessionData::prepare(&laps, &sectors, &[], &TimingSettings::default(), "R1");
    let tables = IdealLapEngine::new().compute(&data).unwrap();

    let ideal = tables.driver_best("D_3").unwrap().ideal_lap_time_s().unwrap();
    assert!((ideal - 90.0).abs() < 1e-9);

    let fastest_single_lap = tables
        .lap_sector_sums
        .chunks(3)
        .map(|c| c.iter().map(|s| s.sector_time_sum).sum::<f64>())
        .fold(f64::INFINITY, f64::min);
    assert!(ideal < fastest_single_lap);
}

#[test]
fn test_class_ideal_sums_class_bests() {
    let w = LapWindow::default();
    let laps = vec![
        LapRecord::new(1, 1, "GT", "r", 120.0, &w),
        LapRecord::new(2, 1, "GT", "r", 120.0, &w),
        LapRecord::new(3, 1, "TCR", "r", 130.0, &w),
    ];
    let mut sectors = lap_splits(1, 1, [19.0, 20.0, 19.0, 20.0, 19.0, 20.0]);
    sectors.extend(lap_splits(2, 1, [20.0, 19.0, 20.0, 19.0, 20.0, 19.0]));
    sectors.extend(lap_splits(3, 1, [10.0, 10.0, 10.0, 10.0, 10.0, 10.0]));

    let data = SessionData::prepare(&laps, &sectors, &[], &TimingSettings::default(), "R1");
    let tables = IdealLapEngine::new().compute(&data).unwrap();

    let gt = tables.class_ideal.iter().find(|c| c.class == "GT").unwrap();
    assert_eq!(gt.sector_count, 6);
    assert!((gt.ideal_lap_time_s - 114.0).abs() < 1e-9);

    // Another class never contributes to GT bests
    let s1a = tables.class_best("GT", MicroSector::S1a).unwrap();
    assert_eq!(s1a.best_sector_time_s, 19.0);
    assert_eq!(s1a.source_driver_id, "D_1");
    assert_eq!(tables.class_best("GT", MicroSector::S1b).unwrap().source_driver_id, "D_2");
}

#[test]
fn test_invalid_laps_excluded_from_bests() {
    let w = LapWindow::default();
    let laps = vec![
        LapRecord::new(5, 1, "GT", "r", 120.0, &w),
        // 45 s is outside the lap window: a cut or timing glitch
        LapRecord::new(5, 2, "GT", "r", 45.0, &w),
    ];
    let mut sectors = lap_splits(5, 1, [20.0; 6]);
    sectors.extend(lap_splits(5, 2, [7.5; 6]));

    let data = SessionData::prepare(&laps, &sectors, &[], &TimingSettings::default(), "R1");
    let tables = IdealLapEngine::new().compute(&data).unwrap();

    assert_eq!(tables.class_best("GT", MicroSector::S1a).unwrap().best_sector_time_s, 20.0);
    assert_eq!(tables.ideal_laps.len(), 1);
    assert!(tables.lap_sector_sums.iter().all(|s| s.lap_no == 1));
}
