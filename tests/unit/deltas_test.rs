//! Unit tests for the delta engine.

use apexline::metrics::analytics::{DeltaEngine, IdealLapEngine, SessionData};
use apexline::storage::config::TimingSettings;
use apexline::timing::{LapRecord, LapWindow, MainSector, MicroSector, MicroSectorRecord};

fn split(car: u32, lap: u32, sector: MicroSector, t: f64) -> MicroSectorRecord {
    MicroSectorRecord::new(car, lap, sector, t)
}

fn lap_splits(car: u32, lap: u32, times: [f64; 6]) -> Vec<MicroSectorRecord> {
    MicroSector::ALL
        .iter()
        .zip(times)
        .map(|(sector, t)| split(car, lap, *sector, t))
        .collect()
}

#[test]
fn test_sector_delta_against_class_best() {
    let w = LapWindow::default();
    let laps = vec![
        LapRecord::new(7, 3, "GT", "r", 120.0, &w),
        LapRecord::new(9, 1, "GT", "r", 118.0, &w),
    ];
    let sectors = vec![
        split(7, 3, MicroSector::S1a, 20.0),
        split(7, 3, MicroSector::S1b, 15.0),
        split(9, 1, MicroSector::S1a, 19.0),
        split(9, 1, MicroSector::S1b, 14.5),
    ];

    let data = SessionData::prepare(&laps, &sectors, &[], &TimingSettings::default(), "R1");
    let ideal = IdealLapEngine::new().compute(&data).unwrap();
    let deltas = DeltaEngine::default().compute(&data, &ideal).unwrap();

    let d7: Vec<_> = deltas
        .sector_deltas
        .iter()
        .filter(|d| d.driver_id == "D_7")
        .collect();
    let total: f64 = d7.iter().map(|d| d.delta_class_s).sum();
    assert!((total - 1.5).abs() < 1e-9);

    let main = deltas
        .main_sector_deltas
        .iter()
        .find(|m| m.driver_id == "D_7" && m.main_sector == MainSector::S1)
        .unwrap();
    assert!((main.actual_main_s - 35.0).abs() < 1e-9);
    assert!((main.ideal_class_main_s - 33.5).abs() < 1e-9);
    assert!((main.delta_class_main_s - 1.5).abs() < 1e-9);
}

#[test]
fn test_outlier_main_sector_deltas_do_not_move_average() {
    let w = LapWindow::default();
    let base_laps = vec![
        LapRecord::new(7, 1, "GT", "r", 120.0, &w),
        LapRecord::new(7, 2, "GT", "r", 121.0, &w),
    ];
    let mut base_sectors = lap_splits(7, 1, [17.0, 17.0, 20.0, 20.0, 19.0, 19.0]);
    base_sectors.extend(lap_splits(7, 2, [17.5, 17.5, 20.0, 20.0, 19.0, 19.0]));

    let baseline = {
        let data =
            SessionData::prepare(&base_laps, &base_sectors, &[], &TimingSettings::default(), "R1");
        let ideal = IdealLapEngine::new().compute(&data).unwrap();
        DeltaEngine::default().compute(&data, &ideal).unwrap()
    };

    // Lap 3 loses 26 s in S1 (pit entry), lap 4 exactly 20 s: both excluded
    let mut laps = base_laps.clone();
    laps.push(LapRecord::new(7, 3, "GT", "r", 150.0, &w));
    laps.push(LapRecord::new(7, 4, "GT", "r", 145.0, &w));
    let mut sectors = base_sectors.clone();
    sectors.push(split(7, 3, MicroSector::S1a, 30.0));
    sectors.push(split(7, 3, MicroSector::S1b, 30.0));
    sectors.push(split(7, 4, MicroSector::S1a, 27.0));
    sectors.push(split(7, 4, MicroSector::S1b, 27.0));

    let data = SessionData::prepare(&laps, &sectors, &[], &TimingSettings::default(), "R1");
    let ideal = IdealLapEngine::new().compute(&data).unwrap();
    let with_outliers = DeltaEngine::default().compute(&data, &ideal).unwrap();

    let s1 = |tables: &apexline::metrics::analytics::DeltaTables| {
        tables
            .driver_opportunities
            .iter()
            .find(|o| o.main_sector == MainSector::S1)
            .cloned()
            .unwrap()
    };

    assert_eq!(s1(&baseline).avg_loss_s, s1(&with_outliers).avg_loss_s);
    assert_eq!(s1(&with_outliers).laps, 2);

    // The outlier laps are still present at main-sector grain
    assert!(with_outliers
        .main_sector_deltas
        .iter()
        .any(|m| m.lap_no == 3 && m.delta_main_s >= 20.0));
}

#[test]
fn test_sector_noise_floor_boundary() {
    let w = LapWindow::default();
    let laps = vec![
        LapRecord::new(1, 1, "GT", "r", 120.0, &w),
        LapRecord::new(2, 1, "GT", "r", 120.0, &w),
    ];
    let sectors = vec![
        split(1, 1, MicroSector::S1a, 1.0),
        split(1, 1, MicroSector::S1b, 15.0),
        split(2, 1, MicroSector::S1a, 1.0001),
        split(2, 1, MicroSector::S1b, 15.0),
    ];

    let data = SessionData::prepare(&laps, &sectors, &[], &TimingSettings::default(), "R1");
    let ideal = IdealLapEngine::new().compute(&data).unwrap();
    let best = ideal.class_best("GT", MicroSector::S1a).unwrap();
    assert_eq!(best.best_sector_time_s, 1.0001);
    assert_eq!(best.source_driver_id, "D_2");

    // D_1 lost its S1a split, so it has no complete S1 and no driver best
    assert!(ideal.driver_best("D_1").is_none());
    let deltas = DeltaEngine::default().compute(&data, &ideal).unwrap();
    assert!(deltas.sector_deltas.iter().all(|d| d.driver_id == "D_2"));
}

#[test]
fn test_lap_deltas_only_for_valid_laps() {
    let w = LapWindow::default();
    let laps = vec![
        LapRecord::new(7, 1, "GT", "r", 115.2, &w),
        LapRecord::new(7, 2, "GT", "r", 250.0, &w),
    ];
    let mut sectors = lap_splits(7, 1, [17.0, 17.0, 20.0, 20.0, 19.0, 19.0]);
    sectors.extend(lap_splits(7, 2, [40.0; 6]));

    let data = SessionData::prepare(&laps, &sectors, &[], &TimingSettings::default(), "R1");
    let ideal = IdealLapEngine::new().compute(&data).unwrap();
    let deltas = DeltaEngine::default().compute(&data, &ideal).unwrap();

    assert_eq!(deltas.lap_deltas.len(), 1);
    assert!((deltas.lap_deltas[0].delta_lap_s - 3.2).abs() < 1e-9);
    assert!(deltas.sector_deltas.iter().all(|d| d.lap_no == 1));
}
