//! Delta engine: time lost per micro-sector, main sector and lap.
//!
//! Deltas are measured against the class ideal (fastest split in the class)
//! and the driver ideal (the driver's own best main sector). Main-sector
//! deltas feed the per-driver opportunity ranking after pit/outlier laps are
//! dropped.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::error::{AnalyticsError, AnalyticsResult};
use super::ideal_lap::IdealLapTables;
use super::session::SessionData;
use crate::metrics::stats::{mean, population_std};
use crate::timing::{MainSector, MicroSector};

/// A micro-sector split against both ideals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorDelta {
    pub driver_id: String,
    pub car_no: u32,
    pub lap_no: u32,
    pub class: String,
    pub sector_id: MicroSector,
    pub main_sector: MainSector,
    pub sector_time_s: f64,
    /// Class-best time for this micro-sector
    pub ideal_class_s: f64,
    pub delta_class_s: f64,
    /// Driver's best for the enclosing main sector
    pub ideal_driver_s: f64,
    pub delta_driver_s: f64,
}

/// A lap's main sector against the driver's best for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainSectorDelta {
    pub driver_id: String,
    pub car_no: u32,
    pub lap_no: u32,
    pub main_sector: MainSector,
    pub actual_main_s: f64,
    pub ideal_main_s: f64,
    pub delta_main_s: f64,
    /// Sum of the class-best splits in this main sector
    pub ideal_class_main_s: f64,
    pub delta_class_main_s: f64,
}

/// A valid lap against the driver's composite ideal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapDelta {
    pub driver_id: String,
    pub lap_no: u32,
    pub class: String,
    pub lap_time_s: f64,
    pub ideal_lap_time_s: f64,
    pub delta_lap_s: f64,
}

/// Average time a driver leaves in one main sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverOpportunity {
    pub driver_id: String,
    pub main_sector: MainSector,
    /// Mean main-sector delta
    pub avg_loss_s: f64,
    /// Population standard deviation of the delta
    pub consistency_s: f64,
    /// Smallest delta (best lap relative to the personal best)
    pub best_gain_s: f64,
    /// Laps contributing after outlier exclusion
    pub laps: usize,
}

/// Output tables of the delta stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaTables {
    pub sector_deltas: Vec<SectorDelta>,
    pub main_sector_deltas: Vec<MainSectorDelta>,
    pub lap_deltas: Vec<LapDelta>,
    /// Sorted by driver, then descending average loss
    pub driver_opportunities: Vec<DriverOpportunity>,
}

impl DeltaTables {
    /// Top `k` opportunities for a driver, largest average loss first.
    pub fn top_opportunities(&self, driver_id: &str, k: usize) -> Vec<&DriverOpportunity> {
        self.driver_opportunities
            .iter()
            .filter(|o| o.driver_id == driver_id)
            .take(k)
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.sector_deltas.len()
            + self.main_sector_deltas.len()
            + self.lap_deltas.len()
            + self.driver_opportunities.len()
    }
}

/// Computes deltas from ideal-lap references.
#[derive(Debug, Clone)]
pub struct DeltaEngine {
    /// Main-sector deltas at or above this are excluded from opportunities
    outlier_delta_s: f64,
}

impl Default for DeltaEngine {
    fn default() -> Self {
        Self::new(20.0)
    }
}

impl DeltaEngine {
    pub fn new(outlier_delta_s: f64) -> Self {
        Self { outlier_delta_s }
    }

    pub fn compute(&self, data: &SessionData, ideal: &IdealLapTables) -> AnalyticsResult<DeltaTables> {
        if ideal.segments_class.is_empty() {
            return Err(AnalyticsError::missing("ideal_lap_segments_class"));
        }
        if ideal.driver_best.is_empty() {
            return Err(AnalyticsError::missing("ideal_lap_driver"));
        }

        let sector_deltas = self.sector_deltas(data, ideal);
        let main_sector_deltas = Self::main_sector_deltas(&sector_deltas);
        let lap_deltas = self.lap_deltas(data, ideal);
        let driver_opportunities = self.driver_opportunities(&main_sector_deltas);

        Ok(DeltaTables {
            sector_deltas,
            main_sector_deltas,
            lap_deltas,
            driver_opportunities,
        })
    }

    fn sector_deltas(&self, data: &SessionData, ideal: &IdealLapTables) -> Vec<SectorDelta> {
        let class_best: BTreeMap<(&str, MicroSector), f64> = ideal
            .segments_class
            .iter()
            .map(|s| ((s.class.as_str(), s.sector_id), s.best_sector_time_s))
            .collect();

        data.sectors
            .iter()
            .filter_map(|split| {
                let class = data.class_of(&split.driver_id)?;
                let ideal_class_s = *class_best.get(&(class, split.sector_id))?;
                let ideal_driver_s = ideal
                    .driver_best(&split.driver_id)?
                    .best(split.main_sector())?;

                Some(SectorDelta {
                    driver_id: split.driver_id.clone(),
                    car_no: split.car_no,
                    lap_no: split.lap_no,
                    class: class.to_string(),
                    sector_id: split.sector_id,
                    main_sector: split.main_sector(),
                    sector_time_s: split.sector_time_s,
                    ideal_class_s,
                    delta_class_s: split.sector_time_s - ideal_class_s,
                    ideal_driver_s,
                    delta_driver_s: split.sector_time_s - ideal_driver_s,
                })
            })
            .collect()
    }

    /// Laps missing either micro-sector of a main sector get no row for it.
    fn main_sector_deltas(sector_deltas: &[SectorDelta]) -> Vec<MainSectorDelta> {
        // (actual, driver ideal, class ideal, micro-sectors seen)
        let mut grouped: BTreeMap<(&str, u32, u32, MainSector), (f64, f64, f64, BTreeSet<MicroSector>)> =
            BTreeMap::new();

        for d in sector_deltas {
            let entry = grouped
                .entry((d.driver_id.as_str(), d.car_no, d.lap_no, d.main_sector))
                .or_insert_with(|| (0.0, d.ideal_driver_s, 0.0, BTreeSet::new()));
            entry.0 += d.sector_time_s;
            entry.2 += d.ideal_class_s;
            entry.3.insert(d.sector_id);
        }

        grouped
            .into_iter()
            .filter(|((_, _, _, main_sector), (_, _, _, seen))| {
                main_sector.micro_sectors().iter().all(|m| seen.contains(m))
            })
            .map(
                |((driver_id, car_no, lap_no, main_sector), (actual, ideal_main, ideal_class, _))| {
                    MainSectorDelta {
                        driver_id: driver_id.to_string(),
                        car_no,
                        lap_no,
                        main_sector,
                        actual_main_s: actual,
                        ideal_main_s: ideal_main,
                        delta_main_s: actual - ideal_main,
                        ideal_class_main_s: ideal_class,
                        delta_class_main_s: actual - ideal_class,
                    }
                },
            )
            .collect()
    }

    fn lap_deltas(&self, data: &SessionData, ideal: &IdealLapTables) -> Vec<LapDelta> {
        ideal
            .ideal_laps
            .iter()
            .filter(|row| data.valid_lap(&row.driver_id, row.lap_no).is_some())
            .map(|row| LapDelta {
                driver_id: row.driver_id.clone(),
                lap_no: row.lap_no,
                class: row.class.clone(),
                lap_time_s: row.lap_time_s,
                ideal_lap_time_s: row.ideal_lap_time_s,
                delta_lap_s: row.lap_time_s - row.ideal_lap_time_s,
            })
            .collect()
    }

    fn driver_opportunities(&self, main: &[MainSectorDelta]) -> Vec<DriverOpportunity> {
        let mut grouped: BTreeMap<(&str, MainSector), Vec<f64>> = BTreeMap::new();

        for row in main.iter().filter(|r| r.delta_main_s < self.outlier_delta_s) {
            grouped
                .entry((row.driver_id.as_str(), row.main_sector))
                .or_default()
                .push(row.delta_main_s);
        }

        let mut opportunities: Vec<DriverOpportunity> = grouped
            .into_iter()
            .filter_map(|((driver_id, main_sector), deltas)| {
                Some(DriverOpportunity {
                    driver_id: driver_id.to_string(),
                    main_sector,
                    avg_loss_s: mean(&deltas)?,
                    consistency_s: population_std(&deltas)?,
                    best_gain_s: deltas.iter().copied().reduce(f64::min)?,
                    laps: deltas.len(),
                })
            })
            .collect();

        opportunities.sort_by(|a, b| {
            a.driver_id
                .cmp(&b.driver_id)
                .then(b.avg_loss_s.total_cmp(&a.avg_loss_s))
                .then(a.main_sector.cmp(&b.main_sector))
        });

        opportunities
    }
}
