//! Ideal (theoretical-best) lap calculation.
//!
//! Two references are built from micro-sector splits:
//! - the class ideal: fastest split per (class, micro-sector) across drivers
//! - the driver ideal: per driver, the best summed main sector (S1/S2/S3),
//!   each minimised independently, so the three bests may come from three
//!   different laps (a composite, not a single-lap best)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::error::{AnalyticsError, AnalyticsResult};
use super::session::SessionData;
use crate::timing::{MainSector, MicroSector};

/// Fastest micro-sector time within a class, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassBestSegment {
    pub class: String,
    pub sector_id: MicroSector,
    pub best_sector_time_s: f64,
    /// Driver who set the best split (lowest driver id on ties)
    pub source_driver_id: String,
}

/// Sum of a class's best micro-sectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassIdealLap {
    pub class: String,
    pub ideal_lap_time_s: f64,
    pub sector_count: usize,
}

/// One lap's summed main-sector time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapSectorSum {
    pub driver_id: String,
    pub car_no: u32,
    pub lap_no: u32,
    pub main_sector: MainSector,
    pub sector_time_sum: f64,
}

/// A driver's personal-best main sectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverBestMainSector {
    pub driver_id: String,
    pub class: String,
    pub best_s1: Option<f64>,
    pub best_s2: Option<f64>,
    pub best_s3: Option<f64>,
}

impl DriverBestMainSector {
    pub fn best(&self, sector: MainSector) -> Option<f64> {
        match sector {
            MainSector::S1 => self.best_s1,
            MainSector::S2 => self.best_s2,
            MainSector::S3 => self.best_s3,
        }
    }

    /// Composite ideal lap; `None` unless all three main sectors have a best.
    pub fn ideal_lap_time_s(&self) -> Option<f64> {
        Some(self.best_s1? + self.best_s2? + self.best_s3?)
    }
}

/// A valid lap compared with its driver's composite ideal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdealLap {
    pub driver_id: String,
    pub lap_no: u32,
    pub lap_time_s: f64,
    pub class: String,
    pub best_s1: f64,
    pub best_s2: f64,
    pub best_s3: f64,
    pub ideal_lap_time_s: f64,
    pub delta_to_ideal_s: f64,
}

/// Output tables of the ideal-lap stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdealLapTables {
    pub segments_class: Vec<ClassBestSegment>,
    pub class_ideal: Vec<ClassIdealLap>,
    pub lap_sector_sums: Vec<LapSectorSum>,
    pub driver_best: Vec<DriverBestMainSector>,
    pub ideal_laps: Vec<IdealLap>,
}

impl IdealLapTables {
    pub fn class_best(&self, class: &str, sector: MicroSector) -> Option<&ClassBestSegment> {
        self.segments_class
            .iter()
            .find(|s| s.class == class && s.sector_id == sector)
    }

    pub fn driver_best(&self, driver_id: &str) -> Option<&DriverBestMainSector> {
        self.driver_best.iter().find(|d| d.driver_id == driver_id)
    }

    pub fn row_count(&self) -> usize {
        self.segments_class.len()
            + self.class_ideal.len()
            + self.lap_sector_sums.len()
            + self.driver_best.len()
            + self.ideal_laps.len()
    }
}

/// Builds class and driver ideal laps from session splits.
#[derive(Debug, Clone, Default)]
pub struct IdealLapEngine;

impl IdealLapEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, data: &SessionData) -> AnalyticsResult<IdealLapTables> {
        if data.valid_laps.is_empty() {
            return Err(AnalyticsError::missing("laps"));
        }
        if data.sectors.is_empty() {
            return Err(AnalyticsError::missing("sectors"));
        }

        let segments_class = self.class_best_segments(data);
        let class_ideal = Self::class_ideal_laps(&segments_class);
        let lap_sector_sums = self.lap_sector_sums(data);
        let driver_best = self.driver_bests(data, &lap_sector_sums);
        let ideal_laps = self.ideal_laps(data, &driver_best);

        Ok(IdealLapTables {
            segments_class,
            class_ideal,
            lap_sector_sums,
            driver_best,
            ideal_laps,
        })
    }

    /// Step 1: fastest split per (class, micro-sector).
    fn class_best_segments(&self, data: &SessionData) -> Vec<ClassBestSegment> {
        let mut best: BTreeMap<(String, MicroSector), (f64, String)> = BTreeMap::new();

        for split in &data.sectors {
            let Some(class) = data.class_of(&split.driver_id) else {
                continue;
            };
            let key = (class.to_string(), split.sector_id);
            let candidate = (split.sector_time_s, split.driver_id.clone());

            best.entry(key)
                .and_modify(|current| {
                    let faster = candidate.0 < current.0;
                    let tie_lower_id = candidate.0 == current.0 && candidate.1 < current.1;
                    if faster || tie_lower_id {
                        *current = candidate.clone();
                    }
                })
                .or_insert(candidate);
        }

        best.into_iter()
            .map(|((class, sector_id), (time, driver))| ClassBestSegment {
                class,
                sector_id,
                best_sector_time_s: time,
                source_driver_id: driver,
            })
            .collect()
    }

    fn class_ideal_laps(segments: &[ClassBestSegment]) -> Vec<ClassIdealLap> {
        let mut per_class: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for segment in segments {
            let entry = per_class.entry(segment.class.as_str()).or_insert((0.0, 0));
            entry.0 += segment.best_sector_time_s;
            entry.1 += 1;
        }

        per_class
            .into_iter()
            .map(|(class, (total, count))| ClassIdealLap {
                class: class.to_string(),
                ideal_lap_time_s: total,
                sector_count: count,
            })
            .collect()
    }

    /// Step 2: per (driver, lap, main sector) sum of micro-sector times.
    ///
    /// A main sector is only summed when both of its micro-sectors survived
    /// filtering on that lap; half a sector is not a sector time.
    fn lap_sector_sums(&self, data: &SessionData) -> Vec<LapSectorSum> {
        let mut sums: BTreeMap<(String, u32, u32, MainSector), (f64, BTreeSet<MicroSector>)> =
            BTreeMap::new();

        for split in &data.sectors {
            let entry = sums
                .entry((
                    split.driver_id.clone(),
                    split.car_no,
                    split.lap_no,
                    split.main_sector(),
                ))
                .or_default();
            entry.0 += split.sector_time_s;
            entry.1.insert(split.sector_id);
        }

        sums.into_iter()
            .filter(|((_, _, _, main_sector), (_, seen))| {
                main_sector.micro_sectors().iter().all(|m| seen.contains(m))
            })
            .map(|((driver_id, car_no, lap_no, main_sector), (total, _))| LapSectorSum {
                driver_id,
                car_no,
                lap_no,
                main_sector,
                sector_time_sum: total,
            })
            .collect()
    }

    /// Step 3: per driver, independent minimum of each main sector.
    fn driver_bests(&self, data: &SessionData, sums: &[LapSectorSum]) -> Vec<DriverBestMainSector> {
        let mut bests: BTreeMap<&str, DriverBestMainSector> = BTreeMap::new();

        for sum in sums {
            let Some(class) = data.class_of(&sum.driver_id) else {
                continue;
            };
            let entry = bests
                .entry(sum.driver_id.as_str())
                .or_insert_with(|| DriverBestMainSector {
                    driver_id: sum.driver_id.clone(),
                    class: class.to_string(),
                    best_s1: None,
                    best_s2: None,
                    best_s3: None,
                });

            let slot = match sum.main_sector {
                MainSector::S1 => &mut entry.best_s1,
                MainSector::S2 => &mut entry.best_s2,
                MainSector::S3 => &mut entry.best_s3,
            };
            *slot = Some(slot.map_or(sum.sector_time_sum, |b| b.min(sum.sector_time_sum)));
        }

        bests.into_values().collect()
    }

    /// Step 4: every valid lap against the driver's composite ideal.
    fn ideal_laps(&self, data: &SessionData, bests: &[DriverBestMainSector]) -> Vec<IdealLap> {
        let by_driver: BTreeMap<&str, &DriverBestMainSector> =
            bests.iter().map(|b| (b.driver_id.as_str(), b)).collect();

        data.valid_laps
            .values()
            .filter_map(|lap| {
                let best = by_driver.get(lap.driver_id.as_str())?;
                let ideal = best.ideal_lap_time_s()?;
                Some(IdealLap {
                    driver_id: lap.driver_id.clone(),
                    lap_no: lap.lap_no,
                    lap_time_s: lap.lap_time_s,
                    class: best.class.clone(),
                    best_s1: best.best_s1?,
                    best_s2: best.best_s2?,
                    best_s3: best.best_s3?,
                    ideal_lap_time_s: ideal,
                    delta_to_ideal_s: lap.lap_time_s - ideal,
                })
            })
            .collect()
    }
}
