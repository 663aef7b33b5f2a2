//! Timing and telemetry record types.
//!
//! These are the upstream rows produced by ingestion: one `LapRecord` per
//! timed lap, one `MicroSectorRecord` per (lap, micro-sector) split and one
//! `TelemetrySample` per pivoted telemetry timestamp.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One of the three coarse lap segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MainSector {
    S1,
    S2,
    S3,
}

impl MainSector {
    /// All main sectors in lap order.
    pub const ALL: [MainSector; 3] = [MainSector::S1, MainSector::S2, MainSector::S3];

    pub fn as_str(&self) -> &'static str {
        match self {
            MainSector::S1 => "S1",
            MainSector::S2 => "S2",
            MainSector::S3 => "S3",
        }
    }

    /// The two micro-sectors making up this main sector.
    pub fn micro_sectors(&self) -> [MicroSector; 2] {
        match self {
            MainSector::S1 => [MicroSector::S1a, MicroSector::S1b],
            MainSector::S2 => [MicroSector::S2a, MicroSector::S2b],
            MainSector::S3 => [MicroSector::S3a, MicroSector::S3b],
        }
    }
}

impl fmt::Display for MainSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the six fixed micro-sectors of a lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MicroSector {
    S1a,
    S1b,
    S2a,
    S2b,
    S3a,
    S3b,
}

impl MicroSector {
    /// All micro-sectors in lap order.
    pub const ALL: [MicroSector; 6] = [
        MicroSector::S1a,
        MicroSector::S1b,
        MicroSector::S2a,
        MicroSector::S2b,
        MicroSector::S3a,
        MicroSector::S3b,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MicroSector::S1a => "S1a",
            MicroSector::S1b => "S1b",
            MicroSector::S2a => "S2a",
            MicroSector::S2b => "S2b",
            MicroSector::S3a => "S3a",
            MicroSector::S3b => "S3b",
        }
    }

    /// Main sector this micro-sector belongs to (first two characters of the id).
    pub fn main_sector(&self) -> MainSector {
        match self {
            MicroSector::S1a | MicroSector::S1b => MainSector::S1,
            MicroSector::S2a | MicroSector::S2b => MainSector::S2,
            MicroSector::S3a | MicroSector::S3b => MainSector::S3,
        }
    }
}

impl fmt::Display for MicroSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a sector id is not one of the known micro-sectors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown micro-sector id: {0}")]
pub struct UnknownSector(pub String);

impl FromStr for MicroSector {
    type Err = UnknownSector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MicroSector::ALL
            .into_iter()
            .find(|sector| sector.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownSector(s.to_string()))
    }
}

/// Inclusive window of plausible race-lap times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LapWindow {
    pub min_s: f64,
    pub max_s: f64,
}

impl Default for LapWindow {
    fn default() -> Self {
        Self {
            min_s: 60.0,
            max_s: 240.0,
        }
    }
}

impl LapWindow {
    pub fn contains(&self, lap_time_s: f64) -> bool {
        lap_time_s.is_finite() && (self.min_s..=self.max_s).contains(&lap_time_s)
    }
}

/// A single timed lap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    pub driver_id: String,
    pub car_no: u32,
    pub lap_no: u32,
    pub class: String,
    pub race_id: String,
    pub lap_time_s: f64,
    /// True iff `lap_time_s` lies in the plausible race-lap window
    pub is_valid: bool,
}

impl LapRecord {
    /// Build a lap record, deriving validity from the lap-time window.
    pub fn new(
        car_no: u32,
        lap_no: u32,
        class: impl Into<String>,
        race_id: impl Into<String>,
        lap_time_s: f64,
        window: &LapWindow,
    ) -> Self {
        Self {
            driver_id: crate::timing::driver_id_for(car_no),
            car_no,
            lap_no,
            class: class.into(),
            race_id: race_id.into(),
            lap_time_s,
            is_valid: window.contains(lap_time_s),
        }
    }
}

/// A single micro-sector split on one lap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroSectorRecord {
    pub driver_id: String,
    pub car_no: u32,
    pub lap_no: u32,
    pub sector_id: MicroSector,
    pub sector_time_s: f64,
}

impl MicroSectorRecord {
    pub fn new(car_no: u32, lap_no: u32, sector_id: MicroSector, sector_time_s: f64) -> Self {
        Self {
            driver_id: crate::timing::driver_id_for(car_no),
            car_no,
            lap_no,
            sector_id,
            sector_time_s,
        }
    }

    pub fn main_sector(&self) -> MainSector {
        self.sector_id.main_sector()
    }
}

/// One telemetry timestamp with all physics channels pivoted onto it.
///
/// Channels are optional: the source only reports a channel when its sensor
/// produced a value at that timestamp.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub driver_id: String,
    pub lap_no: u32,
    /// Fraction of the lap elapsed (0 = start, 1 = finish)
    pub lap_progress: f64,
    /// Throttle position in percent
    pub throttle_pct: Option<f64>,
    /// Front brake pressure in bar
    pub brake_pressure: Option<f64>,
    /// Steering wheel angle in degrees
    pub steering_angle: Option<f64>,
    /// Longitudinal acceleration in g
    pub longitudinal_accel: Option<f64>,
    /// Lateral acceleration in g
    pub lateral_accel: Option<f64>,
    /// Speed in km/h
    pub speed: Option<f64>,
}

impl TelemetrySample {
    /// True when the sample's lap progress lies in [0, 1].
    pub fn has_valid_progress(&self) -> bool {
        (0.0..=1.0).contains(&self.lap_progress)
    }
}

/// Identity of a driver as seen by the timing system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub driver_id: String,
    pub car_no: u32,
    pub class: String,
    pub race_id: String,
}

/// Driver identities keyed by driver id, derived from lap records.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    drivers: BTreeMap<String, DriverInfo>,
}

impl Roster {
    /// Build the roster from lap records.
    ///
    /// A driver with conflicting rows keeps the smallest class, race id and
    /// car number so the result does not depend on row order.
    pub fn from_laps(laps: &[LapRecord]) -> Self {
        let mut drivers: BTreeMap<String, DriverInfo> = BTreeMap::new();

        for lap in laps {
            drivers
                .entry(lap.driver_id.clone())
                .and_modify(|info| {
                    if lap.class < info.class {
                        info.class = lap.class.clone();
                    }
                    if lap.race_id < info.race_id {
                        info.race_id = lap.race_id.clone();
                    }
                    info.car_no = info.car_no.min(lap.car_no);
                })
                .or_insert_with(|| DriverInfo {
                    driver_id: lap.driver_id.clone(),
                    car_no: lap.car_no,
                    class: lap.class.clone(),
                    race_id: lap.race_id.clone(),
                });
        }

        Self { drivers }
    }

    pub fn get(&self, driver_id: &str) -> Option<&DriverInfo> {
        self.drivers.get(driver_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DriverInfo> {
        self.drivers.values()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
