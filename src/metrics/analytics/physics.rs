//! Driving-style features from telemetry.
//!
//! Two grains are produced:
//! - per (driver, lap, micro-sector): braking point, peak brake, full-throttle
//!   share, throttle hesitations, steering variability, g extremes
//! - per (driver, lap): overall throttle/brake/coasting usage and g extremes
//!
//! Partitions are independent, so they are aggregated in parallel. Each
//! partition is sorted by lap progress before the hesitation fold runs.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{AnalyticsError, AnalyticsResult};
use super::session::SessionData;
use crate::metrics::hesitation::HesitationDetector;
use crate::metrics::segmenter::LapSegmenter;
use crate::metrics::stats::{max_present, mean_present, min_present, population_std, ratio};
use crate::storage::config::PhysicsSettings;
use crate::timing::{MicroSector, TelemetrySample};

/// Style statistics for one (driver, lap, micro-sector).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectorPhysics {
    /// Earliest lap progress with brake pressure above the braking threshold
    pub brake_start_progress: Option<f64>,
    /// Peak brake pressure (bar)
    pub brake_max_pressure: Option<f64>,
    /// Share of samples at full throttle
    pub throttle_full_ratio: Option<f64>,
    /// Entries into the mid-throttle band
    pub hesitation_count: u32,
    /// Population std-dev of steering angle (degrees)
    pub steering_std: Option<f64>,
    /// Hardest longitudinal deceleration (g)
    pub accel_min: Option<f64>,
    /// Highest lateral acceleration (g)
    pub accel_max: Option<f64>,
}

/// A row of `telemetry_features`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicsFeature {
    pub race_id: String,
    pub session_id: String,
    pub driver_id: String,
    pub car_no: u32,
    pub lap_no: u32,
    pub sector_id: MicroSector,
    pub samples: usize,
    #[serde(flatten)]
    pub physics: SectorPhysics,
}

/// A row of `valid_lap_physics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapPhysics {
    pub driver_id: String,
    pub lap_no: u32,
    pub lap_time_s: f64,
    pub samples: usize,
    pub avg_speed: Option<f64>,
    pub avg_throttle: Option<f64>,
    pub full_throttle_ratio: Option<f64>,
    /// Share of samples neither on throttle nor on the brakes
    pub coasting_ratio: Option<f64>,
    pub max_brake_pressure: Option<f64>,
    pub avg_brake_pressure: Option<f64>,
    pub braking_ratio: Option<f64>,
    pub steering_variability: Option<f64>,
    /// Most negative longitudinal g
    pub max_braking_g: Option<f64>,
    /// Most positive longitudinal g
    pub max_accel_g: Option<f64>,
    /// Largest absolute lateral g
    pub max_cornering_g: Option<f64>,
}

/// Output tables of the physics feature stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicsTables {
    pub telemetry_features: Vec<PhysicsFeature>,
    pub valid_lap_physics: Vec<LapPhysics>,
}

impl PhysicsTables {
    pub fn row_count(&self) -> usize {
        self.telemetry_features.len() + self.valid_lap_physics.len()
    }
}

/// Aggregates telemetry samples into physics features.
#[derive(Debug, Clone)]
pub struct PhysicsFeatureEngine {
    settings: PhysicsSettings,
    segmenter: LapSegmenter,
    detector: HesitationDetector,
    default_race_id: String,
}

impl PhysicsFeatureEngine {
    pub fn new(settings: PhysicsSettings, default_race_id: impl Into<String>) -> Self {
        let detector = HesitationDetector::new(settings.throttle_band());
        Self {
            settings,
            segmenter: LapSegmenter::default(),
            detector,
            default_race_id: default_race_id.into(),
        }
    }

    pub fn with_segmenter(mut self, segmenter: LapSegmenter) -> Self {
        self.segmenter = segmenter;
        self
    }

    pub fn compute(&self, data: &SessionData) -> AnalyticsResult<PhysicsTables> {
        if data.valid_laps.is_empty() {
            return Err(AnalyticsError::missing("laps"));
        }
        if data.telemetry.is_empty() {
            return Err(AnalyticsError::missing("telemetry"));
        }

        let telemetry_features = self.sector_features(data);
        let valid_lap_physics = self.lap_physics(data);

        Ok(PhysicsTables {
            telemetry_features,
            valid_lap_physics,
        })
    }

    fn sector_features(&self, data: &SessionData) -> Vec<PhysicsFeature> {
        let mut partitions: BTreeMap<(&str, u32, MicroSector), Vec<&TelemetrySample>> =
            BTreeMap::new();
        let mut unmapped = 0usize;

        for sample in &data.telemetry {
            match self.segmenter.sector_for(sample.lap_progress) {
                Some(sector) => partitions
                    .entry((sample.driver_id.as_str(), sample.lap_no, sector))
                    .or_default()
                    .push(sample),
                None => unmapped += 1,
            }
        }

        tracing::debug!(
            "Aggregating {} sector partitions ({} samples outside any sector)",
            partitions.len(),
            unmapped
        );

        let partitions: Vec<_> = partitions.into_iter().collect();

        partitions
            .into_par_iter()
            .filter_map(|((driver_id, lap_no, sector_id), mut samples)| {
                let driver = data.roster.get(driver_id)?;
                samples.sort_by(|a, b| a.lap_progress.total_cmp(&b.lap_progress));

                Some(PhysicsFeature {
                    race_id: self.race_id_for(&driver.race_id),
                    session_id: data.session_id.clone(),
                    driver_id: driver_id.to_string(),
                    car_no: driver.car_no,
                    lap_no,
                    sector_id,
                    samples: samples.len(),
                    physics: self.sector_physics(&samples),
                })
            })
            .collect()
    }

    /// Statistics for one partition already ordered by lap progress.
    pub fn sector_physics(&self, samples: &[&TelemetrySample]) -> SectorPhysics {
        let s = &self.settings;
        let steering: Vec<f64> = samples.iter().filter_map(|t| t.steering_angle).collect();
        let full = samples
            .iter()
            .filter(|t| t.throttle_pct.is_some_and(|v| v > s.full_throttle_pct))
            .count();

        SectorPhysics {
            brake_start_progress: min_present(samples.iter().map(|t| {
                t.brake_pressure
                    .filter(|b| *b > s.brake_on_bar)
                    .map(|_| t.lap_progress)
            })),
            brake_max_pressure: max_present(samples.iter().map(|t| t.brake_pressure)),
            throttle_full_ratio: ratio(full, samples.len()),
            hesitation_count: self.detector.count(samples.iter().map(|t| t.throttle_pct)),
            steering_std: population_std(&steering),
            accel_min: min_present(samples.iter().map(|t| t.longitudinal_accel)),
            accel_max: max_present(samples.iter().map(|t| t.lateral_accel)),
        }
    }

    fn lap_physics(&self, data: &SessionData) -> Vec<LapPhysics> {
        let mut laps: BTreeMap<(&str, u32), Vec<&TelemetrySample>> = BTreeMap::new();
        for sample in &data.telemetry {
            laps.entry((sample.driver_id.as_str(), sample.lap_no))
                .or_default()
                .push(sample);
        }

        let laps: Vec<_> = laps.into_iter().collect();
        let s = &self.settings;

        laps.into_par_iter()
            .filter_map(|((driver_id, lap_no), samples)| {
                let lap = data.valid_lap(driver_id, lap_no)?;
                let n = samples.len();
                let count = |pred: &dyn Fn(&TelemetrySample) -> bool| {
                    samples.iter().filter(|t| pred(t)).count()
                };

                let full = count(&|t| t.throttle_pct.is_some_and(|v| v > s.full_throttle_pct));
                let coasting = count(&|t| {
                    t.throttle_pct.is_some_and(|v| v < s.coast_throttle_pct)
                        && t.brake_pressure.is_some_and(|b| b < s.coast_brake_bar)
                });
                let braking = count(&|t| t.brake_pressure.is_some_and(|b| b > s.braking_bar));
                let steering: Vec<f64> = samples.iter().filter_map(|t| t.steering_angle).collect();

                Some(LapPhysics {
                    driver_id: driver_id.to_string(),
                    lap_no,
                    lap_time_s: lap.lap_time_s,
                    samples: n,
                    avg_speed: mean_present(samples.iter().map(|t| t.speed)),
                    avg_throttle: mean_present(samples.iter().map(|t| t.throttle_pct)),
                    full_throttle_ratio: ratio(full, n),
                    coasting_ratio: ratio(coasting, n),
                    max_brake_pressure: max_present(samples.iter().map(|t| t.brake_pressure)),
                    avg_brake_pressure: mean_present(samples.iter().map(|t| t.brake_pressure)),
                    braking_ratio: ratio(braking, n),
                    steering_variability: population_std(&steering),
                    max_braking_g: min_present(samples.iter().map(|t| t.longitudinal_accel)),
                    max_accel_g: max_present(samples.iter().map(|t| t.longitudinal_accel)),
                    max_cornering_g: max_present(
                        samples.iter().map(|t| t.lateral_accel.map(f64::abs)),
                    ),
                })
            })
            .collect()
    }

    fn race_id_for(&self, race_id: &str) -> String {
        if race_id.is_empty() {
            self.default_race_id.clone()
        } else {
            race_id.to_string()
        }
    }
}
