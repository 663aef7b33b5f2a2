//! Per-driver insights document.
//!
//! Joins the timing opportunities with a physics snapshot and the
//! class-reference diffs for the same main sector. The snapshot comes from an
//! ordered list of [`PhysicsSource`]s; the first one that knows the driver and
//! sector wins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::deltas::{DeltaTables, DriverOpportunity};
use super::error::{AnalyticsError, AnalyticsResult};
use super::physics::{LapPhysics, PhysicsTables};
use super::physics_reference::PhysicsReferenceTables;
use super::session::SessionData;
use crate::metrics::stats::{mean_present, min_present, round_to};
use crate::storage::config::InsightSettings;
use crate::timing::MainSector;

/// Average driving style attached to an opportunity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicsAvg {
    pub brake_bar: Option<f64>,
    pub throttle_pct: Option<f64>,
    pub full_throttle: Option<f64>,
    pub cornering_g: Option<f64>,
}

impl PhysicsAvg {
    fn from_laps<'a>(laps: impl Iterator<Item = &'a LapPhysics> + Clone) -> Self {
        Self {
            brake_bar: round_opt(mean_present(laps.clone().map(|l| l.avg_brake_pressure)), 1),
            throttle_pct: round_opt(mean_present(laps.clone().map(|l| l.avg_throttle)), 1),
            full_throttle: round_opt(mean_present(laps.clone().map(|l| l.full_throttle_ratio)), 2),
            cornering_g: round_opt(mean_present(laps.map(|l| l.max_cornering_g)), 2),
        }
    }
}

/// Mean reference diffs for a (driver, main sector).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicsVsClass {
    pub brake_point_diff_vs_ref: Option<f64>,
    pub brake_max_bar_diff_vs_ref: Option<f64>,
    pub throttle_full_ratio_diff_vs_ref: Option<f64>,
    pub steering_std_diff_vs_ref: Option<f64>,
    pub avg_delta_class_s: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityInsight {
    pub sector: MainSector,
    pub main_sector: MainSector,
    pub turn_name: Option<String>,
    pub time_loss_avg: f64,
    pub avg_sector_delta_s: f64,
    pub consistency: f64,
    pub sector_consistency_s: f64,
    pub best_gain_s: f64,
    pub physics_avg: PhysicsAvg,
    pub physics_vs_class: PhysicsVsClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverInsight {
    pub race_id: String,
    pub session_id: String,
    pub driver_id: String,
    pub car_no: u32,
    pub class: String,
    pub best_lap_s: f64,
    pub ideal_lap_s: f64,
    pub delta_to_ideal_s: f64,
    pub total_time_opportunity_s: f64,
    pub opportunities: Vec<OpportunityInsight>,
}

/// The document handed to coaching and dashboard consumers, keyed by driver id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InsightsDocument(pub BTreeMap<String, DriverInsight>);

impl InsightsDocument {
    pub fn get(&self, driver_id: &str) -> Option<&DriverInsight> {
        self.0.get(driver_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// One strategy for finding a physics snapshot.
pub trait PhysicsSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` means "not found here, try the next source".
    fn lookup(&self, driver_id: &str, class: &str, sector: MainSector) -> Option<PhysicsAvg>;
}

/// The driver's own lap-level style, used for every sector.
pub struct DriverStyleSource {
    by_driver: BTreeMap<String, PhysicsAvg>,
}

impl DriverStyleSource {
    pub fn new(laps: &[LapPhysics], min_laps: usize) -> Self {
        let mut grouped: BTreeMap<&str, Vec<&LapPhysics>> = BTreeMap::new();
        for lap in laps {
            grouped.entry(lap.driver_id.as_str()).or_default().push(lap);
        }

        let by_driver = grouped
            .into_iter()
            .filter(|(_, laps)| !laps.is_empty() && laps.len() >= min_laps)
            .map(|(driver, laps)| (driver.to_string(), PhysicsAvg::from_laps(laps.into_iter())))
            .collect();

        Self { by_driver }
    }
}

impl PhysicsSource for DriverStyleSource {
    fn name(&self) -> &'static str {
        "driver"
    }

    fn lookup(&self, driver_id: &str, _class: &str, _sector: MainSector) -> Option<PhysicsAvg> {
        self.by_driver.get(driver_id).cloned()
    }
}

/// Lap-level style averaged over every lap of a class that has timing for the sector.
pub struct ClassSectorSource {
    by_class_sector: BTreeMap<(String, MainSector), PhysicsAvg>,
}

impl ClassSectorSource {
    pub fn new(data: &SessionData, deltas: &DeltaTables, laps: &[LapPhysics]) -> Self {
        let physics: BTreeMap<(&str, u32), &LapPhysics> = laps
            .iter()
            .map(|l| ((l.driver_id.as_str(), l.lap_no), l))
            .collect();

        let mut grouped: BTreeMap<(String, MainSector), Vec<&LapPhysics>> = BTreeMap::new();
        for row in &deltas.main_sector_deltas {
            let Some(class) = data.class_of(&row.driver_id) else {
                continue;
            };
            if let Some(lap) = physics.get(&(row.driver_id.as_str(), row.lap_no)) {
                grouped
                    .entry((class.to_string(), row.main_sector))
                    .or_default()
                    .push(lap);
            }
        }

        let by_class_sector = grouped
            .into_iter()
            .map(|(key, laps)| (key, PhysicsAvg::from_laps(laps.into_iter())))
            .collect();

        Self { by_class_sector }
    }
}

impl PhysicsSource for ClassSectorSource {
    fn name(&self) -> &'static str {
        "class_sector"
    }

    fn lookup(&self, _driver_id: &str, class: &str, sector: MainSector) -> Option<PhysicsAvg> {
        self.by_class_sector
            .get(&(class.to_string(), sector))
            .cloned()
    }
}

/// Last resort: every field explicitly absent.
pub struct NoPhysicsSource;

impl PhysicsSource for NoPhysicsSource {
    fn name(&self) -> &'static str {
        "none"
    }

    fn lookup(&self, _driver_id: &str, _class: &str, _sector: MainSector) -> Option<PhysicsAvg> {
        Some(PhysicsAvg::default())
    }
}

/// Ordered physics lookup, short-circuiting on the first hit.
pub struct PhysicsFallbackChain {
    sources: Vec<Box<dyn PhysicsSource>>,
}

impl PhysicsFallbackChain {
    pub fn new(sources: Vec<Box<dyn PhysicsSource>>) -> Self {
        Self { sources }
    }

    /// Snapshot plus the name of the source that produced it.
    pub fn resolve(&self, driver_id: &str, class: &str, sector: MainSector) -> (PhysicsAvg, &'static str) {
        self.sources
            .iter()
            .find_map(|s| s.lookup(driver_id, class, sector).map(|p| (p, s.name())))
            .unwrap_or_else(|| (PhysicsAvg::default(), "none"))
    }
}

/// Best/ideal lap summary for a driver, from lap deltas.
#[derive(Debug, Clone, Copy)]
struct LapSummary {
    best_lap_s: f64,
    ideal_lap_s: f64,
    best_delta_s: f64,
}

pub struct InsightsAssembler {
    settings: InsightSettings,
}

impl InsightsAssembler {
    pub fn new(settings: InsightSettings) -> Self {
        Self { settings }
    }

    pub fn compute(
        &self,
        data: &SessionData,
        deltas: &DeltaTables,
        physics: &PhysicsTables,
        reference: &PhysicsReferenceTables,
    ) -> AnalyticsResult<InsightsDocument> {
        if deltas.driver_opportunities.is_empty() {
            return Err(AnalyticsError::missing("driver_opportunities"));
        }

        let chain = PhysicsFallbackChain::new(vec![
            Box::new(DriverStyleSource::new(
                &physics.valid_lap_physics,
                self.settings.min_driver_physics_laps,
            )),
            Box::new(ClassSectorSource::new(data, deltas, &physics.valid_lap_physics)),
            Box::new(NoPhysicsSource),
        ]);
        let summaries = Self::lap_summaries(deltas);
        let vs_class = Self::physics_vs_class(reference);

        let mut by_driver: BTreeMap<&str, Vec<&DriverOpportunity>> = BTreeMap::new();
        for opp in &deltas.driver_opportunities {
            by_driver.entry(opp.driver_id.as_str()).or_default().push(opp);
        }

        let mut document = BTreeMap::new();
        for (driver_id, mut opportunities) in by_driver {
            let (Some(summary), Some(driver)) = (summaries.get(driver_id), data.roster.get(driver_id))
            else {
                tracing::warn!("No lap summary for {}, leaving it out of insights", driver_id);
                continue;
            };

            opportunities.sort_by(|a, b| b.avg_loss_s.total_cmp(&a.avg_loss_s));

            let entries = opportunities
                .into_iter()
                .take(self.settings.top_opportunities)
                .map(|opp| {
                    let (physics_avg, _) = chain.resolve(driver_id, &driver.class, opp.main_sector);
                    let physics_vs_class = vs_class
                        .get(&(driver_id, opp.main_sector))
                        .cloned()
                        .unwrap_or_default();
                    self.opportunity(opp, physics_avg, physics_vs_class)
                })
                .collect();

            let race_id = if driver.race_id.is_empty() {
                self.settings.default_race_id.clone()
            } else {
                driver.race_id.clone()
            };
            let delta = round_to(summary.best_delta_s, 3);

            document.insert(
                driver_id.to_string(),
                DriverInsight {
                    race_id,
                    session_id: self.settings.session_id.clone(),
                    driver_id: driver_id.to_string(),
                    car_no: driver.car_no,
                    class: driver.class.clone(),
                    best_lap_s: round_to(summary.best_lap_s, 3),
                    ideal_lap_s: round_to(summary.ideal_lap_s, 3),
                    delta_to_ideal_s: delta,
                    total_time_opportunity_s: delta,
                    opportunities: entries,
                },
            );
        }

        Ok(InsightsDocument(document))
    }

    fn opportunity(
        &self,
        opp: &DriverOpportunity,
        physics_avg: PhysicsAvg,
        physics_vs_class: PhysicsVsClass,
    ) -> OpportunityInsight {
        let loss = round_to(opp.avg_loss_s, 3);
        let consistency = round_to(opp.consistency_s, 3);
        OpportunityInsight {
            sector: opp.main_sector,
            main_sector: opp.main_sector,
            turn_name: self.settings.sector_label(opp.main_sector).map(str::to_string),
            time_loss_avg: loss,
            avg_sector_delta_s: loss,
            consistency,
            sector_consistency_s: consistency,
            best_gain_s: round_to(opp.best_gain_s, 3),
            physics_avg,
            physics_vs_class,
        }
    }

    fn lap_summaries(deltas: &DeltaTables) -> BTreeMap<&str, LapSummary> {
        let mut grouped: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for lap in &deltas.lap_deltas {
            grouped.entry(lap.driver_id.as_str()).or_default().push(lap);
        }

        grouped
            .into_iter()
            .filter_map(|(driver, laps)| {
                let summary = LapSummary {
                    best_lap_s: min_present(laps.iter().map(|l| Some(l.lap_time_s)))?,
                    ideal_lap_s: min_present(laps.iter().map(|l| Some(l.ideal_lap_time_s)))?,
                    best_delta_s: min_present(laps.iter().map(|l| Some(l.delta_lap_s)))?,
                };
                Some((driver, summary))
            })
            .collect()
    }

    fn physics_vs_class(
        reference: &PhysicsReferenceTables,
    ) -> BTreeMap<(&str, MainSector), PhysicsVsClass> {
        let mut grouped: BTreeMap<(&str, MainSector), Vec<_>> = BTreeMap::new();
        for m in &reference.sector_metrics {
            grouped
                .entry((m.driver_id.as_str(), m.main_sector))
                .or_default()
                .push(m);
        }

        grouped
            .into_iter()
            .map(|(key, rows)| {
                let avg = PhysicsVsClass {
                    brake_point_diff_vs_ref: round_opt(
                        mean_present(rows.iter().map(|m| m.brake_point_diff_vs_ref)),
                        3,
                    ),
                    brake_max_bar_diff_vs_ref: round_opt(
                        mean_present(rows.iter().map(|m| m.brake_max_bar_diff_vs_ref)),
                        2,
                    ),
                    throttle_full_ratio_diff_vs_ref: round_opt(
                        mean_present(rows.iter().map(|m| m.throttle_full_ratio_diff_vs_ref)),
                        3,
                    ),
                    steering_std_diff_vs_ref: round_opt(
                        mean_present(rows.iter().map(|m| m.steering_std_diff_vs_ref)),
                        3,
                    ),
                    avg_delta_class_s: round_opt(
                        mean_present(rows.iter().map(|m| Some(m.delta_class_s))),
                        3,
                    ),
                };
                (key, avg)
            })
            .collect()
    }
}

fn round_opt(value: Option<f64>, decimals: i32) -> Option<f64> {
    value.map(|v| round_to(v, decimals))
}
