//! Sector physics against a class-best reference lap.
//!
//! The reference for a (race, class, micro-sector) group is one concrete
//! driver/lap: the fastest split, ties broken by lowest driver id and then
//! lowest lap number. Every instance in the group is diffed against it.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::deltas::DeltaTables;
use super::error::{AnalyticsError, AnalyticsResult};
use super::physics::{PhysicsTables, SectorPhysics};
use crate::metrics::stats::diff;
use crate::timing::{MainSector, MicroSector};

/// Tag stored on every row; only class-best references exist today.
pub const REF_TYPE_CLASS_BEST: &str = "class_best";

/// Identity and timing of the reference instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceInstance {
    pub driver_id: String,
    pub lap_no: u32,
    pub sector_time_s: f64,
    pub physics: SectorPhysics,
}

/// A row of `physics_sector_metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicsSectorMetric {
    pub race_id: String,
    pub session_id: String,
    pub class: String,
    pub driver_id: String,
    pub car_no: u32,
    pub lap_no: u32,
    pub sector_id: MicroSector,
    pub main_sector: MainSector,
    pub sector_time_s: f64,
    pub physics: SectorPhysics,
    pub reference: ReferenceInstance,
    pub delta_class_s: f64,
    pub brake_point_diff_vs_ref: Option<f64>,
    pub brake_max_bar_diff_vs_ref: Option<f64>,
    pub throttle_full_ratio_diff_vs_ref: Option<f64>,
    pub steering_std_diff_vs_ref: Option<f64>,
    pub accel_min_diff_vs_ref: Option<f64>,
    pub accel_max_diff_vs_ref: Option<f64>,
    pub ref_type: String,
}

/// Output table of the physics-reference stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicsReferenceTables {
    pub sector_metrics: Vec<PhysicsSectorMetric>,
}

impl PhysicsReferenceTables {
    pub fn row_count(&self) -> usize {
        self.sector_metrics.len()
    }

    /// The reference chosen for a group, if the group exists.
    pub fn reference_for(
        &self,
        race_id: &str,
        class: &str,
        sector: MicroSector,
    ) -> Option<&ReferenceInstance> {
        self.sector_metrics
            .iter()
            .find(|m| m.race_id == race_id && m.class == class && m.sector_id == sector)
            .map(|m| &m.reference)
    }
}

/// A sector split joined to its physics feature.
#[derive(Debug, Clone)]
struct Instance<'a> {
    race_id: &'a str,
    session_id: &'a str,
    class: &'a str,
    driver_id: &'a str,
    car_no: u32,
    lap_no: u32,
    sector_id: MicroSector,
    main_sector: MainSector,
    sector_time_s: f64,
    physics: &'a SectorPhysics,
}

/// Orders instances fastest first; equal times fall back to driver id, then lap.
fn reference_order(a: &Instance<'_>, b: &Instance<'_>) -> Ordering {
    a.sector_time_s
        .total_cmp(&b.sector_time_s)
        .then_with(|| a.driver_id.cmp(b.driver_id))
        .then_with(|| a.lap_no.cmp(&b.lap_no))
}

#[derive(Debug, Clone, Default)]
pub struct PhysicsReferenceEngine;

impl PhysicsReferenceEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(
        &self,
        deltas: &DeltaTables,
        physics: &PhysicsTables,
    ) -> AnalyticsResult<PhysicsReferenceTables> {
        if deltas.sector_deltas.is_empty() {
            return Err(AnalyticsError::missing("sector_deltas"));
        }
        if physics.telemetry_features.is_empty() {
            return Err(AnalyticsError::missing("telemetry_features"));
        }

        let features: BTreeMap<(&str, u32, u32, MicroSector), _> = physics
            .telemetry_features
            .iter()
            .map(|f| ((f.driver_id.as_str(), f.car_no, f.lap_no, f.sector_id), f))
            .collect();

        let mut groups: BTreeMap<(&str, &str, MicroSector), Vec<Instance<'_>>> = BTreeMap::new();
        for d in &deltas.sector_deltas {
            let Some(feature) =
                features.get(&(d.driver_id.as_str(), d.car_no, d.lap_no, d.sector_id))
            else {
                continue;
            };
            groups
                .entry((feature.race_id.as_str(), d.class.as_str(), d.sector_id))
                .or_default()
                .push(Instance {
                    race_id: &feature.race_id,
                    session_id: &feature.session_id,
                    class: &d.class,
                    driver_id: &d.driver_id,
                    car_no: d.car_no,
                    lap_no: d.lap_no,
                    sector_id: d.sector_id,
                    main_sector: d.main_sector,
                    sector_time_s: d.sector_time_s,
                    physics: &feature.physics,
                });
        }

        tracing::debug!("Selecting references for {} sector groups", groups.len());

        let groups: Vec<Vec<Instance<'_>>> = groups.into_values().collect();
        let sector_metrics = groups
            .into_par_iter()
            .flat_map_iter(|mut group| {
                group.sort_by(reference_order);
                let reference = group.first().map(|r| ReferenceInstance {
                    driver_id: r.driver_id.to_string(),
                    lap_no: r.lap_no,
                    sector_time_s: r.sector_time_s,
                    physics: r.physics.clone(),
                });
                let rows: Vec<PhysicsSectorMetric> = match reference {
                    Some(reference) => group
                        .iter()
                        .map(|instance| Self::diff_row(instance, &reference))
                        .collect(),
                    None => Vec::new(),
                };
                rows
            })
            .collect();

        Ok(PhysicsReferenceTables { sector_metrics })
    }

    fn diff_row(instance: &Instance<'_>, reference: &ReferenceInstance) -> PhysicsSectorMetric {
        let own = instance.physics;
        let r = &reference.physics;

        PhysicsSectorMetric {
            race_id: instance.race_id.to_string(),
            session_id: instance.session_id.to_string(),
            class: instance.class.to_string(),
            driver_id: instance.driver_id.to_string(),
            car_no: instance.car_no,
            lap_no: instance.lap_no,
            sector_id: instance.sector_id,
            main_sector: instance.main_sector,
            sector_time_s: instance.sector_time_s,
            physics: own.clone(),
            reference: reference.clone(),
            delta_class_s: instance.sector_time_s - reference.sector_time_s,
            brake_point_diff_vs_ref: diff(own.brake_start_progress, r.brake_start_progress),
            brake_max_bar_diff_vs_ref: diff(own.brake_max_pressure, r.brake_max_pressure),
            throttle_full_ratio_diff_vs_ref: diff(own.throttle_full_ratio, r.throttle_full_ratio),
            steering_std_diff_vs_ref: diff(own.steering_std, r.steering_std),
            accel_min_diff_vs_ref: diff(own.accel_min, r.accel_min),
            accel_max_diff_vs_ref: diff(own.accel_max, r.accel_max),
            ref_type: REF_TYPE_CLASS_BEST.to_string(),
        }
    }
}
