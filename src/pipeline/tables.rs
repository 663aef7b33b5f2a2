//! Pipeline stages and the generation of derived tables they produce.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::metrics::analytics::{
    DeltaTables, IdealLapTables, InsightsDocument, PhysicsReferenceTables, PhysicsTables,
};

/// A derivation stage of the pipeline DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IdealLap,
    Deltas,
    PhysicsFeatures,
    PhysicsReference,
    Insights,
}

impl Stage {
    /// All stages in a valid execution order (dependencies first).
    pub const ALL: [Stage; 5] = [
        Stage::IdealLap,
        Stage::Deltas,
        Stage::PhysicsFeatures,
        Stage::PhysicsReference,
        Stage::Insights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::IdealLap => "ideal_lap",
            Stage::Deltas => "deltas",
            Stage::PhysicsFeatures => "physics_features",
            Stage::PhysicsReference => "physics_reference",
            Stage::Insights => "insights",
        }
    }

    /// Stages whose output this stage reads.
    pub fn dependencies(&self) -> &'static [Stage] {
        match self {
            Stage::IdealLap | Stage::PhysicsFeatures => &[],
            Stage::Deltas => &[Stage::IdealLap],
            Stage::PhysicsReference => &[Stage::Deltas, Stage::PhysicsFeatures],
            Stage::Insights => &[Stage::Deltas, Stage::PhysicsFeatures, Stage::PhysicsReference],
        }
    }

    /// Relational tables this stage replaces when it completes.
    pub fn output_tables(&self) -> &'static [&'static str] {
        match self {
            Stage::IdealLap => &[
                "ideal_lap_segments_class",
                "ideal_lap_class",
                "lap_sector_sums",
                "ideal_lap_driver",
                "ideal_lap",
            ],
            Stage::Deltas => &[
                "sector_deltas",
                "main_sector_deltas",
                "lap_deltas",
                "driver_opportunities",
            ],
            Stage::PhysicsFeatures => &["telemetry_features", "valid_lap_physics"],
            Stage::PhysicsReference => &["physics_sector_metrics"],
            Stage::Insights => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One published generation of every stage's output.
///
/// A stage that did not complete in the run that produced this generation
/// carries over the tables of the generation before it, so `stage_generation`
/// can be older than `generation`.
#[derive(Debug, Clone, Default)]
pub struct DerivedTables {
    pub generation: u64,
    pub ideal_lap: Option<Arc<IdealLapTables>>,
    pub deltas: Option<Arc<DeltaTables>>,
    pub physics: Option<Arc<PhysicsTables>>,
    pub physics_reference: Option<Arc<PhysicsReferenceTables>>,
    pub insights: Option<Arc<InsightsDocument>>,
    stage_generations: BTreeMap<Stage, u64>,
}

impl DerivedTables {
    /// Generation in which a stage's current tables were produced.
    pub fn stage_generation(&self, stage: Stage) -> Option<u64> {
        self.stage_generations.get(&stage).copied()
    }

    pub fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::IdealLap => self.ideal_lap.is_some(),
            Stage::Deltas => self.deltas.is_some(),
            Stage::PhysicsFeatures => self.physics.is_some(),
            Stage::PhysicsReference => self.physics_reference.is_some(),
            Stage::Insights => self.insights.is_some(),
        }
    }

    /// Start the next generation from this one; nothing is replaced yet.
    pub(crate) fn next_generation(&self) -> Self {
        Self {
            generation: self.generation + 1,
            ..self.clone()
        }
    }

    pub(crate) fn mark_replaced(&mut self, stage: Stage) {
        self.stage_generations.insert(stage, self.generation);
    }
}
