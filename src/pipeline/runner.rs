//! Runs the derivation stages in dependency order.
//!
//! Every stage is all-or-nothing: on success its tables are replaced in the
//! new generation, on failure the previous generation's tables are carried
//! over untouched and every downstream stage is skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::tables::{DerivedTables, Stage};
use crate::metrics::analytics::{
    AnalyticsError, DeltaEngine, DeltaTables, IdealLapEngine, IdealLapTables, InsightsAssembler,
    PhysicsFeatureEngine, PhysicsReferenceEngine, PhysicsReferenceTables, PhysicsTables,
    SessionData,
};
use crate::storage::config::AppConfig;
use crate::timing::{LapRecord, MicroSectorRecord, TelemetrySample};

/// Raw rows handed over by ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineInputs {
    pub laps: Vec<LapRecord>,
    pub sectors: Vec<MicroSectorRecord>,
    pub telemetry: Vec<TelemetrySample>,
}

/// How a stage ended in one run.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Completed { rows: usize },
    Failed(AnalyticsError),
    /// Not attempted because an upstream stage did not complete in this run
    Skipped { dependency: Stage },
}

impl StageOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub duration_ms: u128,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.outcome)
    }

    pub fn all_completed(&self) -> bool {
        self.stages.iter().all(|r| r.outcome.is_completed())
    }

    /// Stages whose tables were replaced in this run.
    pub fn completed_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|r| r.outcome.is_completed())
            .map(|r| r.stage)
            .collect()
    }
}

/// Outputs produced so far in the current run.
#[derive(Default)]
struct RunOutputs {
    ideal_lap: Option<Arc<IdealLapTables>>,
    deltas: Option<Arc<DeltaTables>>,
    physics: Option<Arc<PhysicsTables>>,
    physics_reference: Option<Arc<PhysicsReferenceTables>>,
}

/// The configured derivation pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run every stage against `inputs`, building on `previous`.
    pub fn run(&self, inputs: &PipelineInputs, previous: &DerivedTables) -> (DerivedTables, RunReport) {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut next = previous.next_generation();

        tracing::info!(
            "Pipeline run {} (generation {}): {} laps, {} sector splits, {} samples",
            run_id,
            next.generation,
            inputs.laps.len(),
            inputs.sectors.len(),
            inputs.telemetry.len()
        );

        let data = SessionData::prepare(
            &inputs.laps,
            &inputs.sectors,
            &inputs.telemetry,
            &self.config.timing,
            self.config.insights.session_id.clone(),
        );
        let dropped = data.raw_counts.laps.saturating_sub(data.valid_laps.len());
        if dropped > 0 {
            tracing::warn!("{} laps outside the valid lap window were excluded", dropped);
        }

        let mut outputs = RunOutputs::default();
        let mut outcomes: BTreeMap<Stage, StageOutcome> = BTreeMap::new();
        let mut stages = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            let started = Instant::now();

            let blocked = stage
                .dependencies()
                .iter()
                .find(|dep| !outcomes.get(*dep).is_some_and(StageOutcome::is_completed))
                .copied();

            let outcome = match blocked {
                Some(dependency) => {
                    tracing::warn!("Skipping {}: {} did not complete", stage, dependency);
                    StageOutcome::Skipped { dependency }
                }
                None => match self.run_stage(stage, &data, &mut outputs, &mut next) {
                    Ok(rows) => {
                        next.mark_replaced(stage);
                        tracing::info!("{} completed with {} rows", stage, rows);
                        StageOutcome::Completed { rows }
                    }
                    Err(e) => {
                        tracing::warn!("{} failed, keeping previous tables: {}", stage, e);
                        StageOutcome::Failed(e)
                    }
                },
            };

            outcomes.insert(stage, outcome.clone());
            stages.push(StageReport {
                stage,
                outcome,
                duration_ms: started.elapsed().as_millis(),
            });
        }

        let report = RunReport {
            run_id,
            generation: next.generation,
            started_at,
            finished_at: Utc::now(),
            stages,
        };

        (next, report)
    }

    /// Compute one stage and store its output in both the run and the new
    /// generation. Dependencies are guaranteed complete by the caller.
    fn run_stage(
        &self,
        stage: Stage,
        data: &SessionData,
        outputs: &mut RunOutputs,
        next: &mut DerivedTables,
    ) -> Result<usize, AnalyticsError> {
        let missing = |s: Stage| AnalyticsError::missing(s.as_str());

        match stage {
            Stage::IdealLap => {
                let tables = Arc::new(IdealLapEngine::new().compute(data)?);
                let rows = tables.row_count();
                outputs.ideal_lap = Some(Arc::clone(&tables));
                next.ideal_lap = Some(tables);
                Ok(rows)
            }
            Stage::Deltas => {
                let ideal = outputs.ideal_lap.as_deref().ok_or_else(|| missing(Stage::IdealLap))?;
                let tables = Arc::new(
                    DeltaEngine::new(self.config.timing.outlier_delta_s).compute(data, ideal)?,
                );
                let rows = tables.row_count();
                outputs.deltas = Some(Arc::clone(&tables));
                next.deltas = Some(tables);
                Ok(rows)
            }
            Stage::PhysicsFeatures => {
                let engine = PhysicsFeatureEngine::new(
                    self.config.physics.clone(),
                    self.config.insights.default_race_id.clone(),
                );
                let tables = Arc::new(engine.compute(data)?);
                let rows = tables.row_count();
                outputs.physics = Some(Arc::clone(&tables));
                next.physics = Some(tables);
                Ok(rows)
            }
            Stage::PhysicsReference => {
                let deltas = outputs.deltas.as_deref().ok_or_else(|| missing(Stage::Deltas))?;
                let physics = outputs
                    .physics
                    .as_deref()
                    .ok_or_else(|| missing(Stage::PhysicsFeatures))?;
                let tables = Arc::new(PhysicsReferenceEngine::new().compute(deltas, physics)?);
                let rows = tables.row_count();
                outputs.physics_reference = Some(Arc::clone(&tables));
                next.physics_reference = Some(tables);
                Ok(rows)
            }
            Stage::Insights => {
                let deltas = outputs.deltas.as_deref().ok_or_else(|| missing(Stage::Deltas))?;
                let physics = outputs
                    .physics
                    .as_deref()
                    .ok_or_else(|| missing(Stage::PhysicsFeatures))?;
                let reference = outputs
                    .physics_reference
                    .as_deref()
                    .ok_or_else(|| missing(Stage::PhysicsReference))?;
                let document = InsightsAssembler::new(self.config.insights.clone())
                    .compute(data, deltas, physics, reference)?;
                let rows = document.len();
                next.insights = Some(Arc::new(document));
                Ok(rows)
            }
        }
    }
}
