//! Derivation stages of the lap-time pipeline.
//!
//! Each stage is a pure function of its declared inputs and fully replaces its
//! output tables on every run:
//! - Ideal lap (class bests, driver composite ideals)
//! - Deltas (micro-sector, main-sector and lap losses, ranked opportunities)
//! - Physics features (per lap and per micro-sector driving style)
//! - Physics reference (diffs against the class-best instance)
//! - Insights (per-driver document)

pub mod deltas;
pub mod error;
pub mod ideal_lap;
pub mod insights;
pub mod physics;
pub mod physics_reference;
pub mod session;

// Re-exports for convenience
pub use deltas::{DeltaEngine, DeltaTables, DriverOpportunity, LapDelta, MainSectorDelta, SectorDelta};
pub use error::{AnalyticsError, AnalyticsResult};
pub use ideal_lap::{
    ClassBestSegment, ClassIdealLap, DriverBestMainSector, IdealLap, IdealLapEngine,
    IdealLapTables, LapSectorSum,
};
pub use insights::{
    DriverInsight, InsightsAssembler, InsightsDocument, OpportunityInsight, PhysicsAvg,
    PhysicsFallbackChain, PhysicsSource, PhysicsVsClass,
};
pub use physics::{LapPhysics, PhysicsFeature, PhysicsFeatureEngine, PhysicsTables, SectorPhysics};
pub use physics_reference::{
    PhysicsReferenceEngine, PhysicsReferenceTables, PhysicsSectorMetric, ReferenceInstance,
};
pub use session::{LapKey, RawCounts, SessionData};
