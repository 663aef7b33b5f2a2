//! Timing and telemetry metrics: segmentation, hesitation detection,
//! aggregation helpers and the derivation stages built on them.

pub mod analytics;
pub mod hesitation;
pub mod segmenter;
pub mod stats;

pub use hesitation::{HesitationDetector, ThrottleBand};
pub use segmenter::{LapSegmenter, SectorBound, SECTOR_BOUNDS};

// Re-export key analytics types for convenience
pub use analytics::{
    AnalyticsError, AnalyticsResult, DeltaEngine, DeltaTables, IdealLapEngine, IdealLapTables,
    InsightsAssembler, InsightsDocument, PhysicsFeatureEngine, PhysicsReferenceEngine,
    PhysicsReferenceTables, PhysicsTables, SessionData,
};
