//! Lap-progress to micro-sector mapping.

use serde::{Deserialize, Serialize};

use crate::timing::MicroSector;

/// A micro-sector's share of the lap, as a half-open progress range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorBound {
    /// Micro-sector id
    pub sector: MicroSector,
    /// Inclusive lower bound (fraction of lap)
    pub lower: f64,
    /// Exclusive upper bound (fraction of lap)
    pub upper: f64,
}

/// Fixed micro-sector boundaries. The last bin ends slightly past 1.0 so
/// samples stamped exactly at the finish line still land in S3b.
pub const SECTOR_BOUNDS: [SectorBound; 6] = [
    SectorBound { sector: MicroSector::S1a, lower: 0.00, upper: 0.17 },
    SectorBound { sector: MicroSector::S1b, lower: 0.17, upper: 0.33 },
    SectorBound { sector: MicroSector::S2a, lower: 0.33, upper: 0.50 },
    SectorBound { sector: MicroSector::S2b, lower: 0.50, upper: 0.67 },
    SectorBound { sector: MicroSector::S3a, lower: 0.67, upper: 0.83 },
    SectorBound { sector: MicroSector::S3b, lower: 0.83, upper: 1.01 },
];

/// Maps lap progress onto micro-sectors by first matching range.
#[derive(Debug, Clone)]
pub struct LapSegmenter {
    bounds: Vec<SectorBound>,
}

impl Default for LapSegmenter {
    fn default() -> Self {
        Self {
            bounds: SECTOR_BOUNDS.to_vec(),
        }
    }
}

impl LapSegmenter {
    /// Create a segmenter with custom bounds (evaluated in order).
    pub fn with_bounds(bounds: Vec<SectorBound>) -> Self {
        Self { bounds }
    }

    /// Micro-sector containing `lap_progress`, if any.
    pub fn sector_for(&self, lap_progress: f64) -> Option<MicroSector> {
        self.bounds
            .iter()
            .find(|b| lap_progress >= b.lower && lap_progress < b.upper)
            .map(|b| b.sector)
    }

    pub fn bounds(&self) -> &[SectorBound] {
        &self.bounds
    }
}
