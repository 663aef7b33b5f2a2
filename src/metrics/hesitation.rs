//! Throttle hesitation detection.
//!
//! A hesitation is an *entry* into the mid-throttle band: the driver lifts
//! off or feeds in partial throttle instead of committing. Staying in the
//! band counts once, so this is an edge detector over an ordered sequence.

use serde::{Deserialize, Serialize};

/// Throttle band considered "mid-throttle" (inclusive, percent).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleBand {
    pub min_pct: f64,
    pub max_pct: f64,
}

impl Default for ThrottleBand {
    fn default() -> Self {
        Self {
            min_pct: 40.0,
            max_pct: 70.0,
        }
    }
}

impl ThrottleBand {
    /// Missing throttle is never mid-throttle.
    pub fn contains(&self, throttle_pct: Option<f64>) -> bool {
        throttle_pct.is_some_and(|t| t >= self.min_pct && t <= self.max_pct)
    }

    /// `None` when the sample carries no throttle reading.
    fn classify(&self, throttle_pct: Option<f64>) -> Option<bool> {
        throttle_pct.map(|t| t >= self.min_pct && t <= self.max_pct)
    }
}

/// Flags hesitation events over one partition already ordered by lap progress.
#[derive(Debug, Clone, Default)]
pub struct HesitationDetector {
    band: ThrottleBand,
}

impl HesitationDetector {
    pub fn new(band: ThrottleBand) -> Self {
        Self { band }
    }

    /// Per-sample hesitation flags.
    ///
    /// The fold carries the previous sample's state: mid, not mid, or
    /// unknown. An entry fires only when the previous state is known to be
    /// not mid. The state starts unknown, so the first sample of a partition
    /// never fires, and a sample without throttle resets it to unknown.
    pub fn flags<I>(&self, throttle: I) -> Vec<bool>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let mut flags = Vec::new();
        throttle
            .into_iter()
            .fold(None, |prev_mid: Option<bool>, value| {
                let mid = self.band.classify(value);
                flags.push(mid == Some(true) && prev_mid == Some(false));
                mid
            });
        flags
    }

    /// Number of hesitation events in the partition.
    pub fn count<I>(&self, throttle: I) -> u32
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        self.flags(throttle).into_iter().filter(|f| *f).count() as u32
    }
}
