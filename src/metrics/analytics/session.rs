//! Cleaned session data shared by every derivation stage.
//!
//! Filtering happens once here so no stage can accidentally aggregate an
//! invalid lap, a noise-level sector split or an out-of-range sample.

use std::collections::BTreeMap;

use crate::storage::config::TimingSettings;
use crate::timing::{LapRecord, MicroSectorRecord, Roster, TelemetrySample};

/// (driver_id, lap_no)
pub type LapKey = (String, u32);

/// Session rows after validity, noise and range filtering.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    /// Driver identities from all lap records
    pub roster: Roster,
    /// Valid laps keyed by (driver, lap)
    pub valid_laps: BTreeMap<LapKey, LapRecord>,
    /// Micro-sector splits above the noise floor on valid laps of known drivers
    pub sectors: Vec<MicroSectorRecord>,
    /// Samples with progress in [0, 1] on valid laps
    pub telemetry: Vec<TelemetrySample>,
    /// Session tag stamped on output rows
    pub session_id: String,
    /// Counts as received, before filtering
    pub raw_counts: RawCounts,
}

/// Input row counts before filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawCounts {
    pub laps: usize,
    pub sectors: usize,
    pub telemetry: usize,
}

impl SessionData {
    /// Filter raw rows into the data every stage works from.
    pub fn prepare(
        laps: &[LapRecord],
        sectors: &[MicroSectorRecord],
        telemetry: &[TelemetrySample],
        timing: &TimingSettings,
        session_id: impl Into<String>,
    ) -> Self {
        let roster = Roster::from_laps(laps);

        let valid_laps: BTreeMap<LapKey, LapRecord> = laps
            .iter()
            .filter(|lap| lap.is_valid)
            .map(|lap| ((lap.driver_id.clone(), lap.lap_no), lap.clone()))
            .collect();

        let is_valid =
            |driver_id: &str, lap_no: u32| valid_laps.contains_key(&(driver_id.to_string(), lap_no));

        let clean_sectors: Vec<MicroSectorRecord> = sectors
            .iter()
            .filter(|s| s.sector_time_s > timing.min_sector_time_s)
            .filter(|s| roster.get(&s.driver_id).is_some())
            .filter(|s| is_valid(&s.driver_id, s.lap_no))
            .cloned()
            .collect();

        let clean_telemetry: Vec<TelemetrySample> = telemetry
            .iter()
            .filter(|t| t.has_valid_progress())
            .filter(|t| is_valid(&t.driver_id, t.lap_no))
            .cloned()
            .collect();

        tracing::debug!(
            "Prepared session: {}/{} valid laps, {}/{} sector splits, {}/{} samples",
            valid_laps.len(),
            laps.len(),
            clean_sectors.len(),
            sectors.len(),
            clean_telemetry.len(),
            telemetry.len()
        );

        Self {
            roster,
            valid_laps,
            sectors: clean_sectors,
            telemetry: clean_telemetry,
            session_id: session_id.into(),
            raw_counts: RawCounts {
                laps: laps.len(),
                sectors: sectors.len(),
                telemetry: telemetry.len(),
            },
        }
    }

    /// Class of a driver, if known.
    pub fn class_of(&self, driver_id: &str) -> Option<&str> {
        self.roster.get(driver_id).map(|d| d.class.as_str())
    }

    pub fn valid_lap(&self, driver_id: &str, lap_no: u32) -> Option<&LapRecord> {
        self.valid_laps.get(&(driver_id.to_string(), lap_no))
    }
}
