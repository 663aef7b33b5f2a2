//! Timing records and raw-value normalization.

pub mod normalize;
pub mod types;

pub use normalize::{
    car_no_from_vehicle_id, driver_id_for, lap_progress, millis_to_seconds, to_seconds, RawTime,
};
pub use types::{
    DriverInfo, LapRecord, LapWindow, MainSector, MicroSector, MicroSectorRecord, Roster,
    TelemetrySample, UnknownSector,
};
