//! Time normalization.
//!
//! Timing exports mix clock strings ("1:22.4", "1:02:03.5"), bare numbers,
//! numeric strings and time-of-day cells. Everything is reduced to seconds;
//! anything unparseable becomes `None` so aggregations exclude it instead of
//! treating it as zero.

use chrono::{DateTime, NaiveTime, Timelike, Utc};

/// A raw time value of unknown representation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTime {
    /// Clock string or numeric string
    Text(String),
    /// Already numeric (seconds)
    Number(f64),
    /// Wall-clock time of day
    TimeOfDay(NaiveTime),
    /// Empty cell
    Missing,
}

impl From<&str> for RawTime {
    fn from(value: &str) -> Self {
        RawTime::Text(value.to_string())
    }
}

impl From<f64> for RawTime {
    fn from(value: f64) -> Self {
        RawTime::Number(value)
    }
}

impl From<NaiveTime> for RawTime {
    fn from(value: NaiveTime) -> Self {
        RawTime::TimeOfDay(value)
    }
}

impl<T: Into<RawTime>> From<Option<T>> for RawTime {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(RawTime::Missing)
    }
}

/// Convert a raw time value into seconds.
pub fn to_seconds(raw: &RawTime) -> Option<f64> {
    match raw {
        RawTime::Missing => None,
        RawTime::Number(value) => value.is_finite().then_some(*value),
        RawTime::TimeOfDay(time) => Some(time_of_day_seconds(time)),
        RawTime::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else if text.contains(':') {
                parse_clock(text)
            } else {
                text.parse::<f64>().ok().filter(|v| v.is_finite())
            }
        }
    }
}

/// Parse "M:SS.s" or "H:MM:SS.s".
fn parse_clock(text: &str) -> Option<f64> {
    let parts: Vec<&str> = text.split(':').map(str::trim).collect();

    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => (0, m.parse::<u32>().ok()?, s.parse::<f64>().ok()?),
        [h, m, s] => (
            h.parse::<u32>().ok()?,
            m.parse::<u32>().ok()?,
            s.parse::<f64>().ok()?,
        ),
        _ => return None,
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    Some(f64::from(hours) * 3600.0 + f64::from(minutes) * 60.0 + seconds)
}

fn time_of_day_seconds(time: &NaiveTime) -> f64 {
    f64::from(time.num_seconds_from_midnight()) + f64::from(time.nanosecond()) / 1e9
}

/// Convert a lap time reported in milliseconds to seconds.
pub fn millis_to_seconds(millis: f64) -> Option<f64> {
    millis.is_finite().then(|| millis / 1000.0)
}

/// Extract the car number from a vehicle id such as "GR86-004-78".
pub fn car_no_from_vehicle_id(vehicle_id: &str) -> Option<u32> {
    vehicle_id.rsplit('-').next()?.trim().parse().ok()
}

/// Stable driver key derived from the car number.
pub fn driver_id_for(car_no: u32) -> String {
    format!("D_{car_no}")
}

/// Fraction of the lap elapsed at `timestamp`, clamped to [0, 1].
///
/// Returns `None` when the lap has no positive duration.
pub fn lap_progress(
    timestamp: DateTime<Utc>,
    lap_start: DateTime<Utc>,
    lap_end: DateTime<Utc>,
) -> Option<f64> {
    let duration_us = (lap_end - lap_start).num_microseconds()?;
    if duration_us <= 0 {
        return None;
    }
    let elapsed_us = (timestamp - lap_start).num_microseconds()?;

    Some((elapsed_us as f64 / duration_us as f64).clamp(0.0, 1.0))
}
