//! Pipeline configuration.
//!
//! Thresholds and output settings are loaded from TOML. A missing file means
//! defaults; a partially filled file only overrides the keys it names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::metrics::hesitation::ThrottleBand;
use crate::timing::{LapWindow, MainSector};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Lap and sector filtering
    pub timing: TimingSettings,
    /// Telemetry feature thresholds
    pub physics: PhysicsSettings,
    /// Insights document settings
    pub insights: InsightSettings,
    /// Output locations
    pub storage: StorageSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            timing: TimingSettings::default(),
            physics: PhysicsSettings::default(),
            insights: InsightSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl AppConfig {
    /// Database file, relative paths resolved against the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.database_file)
    }

    /// Insights JSON file, relative paths resolved against the data directory.
    pub fn insights_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.insights_file)
    }
}

/// Lap validity and outlier thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Shortest plausible race lap in seconds
    pub lap_time_min_s: f64,
    /// Longest plausible race lap in seconds
    pub lap_time_max_s: f64,
    /// Micro-sector times at or below this are sensor noise
    pub min_sector_time_s: f64,
    /// Main-sector deltas at or above this are pit/anomalous laps
    pub outlier_delta_s: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            lap_time_min_s: 60.0,
            lap_time_max_s: 240.0,
            min_sector_time_s: 1.0,
            outlier_delta_s: 20.0,
        }
    }
}

impl TimingSettings {
    pub fn lap_window(&self) -> LapWindow {
        LapWindow {
            min_s: self.lap_time_min_s,
            max_s: self.lap_time_max_s,
        }
    }
}

/// Thresholds for driving-style features.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSettings {
    /// Brake pressure (bar) marking the braking point of a sector
    pub brake_on_bar: f64,
    /// Brake pressure (bar) counted as "on the brakes" for lap ratios
    pub braking_bar: f64,
    /// Throttle (percent) counted as full throttle
    pub full_throttle_pct: f64,
    /// Throttle (percent) below which the car may be coasting
    pub coast_throttle_pct: f64,
    /// Brake pressure (bar) below which the car may be coasting
    pub coast_brake_bar: f64,
    /// Lower edge of the mid-throttle band
    pub mid_throttle_min_pct: f64,
    /// Upper edge of the mid-throttle band
    pub mid_throttle_max_pct: f64,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            brake_on_bar: 5.0,
            braking_bar: 1.0,
            full_throttle_pct: 95.0,
            coast_throttle_pct: 5.0,
            coast_brake_bar: 0.5,
            mid_throttle_min_pct: 40.0,
            mid_throttle_max_pct: 70.0,
        }
    }
}

impl PhysicsSettings {
    pub fn throttle_band(&self) -> ThrottleBand {
        ThrottleBand {
            min_pct: self.mid_throttle_min_pct,
            max_pct: self.mid_throttle_max_pct,
        }
    }
}

/// Insights document settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightSettings {
    /// Opportunities reported per driver
    pub top_opportunities: usize,
    /// Lap-level physics rows a driver needs before their own style is used
    pub min_driver_physics_laps: usize,
    /// Session tag stamped on every output row
    pub session_id: String,
    /// Race id used when a driver has none
    pub default_race_id: String,
    /// Optional corner-group label keyed by main sector id ("S1", ...)
    pub sector_labels: BTreeMap<String, String>,
}

impl InsightSettings {
    /// Configured label for a main sector.
    pub fn sector_label(&self, sector: MainSector) -> Option<&str> {
        self.sector_labels.get(sector.as_str()).map(String::as_str)
    }
}

impl Default for InsightSettings {
    fn default() -> Self {
        Self {
            top_opportunities: 3,
            min_driver_physics_laps: 1,
            session_id: "R1".to_string(),
            default_race_id: "sebring_R1".to_string(),
            sector_labels: [
                ("S1", "Opening sector (Turns 1-3)"),
                ("S2", "Middle sector (Hairpin / Fangio)"),
                ("S3", "Final sector (Sunset Bend, Turns 13-17)"),
            ]
            .into_iter()
            .map(|(sector, label)| (sector.to_string(), label.to_string()))
            .collect(),
        }
    }
}

/// Output file names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_file: PathBuf,
    pub insights_file: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_file: PathBuf::from("apexline.sqlite"),
            insights_file: PathBuf::from("driver_insights.json"),
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "apexline", "Apexline")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);
    let data_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(get_data_dir);

    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(AppConfig {
            data_dir,
            ..Default::default()
        });
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.data_dir = data_dir;

    Ok(config)
}

/// Save configuration to `path`.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
