use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::constants::{DEFAULT_CALIBRATION_MEDIAN, DEFAULT_MAX_SNAPSHOTS, DEFAULT_MK_FACTOR, DEFAULT_STEP_MS};
use crate::parsers::ParseOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Apply clock synchronization after loading
    pub time_sync: bool,
    pub dn_median_radius: usize,
    pub dv_median_radius: usize,
    pub dv_exp_alpha: f64,
    pub sample_step_ms: u32,
    pub min_candle_len_cm: f64,
    pub snapshots_dir: PathBuf,
    pub max_snapshots: usize,
    /// Measuring-wheel distance per unit
    pub mk_factor: f64,
    pub calibration_median_window: usize,
    pub server: ServerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            time_sync: true,
            dn_median_radius: 3,
            dv_median_radius: 3,
            dv_exp_alpha: 0.7,
            sample_step_ms: DEFAULT_STEP_MS,
            min_candle_len_cm: 50.0,
            snapshots_dir: std::env::temp_dir().join("DepthCalc snapshots"),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            mk_factor: DEFAULT_MK_FACTOR,
            calibration_median_window: DEFAULT_CALIBRATION_MEDIAN,
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            dn_median_radius: self.dn_median_radius,
            sample_step_ms: self.sample_step_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub ip: String,
    /// 0 picks a free port at bind time
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}
