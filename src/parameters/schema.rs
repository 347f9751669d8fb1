//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Typed parameter group records and their invariants.
//!

use serde::{Deserialize, Serialize};

/// One of the four orthogonal sweep directions.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::EnumIter,
)]
pub enum Direction {
    #[serde(rename = "LR")]
    Lr,
    #[serde(rename = "RL")]
    Rl,
    #[serde(rename = "TB")]
    Tb,
    #[serde(rename = "BT")]
    Bt,
}

impl Direction {
    /// Whether the bar is vertical (sweeping through azimuth) as opposed
    /// to horizontal (sweeping through altitude).
    pub fn is_horizontal_sweep(&self) -> bool {
        matches!(self, Direction::Lr | Direction::Rl)
    }

    pub fn parse(s: &str) -> Option<Direction> {
        match s {
            "LR" => Some(Direction::Lr),
            "RL" => Some(Direction::Rl),
            "TB" => Some(Direction::Tb),
            "BT" => Some(Direction::Bt),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Direction::Lr => "LR",
                Direction::Rl => "RL",
                Direction::Tb => "TB",
                Direction::Bt => "BT",
            }
        )
    }
}

/// Hardware-detected monitor geometry. Volatile: never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitorParams {
    pub width_px: u32,
    pub height_px: u32,
    pub width_cm: f64,
    pub height_cm: f64,
    pub distance_cm: f64,
    pub lateral_angle_deg: f64,
    pub tilt_angle_deg: f64,
    pub fps: f64,
}

impl Default for MonitorParams {
    fn default() -> Self {
        MonitorParams {
            width_px: 1920,
            height_px: 1080,
            width_cm: 50.0,
            height_cm: 28.0,
            distance_cm: 15.0,
            lateral_angle_deg: 0.0,
            tilt_angle_deg: 0.0,
            fps: 60.0,
        }
    }
}

impl MonitorParams {
    pub fn is_operable(&self) -> bool {
        self.width_px > 0 && self.height_px > 0 && self.fps > 0.0
    }
}

/// Hardware-detected camera geometry. Volatile: never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub width_px: u32,
    pub height_px: u32,
    pub fps: f64,
    pub exposure_us: f64,
    pub gain: f64,
}

impl Default for CameraParams {
    fn default() -> Self {
        CameraParams {
            width_px: 1024,
            height_px: 1024,
            fps: 30.0,
            exposure_us: 20_000.0,
            gain: 0.0,
        }
    }
}

/// Scientific stimulus parameters. Persistent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StimulusParams {
    pub bar_width_deg: f64,
    pub checker_size_deg: f64,
    pub drift_speed_deg_per_sec: f64,
    pub contrast: f64,
    pub background_luminance: f64,
    pub strobe_rate_hz: f64,
}

impl Default for StimulusParams {
    fn default() -> Self {
        StimulusParams {
            bar_width_deg: 20.0,
            checker_size_deg: 5.0,
            drift_speed_deg_per_sec: 9.0,
            contrast: 0.5,
            background_luminance: 0.5,
            strobe_rate_hz: 2.0,
        }
    }
}

impl StimulusParams {
    /// `background_luminance >= contrast`, else half the checkerboard
    /// would clamp to black (spec.md §3 invariant).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut bad = Vec::new();
        if self.background_luminance < self.contrast {
            bad.push("background_luminance".to_string());
            bad.push("contrast".to_string());
        }
        if !(0.0..=1.0).contains(&self.contrast) {
            bad.push("contrast".to_string());
        }
        if !(0.0..=1.0).contains(&self.background_luminance) {
            bad.push("background_luminance".to_string());
        }
        if self.bar_width_deg <= 0.0 {
            bad.push("bar_width_deg".to_string());
        }
        if self.checker_size_deg <= 0.0 {
            bad.push("checker_size_deg".to_string());
        }
        if self.drift_speed_deg_per_sec <= 0.0 {
            bad.push("drift_speed_deg_per_sec".to_string());
        }
        if bad.is_empty() {
            Ok(())
        } else {
            bad.sort();
            bad.dedup();
            Err(bad)
        }
    }
}

/// Sweep-sequence parameters. Persistent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParams {
    pub directions: Vec<Direction>,
    pub cycles: u32,
    pub baseline_sec: f64,
    pub between_sec: f64,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        AcquisitionParams {
            directions: vec![Direction::Lr, Direction::Rl, Direction::Tb, Direction::Bt],
            cycles: 10,
            baseline_sec: 5.0,
            between_sec: 5.0,
        }
    }
}

impl AcquisitionParams {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut bad = Vec::new();
        if self.cycles < 1 {
            bad.push("cycles".to_string());
        }
        if self.baseline_sec < 0.0 {
            bad.push("baseline_sec".to_string());
        }
        if self.between_sec < 0.0 {
            bad.push("between_sec".to_string());
        }
        if bad.is_empty() { Ok(()) } else { Err(bad) }
    }
}

/// Analysis tunables. Persistent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    pub magnitude_threshold: f64,
    pub smoothing_sigma: f64,
    pub phase_filter_sigma: f64,
    pub gradient_window_size: u32,
    pub vfs_threshold: f64,
    pub median_filter_size: u32,
    pub min_area_pixels: u32,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        AnalysisParams {
            magnitude_threshold: 0.1,
            smoothing_sigma: 1.0,
            phase_filter_sigma: 1.0,
            gradient_window_size: 3,
            vfs_threshold: 0.95,
            median_filter_size: 3,
            min_area_pixels: 100,
        }
    }
}

impl AnalysisParams {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut bad = Vec::new();
        if !(0.0..=1.0).contains(&self.vfs_threshold) {
            bad.push("vfs_threshold".to_string());
        }
        if self.smoothing_sigma < 0.0 {
            bad.push("smoothing_sigma".to_string());
        }
        if self.phase_filter_sigma < 0.0 {
            bad.push("phase_filter_sigma".to_string());
        }
        if bad.is_empty() { Ok(()) } else { Err(bad) }
    }
}

/// The complete current-parameter document, mirroring `spec.md` §3.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterGroups {
    pub monitor: MonitorParams,
    pub camera: CameraParams,
    pub stimulus: StimulusParams,
    pub acquisition: AcquisitionParams,
    pub analysis: AnalysisParams,
}

impl Default for ParameterGroups {
    fn default() -> Self {
        ParameterGroups {
            monitor: MonitorParams::default(),
            camera: CameraParams::default(),
            stimulus: StimulusParams::default(),
            acquisition: AcquisitionParams::default(),
            analysis: AnalysisParams::default(),
        }
    }
}

/// Group names this store recognizes; used to reject unknown groups.
pub const GROUP_NAMES: [&str; 5] =
    ["monitor", "camera", "stimulus", "acquisition", "analysis"];

/// Groups that are hardware-detected at startup and never persisted.
pub const VOLATILE_GROUPS: [&str; 2] = ["monitor", "camera"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stimulus_rejects_contrast_above_background() {
        let mut p = StimulusParams::default();
        p.background_luminance = 0.3;
        p.contrast = 0.5;
        let err = p.validate().unwrap_err();
        assert!(err.contains(&"background_luminance".to_string()));
        assert!(err.contains(&"contrast".to_string()));
    }

    #[test]
    fn stimulus_accepts_equal_contrast_and_background() {
        let mut p = StimulusParams::default();
        p.background_luminance = 0.5;
        p.contrast = 0.5;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn direction_round_trips_display_and_parse() {
        for d in [Direction::Lr, Direction::Rl, Direction::Tb, Direction::Bt] {
            assert_eq!(Direction::parse(&d.to_string()), Some(d));
        }
    }
}
