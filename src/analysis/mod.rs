//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! `AnalysisPipeline`: the offline analytical core (`spec.md` §4.7).
//! Reads a published session, runs per-pixel Fourier analysis per
//! direction, combines forward/reverse sweeps into retinotopy maps,
//! derives the visual-field sign, segments visual areas, and persists
//! the whole `AnalysisResult` as named arrays plus a JSON summary.
//!

pub mod bidirectional;
pub mod boundary;
pub mod fourier;
pub mod vfs;

use crate::error::{AnalysisError, SessionError};
use crate::geometry::MonitorGeometry;
use crate::parameters::schema::Direction;
use crate::render;
use crate::session::{self, npy, DirectionSummary};
use boundary::AreaProperties;
use fourier::PhaseMagnitudeMap;
use std::collections::HashMap;
use std::path::Path;

/// The analytical output for one session, `spec.md` §3/§6.
pub struct AnalysisResult {
    pub width: usize,
    pub height: usize,
    pub phase_maps: HashMap<Direction, PhaseMagnitudeMap>,
    pub azimuth_map: Option<Vec<f64>>,
    pub elevation_map: Option<Vec<f64>>,
    pub raw_vfs_map: Option<Vec<i8>>,
    pub statistical_vfs_map: Option<Vec<i8>>,
    pub boundary_map: Option<Vec<bool>>,
    pub area_labels: Option<Vec<u32>>,
    pub areas: Vec<AreaProperties>,
    /// Fraction of pixels whose combined magnitude clears
    /// `analysis.magnitude_threshold`. `spec.md` §4.7.5: below 10% is
    /// flagged (via `low_reliability`), not fatal.
    pub reliable_pixel_fraction: Option<f64>,
    pub low_reliability: bool,
    pub sync_quality: HashMap<Direction, Option<f64>>,
}

fn check_finite(values: &[f64], label: &str) -> Result<(), AnalysisError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::NonFinite(label.to_string()));
    }
    Ok(())
}

/// Elementwise mean of whichever direction magnitude maps are present;
/// used both for the reliable-pixel-fraction metric and as the
/// per-area `mean_magnitude` input, since `spec.md` does not name a
/// single direction as authoritative for either.
fn combined_magnitude(phase_maps: &HashMap<Direction, PhaseMagnitudeMap>, len: usize) -> Vec<f64> {
    let mut sum = vec![0f64; len];
    let mut count = vec![0u32; len];
    for map in phase_maps.values() {
        for (i, &m) in map.magnitude.iter().enumerate() {
            sum[i] += m;
            count[i] += 1;
        }
    }
    sum.iter()
        .zip(count.iter())
        .map(|(&s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect()
}

/// Runs the full pipeline over a published session directory.
pub fn run(session_dir: &Path) -> Result<AnalysisResult, AnalysisError> {
    let loaded = session::load_metadata(session_dir)?;
    let cycles = loaded.parameters.acquisition.cycles;
    let analysis_params = loaded.parameters.analysis.clone();

    let mut phase_maps: HashMap<Direction, PhaseMagnitudeMap> = HashMap::new();
    let mut sync_quality: HashMap<Direction, Option<f64>> = HashMap::new();
    let mut width = 0usize;
    let mut height = 0usize;

    for &direction in &loaded.directions {
        let data = session::load_direction(session_dir, direction)?;
        if data.frames.is_empty() {
            log::warn!("AnalysisPipeline: direction {direction} has no recorded frames; skipping");
            continue;
        }
        let map = fourier::compute_phase_magnitude_map(&data.frames, cycles)?;
        width = map.width;
        height = map.height;
        phase_maps.insert(direction, map);

        let quality = loaded
            .per_direction
            .get(&direction)
            .and_then(|summary: &DirectionSummary| summary.sync_quality);
        sync_quality.insert(direction, quality);
    }

    let geometry = MonitorGeometry::compute(&loaded.parameters.monitor);

    let azimuth_map = match (phase_maps.get(&Direction::Lr), phase_maps.get(&Direction::Rl)) {
        (Some(lr), Some(rl)) => {
            let combined = bidirectional::combine_maps(&lr.phase, &rl.phase)?;
            Some(bidirectional::scale_azimuth(&combined, &geometry))
        }
        _ => {
            log::info!("AnalysisPipeline: LR/RL pair incomplete; azimuth_map absent");
            None
        }
    };

    let elevation_map = match (phase_maps.get(&Direction::Tb), phase_maps.get(&Direction::Bt)) {
        (Some(tb), Some(bt)) => {
            let combined = bidirectional::combine_maps(&tb.phase, &bt.phase)?;
            Some(bidirectional::scale_elevation(&combined, &geometry))
        }
        _ => {
            log::info!("AnalysisPipeline: TB/BT pair incomplete; elevation_map absent");
            None
        }
    };

    let mut raw_vfs_map = None;
    let mut statistical_vfs_map = None;
    let mut boundary_map = None;
    let mut area_labels = None;
    let mut areas = Vec::new();

    if let (Some(az), Some(el)) = (&azimuth_map, &elevation_map) {
        let vfs_result = vfs::compute(
            az,
            el,
            width,
            height,
            analysis_params.median_filter_size,
            analysis_params.smoothing_sigma,
            analysis_params.vfs_threshold,
        );
        check_finite(&vfs_result.jacobian, "jacobian")?;

        let magnitude = combined_magnitude(&phase_maps, width * height);
        let segmentation = boundary::segment(
            &vfs_result.statistical_vfs,
            &magnitude,
            width,
            height,
            analysis_params.min_area_pixels,
        );

        raw_vfs_map = Some(vfs_result.raw_vfs);
        statistical_vfs_map = Some(vfs_result.statistical_vfs);
        boundary_map = Some(segmentation.boundary_map);
        area_labels = Some(segmentation.area_labels);
        areas = segmentation.areas;
    } else {
        log::info!("AnalysisPipeline: azimuth/elevation incomplete; visual-field sign skipped");
    }

    let (reliable_pixel_fraction, low_reliability) = if width * height > 0 && !phase_maps.is_empty() {
        let magnitude = combined_magnitude(&phase_maps, width * height);
        let reliable = magnitude.iter().filter(|&&m| m >= analysis_params.magnitude_threshold).count();
        let fraction = reliable as f64 / magnitude.len() as f64;
        if fraction < 0.10 {
            log::warn!(
                "AnalysisPipeline: only {:.1}% of pixels clear the magnitude threshold \
                 (below the 10% reliability quorum); result is not discarded",
                fraction * 100.0
            );
        }
        (Some(fraction), fraction < 0.10)
    } else {
        (None, false)
    };

    Ok(AnalysisResult {
        width,
        height,
        phase_maps,
        azimuth_map,
        elevation_map,
        raw_vfs_map,
        statistical_vfs_map,
        boundary_map,
        area_labels,
        areas,
        reliable_pixel_fraction,
        low_reliability,
        sync_quality,
    })
}

#[derive(serde::Serialize)]
struct Summary {
    width: usize,
    height: usize,
    directions: Vec<Direction>,
    reliable_pixel_fraction: Option<f64>,
    low_reliability: bool,
    sync_quality: HashMap<Direction, Option<f64>>,
    areas: Vec<AreaProperties>,
}

/// Persists `result` under `output_dir` as named `.npy` arrays (one
/// phase/magnitude pair per recorded direction, plus the derived maps
/// present) and a `summary.json`, per `spec.md` §6.
pub fn persist(result: &AnalysisResult, output_dir: &Path) -> Result<(), AnalysisError> {
    std::fs::create_dir_all(output_dir).map_err(|e| AnalysisError::Session(SessionError::Io(e.to_string())))?;
    let io_err = |e: std::io::Error| AnalysisError::Session(SessionError::Io(e.to_string()));

    for (direction, map) in &result.phase_maps {
        npy::write_f64_2d(
            &output_dir.join(format!("{direction}_phase.npy")),
            &map.phase,
            map.height,
            map.width,
        )
        .map_err(io_err)?;
        npy::write_f64_2d(
            &output_dir.join(format!("{direction}_magnitude.npy")),
            &map.magnitude,
            map.height,
            map.width,
        )
        .map_err(io_err)?;
    }

    if let Some(azimuth) = &result.azimuth_map {
        npy::write_f64_2d(&output_dir.join("azimuth_map.npy"), azimuth, result.height, result.width)
            .map_err(io_err)?;
        render::phase_to_cyclic_rgb(azimuth, result.width, result.height)
            .save(output_dir.join("azimuth_map.png"))
            .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    }
    if let Some(elevation) = &result.elevation_map {
        npy::write_f64_2d(&output_dir.join("elevation_map.npy"), elevation, result.height, result.width)
            .map_err(io_err)?;
        render::phase_to_cyclic_rgb(elevation, result.width, result.height)
            .save(output_dir.join("elevation_map.png"))
            .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    }
    if let Some(raw_vfs) = &result.raw_vfs_map {
        let as_f64: Vec<f64> = raw_vfs.iter().map(|&s| s as f64).collect();
        npy::write_f64_2d(&output_dir.join("raw_vfs_map.npy"), &as_f64, result.height, result.width)
            .map_err(io_err)?;
        render::vfs_to_diverging_rgb(raw_vfs, result.width, result.height)
            .save(output_dir.join("raw_vfs_map.png"))
            .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    }
    if let Some(statistical_vfs) = &result.statistical_vfs_map {
        let as_f64: Vec<f64> = statistical_vfs.iter().map(|&s| s as f64).collect();
        npy::write_f64_2d(&output_dir.join("statistical_vfs_map.npy"), &as_f64, result.height, result.width)
            .map_err(io_err)?;
        render::vfs_to_diverging_rgb(statistical_vfs, result.width, result.height)
            .save(output_dir.join("statistical_vfs_map.png"))
            .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    }
    if let Some(boundary) = &result.boundary_map {
        let as_f64: Vec<f64> = boundary.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect();
        npy::write_f64_2d(&output_dir.join("boundary_map.npy"), &as_f64, result.height, result.width)
            .map_err(io_err)?;
    }
    if let Some(labels) = &result.area_labels {
        let as_f64: Vec<f64> = labels.iter().map(|&l| l as f64).collect();
        npy::write_f64_2d(&output_dir.join("area_labels.npy"), &as_f64, result.height, result.width)
            .map_err(io_err)?;
    }
    for (direction, map) in &result.phase_maps {
        render::magnitude_to_grayscale(&map.magnitude, map.width, map.height)
            .save(output_dir.join(format!("{direction}_magnitude.png")))
            .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    }

    let summary = Summary {
        width: result.width,
        height: result.height,
        directions: result.phase_maps.keys().copied().collect(),
        reliable_pixel_fraction: result.reliable_pixel_fraction,
        low_reliability: result.low_reliability,
        sync_quality: result.sync_quality.clone(),
        areas: result.areas.clone(),
    };
    let text = serde_json::to_string_pretty(&summary).expect("analysis summary always serializes");
    std::fs::write(output_dir.join("summary.json"), text).map_err(io_err)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, PixelDepth};
    use crate::parameters::schema::ParameterGroups;
    use crate::sync::SyncRecord;

    fn sinusoid_frames(n: usize, width: u32, height: u32, cycles: f64, phase: f64) -> Vec<Frame> {
        (0..n)
            .map(|t| {
                let value = 128.0
                    + 64.0 * (2.0 * std::f64::consts::PI * cycles * t as f64 / n as f64 + phase).cos();
                let mut frame = Frame::new(width, height, PixelDepth::Eight);
                for y in 0..height {
                    for x in 0..width {
                        frame.set(x, y, value.round() as u16);
                    }
                }
                frame
            })
            .collect()
    }

    fn write_session(base: &Path, session_id: &str, directions: &[Direction]) {
        let recorder = session::SessionRecorder::start(
            base,
            session_id,
            6,
            6,
            PixelDepth::Eight,
            directions,
            ParameterGroups::default(),
        )
        .unwrap();

        let n = 60;
        for &direction in directions {
            let frames = sinusoid_frames(n, 6, 6, 5.0, 0.0);
            let merged: Vec<SyncRecord> = (0..n)
                .map(|i| SyncRecord {
                    direction,
                    cycle: 1,
                    stimulus_frame_index: i as u32,
                    stimulus_angle_deg: i as f64,
                    camera_frame_index: i as u32,
                    camera_hw_timestamp_us: i as u64 * 1000,
                })
                .collect();
            for frame in frames {
                recorder.record_frame(direction, frame);
            }
            recorder.finalize_direction(direction, merged, 0, Some(5.0));
        }
        recorder.close(false).unwrap();
    }

    #[test]
    fn pipeline_runs_end_to_end_on_all_four_directions() {
        let base = std::env::temp_dir()
            .join(format!("isi-core-analysis-test-{}", std::process::id()));
        std::fs::create_dir_all(&base).unwrap();
        let directions = [Direction::Lr, Direction::Rl, Direction::Tb, Direction::Bt];
        write_session(&base, "sess-full", &directions);

        let result = run(&base.join("sess-full")).unwrap();
        assert_eq!(result.width, 6);
        assert_eq!(result.height, 6);
        assert!(result.azimuth_map.is_some());
        assert!(result.elevation_map.is_some());
        assert!(result.raw_vfs_map.is_some());

        let out_dir = base.join("sess-full-analysis");
        persist(&result, &out_dir).unwrap();
        assert!(out_dir.join("summary.json").exists());
        assert!(out_dir.join("azimuth_map.npy").exists());

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn missing_axis_leaves_that_map_absent_without_failing() {
        let base = std::env::temp_dir()
            .join(format!("isi-core-analysis-partial-test-{}", std::process::id()));
        std::fs::create_dir_all(&base).unwrap();
        let directions = [Direction::Lr, Direction::Rl];
        write_session(&base, "sess-partial", &directions);

        let result = run(&base.join("sess-partial")).unwrap();
        assert!(result.azimuth_map.is_some());
        assert!(result.elevation_map.is_none());
        assert!(result.raw_vfs_map.is_none());

        let _ = std::fs::remove_dir_all(&base);
    }
}
