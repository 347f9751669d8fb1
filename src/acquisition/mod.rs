//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! `AcquisitionCoordinator`: drives the four-direction sweep state
//! machine (`spec.md` §4.5), coordinating `StimulusEngine`,
//! `SyncTracker`, and `SessionRecorder`.
//!
//! Grounded on the teacher's `workers::capture`/`workers::recording`
//! split (one thread drives frame production, another consumes and
//! writes), generalized from "record whatever the camera yields" to
//! the full baseline/sweep/between cycle. Unlike the teacher, which
//! keeps coordination state implicit in thread-local locals, this
//! module exposes it as an explicit `Phase` enum so `ControlPlane` can
//! query and report it.
//!

use crate::error::{AcquisitionError, EngineError};
use crate::frame::Frame;
use crate::parameters::schema::{AcquisitionParams, Direction, MonitorParams, ParameterGroups, StimulusParams};
use crate::session::SessionRecorder;
use crate::stimulus::StimulusEngine;
use crate::sync::SyncTracker;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const CAMERA_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preparing,
    BaselinePre,
    Sweeping,
    Between,
    BaselinePost,
    Finalizing,
    Aborting,
}

/// Snapshot of coordinator state, safe to hand to `ControlPlane` for a
/// status response.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub direction: Option<Direction>,
    pub cycle: u32,
    pub frame_index: u32,
    pub frames_per_sweep: u32,
}

/// One rendered stimulus frame, handed by the render/present thread to
/// the display surface; `stimulus_frame_index` is recorded into
/// `SyncTracker` by the caller once VSYNC confirms presentation.
pub struct RenderedFrame {
    pub direction: Direction,
    pub frame: Frame,
    pub angle_deg: f64,
    pub stimulus_frame_index: u32,
}

struct Inner {
    phase: Phase,
    directions: Vec<Direction>,
    direction_idx: usize,
    cycle: u32,
    cycles_total: u32,
    baseline_sec: f64,
    between_sec: f64,
    phase_started_at: Instant,
    frame_index: u32,
    frames_per_sweep: u32,
    last_camera_frame_at: Instant,
    missed_frames: HashMap<Direction, u32>,
    recorder: Option<SessionRecorder>,
    partial: bool,
}

pub struct AcquisitionCoordinator {
    inner: Mutex<Inner>,
    stimulus: std::sync::Arc<StimulusEngine>,
    sync: std::sync::Arc<SyncTracker>,
}

impl AcquisitionCoordinator {
    pub fn new(stimulus: std::sync::Arc<StimulusEngine>, sync: std::sync::Arc<SyncTracker>) -> Self {
        AcquisitionCoordinator {
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                directions: Vec::new(),
                direction_idx: 0,
                cycle: 0,
                cycles_total: 0,
                baseline_sec: 0.0,
                between_sec: 0.0,
                phase_started_at: Instant::now(),
                frame_index: 0,
                frames_per_sweep: 0,
                last_camera_frame_at: Instant::now(),
                missed_frames: HashMap::new(),
                recorder: None,
                partial: false,
            }),
            stimulus,
            sync,
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let inner = self.inner.lock().unwrap();
        StatusSnapshot {
            phase: inner.phase,
            direction: inner.directions.get(inner.direction_idx).copied(),
            cycle: inner.cycle,
            frame_index: inner.frame_index,
            frames_per_sweep: inner.frames_per_sweep,
        }
    }

    /// `spec.md` §5: parameter changes to `monitor`/`stimulus` while not
    /// `IDLE` are rejected.
    pub fn rejects_parameter_change(&self, group: &str) -> bool {
        if group != "monitor" && group != "stimulus" {
            return false;
        }
        self.inner.lock().unwrap().phase != Phase::Idle
    }

    pub fn start(
        &self,
        acquisition: &AcquisitionParams,
        monitor: &MonitorParams,
        stimulus_params: &StimulusParams,
        session_base_dir: &Path,
        session_id: &str,
        camera_width: u32,
        camera_height: u32,
        camera_depth: crate::frame::PixelDepth,
        parameters_snapshot: ParameterGroups,
    ) -> Result<(), AcquisitionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase != Phase::Idle {
            return Err(AcquisitionError::NotIdle);
        }
        inner.phase = Phase::Preparing;

        self.stimulus.configure(monitor, stimulus_params);
        let first_direction = *acquisition
            .directions
            .first()
            .ok_or(AcquisitionError::Engine(EngineError::BadDirection("no directions configured".into())))?;
        let frames_per_sweep = self
            .stimulus
            .frames_per_sweep(first_direction)
            .map_err(AcquisitionError::Engine)?;

        let recorder = SessionRecorder::start(
            session_base_dir,
            session_id,
            camera_width,
            camera_height,
            camera_depth,
            &acquisition.directions,
            parameters_snapshot,
        )
        .map_err(AcquisitionError::Session)?;

        inner.directions = acquisition.directions.clone();
        inner.direction_idx = 0;
        inner.cycle = 1;
        inner.cycles_total = acquisition.cycles;
        inner.baseline_sec = acquisition.baseline_sec;
        inner.between_sec = acquisition.between_sec;
        inner.frame_index = 0;
        inner.frames_per_sweep = frames_per_sweep;
        inner.missed_frames.clear();
        inner.recorder = Some(recorder);
        inner.partial = false;
        inner.last_camera_frame_at = Instant::now();

        self.sync.begin_direction(first_direction, 1);
        inner.phase = Phase::BaselinePre;
        inner.phase_started_at = Instant::now();
        Ok(())
    }

    /// Requests a stop. Transitions through `ABORTING` to `IDLE`,
    /// finalizing the active session with `partial = true`.
    pub fn stop(&self) -> Result<(), AcquisitionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase == Phase::Idle {
            return Err(AcquisitionError::AlreadyIdle);
        }
        inner.phase = Phase::Aborting;
        inner.partial = true;
        self.finalize_to_idle(&mut inner)
    }

    /// Advances time-based phases and checks the camera-timeout fatal
    /// condition. Intended to be polled regularly (e.g. once per render
    /// loop iteration) by the render/present thread.
    pub fn tick(&self, now: Instant) -> Result<(), AcquisitionError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.phase == Phase::Sweeping && now.duration_since(inner.last_camera_frame_at) > CAMERA_TIMEOUT
        {
            inner.phase = Phase::Aborting;
            inner.partial = true;
            return self.finalize_to_idle(&mut inner);
        }

        match inner.phase {
            Phase::BaselinePre => {
                if now.duration_since(inner.phase_started_at).as_secs_f64() >= inner.baseline_sec {
                    inner.phase = Phase::Sweeping;
                    inner.phase_started_at = now;
                    inner.frame_index = 0;
                }
            }
            Phase::Between => {
                if now.duration_since(inner.phase_started_at).as_secs_f64() >= inner.between_sec {
                    inner.cycle += 1;
                    if inner.cycle <= inner.cycles_total {
                        inner.phase = Phase::Sweeping;
                        inner.frame_index = 0;
                    } else {
                        let completed_direction = inner.directions[inner.direction_idx];
                        let sync_quality = self.sync.sync_quality(completed_direction);
                        let merged = self.sync.merge(completed_direction);
                        let missed =
                            inner.missed_frames.get(&completed_direction).copied().unwrap_or(0);
                        if let Some(recorder) = inner.recorder.as_ref() {
                            recorder.finalize_direction(completed_direction, merged, missed, sync_quality);
                        }

                        inner.direction_idx += 1;
                        inner.cycle = 1;
                        if inner.direction_idx < inner.directions.len() {
                            let direction = inner.directions[inner.direction_idx];
                            let frames_per_sweep = self
                                .stimulus
                                .frames_per_sweep(direction)
                                .map_err(AcquisitionError::Engine)?;
                            inner.frames_per_sweep = frames_per_sweep;
                            self.sync.begin_direction(direction, 1);
                            inner.phase = Phase::BaselinePre;
                        } else {
                            inner.phase = Phase::BaselinePost;
                        }
                    }
                    inner.phase_started_at = now;
                }
            }
            Phase::BaselinePost => {
                if now.duration_since(inner.phase_started_at).as_secs_f64() >= inner.baseline_sec {
                    inner.phase = Phase::Finalizing;
                    return self.finalize_to_idle(&mut inner);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Renders and returns the next stimulus frame while `SWEEPING`;
    /// `None` otherwise. Advances the internal frame cursor and, once
    /// the direction's sweep completes, transitions to `BETWEEN`.
    pub fn render_next_frame(&self) -> Result<Option<RenderedFrame>, AcquisitionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase != Phase::Sweeping {
            return Ok(None);
        }
        let direction = inner.directions[inner.direction_idx];
        let frame_index = inner.frame_index;
        let total = inner.frames_per_sweep;

        let angle = self
            .stimulus
            .angle_at(direction, frame_index, total)
            .map_err(AcquisitionError::Engine)?;
        let frame = self
            .stimulus
            .render(direction, frame_index, true)
            .map_err(AcquisitionError::Engine)?;

        inner.frame_index += 1;
        if inner.frame_index >= total {
            inner.phase = Phase::Between;
            inner.phase_started_at = Instant::now();
        }

        Ok(Some(RenderedFrame { direction, frame, angle_deg: angle, stimulus_frame_index: frame_index }))
    }

    /// Called by the render thread once the display subsystem confirms
    /// presentation (or immediately, with a wall-clock fallback).
    pub fn confirm_presentation(&self, rendered: &RenderedFrame, presentation_timestamp_us: Option<u64>) {
        self.sync.record_stimulus(
            rendered.direction,
            rendered.stimulus_frame_index,
            rendered.angle_deg,
            presentation_timestamp_us,
        );
    }

    /// Called by the camera-ingest thread for every incoming frame.
    pub fn on_camera_frame(&self, direction: Direction, frame_index: u32, hw_timestamp_us: u64, frame: Frame) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.last_camera_frame_at = Instant::now();
            if let Some(recorder) = inner.recorder.as_ref() {
                recorder.record_frame(direction, frame);
            }
        }
        self.sync.record_camera(direction, frame_index, hw_timestamp_us);
    }

    /// Records a missed VSYNC deadline (`spec.md` §4.5 tie-break
    /// policy): `(direction, intended_index, actual_index)` is logged
    /// by the caller; this just keeps the per-direction counter that
    /// ends up in `SessionRecorder`'s metadata.
    pub fn record_missed_frame(&self, direction: Direction) {
        let mut inner = self.inner.lock().unwrap();
        *inner.missed_frames.entry(direction).or_insert(0) += 1;
    }

    fn finalize_to_idle(&self, inner: &mut Inner) -> Result<(), AcquisitionError> {
        if let Some(recorder) = inner.recorder.take() {
            // Finalize whichever direction is still open; directions
            // already completed earlier in the sweep were finalized as
            // each one's BETWEEN/BASELINE_PRE transition fired.
            if let Some(&direction) = inner.directions.get(inner.direction_idx) {
                let sync_quality = self.sync.sync_quality(direction);
                let merged = self.sync.merge(direction);
                let missed = inner.missed_frames.get(&direction).copied().unwrap_or(0);
                recorder.finalize_direction(direction, merged, missed, sync_quality);
            }
            recorder.close(inner.partial).map_err(AcquisitionError::Session)?;
        }
        inner.phase = Phase::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelDepth;
    use std::sync::Arc;

    fn coordinator() -> (AcquisitionCoordinator, Arc<StimulusEngine>, Arc<SyncTracker>) {
        let stimulus = Arc::new(StimulusEngine::new());
        let sync = Arc::new(SyncTracker::new());
        let coordinator = AcquisitionCoordinator::new(Arc::clone(&stimulus), Arc::clone(&sync));
        (coordinator, stimulus, sync)
    }

    fn tmp_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("isi-core-acq-test-{name}-{}", std::process::id()))
    }

    #[test]
    fn rejects_starting_when_not_idle() {
        let (coordinator, _stim, _sync) = coordinator();
        let base = tmp_dir("double-start");
        std::fs::create_dir_all(&base).unwrap();
        let acquisition = AcquisitionParams {
            directions: vec![Direction::Lr],
            cycles: 1,
            baseline_sec: 0.0,
            between_sec: 0.0,
        };
        let monitor = MonitorParams { width_px: 16, height_px: 16, ..MonitorParams::default() };
        let stimulus_params = StimulusParams::default();

        coordinator
            .start(
                &acquisition,
                &monitor,
                &stimulus_params,
                &base,
                "s1",
                8,
                8,
                PixelDepth::Eight,
                ParameterGroups::default(),
            )
            .unwrap();

        let err = coordinator
            .start(
                &acquisition,
                &monitor,
                &stimulus_params,
                &base,
                "s2",
                8,
                8,
                PixelDepth::Eight,
                ParameterGroups::default(),
            )
            .unwrap_err();
        assert_eq!(err, AcquisitionError::NotIdle);

        let _ = coordinator.stop();
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn rejects_monitor_and_stimulus_changes_while_active() {
        let (coordinator, _stim, _sync) = coordinator();
        let base = tmp_dir("param-lock");
        std::fs::create_dir_all(&base).unwrap();
        let acquisition = AcquisitionParams {
            directions: vec![Direction::Lr],
            cycles: 1,
            baseline_sec: 0.0,
            between_sec: 0.0,
        };
        coordinator
            .start(
                &acquisition,
                &MonitorParams { width_px: 16, height_px: 16, ..MonitorParams::default() },
                &StimulusParams::default(),
                &base,
                "s1",
                8,
                8,
                PixelDepth::Eight,
                ParameterGroups::default(),
            )
            .unwrap();

        assert!(coordinator.rejects_parameter_change("monitor"));
        assert!(coordinator.rejects_parameter_change("stimulus"));
        assert!(!coordinator.rejects_parameter_change("analysis"));

        let _ = coordinator.stop();
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn full_sweep_of_one_direction_returns_to_idle() {
        let (coordinator, stimulus, _sync) = coordinator();
        let base = tmp_dir("full-sweep");
        std::fs::create_dir_all(&base).unwrap();

        let monitor = MonitorParams { width_px: 8, height_px: 8, ..MonitorParams::default() };
        let stimulus_params = StimulusParams::default();
        let acquisition = AcquisitionParams {
            directions: vec![Direction::Lr],
            cycles: 1,
            baseline_sec: 0.0,
            between_sec: 0.0,
        };

        coordinator
            .start(
                &acquisition,
                &monitor,
                &stimulus_params,
                &base,
                "full",
                8,
                8,
                PixelDepth::Eight,
                ParameterGroups::default(),
            )
            .unwrap();

        let total = stimulus.frames_per_sweep(Direction::Lr).unwrap();

        let now = Instant::now();
        coordinator.tick(now).unwrap(); // BASELINE_PRE -> SWEEPING (baseline_sec = 0)
        assert_eq!(coordinator.status().phase, Phase::Sweeping);

        for _ in 0..total {
            let rendered = coordinator.render_next_frame().unwrap().unwrap();
            coordinator.confirm_presentation(&rendered, Some(1_000));
            coordinator.on_camera_frame(
                rendered.direction,
                rendered.stimulus_frame_index,
                1_000 + rendered.stimulus_frame_index as u64,
                Frame::new(8, 8, PixelDepth::Eight),
            );
        }
        assert_eq!(coordinator.status().phase, Phase::Between);

        coordinator.tick(Instant::now()).unwrap(); // BETWEEN -> BASELINE_POST (only direction, cycle done)
        assert_eq!(coordinator.status().phase, Phase::BaselinePost);

        coordinator.tick(Instant::now()).unwrap(); // BASELINE_POST -> FINALIZING -> IDLE
        assert_eq!(coordinator.status().phase, Phase::Idle);

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn stopping_when_idle_is_an_error() {
        let (coordinator, _stim, _sync) = coordinator();
        assert_eq!(coordinator.stop().unwrap_err(), AcquisitionError::AlreadyIdle);
    }
}
