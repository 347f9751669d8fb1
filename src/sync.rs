//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! `SyncTracker`: append-only per-direction log of stimulus/camera
//! timing events, and the merge step that pairs them.
//!
//! Grounded on the teacher's `workers::capture` producer discipline
//! (a single ingest thread serializes camera arrivals; the log here
//! adds a second, independent producer for stimulus presentation
//! events and merges the two after the fact).
//!

use crate::parameters::schema::Direction;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// One paired observation, `spec.md` §3.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncRecord {
    pub direction: Direction,
    pub cycle: u32,
    pub stimulus_frame_index: u32,
    pub stimulus_angle_deg: f64,
    pub camera_frame_index: u32,
    pub camera_hw_timestamp_us: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct StimulusEvent {
    frame_index: u32,
    angle_deg: f64,
    presentation_timestamp_us: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct CameraEvent {
    frame_index: u32,
    hw_timestamp_us: u64,
}

#[derive(Default)]
struct DirectionLog {
    cycle: u32,
    stimulus: Vec<StimulusEvent>,
    camera: Vec<CameraEvent>,
}

pub struct SyncTracker {
    logs: Mutex<HashMap<Direction, DirectionLog>>,
}

impl SyncTracker {
    pub fn new() -> SyncTracker {
        SyncTracker { logs: Mutex::new(HashMap::new()) }
    }

    /// Resets the log for `direction` to start a fresh cycle. Prior
    /// records for the direction, if unmerged, are discarded — callers
    /// are expected to have called `merge` already if they wanted them.
    pub fn begin_direction(&self, direction: Direction, cycle: u32) {
        let mut logs = self.logs.lock().unwrap();
        logs.insert(direction, DirectionLog { cycle, stimulus: Vec::new(), camera: Vec::new() });
    }

    /// Records a stimulus presentation. `presentation_timestamp_us`, when
    /// `Some`, comes from the display subsystem's VSYNC callback; when
    /// `None`, this falls back to wall-clock time at the submit moment
    /// and logs the substitution (`spec.md` §4.4 "timestamp_source").
    pub fn record_stimulus(
        &self,
        direction: Direction,
        frame_index: u32,
        angle_deg: f64,
        presentation_timestamp_us: Option<u64>,
    ) {
        let timestamp = presentation_timestamp_us.unwrap_or_else(|| {
            log::warn!(
                "SyncTracker::record_stimulus: no display-subsystem timestamp for frame {frame_index}; \
                 falling back to wall-clock (timestamp_source=wall_clock)"
            );
            wall_clock_us()
        });

        let mut logs = self.logs.lock().unwrap();
        if let Some(log_entry) = logs.get_mut(&direction) {
            log_entry.stimulus.push(StimulusEvent {
                frame_index,
                angle_deg,
                presentation_timestamp_us: timestamp,
            });
        } else {
            log::warn!(
                "SyncTracker::record_stimulus: direction {direction} has no active log; dropping event"
            );
        }
    }

    pub fn record_camera(&self, direction: Direction, frame_index: u32, hw_timestamp_us: u64) {
        let mut logs = self.logs.lock().unwrap();
        if let Some(log_entry) = logs.get_mut(&direction) {
            log_entry.camera.push(CameraEvent { frame_index, hw_timestamp_us });
        } else {
            log::warn!(
                "SyncTracker::record_camera: direction {direction} has no active log; dropping event"
            );
        }
    }

    /// Pairs each camera frame with the most-recent stimulus frame whose
    /// presentation timestamp is `<=` the camera's hardware timestamp.
    /// Camera frames preceding the first stimulus frame are dropped.
    /// Intended to run after the direction is quiescent (post
    /// `finalize_direction`).
    pub fn merge(&self, direction: Direction) -> Vec<SyncRecord> {
        let logs = self.logs.lock().unwrap();
        let Some(log_entry) = logs.get(&direction) else { return Vec::new() };

        if log_entry.stimulus.is_empty() {
            return Vec::new();
        }

        let mut records = Vec::with_capacity(log_entry.camera.len());
        let mut stim_index = 0usize;

        for camera in &log_entry.camera {
            while stim_index + 1 < log_entry.stimulus.len()
                && log_entry.stimulus[stim_index + 1].presentation_timestamp_us
                    <= camera.hw_timestamp_us
            {
                stim_index += 1;
            }

            let first = &log_entry.stimulus[0];
            if camera.hw_timestamp_us < first.presentation_timestamp_us {
                continue;
            }

            let stim = &log_entry.stimulus[stim_index];
            records.push(SyncRecord {
                direction,
                cycle: log_entry.cycle,
                stimulus_frame_index: stim.frame_index,
                stimulus_angle_deg: stim.angle_deg,
                camera_frame_index: camera.frame_index,
                camera_hw_timestamp_us: camera.hw_timestamp_us,
            });
        }

        records
    }

    /// Mean absolute residual, in microseconds, between each merged
    /// camera frame's hardware timestamp and its paired stimulus
    /// frame's presentation timestamp — the crate's `sync_quality`
    /// metric, computed from real records rather than simulated.
    pub fn sync_quality(&self, direction: Direction) -> Option<f64> {
        let logs = self.logs.lock().unwrap();
        let log_entry = logs.get(&direction)?;
        if log_entry.stimulus.is_empty() || log_entry.camera.is_empty() {
            return None;
        }

        let merged = {
            drop(logs);
            self.merge(direction)
        };
        if merged.is_empty() {
            return None;
        }

        let logs = self.logs.lock().unwrap();
        let log_entry = logs.get(&direction)?;
        let stim_by_frame: HashMap<u32, u64> = log_entry
            .stimulus
            .iter()
            .map(|s| (s.frame_index, s.presentation_timestamp_us))
            .collect();

        let mut total = 0f64;
        let mut count = 0usize;
        for record in &merged {
            if let Some(&stim_ts) = stim_by_frame.get(&record.stimulus_frame_index) {
                let residual =
                    (record.camera_hw_timestamp_us as i128 - stim_ts as i128).unsigned_abs();
                total += residual as f64;
                count += 1;
            }
        }

        if count == 0 { None } else { Some(total / count as f64) }
    }
}

impl Default for SyncTracker {
    fn default() -> Self { SyncTracker::new() }
}

pub fn wall_clock_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or(0)
}
