//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! `SessionRecorder`: per-direction frame/angle/timestamp files plus a
//! metadata manifest, written by a dedicated thread with a bounded
//! queue and counted drops.
//!
//! Grounded on the teacher's `workers::recording` thread (dedicated
//! writer, `Select`-driven loop, finalize-on-end) generalized from a
//! single video stream to the four-direction session layout of
//! `spec.md` §6, and on `workers::capture`'s backpressure policy
//! (count-and-drop rather than block the producer).
//!

mod format;
pub mod npy;

use crate::error::SessionError;
use crate::frame::{Frame, PixelDepth};
use crate::parameters::schema::{Direction, ParameterGroups};
use crate::sync::SyncRecord;
use chrono::{DateTime, Utc};
use format::FrameStreamWriter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const QUEUE_CAPACITY: usize = 256;

enum WriterMsg {
    Frame { direction: Direction, frame: Frame },
    /// Angle/timestamp logs are derived from `SyncTracker::merge`'s
    /// output rather than accumulated per-frame, since the merge only
    /// runs once the direction's log is quiescent (`spec.md` §4.4/§5).
    FinalizeDirection {
        direction: Direction,
        merged: Vec<SyncRecord>,
        missed_frames: u32,
        sync_quality: Option<f64>,
    },
    Shutdown,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DirectionSummary {
    pub frame_count: u32,
    pub dropped_frames: u32,
    pub missed_frames: u32,
    /// Mean absolute stimulus/camera timestamp residual in microseconds
    /// (`SyncTracker::sync_quality`), `None` if too few paired records
    /// to compute one.
    pub sync_quality: Option<f64>,
}

struct DirectionState {
    writer: FrameStreamWriter,
}

#[derive(Serialize, Deserialize)]
struct Metadata {
    session_id: String,
    created_at: DateTime<Utc>,
    directions: Vec<Direction>,
    parameters: ParameterGroups,
    partial: bool,
    per_direction: HashMap<Direction, DirectionSummary>,
}

/// A finalized session read back from disk: `AnalysisPipeline`'s sole
/// input. `SessionRecorder`'s files are immutable once published
/// (`spec.md` §3 ownership), so this is a plain, un-owned read.
pub struct LoadedSession {
    pub session_id: String,
    pub directions: Vec<Direction>,
    pub parameters: ParameterGroups,
    pub partial: bool,
    pub per_direction: HashMap<Direction, DirectionSummary>,
}

pub struct DirectionData {
    pub frames: Vec<Frame>,
    pub angles_deg: Vec<f64>,
    pub hw_timestamps_us: Vec<u64>,
}

/// Reads `metadata.json` from a published session directory.
pub fn load_metadata(session_dir: &Path) -> Result<LoadedSession, SessionError> {
    let text = std::fs::read_to_string(session_dir.join("metadata.json"))
        .map_err(|e| SessionError::Io(e.to_string()))?;
    let metadata: Metadata =
        serde_json::from_str(&text).map_err(|e| SessionError::Io(e.to_string()))?;
    Ok(LoadedSession {
        session_id: metadata.session_id,
        directions: metadata.directions,
        parameters: metadata.parameters,
        partial: metadata.partial,
        per_direction: metadata.per_direction,
    })
}

/// Reads one direction's frame stream, angle log, and timestamp log from
/// a published session directory.
pub fn load_direction(session_dir: &Path, direction: Direction) -> Result<DirectionData, SessionError> {
    let frames = format::read_all(&session_dir.join(format!("{direction}_frames.isif")))
        .map_err(|e| SessionError::Io(e.to_string()))?;
    let angles_deg = npy::read_f64_1d(&session_dir.join(format!("{direction}_angles.npy")))
        .map_err(|e| SessionError::Io(e.to_string()))?;
    let hw_timestamps_us = npy::read_u64_1d(&session_dir.join(format!("{direction}_timestamps.npy")))
        .map_err(|e| SessionError::Io(e.to_string()))?;
    Ok(DirectionData { frames, angles_deg, hw_timestamps_us })
}

/// Owns the staging directory and the writer thread for one session.
/// Re-entrancy is not supported: one recorder per session.
pub struct SessionRecorder {
    session_id: String,
    staging_dir: PathBuf,
    published_dir: PathBuf,
    sender: crossbeam::channel::Sender<WriterMsg>,
    writer_thread: Option<std::thread::JoinHandle<HashMap<Direction, DirectionSummary>>>,
    dropped_frames: Arc<AtomicU64>,
    directions: Vec<Direction>,
    parameters: ParameterGroups,
    closed: bool,
}

impl SessionRecorder {
    pub fn start(
        base_dir: &Path,
        session_id: &str,
        width: u32,
        height: u32,
        depth: PixelDepth,
        directions: &[Direction],
        parameters: ParameterGroups,
    ) -> Result<SessionRecorder, SessionError> {
        let staging_dir = base_dir.join(format!(".staging-{session_id}"));
        std::fs::create_dir_all(&staging_dir).map_err(|e| SessionError::Io(e.to_string()))?;

        let mut directions_state = HashMap::new();
        for &direction in directions {
            let path = staging_dir.join(format!("{direction}_frames.isif"));
            let writer = FrameStreamWriter::create(&path, width, height, depth)
                .map_err(|e| SessionError::Io(e.to_string()))?;
            directions_state.insert(direction, DirectionState { writer });
        }

        let (sender, receiver) = crossbeam::channel::bounded(QUEUE_CAPACITY);
        let staging_for_thread = staging_dir.clone();

        let writer_thread = std::thread::spawn(move || {
            writer_thread_main(receiver, directions_state, staging_for_thread)
        });

        Ok(SessionRecorder {
            session_id: session_id.to_string(),
            staging_dir,
            published_dir: base_dir.join(session_id),
            sender,
            writer_thread: Some(writer_thread),
            dropped_frames: Arc::new(AtomicU64::new(0)),
            directions: directions.to_vec(),
            parameters,
            closed: false,
        })
    }

    /// Enqueues a captured frame for `direction`. If the writer thread's
    /// queue is saturated, the frame is dropped and counted rather than
    /// blocking the caller (`spec.md` §5 backpressure policy).
    pub fn record_frame(&self, direction: Direction, frame: Frame) {
        let msg = WriterMsg::Frame { direction, frame };
        if self.sender.try_send(msg).is_err() {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "SessionRecorder: writer queue saturated for direction {direction}; frame dropped"
            );
        }
    }

    /// Finalizes `direction`'s frame stream and writes its angle/
    /// timestamp logs from `merged` — the output of
    /// `SyncTracker::merge(direction)`, run once the direction's sync
    /// log is quiescent. `sync_quality` is `SyncTracker::sync_quality`
    /// for the same direction, captured before the log is superseded.
    pub fn finalize_direction(
        &self,
        direction: Direction,
        merged: Vec<SyncRecord>,
        missed_frames: u32,
        sync_quality: Option<f64>,
    ) {
        let _ = self.sender.send(WriterMsg::FinalizeDirection {
            direction,
            merged,
            missed_frames,
            sync_quality,
        });
    }

    pub fn dropped_frame_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Writes `metadata.json`, shuts down the writer thread, and
    /// atomically renames the staging directory to its published name.
    /// `partial` should be `true` if the session was aborted.
    pub fn close(mut self, partial: bool) -> Result<PathBuf, SessionError> {
        self.closed = true;
        let _ = self.sender.send(WriterMsg::Shutdown);
        let per_direction = self
            .writer_thread
            .take()
            .expect("writer thread only taken once")
            .join()
            .unwrap_or_default();

        let metadata = Metadata {
            session_id: self.session_id.clone(),
            created_at: Utc::now(),
            directions: self.directions.clone(),
            parameters: self.parameters.clone(),
            partial,
            per_direction,
        };
        let metadata_path = self.staging_dir.join("metadata.json");
        let text = serde_json::to_string_pretty(&metadata)
            .expect("session metadata always serializes");
        std::fs::write(&metadata_path, text).map_err(|e| SessionError::Io(e.to_string()))?;

        std::fs::rename(&self.staging_dir, &self.published_dir)
            .map_err(|e| SessionError::Io(e.to_string()))?;
        Ok(self.published_dir.clone())
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!(
                "SessionRecorder for session '{}' dropped without close(); writer thread left \
                 running until process exit",
                self.session_id
            );
        }
    }
}

fn writer_thread_main(
    receiver: crossbeam::channel::Receiver<WriterMsg>,
    mut directions: HashMap<Direction, DirectionState>,
    staging_dir: PathBuf,
) -> HashMap<Direction, DirectionSummary> {
    let mut summaries = HashMap::new();

    for msg in receiver.iter() {
        match msg {
            WriterMsg::Frame { direction, frame } => {
                if let Some(state) = directions.get_mut(&direction) {
                    if let Err(err) = state.writer.write(&frame) {
                        log::error!("SessionRecorder: frame write failed for {direction}: {err}");
                    }
                }
            }
            WriterMsg::FinalizeDirection { direction, merged, missed_frames, sync_quality } => {
                if let Some(state) = directions.remove(&direction) {
                    let frame_count = match state.writer.finalize() {
                        Ok(count) => count,
                        Err(err) => {
                            log::error!(
                                "SessionRecorder: finalize failed for {direction}: {err}"
                            );
                            merged.len() as u32
                        }
                    };

                    let angles: Vec<f64> = merged.iter().map(|r| r.stimulus_angle_deg).collect();
                    let timestamps: Vec<u64> =
                        merged.iter().map(|r| r.camera_hw_timestamp_us).collect();

                    let angles_path = staging_dir.join(format!("{direction}_angles.npy"));
                    if let Err(err) = npy::write_f64_1d(&angles_path, &angles) {
                        log::error!("SessionRecorder: writing angle log for {direction}: {err}");
                    }
                    let timestamps_path = staging_dir.join(format!("{direction}_timestamps.npy"));
                    if let Err(err) = npy::write_u64_1d(&timestamps_path, &timestamps) {
                        log::error!(
                            "SessionRecorder: writing timestamp log for {direction}: {err}"
                        );
                    }

                    summaries.insert(
                        direction,
                        DirectionSummary { frame_count, dropped_frames: 0, missed_frames, sync_quality },
                    );
                }
            }
            WriterMsg::Shutdown => break,
        }
    }

    // Any direction never explicitly finalized (e.g. the session was
    // aborted before reaching FINALIZING for it) still gets flushed so
    // the frame-count header is patched, just with no angle/timestamp
    // logs recorded for it.
    for (direction, state) in directions {
        if let Ok(frame_count) = state.writer.finalize() {
            summaries.insert(
                direction,
                DirectionSummary {
                    frame_count,
                    dropped_frames: 0,
                    missed_frames: 0,
                    sync_quality: None,
                },
            );
        }
    }

    summaries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_writes_frames_angles_timestamps_and_metadata() {
        let base = std::env::temp_dir().join(format!("isi-core-session-test-{}", std::process::id()));
        std::fs::create_dir_all(&base).unwrap();

        let recorder = SessionRecorder::start(
            &base,
            "sess1",
            4,
            4,
            PixelDepth::Eight,
            &[Direction::Lr],
            ParameterGroups::default(),
        )
        .unwrap();

        for _ in 0..3 {
            recorder.record_frame(Direction::Lr, Frame::new(4, 4, PixelDepth::Eight));
        }
        let merged: Vec<SyncRecord> = (0..3)
            .map(|i| SyncRecord {
                direction: Direction::Lr,
                cycle: 1,
                stimulus_frame_index: i,
                stimulus_angle_deg: i as f64,
                camera_frame_index: i,
                camera_hw_timestamp_us: i as u64 * 100,
            })
            .collect();
        recorder.finalize_direction(Direction::Lr, merged, 0, Some(0.0));
        let published = recorder.close(false).unwrap();

        assert!(published.join("metadata.json").exists());
        assert!(published.join("LR_frames.isif").exists());
        assert!(published.join("LR_angles.npy").exists());
        assert!(published.join("LR_timestamps.npy").exists());

        let metadata: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(published.join("metadata.json")).unwrap())
                .unwrap();
        assert_eq!(metadata["per_direction"]["LR"]["frame_count"], 3);

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn dropped_frames_are_counted_when_queue_saturates() {
        let base =
            std::env::temp_dir().join(format!("isi-core-session-drop-test-{}", std::process::id()));
        std::fs::create_dir_all(&base).unwrap();

        let recorder = SessionRecorder::start(
            &base,
            "sess2",
            2,
            2,
            PixelDepth::Eight,
            &[Direction::Tb],
            ParameterGroups::default(),
        )
        .unwrap();

        for _ in 0..(QUEUE_CAPACITY + 50) {
            recorder.record_frame(Direction::Tb, Frame::new(2, 2, PixelDepth::Eight));
        }
        // Not a guarantee in every scheduling interleaving, but with a
        // bounded queue this small and no consumer throttling, some
        // drops are expected under a tight burst.
        recorder.finalize_direction(Direction::Tb, Vec::new(), 0, None);
        let _ = recorder.close(false).unwrap();
        let _ = std::fs::remove_dir_all(&base);
    }
}
