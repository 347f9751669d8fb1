//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! `FrameSource`: the camera as an external collaborator (`spec.md`
//! §1, §2). This crate does not drive camera hardware directly — it
//! only defines the interface `AcquisitionCoordinator` polls frames
//! through, following the teacher's own `FrameCapturer` trait shape
//! (`capture_frame`/`pause`/`resume`) minus the vendor driver
//! enumeration and control-panel machinery that trait also carried.
//!

use crate::frame::Frame;

#[derive(Debug)]
pub enum FrameSourceError {
    /// No frame was available within the poll window; not fatal on its
    /// own — `AcquisitionCoordinator` accumulates elapsed time since the
    /// last successful frame and aborts only past `spec.md`'s 1s bound.
    FrameUnavailable,
    Disconnected(String),
}

/// Yields camera frames paired with their hardware timestamps.
/// Implementations live outside this crate (a real driver, or a test
/// double); `AcquisitionCoordinator` only depends on this trait.
pub trait FrameSource: Send {
    /// Polls for the next available frame. Returns
    /// `Err(FrameSourceError::FrameUnavailable)` if none has arrived
    /// yet; callers should retry rather than treat this as fatal.
    fn poll_frame(&mut self) -> Result<(Frame, u64), FrameSourceError>;
}

/// Paces synthetic frames at a fixed rate, grounded on the teacher's
/// `SimFrameCapturer::capture_frame` (sleep-until-next-frame-time
/// against a `t_last_capture` mark). Used by the `serve` binary when no
/// real camera driver is wired in, so the three-thread acquisition
/// loop of `spec.md` §5 has something to drive against.
pub struct SimulatedFrameSource {
    width: u32,
    height: u32,
    depth: crate::frame::PixelDepth,
    period: std::time::Duration,
    t_last_capture: std::time::Instant,
    next_index: u32,
}

impl SimulatedFrameSource {
    pub fn new(width: u32, height: u32, depth: crate::frame::PixelDepth, fps: f64) -> SimulatedFrameSource {
        SimulatedFrameSource {
            width,
            height,
            depth,
            period: std::time::Duration::from_secs_f64(1.0 / fps.max(1.0)),
            t_last_capture: std::time::Instant::now(),
            next_index: 0,
        }
    }
}

impl FrameSource for SimulatedFrameSource {
    fn poll_frame(&mut self) -> Result<(Frame, u64), FrameSourceError> {
        let elapsed = self.t_last_capture.elapsed();
        if elapsed < self.period {
            std::thread::sleep(self.period - elapsed);
        }
        self.t_last_capture = std::time::Instant::now();

        let mut frame = Frame::new(self.width, self.height, self.depth);
        let shade = ((self.next_index % 256) as u16) << (if self.depth == crate::frame::PixelDepth::Sixteen { 8 } else { 0 });
        for y in 0..self.height {
            for x in 0..self.width {
                frame.set(x, y, shade);
            }
        }
        self.next_index += 1;

        Ok((frame, crate::sync::wall_clock_us()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelDepth;

    #[test]
    fn simulated_source_yields_increasing_timestamps() {
        let mut source = SimulatedFrameSource::new(4, 4, PixelDepth::Eight, 1000.0);
        let (_frame1, t1) = source.poll_frame().unwrap();
        let (_frame2, t2) = source.poll_frame().unwrap();
        assert!(t2 >= t1);
    }
}
