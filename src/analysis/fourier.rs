//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Per-pixel Fourier analysis at the stimulus fundamental (`spec.md`
//! §4.7.1). Builds one FFT plan for the whole direction and reuses it
//! pixel by pixel, rather than a Goertzel evaluation, since `rustfft`
//! was brought in precisely for this.
//!

use crate::error::AnalysisError;
use crate::frame::Frame;
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

/// Phase (radians, `[-pi,pi]`) and magnitude at the stimulus fundamental,
/// one value per pixel, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseMagnitudeMap {
    pub width: usize,
    pub height: usize,
    pub phase: Vec<f64>,
    pub magnitude: Vec<f64>,
}

impl PhaseMagnitudeMap {
    pub fn phase_at(&self, x: usize, y: usize) -> f64 {
        self.phase[y * self.width + x]
    }

    pub fn magnitude_at(&self, x: usize, y: usize) -> f64 {
        self.magnitude[y * self.width + x]
    }
}

/// Computes `phase_map`/`magnitude_map` for one direction's recorded
/// frame stream. `cycles` is the acquisition cycle count for this
/// direction; the stimulus fundamental is `cycles / frames.len()`
/// cycles per frame.
pub fn compute_phase_magnitude_map(
    frames: &[Frame],
    cycles: u32,
) -> Result<PhaseMagnitudeMap, AnalysisError> {
    let n = frames.len();
    if n == 0 {
        return Err(AnalysisError::EmptyFrameSet("<unnamed>".to_string()));
    }
    let width = frames[0].width() as usize;
    let height = frames[0].height() as usize;
    for f in frames {
        if f.width() as usize != width || f.height() as usize != height {
            return Err(AnalysisError::DimensionMismatch(
                "all frames in a direction must share one width/height".to_string(),
            ));
        }
    }

    let f_s = cycles as f64 / n as f64;
    let bin = (f_s * n as f64).round().rem_euclid(n as f64) as usize;

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);

    let mut phase = vec![0f64; width * height];
    let mut magnitude = vec![0f64; width * height];
    let mut buffer = vec![Complex64::new(0.0, 0.0); n];

    for y in 0..height {
        for x in 0..width {
            let mut mean = 0.0;
            for (t, f) in frames.iter().enumerate() {
                let v = f.get(x as u32, y as u32) as f64;
                buffer[t] = Complex64::new(v, 0.0);
                mean += v;
            }
            mean /= n as f64;
            for c in buffer.iter_mut() {
                c.re -= mean;
            }

            fft.process(&mut buffer);
            let x_k = buffer[bin];
            if !x_k.re.is_finite() || !x_k.im.is_finite() {
                return Err(AnalysisError::NonFinite("phase_map".to_string()));
            }

            let idx = y * width + x;
            phase[idx] = x_k.im.atan2(x_k.re);
            magnitude[idx] = x_k.norm();
        }
    }

    Ok(PhaseMagnitudeMap { width, height, phase, magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelDepth;

    fn sinusoid_frames(n: usize, width: u32, height: u32, cycles: f64, phase: f64) -> Vec<Frame> {
        (0..n)
            .map(|t| {
                let value = 128.0 + 64.0 * (2.0 * std::f64::consts::PI * cycles * t as f64 / n as f64 + phase).cos();
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

    #[test]
    fn s3_phase_recovery_matches_known_phase() {
        let n = 300;
        let expected_phase = std::f64::consts::FRAC_PI_3;
        let frames = sinusoid_frames(n, 3, 3, 5.0, expected_phase);
        let map = compute_phase_magnitude_map(&frames, 5).unwrap();
        for y in 0..3 {
            for x in 0..3 {
                let phase = map.phase_at(x, y);
                assert!(
                    (phase - expected_phase).abs() < 1e-5,
                    "pixel ({x},{y}): got {phase}, want {expected_phase}"
                );
            }
        }
    }

    #[test]
    fn empty_frame_set_is_rejected() {
        let frames: Vec<Frame> = Vec::new();
        assert!(compute_phase_magnitude_map(&frames, 5).is_err());
    }

    #[test]
    fn mismatched_frame_dimensions_are_rejected() {
        let mut frames = sinusoid_frames(10, 2, 2, 1.0, 0.0);
        frames.push(Frame::new(4, 4, PixelDepth::Eight));
        assert!(compute_phase_magnitude_map(&frames, 1).is_err());
    }
}
