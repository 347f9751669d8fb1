//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Visual-field sign: median-denoise and Gaussian-smooth the
//! azimuth/elevation maps, take central-difference gradients, and
//! derive the Jacobian sign. `original_source/.backup/backend/src/
//! application/algorithms/sign_map.py` runs a median filter ahead of
//! the Gaussian smoothing pass; carried here as `median_filter_size`
//! (`0` disables it).
//!

use image::{ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;

/// Azimuth/elevation gradients and the resulting visual-field sign,
/// both raw (per-pixel sign of the Jacobian) and statistically
/// filtered (masked to the high-confidence `|J|` tail).
pub struct VfsResult {
    pub width: usize,
    pub height: usize,
    pub jacobian: Vec<f64>,
    pub raw_vfs: Vec<i8>,
    pub statistical_vfs: Vec<i8>,
}

/// Windowed median filter over a row-major `f64` map. `size` is the
/// window's side length; `0` or `1` is a no-op. Edge pixels clamp the
/// window to the map bounds rather than padding.
pub fn median_filter(map: &[f64], width: usize, height: usize, size: u32) -> Vec<f64> {
    if size <= 1 {
        return map.to_vec();
    }
    let radius = (size / 2) as isize;
    let mut out = vec![0f64; map.len()];
    let mut window = Vec::with_capacity((size * size) as usize);
    for y in 0..height as isize {
        for x in 0..width as isize {
            window.clear();
            for dy in -radius..=radius {
                let sy = (y + dy).clamp(0, height as isize - 1) as usize;
                for dx in -radius..=radius {
                    let sx = (x + dx).clamp(0, width as isize - 1) as usize;
                    window.push(map[sy * width + sx]);
                }
            }
            window.sort_by(|a, b| a.partial_cmp(b).unwrap());
            out[y as usize * width + x as usize] = window[window.len() / 2];
        }
    }
    out
}

/// Gaussian smoothing of a row-major `f64` map via `imageproc`.
pub fn gaussian_smooth(map: &[f64], width: usize, height: usize, sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return map.to_vec();
    }
    let img: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_raw(
        width as u32,
        height as u32,
        map.iter().map(|&v| v as f32).collect(),
    )
    .expect("map length matches width*height");
    let blurred = gaussian_blur_f32(&img, sigma as f32);
    blurred.into_raw().into_iter().map(|v| v as f64).collect()
}

/// Central-difference spatial gradient (`d/dx`, `d/dy`); forward/
/// backward differences at the map's edges.
pub fn gradient(map: &[f64], width: usize, height: usize) -> (Vec<f64>, Vec<f64>) {
    let mut dx = vec![0f64; map.len()];
    let mut dy = vec![0f64; map.len()];
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            dx[idx] = if x == 0 {
                map[idx + 1] - map[idx]
            } else if x == width - 1 {
                map[idx] - map[idx - 1]
            } else {
                (map[idx + 1] - map[idx - 1]) / 2.0
            };
            dy[idx] = if y == 0 {
                map[idx + width] - map[idx]
            } else if y == height - 1 {
                map[idx] - map[idx - width]
            } else {
                (map[idx + width] - map[idx - width]) / 2.0
            };
        }
    }
    (dx, dy)
}

/// `quantile` of a slice's absolute values, `quantile` in `[0,1]`.
fn abs_quantile(values: &[f64], quantile: f64) -> f64 {
    let mut abs: Vec<f64> = values.iter().map(|v| v.abs()).collect();
    abs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if abs.is_empty() {
        return 0.0;
    }
    let rank = (quantile * (abs.len() - 1) as f64).round() as usize;
    abs[rank.min(abs.len() - 1)]
}

/// Computes the Jacobian sign map from azimuth/elevation degree maps,
/// applying the median-filter/Gaussian-smoothing pass ahead of the
/// central-difference gradients, and the percentile-threshold
/// statistical filter (default 95th percentile of `|J|`).
pub fn compute(
    azimuth_deg: &[f64],
    elevation_deg: &[f64],
    width: usize,
    height: usize,
    median_filter_size: u32,
    smoothing_sigma: f64,
    vfs_threshold: f64,
) -> VfsResult {
    let az = median_filter(azimuth_deg, width, height, median_filter_size);
    let el = median_filter(elevation_deg, width, height, median_filter_size);
    let az = gaussian_smooth(&az, width, height, smoothing_sigma);
    let el = gaussian_smooth(&el, width, height, smoothing_sigma);

    let (dax_dx, dax_dy) = gradient(&az, width, height);
    let (del_dx, del_dy) = gradient(&el, width, height);

    let jacobian: Vec<f64> = (0..az.len())
        .map(|i| dax_dx[i] * del_dy[i] - dax_dy[i] * del_dx[i])
        .collect();

    let raw_vfs: Vec<i8> = jacobian
        .iter()
        .map(|&j| if j > 0.0 { 1 } else if j < 0.0 { -1 } else { 0 })
        .collect();

    let threshold = abs_quantile(&jacobian, vfs_threshold);
    let statistical_vfs: Vec<i8> = jacobian
        .iter()
        .zip(raw_vfs.iter())
        .map(|(&j, &sign)| if j.abs() >= threshold { sign } else { 0 })
        .collect();

    VfsResult { width, height, jacobian, raw_vfs, statistical_vfs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_filter_of_size_zero_is_identity() {
        let map = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(median_filter(&map, 2, 2, 0), map);
    }

    #[test]
    fn median_filter_removes_a_single_spike() {
        let map = vec![1.0, 1.0, 1.0, 1.0, 100.0, 1.0, 1.0, 1.0, 1.0];
        let filtered = median_filter(&map, 3, 3, 3);
        assert_eq!(filtered[4], 1.0);
    }

    #[test]
    fn gradient_of_linear_ramp_is_constant() {
        // az increases by 1 per column.
        let width = 5;
        let height = 3;
        let mut map = vec![0f64; width * height];
        for y in 0..height {
            for x in 0..width {
                map[y * width + x] = x as f64;
            }
        }
        let (dx, dy) = gradient(&map, width, height);
        for &v in &dx {
            assert!((v - 1.0).abs() < 1e-9);
        }
        for &v in &dy {
            assert!(v.abs() < 1e-9);
        }
    }

    #[test]
    fn uniform_expansion_has_positive_sign_everywhere() {
        // az = x, el = y -> expanding map, J = 1*1 - 0*0 = 1 everywhere.
        let width = 4;
        let height = 4;
        let mut az = vec![0f64; width * height];
        let mut el = vec![0f64; width * height];
        for y in 0..height {
            for x in 0..width {
                az[y * width + x] = x as f64;
                el[y * width + x] = y as f64;
            }
        }
        let result = compute(&az, &el, width, height, 0, 0.0, 0.0);
        assert!(result.raw_vfs.iter().all(|&s| s == 1));
    }

    #[test]
    fn mirrored_map_has_negative_sign() {
        // az = -x, el = y -> mirrored map, J = -1*1 - 0*0 = -1 everywhere.
        let width = 4;
        let height = 4;
        let mut az = vec![0f64; width * height];
        let mut el = vec![0f64; width * height];
        for y in 0..height {
            for x in 0..width {
                az[y * width + x] = -(x as f64);
                el[y * width + x] = y as f64;
            }
        }
        let result = compute(&az, &el, width, height, 0, 0.0, 0.0);
        assert!(result.raw_vfs.iter().all(|&s| s == -1));
    }

    #[test]
    fn statistical_filter_zeroes_low_magnitude_pixels() {
        let jacobian_like_az = vec![0.0, 0.0, 0.0, 10.0];
        let el = vec![0.0, 0.0, 0.0, 10.0];
        let result = compute(&jacobian_like_az, &el, 2, 2, 0, 0.0, 0.99);
        // With a 99th-percentile cut, only the strongest-gradient pixel
        // (if any) can survive; most of a near-flat map gets zeroed.
        assert!(result.statistical_vfs.iter().filter(|&&s| s != 0).count() <= 1);
    }
}
