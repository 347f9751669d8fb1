//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! `AnalysisRenderer`: colormaps turning an `AnalysisResult`'s row-major
//! maps into images for offline inspection. No teacher counterpart —
//! the teacher's own preview rendering lived entirely in GTK widget
//! code (`gui/`), out of scope here — so this follows the plain small-
//! struct, free-function style of its `workers/histogram.rs` instead.
//!

use image::{Rgb, RgbImage};

/// Linear grayscale stretch of a magnitude map to `0..=255`, clamped at
/// the map's own maximum (zero everywhere maps to all-black).
pub fn magnitude_to_grayscale(magnitude: &[f64], width: usize, height: usize) -> image::GrayImage {
    let max = magnitude.iter().cloned().fold(0f64, f64::max);
    let data: Vec<u8> = magnitude
        .iter()
        .map(|&v| if max > 0.0 { ((v / max).clamp(0.0, 1.0) * 255.0).round() as u8 } else { 0 })
        .collect();
    image::GrayImage::from_raw(width as u32, height as u32, data).expect("map length matches width*height")
}

fn hsv_to_rgb(h_deg: f64, s: f64, v: f64) -> Rgb<u8> {
    let h = h_deg.rem_euclid(360.0);
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r1, g1, b1) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    Rgb([
        (((r1 + m) * 255.0).round() as u8),
        (((g1 + m) * 255.0).round() as u8),
        (((b1 + m) * 255.0).round() as u8),
    ])
}

/// Cyclic colormap for a phase (or phase-derived azimuth/elevation)
/// map: hue sweeps the full circle across `[-pi,pi]`, matching the
/// periodic nature of the underlying quantity.
pub fn phase_to_cyclic_rgb(phase: &[f64], width: usize, height: usize) -> RgbImage {
    let mut img = RgbImage::new(width as u32, height as u32);
    for (idx, &p) in phase.iter().enumerate() {
        let hue = (p + std::f64::consts::PI) / (2.0 * std::f64::consts::PI) * 360.0;
        let (x, y) = (idx as u32 % width as u32, idx as u32 / width as u32);
        img.put_pixel(x, y, hsv_to_rgb(hue, 1.0, 1.0));
    }
    img
}

/// Diverging blue/white/red colormap for a signed visual-field-sign
/// map: `-1` blue, `0` neutral gray, `+1` red.
pub fn vfs_to_diverging_rgb(vfs: &[i8], width: usize, height: usize) -> RgbImage {
    let mut img = RgbImage::new(width as u32, height as u32);
    for (idx, &sign) in vfs.iter().enumerate() {
        let pixel = match sign {
            1 => Rgb([220, 40, 40]),
            -1 => Rgb([40, 70, 220]),
            _ => Rgb([128, 128, 128]),
        };
        let (x, y) = (idx as u32 % width as u32, idx as u32 / width as u32);
        img.put_pixel(x, y, pixel);
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_all_zero_input_is_black() {
        let img = magnitude_to_grayscale(&[0.0, 0.0, 0.0, 0.0], 2, 2);
        assert!(img.as_raw().iter().all(|&v| v == 0));
    }

    #[test]
    fn grayscale_max_value_maps_to_white() {
        let img = magnitude_to_grayscale(&[0.0, 1.0, 0.5, 1.0], 2, 2);
        assert_eq!(img.as_raw()[1], 255);
    }

    #[test]
    fn cyclic_colormap_wraps_without_panicking() {
        let phase = vec![-std::f64::consts::PI, 0.0, std::f64::consts::PI];
        let img = phase_to_cyclic_rgb(&phase, 3, 1);
        assert_eq!(img.width(), 3);
    }

    #[test]
    fn diverging_colormap_assigns_distinct_colors_per_sign() {
        let img = vfs_to_diverging_rgb(&[1, -1, 0], 3, 1);
        let pos = img.get_pixel(0, 0);
        let neg = img.get_pixel(1, 0);
        let neutral = img.get_pixel(2, 0);
        assert_ne!(pos, neg);
        assert_ne!(pos, neutral);
        assert_ne!(neg, neutral);
    }
}
