//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Combines a forward/reverse sweep pair's phase maps into one
//! retinotopy map, and scales the combined phase to visual-field
//! degrees.
//!

use crate::error::AnalysisError;
use crate::geometry::MonitorGeometry;

/// Complex unit-vector average of two phases (radians, `[-pi,pi]`),
/// cancelling a common hemodynamic delay offset shared by both sweep
/// directions of an axis.
pub fn combine(phi_fwd: f64, phi_rev: f64) -> f64 {
    (phi_fwd.sin() + phi_rev.sin()).atan2(phi_fwd.cos() + phi_rev.cos())
}

/// Per-pixel combine of two same-sized phase maps.
pub fn combine_maps(fwd: &[f64], rev: &[f64]) -> Result<Vec<f64>, AnalysisError> {
    if fwd.len() != rev.len() {
        return Err(AnalysisError::DimensionMismatch(
            "forward/reverse phase maps have different pixel counts".to_string(),
        ));
    }
    let combined: Vec<f64> =
        fwd.iter().zip(rev.iter()).map(|(&a, &b)| combine(a, b)).collect();
    for &v in &combined {
        if !v.is_finite() {
            return Err(AnalysisError::NonFinite("combined phase map".to_string()));
        }
    }
    Ok(combined)
}

/// Maps combined phase `[-pi,pi]` to azimuth degrees, `+-fov_horizontal_deg/2`.
pub fn scale_azimuth(combined: &[f64], geometry: &MonitorGeometry) -> Vec<f64> {
    let half_fov = geometry.fov_horizontal_deg / 2.0;
    combined.iter().map(|&phi| phi / std::f64::consts::PI * half_fov).collect()
}

/// Maps combined phase `[-pi,pi]` to elevation degrees, `+-fov_vertical_deg/2`.
pub fn scale_elevation(combined: &[f64], geometry: &MonitorGeometry) -> Vec<f64> {
    let half_fov = geometry.fov_vertical_deg / 2.0;
    combined.iter().map(|&phi| phi / std::f64::consts::PI * half_fov).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combining_equal_phases_returns_the_same_phase() {
        let phi = 0.7;
        assert!((combine(phi, phi) - phi).abs() < 1e-9);
    }

    #[test]
    fn combining_opposite_phases_cancels_the_common_offset() {
        // A common offset `d` applied to antipodal true phases `p`/`-p`
        // shows up as `p+d`/`-p+d`; combining recovers `d`.
        let true_phase = 0.4;
        let offset = 1.1;
        let fwd = true_phase + offset;
        let rev = -true_phase + offset;
        let combined = combine(fwd, rev);
        assert!((combined - offset).abs() < 1e-9, "got {combined}, want {offset}");
    }

    #[test]
    fn scale_azimuth_maps_extremes_to_half_the_horizontal_fov() {
        let geometry = MonitorGeometry {
            fov_horizontal_deg: 120.0,
            fov_vertical_deg: 60.0,
            pixels_per_degree_h: 1.0,
            pixels_per_degree_v: 1.0,
        };
        let scaled = scale_azimuth(&[std::f64::consts::PI, -std::f64::consts::PI, 0.0], &geometry);
        assert!((scaled[0] - 60.0).abs() < 1e-9);
        assert!((scaled[1] + 60.0).abs() < 1e-9);
        assert!(scaled[2].abs() < 1e-9);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(combine_maps(&[0.0, 0.0], &[0.0]).is_err());
    }
}
