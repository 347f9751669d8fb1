//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Screen-pixel to spherical visual-field coordinate transform.
//!
//! Implements the Marshel et al. 2011 (SI, p.16) equations from a
//! mouse-eye-centered viewpoint. Pure, stateless functions operating
//! over a coordinate grid; no GPU/CPU distinction is baked in here —
//! `StimulusEngine` calls this once per `configure()` and caches the
//! result.
//!

use crate::parameters::schema::MonitorParams;
use cgmath::{Deg, InnerSpace, Matrix3, Rad, Vector3};

/// Field-of-view and pixels-per-degree quantities derived once from
/// `monitor` parameters, reused by `StimulusEngine` and `AnalysisPipeline`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MonitorGeometry {
    pub fov_horizontal_deg: f64,
    pub fov_vertical_deg: f64,
    pub pixels_per_degree_h: f64,
    pub pixels_per_degree_v: f64,
}

impl MonitorGeometry {
    pub fn compute(monitor: &MonitorParams) -> MonitorGeometry {
        let fov_horizontal_deg =
            2.0 * (monitor.width_cm / (2.0 * monitor.distance_cm)).atan().to_degrees();
        let fov_vertical_deg =
            2.0 * (monitor.height_cm / (2.0 * monitor.distance_cm)).atan().to_degrees();

        let pixels_per_degree_h = if fov_horizontal_deg > 0.0 {
            monitor.width_px as f64 / fov_horizontal_deg
        } else {
            0.0
        };
        let pixels_per_degree_v = if fov_vertical_deg > 0.0 {
            monitor.height_px as f64 / fov_vertical_deg
        } else {
            0.0
        };

        MonitorGeometry {
            fov_horizontal_deg,
            fov_vertical_deg,
            pixels_per_degree_h,
            pixels_per_degree_v,
        }
    }
}

/// Converts a single screen pixel (relative to screen center, in
/// pixels) to visual-field spherical coordinates `(azimuth_deg,
/// altitude_deg)`.
///
/// `spec.md` §4.2 prescribes applying the mouse's lateral/tilt angles
/// before forming the eye-centered ray; `original_source/.../transform.py`
/// omits this rotation (see DESIGN.md, Open Question 4). Here it is
/// applied, and reduces to the original's behavior when both angles
/// are zero — the default, and by far the most common, configuration.
pub fn screen_pixel_to_spherical(
    x_px: f64,
    y_px: f64,
    monitor: &MonitorParams,
    geometry: &MonitorGeometry,
) -> (f64, f64) {
    let center_x = monitor.width_px as f64 / 2.0;
    let center_y = monitor.height_px as f64 / 2.0;

    let x_deg = if geometry.pixels_per_degree_h > 0.0 {
        (x_px - center_x) / geometry.pixels_per_degree_h
    } else {
        0.0
    };
    let y_deg = if geometry.pixels_per_degree_v > 0.0 {
        (y_px - center_y) / geometry.pixels_per_degree_v
    } else {
        0.0
    };

    let y_screen_cm = x_deg * (monitor.width_cm / geometry.fov_horizontal_deg.max(1e-9));
    let z_screen_cm = y_deg * (monitor.height_cm / geometry.fov_vertical_deg.max(1e-9));

    // Eye-centered ray before rotation: (distance, horizontal, vertical).
    let ray = Vector3::new(monitor.distance_cm, y_screen_cm, z_screen_cm);

    let tilt = Matrix3::from_angle_x(Rad::from(Deg(monitor.tilt_angle_deg)));
    let lateral = Matrix3::from_angle_z(Rad::from(Deg(monitor.lateral_angle_deg)));
    let rotated = lateral * tilt * ray;

    let r = rotated.magnitude();
    let azimuth = (-rotated.y).atan2(rotated.x);
    let altitude = std::f64::consts::FRAC_PI_2 - (rotated.z / r).acos();

    (azimuth.to_degrees(), altitude.to_degrees())
}

/// Batched form over the full pixel grid, used once per `configure()`.
/// Returns `(azimuth_grid, altitude_grid)`, row-major, `width * height`.
pub fn compute_coordinate_grids(
    monitor: &MonitorParams,
    geometry: &MonitorGeometry,
) -> (Vec<f32>, Vec<f32>) {
    let width = monitor.width_px as usize;
    let height = monitor.height_px as usize;
    let mut azimuth = vec![0f32; width * height];
    let mut altitude = vec![0f32; width * height];

    for y in 0..height {
        for x in 0..width {
            let (az, alt) =
                screen_pixel_to_spherical(x as f64, y as f64, monitor, geometry);
            azimuth[y * width + x] = az as f32;
            altitude[y * width + x] = alt as f32;
        }
    }

    (azimuth, altitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_monitor() -> MonitorParams {
        MonitorParams::default()
    }

    #[test]
    fn screen_center_maps_to_zero_azimuth_and_altitude() {
        let monitor = default_monitor();
        let geometry = MonitorGeometry::compute(&monitor);
        let (az, alt) = screen_pixel_to_spherical(
            monitor.width_px as f64 / 2.0,
            monitor.height_px as f64 / 2.0,
            &monitor,
            &geometry,
        );
        assert!(az.abs() < 1e-9, "azimuth {az}");
        assert!(alt.abs() < 1e-9, "altitude {alt}");
    }

    #[test]
    fn azimuth_increases_to_the_left_of_screen_center() {
        // Mouse convention: negative y (left of center) -> positive azimuth.
        let monitor = default_monitor();
        let geometry = MonitorGeometry::compute(&monitor);
        let (az_left, _) =
            screen_pixel_to_spherical(0.0, monitor.height_px as f64 / 2.0, &monitor, &geometry);
        let (az_right, _) = screen_pixel_to_spherical(
            monitor.width_px as f64,
            monitor.height_px as f64 / 2.0,
            &monitor,
            &geometry,
        );
        assert!(az_left > 0.0);
        assert!(az_right < 0.0);
    }

    #[test]
    fn zero_rotation_angles_reduce_to_unrotated_ray() {
        let mut monitor = default_monitor();
        monitor.lateral_angle_deg = 0.0;
        monitor.tilt_angle_deg = 0.0;
        let geometry = MonitorGeometry::compute(&monitor);
        let (az, alt) =
            screen_pixel_to_spherical(10.0, 10.0, &monitor, &geometry);
        assert!(az.is_finite() && alt.is_finite());
    }
}
