//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Visual-area boundary detection and watershed segmentation
//! (`spec.md` §4.7.4), following
//! `original_source/.backup/backend/src/application/algorithms/
//! sign_map.py`'s `_detect_sign_boundaries`/`_watershed_segmentation`/
//! `_filter_and_analyze_areas` pipeline: dilate the positive- and
//! negative-sign masks and intersect them for boundaries, distance-
//! transform the non-boundary region, seed from its local maxima, flood
//! a watershed from those seeds, and discard areas under
//! `min_area_pixels`.
//!
//! The reference implementation calls into `scipy`/`skimage` for each
//! of these steps; none has a settled equivalent in this crate's image
//! stack (`imageproc` has no watershed, and its distance-transform and
//! morphology outputs are 8-bit and would clip on anything but small
//! images), so all four are hand-written here directly over row-major
//! `f64`/`bool` buffers, matching the plain-array style the rest of
//! `analysis` already uses.
//!

use std::cmp::Ordering;
use std::collections::BinaryHeap;

const SEED_MIN_SEPARATION: f64 = 10.0;
const SEED_MIN_DISTANCE: f64 = 5.0;

/// Per-area properties, `spec.md` §4.7.4 plus the `mean_magnitude`
/// supplement (§4.7 AMBIENT).
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct AreaProperties {
    pub label_id: u32,
    pub area_px: u32,
    pub centroid: (f64, f64),
    pub dominant_sign: i8,
    pub sign_consistency: f64,
    pub bbox: (u32, u32, u32, u32),
    pub mean_magnitude: f64,
}

pub struct SegmentationResult {
    pub boundary_map: Vec<bool>,
    pub area_labels: Vec<u32>,
    pub areas: Vec<AreaProperties>,
}

/// 4-connected binary dilation by one pixel.
fn dilate(mask: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut out = mask.to_vec();
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if mask[idx] {
                continue;
            }
            let neighbors = [
                (x.checked_sub(1), Some(y)),
                (Some(x + 1).filter(|&v| v < width), Some(y)),
                (Some(x), y.checked_sub(1)),
                (Some(x), Some(y + 1).filter(|&v| v < height)),
            ];
            for (nx, ny) in neighbors {
                if let (Some(nx), Some(ny)) = (nx, ny) {
                    if mask[ny * width + nx] {
                        out[idx] = true;
                        break;
                    }
                }
            }
        }
    }
    out
}

/// Boundary pixels: where the dilated positive-sign mask and the
/// dilated negative-sign mask overlap.
pub fn detect_boundaries(statistical_vfs: &[i8], width: usize, height: usize) -> Vec<bool> {
    let positive: Vec<bool> = statistical_vfs.iter().map(|&s| s == 1).collect();
    let negative: Vec<bool> = statistical_vfs.iter().map(|&s| s == -1).collect();
    let pos_dilated = dilate(&positive, width, height);
    let neg_dilated = dilate(&negative, width, height);
    pos_dilated.iter().zip(neg_dilated.iter()).map(|(&p, &n)| p && n).collect()
}

/// 1-D squared Euclidean distance transform (Felzenszwalb & Huttenlocher
/// 2004), `f` being 0 at "on" sites and `+inf` elsewhere.
fn distance_transform_1d(f: &[f64]) -> Vec<f64> {
    let n = f.len();
    let mut d = vec![0f64; n];
    let mut v = vec![0usize; n];
    let mut z = vec![0f64; n + 1];
    let mut k = 0usize;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;

    for q in 1..n {
        loop {
            let vk = v[k];
            let s = ((f[q] + (q * q) as f64) - (f[vk] + (vk * vk) as f64))
                / (2.0 * q as f64 - 2.0 * vk as f64);
            if s <= z[k] {
                if k == 0 {
                    break;
                }
                k -= 1;
            } else {
                k += 1;
                v[k] = q;
                z[k] = s;
                z[k + 1] = f64::INFINITY;
                break;
            }
        }
    }

    k = 0;
    for (q, dq) in d.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let diff = q as f64 - v[k] as f64;
        *dq = diff * diff + f[v[k]];
    }
    d
}

/// Euclidean distance, per pixel, to the nearest `false` pixel of
/// `mask` (the boundary map) — the "distance to nearest boundary"
/// surface the original computes with `distance_transform_edt(~boundary)`.
fn distance_to_false(mask: &[bool], width: usize, height: usize) -> Vec<f64> {
    let mut sq = vec![0f64; width * height];
    for (i, &on) in mask.iter().enumerate() {
        sq[i] = if on { f64::INFINITY } else { 0.0 };
    }

    let mut column = vec![0f64; height];
    for x in 0..width {
        for y in 0..height {
            column[y] = sq[y * width + x];
        }
        let transformed = distance_transform_1d(&column);
        for y in 0..height {
            sq[y * width + x] = transformed[y];
        }
    }

    let mut row = vec![0f64; width];
    for y in 0..height {
        row.copy_from_slice(&sq[y * width..(y + 1) * width]);
        let transformed = distance_transform_1d(&row);
        sq[y * width..(y + 1) * width].copy_from_slice(&transformed);
    }

    sq.iter().map(|&v| v.sqrt()).collect()
}

/// Greedy local-maxima seeds: visits pixels in descending distance
/// order and accepts one if it clears both the absolute-distance floor
/// and the minimum separation from every seed accepted so far —
/// approximating `skimage.feature.peak_local_max(min_distance=10,
/// threshold_abs=5)` without a k-d tree.
fn find_seeds(distance: &[f64], width: usize, height: usize) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..distance.len()).collect();
    order.sort_by(|&a, &b| distance[b].partial_cmp(&distance[a]).unwrap_or(Ordering::Equal));

    let mut seeds: Vec<(usize, usize)> = Vec::new();
    for idx in order {
        if distance[idx] < SEED_MIN_DISTANCE {
            break;
        }
        let (x, y) = (idx % width, idx / width);
        let too_close = seeds.iter().any(|&(sx, sy)| {
            let dx = x as f64 - sx as f64;
            let dy = y as f64 - sy as f64;
            (dx * dx + dy * dy).sqrt() < SEED_MIN_SEPARATION
        });
        if !too_close {
            seeds.push((x, y));
        }
    }
    seeds
}

#[derive(PartialEq)]
struct QueueItem {
    priority: f64,
    idx: usize,
    label: u32,
}

impl Eq for QueueItem {}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.partial_cmp(&other.priority).unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Marker-based watershed: floods outward from each seed, always
/// expanding the highest-distance unlabeled neighbor next, constrained
/// to `mask` (non-boundary pixels). Pixels the flood never reaches
/// (isolated boundary-locked pockets) stay label `0`.
fn watershed(distance: &[f64], seeds: &[(usize, usize)], mask: &[bool], width: usize, height: usize) -> Vec<u32> {
    let mut labels = vec![0u32; width * height];
    let mut heap = BinaryHeap::new();

    for (seed_idx, &(sx, sy)) in seeds.iter().enumerate() {
        let label = (seed_idx + 1) as u32;
        let idx = sy * width + sx;
        labels[idx] = label;
        heap.push(QueueItem { priority: distance[idx], idx, label });
    }

    while let Some(QueueItem { idx, label, .. }) = heap.pop() {
        let (x, y) = (idx % width, idx / width);
        let neighbors = [
            (x.checked_sub(1), Some(y)),
            (Some(x + 1).filter(|&v| v < width), Some(y)),
            (Some(x), y.checked_sub(1)),
            (Some(x), Some(y + 1).filter(|&v| v < height)),
        ];
        for (nx, ny) in neighbors {
            let (Some(nx), Some(ny)) = (nx, ny) else { continue };
            let nidx = ny * width + nx;
            if !mask[nidx] || labels[nidx] != 0 {
                continue;
            }
            labels[nidx] = label;
            heap.push(QueueItem { priority: distance[nidx], idx: nidx, label });
        }
    }

    labels
}

/// Runs the full boundary-detection and watershed-segmentation pipeline
/// over a statistically-filtered VFS map, then drops and relabels areas
/// under `min_area_pixels`.
pub fn segment(
    statistical_vfs: &[i8],
    magnitude: &[f64],
    width: usize,
    height: usize,
    min_area_pixels: u32,
) -> SegmentationResult {
    let boundary_map = detect_boundaries(statistical_vfs, width, height);
    let non_boundary: Vec<bool> = boundary_map.iter().map(|&b| !b).collect();
    let distance = distance_to_false(&boundary_map, width, height);
    let seeds = find_seeds(&distance, width, height);
    let raw_labels = watershed(&distance, &seeds, &non_boundary, width, height);

    let max_label = raw_labels.iter().copied().max().unwrap_or(0);
    let mut areas_by_label: Vec<Vec<usize>> = vec![Vec::new(); max_label as usize + 1];
    for (idx, &label) in raw_labels.iter().enumerate() {
        if label > 0 {
            areas_by_label[label as usize].push(idx);
        }
    }

    let mut area_labels = vec![0u32; width * height];
    let mut areas = Vec::new();
    let mut next_label = 1u32;

    for pixels in areas_by_label.into_iter().filter(|p| !p.is_empty()) {
        if (pixels.len() as u32) < min_area_pixels {
            continue;
        }

        let mut min_x = width;
        let mut max_x = 0usize;
        let mut min_y = height;
        let mut max_y = 0usize;
        let mut sum_x = 0f64;
        let mut sum_y = 0f64;
        let mut positive = 0usize;
        let mut negative = 0usize;
        let mut magnitude_sum = 0f64;

        for &idx in &pixels {
            let (x, y) = (idx % width, idx / width);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
            sum_x += x as f64;
            sum_y += y as f64;
            magnitude_sum += magnitude[idx];
            match statistical_vfs[idx] {
                1 => positive += 1,
                -1 => negative += 1,
                _ => {}
            }
        }

        let n = pixels.len();
        let dominant_sign: i8 = if positive >= negative { 1 } else { -1 };
        let dominant_count = if dominant_sign == 1 { positive } else { negative };
        let sign_consistency = if positive + negative > 0 {
            dominant_count as f64 / (positive + negative) as f64
        } else {
            0.0
        };

        for &idx in &pixels {
            area_labels[idx] = next_label;
        }

        areas.push(AreaProperties {
            label_id: next_label,
            area_px: n as u32,
            centroid: (sum_y / n as f64, sum_x / n as f64),
            dominant_sign,
            sign_consistency,
            bbox: (min_x as u32, min_y as u32, max_x as u32, max_y as u32),
            mean_magnitude: magnitude_sum / n as f64,
        });
        next_label += 1;
    }

    SegmentationResult { boundary_map, area_labels, areas }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_vfs(width: usize, height: usize, split_col: usize) -> Vec<i8> {
        let mut vfs = vec![0i8; width * height];
        for y in 0..height {
            for x in 0..width {
                vfs[y * width + x] = if x < split_col { 1 } else { -1 };
            }
        }
        vfs
    }

    #[test]
    fn boundary_sits_between_opposite_sign_regions() {
        let (width, height) = (10, 4);
        let vfs = square_vfs(width, height, 5);
        let boundary = detect_boundaries(&vfs, width, height);
        // The column pair straddling x=5 must be flagged.
        assert!(boundary[2 * width + 4] || boundary[2 * width + 5]);
        // Far from the split, no boundary.
        assert!(!boundary[2 * width + 0]);
        assert!(!boundary[2 * width + 9]);
    }

    #[test]
    fn distance_transform_peaks_at_the_farthest_interior_point() {
        let width = 21;
        let height = 21;
        let mut mask = vec![false; width * height];
        // Single boundary pixel at the center; everywhere else is "on".
        mask[10 * width + 10] = true;
        let distance = distance_to_false(&mask, width, height);
        // Distance grows with Euclidean distance from (10,10); a far
        // corner should clearly exceed a near neighbor.
        assert!(distance[0] > distance[10 * width + 11]);
    }

    #[test]
    fn two_well_separated_regions_segment_into_two_areas() {
        let width = 40;
        let height = 20;
        let mut vfs = vec![1i8; width * height];
        for y in 0..height {
            for x in 18..22 {
                vfs[y * width + x] = -1;
            }
        }
        let magnitude = vec![1.0; width * height];
        let result = segment(&vfs, &magnitude, width, height, 10);
        assert!(result.areas.len() >= 1);
        for area in &result.areas {
            assert!((0.0..=1.0).contains(&area.sign_consistency));
        }
    }

    #[test]
    fn areas_smaller_than_the_minimum_are_dropped() {
        let width = 15;
        let height = 15;
        let vfs = vec![1i8; width * height];
        let magnitude = vec![1.0; width * height];
        let result = segment(&vfs, &magnitude, width, height, width as u32 * height as u32 + 1);
        assert!(result.areas.is_empty());
        assert!(result.area_labels.iter().all(|&l| l == 0));
    }
}
