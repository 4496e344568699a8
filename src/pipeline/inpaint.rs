// Background reconstruction under text masks.
//
// Two strategies: radial compass-direction sampling (default) and a
// breadth-first flood fill seeded at the mask boundary. Both touch only
// pixels where the mask is foreground; everything else stays byte-identical,
// including alpha. Masked pixels come out fully opaque.

use std::collections::VecDeque;

use image::RgbaImage;
use tracing::debug;

use crate::core::config::InpaintConfig;
use crate::core::types::{Bounds, Mask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InpaintStrategy {
    RadialSample,
    FloodFill,
}

impl InpaintStrategy {
    pub fn from_name(name: &str) -> Self {
        match name {
            "flood" => Self::FloodFill,
            _ => Self::RadialSample,
        }
    }
}

const NEIGHBORS_8: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Reconstruct background pixels under `mask` directly in `image`.
///
/// Kept async-shaped at the call site so a native inpainting backend can be
/// swapped in; the built-in strategies are pure CPU raster work.
pub fn inpaint_image(
    image: &mut RgbaImage,
    mask: &Mask,
    strategy: InpaintStrategy,
    config: &InpaintConfig,
) {
    if mask.coverage() == 0 {
        return;
    }

    match strategy {
        InpaintStrategy::FloodFill => flood_fill(image, mask),
        InpaintStrategy::RadialSample => radial_sample(image, mask, config.max_search_distance),
    }

    smooth_masked(image, mask);

    // Masked pixels become fully opaque; unmasked alpha is preserved exactly.
    let bounds = mask.bounds;
    for my in 0..bounds.height {
        for mx in 0..bounds.width {
            if mask.at(mx, my) > 0 {
                image.get_pixel_mut(bounds.x + mx, bounds.y + my)[3] = 255;
            }
        }
    }
}

/// Breadth-first fill from the mask's true boundary inward. Each masked pixel
/// takes the average color of its already-filled 8-connected neighbors, so the
/// fill never samples across the mask interior.
fn flood_fill(image: &mut RgbaImage, mask: &Mask) {
    let bounds = mask.bounds;
    let w = bounds.width as i64;
    let h = bounds.height as i64;

    let mut filled: Vec<bool> = mask.data.iter().map(|&v| v == 0).collect();
    let mut queued = vec![false; filled.len()];
    let index = |x: i64, y: i64| (y * w + x) as usize;

    let mut queue: VecDeque<(i64, i64)> = VecDeque::new();
    for y in 0..h {
        for x in 0..w {
            if filled[index(x, y)] {
                continue;
            }
            let has_filled_neighbor = NEIGHBORS_8.iter().any(|&(dx, dy)| {
                let (nx, ny) = (x + dx, y + dy);
                nx >= 0 && nx < w && ny >= 0 && ny < h && filled[index(nx, ny)]
            });
            if has_filled_neighbor {
                queue.push_back((x, y));
                queued[index(x, y)] = true;
            }
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        let mut sums = [0u32; 3];
        let mut count = 0u32;
        for &(dx, dy) in &NEIGHBORS_8 {
            let (nx, ny) = (x + dx, y + dy);
            if nx < 0 || nx >= w || ny < 0 || ny >= h || !filled[index(nx, ny)] {
                continue;
            }
            let px = image.get_pixel(bounds.x + nx as u32, bounds.y + ny as u32);
            for ch in 0..3 {
                sums[ch] += px[ch] as u32;
            }
            count += 1;
        }

        if count > 0 {
            let px = image.get_pixel_mut(bounds.x + x as u32, bounds.y + y as u32);
            for ch in 0..3 {
                px[ch] = (sums[ch] / count) as u8;
            }
        }
        filled[index(x, y)] = true;

        for &(dx, dy) in &NEIGHBORS_8 {
            let (nx, ny) = (x + dx, y + dy);
            if nx < 0 || nx >= w || ny < 0 || ny >= h {
                continue;
            }
            let i = index(nx, ny);
            if !filled[i] && !queued[i] {
                queue.push_back((nx, ny));
                queued[i] = true;
            }
        }
    }
}

/// For each masked pixel, search along 8 compass directions at a near and a
/// far radius band, stopping at the first unmasked pixel per band. Requires
/// at least 3 samples; otherwise the original pixel is kept (deep-interior
/// pixels of very large masks).
fn radial_sample(image: &mut RgbaImage, mask: &Mask, max_search: u32) {
    let bounds = mask.bounds;
    let w = bounds.width as i64;
    let h = bounds.height as i64;
    let near_cap = (max_search / 2).max(1) as i64;
    let far_cap = max_search as i64;

    // Sample from a snapshot so results are independent of scan order.
    let source = image.clone();

    for my in 0..bounds.height {
        for mx in 0..bounds.width {
            if mask.at(mx, my) == 0 {
                continue;
            }
            let (x, y) = (mx as i64, my as i64);

            let mut sums = [0u32; 3];
            let mut count = 0u32;
            for &(dx, dy) in &NEIGHBORS_8 {
                let mut bands_found = 0;
                let mut r = 1i64;
                while r <= far_cap && bands_found < 2 {
                    if bands_found == 0 && r > near_cap {
                        // Near band exhausted without a hit; keep walking the
                        // far band only.
                        bands_found = 1;
                    }
                    let (nx, ny) = (x + dx * r, y + dy * r);
                    if nx < 0 || nx >= w || ny < 0 || ny >= h {
                        break;
                    }
                    if mask.at(nx as u32, ny as u32) == 0 {
                        let px = source.get_pixel(bounds.x + nx as u32, bounds.y + ny as u32);
                        for ch in 0..3 {
                            sums[ch] += px[ch] as u32;
                        }
                        count += 1;
                        bands_found += 1;
                        // Second band starts beyond twice the first hit.
                        r = (r * 2).max(r + 1);
                        continue;
                    }
                    r += 1;
                }
            }

            if count >= 3 {
                let px = image.get_pixel_mut(bounds.x + mx, bounds.y + my);
                for ch in 0..3 {
                    px[ch] = (sums[ch] / count) as u8;
                }
            }
        }
    }
}

/// 3×3 box blur over masked pixels only, removing fill-seam discontinuities
/// while leaving reconstructed-to-original transitions untouched elsewhere.
fn smooth_masked(image: &mut RgbaImage, mask: &Mask) {
    let bounds = mask.bounds;
    let snapshot = image.clone();
    let (img_w, img_h) = snapshot.dimensions();

    for my in 0..bounds.height {
        for mx in 0..bounds.width {
            if mask.at(mx, my) == 0 {
                continue;
            }
            let cx = (bounds.x + mx) as i64;
            let cy = (bounds.y + my) as i64;

            let mut sums = [0u32; 3];
            let mut count = 0u32;
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let (nx, ny) = (cx + dx, cy + dy);
                    if nx < 0 || ny < 0 || nx >= img_w as i64 || ny >= img_h as i64 {
                        continue;
                    }
                    let px = snapshot.get_pixel(nx as u32, ny as u32);
                    for ch in 0..3 {
                        sums[ch] += px[ch] as u32;
                    }
                    count += 1;
                }
            }
            let px = image.get_pixel_mut(cx as u32, cy as u32);
            for ch in 0..3 {
                px[ch] = (sums[ch] / count) as u8;
            }
        }
    }
}

/// Partition region bounds into inpaint groups via connected components over
/// a proximity graph: bounds within `gap` pixels share a group. Groups
/// partition the input; no index lands in two groups.
pub fn build_inpaint_groups(bounds: &[Bounds], gap: u32) -> Vec<Vec<usize>> {
    let n = bounds.len();
    let mut assigned = vec![false; n];
    let mut groups = Vec::new();

    for start in 0..n {
        if assigned[start] {
            continue;
        }
        let mut group = vec![start];
        assigned[start] = true;
        let mut cursor = 0;
        while cursor < group.len() {
            let current = group[cursor];
            for candidate in 0..n {
                if !assigned[candidate] && bounds[current].within_gap(&bounds[candidate], gap) {
                    assigned[candidate] = true;
                    group.push(candidate);
                }
            }
            cursor += 1;
        }
        group.sort_unstable();
        groups.push(group);
    }
    groups
}

/// Whether a group should be inpainted as one union mask instead of
/// per-region. Overlapping member masks force a union (double-processing
/// avoidance); dense or tightly packed groups take the union path because one
/// reconstruction is cleaner than many fragmented ones.
pub fn should_union_inpaint(
    members: &[Bounds],
    mask_coverage: u64,
    union: Bounds,
    config: &InpaintConfig,
) -> bool {
    if members.len() < 2 {
        return false;
    }
    let overlapping = members.iter().enumerate().any(|(i, a)| {
        members
            .iter()
            .skip(i + 1)
            .any(|b| a.intersects(b))
    });
    if overlapping {
        return true;
    }

    let union_area = union.area().max(1);
    let density = mask_coverage as f64 / union_area as f64;
    if density >= config.union_density {
        return true;
    }

    let member_area: u64 = members.iter().map(|b| b.area()).sum();
    let packed = member_area as f64 / union_area as f64;
    debug!(density, packed, "inpaint group union decision");
    packed >= config.union_area_ratio
}
