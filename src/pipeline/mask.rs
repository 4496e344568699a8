// Mask rasterizer and dilation.
//
// Region quads are scan-converted into a dense mask over a clamped bounds
// window, then dilated with a summed-area table so the window sum per pixel
// is O(1) regardless of radius.

use tracing::debug;

use crate::core::config::InpaintConfig;
use crate::core::types::{Bounds, Mask, Quad, Region};
use crate::pipeline::regions::median;

/// Minimal rectangle covering all region boxes, expanded by `padding` and
/// clamped to the image. Returns None when the region set is empty; callers
/// must short-circuit instead of rasterizing.
pub fn union_bounds(
    regions: &[&Region],
    image_width: u32,
    image_height: u32,
    padding: f64,
) -> Option<Bounds> {
    let bbox = regions
        .iter()
        .map(|r| r.bbox)
        .reduce(|a, b| a.union(&b))?;
    Bounds::from_bbox(&bbox, image_width, image_height, padding)
}

/// Fill each quad as a polygon into a mask sized to `bounds`. Scanline
/// conversion handles rotated quads without a separate rotated-rect path.
pub fn rasterize_mask(quads: &[Quad], bounds: Bounds) -> Mask {
    let mut mask = Mask::new(bounds);
    for quad in quads {
        fill_quad(&mut mask, quad);
    }
    mask
}

/// Scanline fill of one quad, in mask-local coordinates.
fn fill_quad(mask: &mut Mask, quad: &Quad) {
    let bounds = mask.bounds;
    let pts: Vec<(f64, f64)> = quad
        .points
        .iter()
        .map(|p| (p.x - bounds.x as f64, p.y - bounds.y as f64))
        .collect();

    for row in 0..bounds.height {
        let y = row as f64 + 0.5;
        let mut crossings: Vec<f64> = Vec::with_capacity(4);
        for i in 0..4 {
            let (x0, y0) = pts[i];
            let (x1, y1) = pts[(i + 1) % 4];
            if (y0 <= y && y1 > y) || (y1 <= y && y0 > y) {
                let t = (y - y0) / (y1 - y0);
                crossings.push(x0 + t * (x1 - x0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for pair in crossings.chunks(2) {
            if pair.len() < 2 {
                continue;
            }
            let start = pair[0].max(0.0).round() as i64;
            let end = pair[1].min(bounds.width as f64).round() as i64;
            for x in start..end {
                mask.set(x as u32, row, 255);
            }
        }
    }
}

/// Box-dilate a mask: any pixel whose (2r+1)² window contains foreground
/// becomes foreground (255). Radius 0 is an exact no-op.
pub fn dilate_mask(mask: &Mask, radius: u32) -> Mask {
    if radius == 0 {
        return mask.clone();
    }

    let w = mask.bounds.width as usize;
    let h = mask.bounds.height as usize;
    let r = radius as i64;

    // Summed-area table over the binarized mask, with a one-row/col apron.
    let stride = w + 1;
    let mut integral = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            if mask.data[y * w + x] > 0 {
                row_sum += 1;
            }
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let window_sum = |x: i64, y: i64| -> u64 {
        let x0 = (x - r).clamp(0, w as i64) as usize;
        let y0 = (y - r).clamp(0, h as i64) as usize;
        let x1 = (x + r + 1).clamp(0, w as i64) as usize;
        let y1 = (y + r + 1).clamp(0, h as i64) as usize;
        integral[y1 * stride + x1] + integral[y0 * stride + x0]
            - integral[y0 * stride + x1]
            - integral[y1 * stride + x0]
    };

    let mut out = Mask::new(mask.bounds);
    for y in 0..h {
        for x in 0..w {
            if window_sum(x as i64, y as i64) > 0 {
                out.data[y * w + x] = 255;
            }
        }
    }
    out
}

/// Shared dilation radius for one invocation, scaled to the text size so thin
/// strokes and large headlines both get proportional coverage.
pub fn dilation_radius(regions: &[&Region], config: &InpaintConfig) -> u32 {
    if regions.is_empty() {
        return config.dilation_min;
    }
    let median_dim = median(regions.iter().map(|r| r.bbox.width.min(r.bbox.height)));

    let radius = (config.dilation_scale * median_dim).round() as u32 + 1;
    let radius = radius.clamp(config.dilation_min, config.dilation_max);
    debug!(radius, median_dim, "derived dilation radius");
    radius
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::types::{BoundingBox, Point};

    fn region(x: f64, y: f64, w: f64, h: f64) -> Region {
        let bbox = BoundingBox::new(x, y, w, h);
        Region {
            id: "region_0".to_string(),
            items: Vec::new(),
            bbox,
            quad: Quad::from_bbox(&bbox),
            source_lines: vec!["x".to_string()],
            source_line_count: 1,
            translated_text: String::new(),
            style: None,
        }
    }

    #[test]
    fn union_bounds_empty_set_is_none() {
        assert!(union_bounds(&[], 100, 100, 4.0).is_none());
    }

    #[test]
    fn union_bounds_covers_and_clamps() {
        let a = region(10.0, 10.0, 20.0, 10.0);
        let b = region(80.0, 90.0, 40.0, 40.0);
        let bounds = union_bounds(&[&a, &b], 100, 100, 2.0).unwrap();
        assert_eq!(bounds.x, 8);
        assert_eq!(bounds.y, 8);
        assert_eq!(bounds.right(), 100);
        assert_eq!(bounds.bottom(), 100);
    }

    #[test]
    fn rect_quad_rasterizes_its_area() {
        let bounds = Bounds { x: 0, y: 0, width: 20, height: 20 };
        let quad = Quad::from_bbox(&BoundingBox::new(5.0, 5.0, 10.0, 10.0));
        let mask = rasterize_mask(&[quad], bounds);
        assert_eq!(mask.coverage(), 100);
        assert_eq!(mask.at(10, 10), 255);
        assert_eq!(mask.at(0, 0), 0);
    }

    #[test]
    fn rotated_quad_covers_interior_point() {
        let bounds = Bounds { x: 0, y: 0, width: 40, height: 40 };
        // Diamond centered at (20, 20).
        let quad = Quad::new([
            Point::new(20.0, 5.0),
            Point::new(35.0, 20.0),
            Point::new(20.0, 35.0),
            Point::new(5.0, 20.0),
        ]);
        let mask = rasterize_mask(&[quad], bounds);
        assert_eq!(mask.at(20, 20), 255);
        assert_eq!(mask.at(2, 2), 0);
        assert_eq!(mask.at(38, 2), 0);
    }

    #[test]
    fn dilate_radius_zero_is_identity() {
        let bounds = Bounds { x: 0, y: 0, width: 16, height: 16 };
        let quad = Quad::from_bbox(&BoundingBox::new(4.0, 4.0, 6.0, 6.0));
        let mask = rasterize_mask(&[quad], bounds);
        assert_eq!(dilate_mask(&mask, 0), mask);
    }

    #[test]
    fn dilation_grows_foreground() {
        let bounds = Bounds { x: 0, y: 0, width: 16, height: 16 };
        let mut mask = Mask::new(bounds);
        mask.set(8, 8, 255);
        let dilated = dilate_mask(&mask, 2);
        // 5x5 window around the seed pixel.
        assert_eq!(dilated.coverage(), 25);
        assert_eq!(dilated.at(6, 6), 255);
        assert_eq!(dilated.at(11, 8), 0);
    }

    #[test]
    fn dilation_radius_tracks_text_size() {
        let config = Config::for_tests().inpaint;
        let small = region(0.0, 0.0, 40.0, 12.0);
        assert_eq!(dilation_radius(&[&small], &config), 2);
        let large = region(0.0, 0.0, 900.0, 400.0);
        assert_eq!(dilation_radius(&[&large], &config), 14);
        assert_eq!(dilation_radius(&[], &config), config.dilation_min);
    }

    #[test]
    fn even_region_count_averages_middle_dims() {
        let config = Config::for_tests().inpaint;
        let a = region(0.0, 0.0, 200.0, 50.0);
        let b = region(0.0, 300.0, 200.0, 150.0);
        // Min dims 50 and 150, median 100: round(0.04 * 100) + 1 = 5.
        assert_eq!(dilation_radius(&[&a, &b], &config), 5);
    }
}
