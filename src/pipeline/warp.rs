// Homography warp: maps an axis-aligned rendered text canvas onto an
// arbitrary quadrilateral for rotated/skewed source text.
//
// The forward transform is solved as an 8x8 linear system (h9 fixed at 1);
// destination pixels map back through the analytic inverse and sample the
// source with bilinear interpolation.

use image::RgbaImage;
use rayon::prelude::*;

use crate::core::errors::{WarpError, WarpResult};
use crate::core::types::{BoundingBox, Point, Quad};

/// Pivots below this fail the linear solve.
const PIVOT_EPSILON: f64 = 1e-10;

/// Determinants below this fail the matrix inversion.
const DET_EPSILON: f64 = 1e-8;

pub type Homography = [f64; 9];

/// Fast path test: true when the quad's corners match the bounding box's
/// corners within `epsilon`. Axis-aligned text skips warping entirely.
pub fn is_rect_quad(quad: &Quad, bbox: &BoundingBox, epsilon: f64) -> bool {
    let corners = Quad::from_bbox(bbox).points;
    quad.points
        .iter()
        .zip(corners.iter())
        .all(|(p, c)| (p.x - c.x).abs() <= epsilon && (p.y - c.y).abs() <= epsilon)
}

/// Solve the projective homography mapping `src[i] -> dst[i]` for four point
/// pairs. Returns the row-major 3x3 matrix with the ninth parameter fixed at 1.
pub fn solve_homography(src: &[Point; 4], dst: &[Point; 4]) -> WarpResult<Homography> {
    // Each correspondence contributes two rows of the 8x8 system.
    let mut a = [[0f64; 9]; 8];
    for i in 0..4 {
        let (x, y) = (src[i].x, src[i].y);
        let (u, v) = (dst[i].x, dst[i].y);
        a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u, u];
        a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v, v];
    }

    // Gaussian elimination with partial pivoting on the augmented matrix.
    for col in 0..8 {
        let pivot_row = (col..8)
            .max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))
            .unwrap_or(col);
        let pivot = a[pivot_row][col];
        if pivot.abs() < PIVOT_EPSILON {
            return Err(WarpError::SingularSystem { pivot });
        }
        a.swap(col, pivot_row);

        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col] / a[col][col];
            for k in col..9 {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    let mut h = [0f64; 9];
    for i in 0..8 {
        h[i] = a[i][8] / a[i][i];
    }
    h[8] = 1.0;
    Ok(h)
}

/// Analytic 3x3 inverse via the adjugate. Fails on near-singular matrices.
pub fn invert_homography(h: &Homography) -> WarpResult<Homography> {
    let det = h[0] * (h[4] * h[8] - h[5] * h[7]) - h[1] * (h[3] * h[8] - h[5] * h[6])
        + h[2] * (h[3] * h[7] - h[4] * h[6]);
    if det.abs() < DET_EPSILON {
        return Err(WarpError::SingularMatrix { det });
    }

    let inv_det = 1.0 / det;
    Ok([
        (h[4] * h[8] - h[5] * h[7]) * inv_det,
        (h[2] * h[7] - h[1] * h[8]) * inv_det,
        (h[1] * h[5] - h[2] * h[4]) * inv_det,
        (h[5] * h[6] - h[3] * h[8]) * inv_det,
        (h[0] * h[8] - h[2] * h[6]) * inv_det,
        (h[2] * h[3] - h[0] * h[5]) * inv_det,
        (h[3] * h[7] - h[4] * h[6]) * inv_det,
        (h[1] * h[6] - h[0] * h[7]) * inv_det,
        (h[0] * h[4] - h[1] * h[3]) * inv_det,
    ])
}

/// Apply a homography to one point.
pub fn apply_homography(h: &Homography, p: Point) -> Point {
    let w = h[6] * p.x + h[7] * p.y + h[8];
    Point::new(
        (h[0] * p.x + h[1] * p.y + h[2]) / w,
        (h[3] * p.x + h[4] * p.y + h[5]) / w,
    )
}

/// True when `p` lies inside the quad: the cross-product sign against every
/// edge must be consistent.
pub fn point_in_quad(quad: &Quad, p: Point) -> bool {
    let mut sign = 0i8;
    for i in 0..4 {
        let a = quad.points[i];
        let b = quad.points[(i + 1) % 4];
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        if cross.abs() < f64::EPSILON {
            continue;
        }
        let s = if cross > 0.0 { 1 } else { -1 };
        if sign == 0 {
            sign = s;
        } else if sign != s {
            return false;
        }
    }
    true
}

/// Warp an axis-aligned source canvas onto `quad`.
///
/// Returns the warped raster plus the signed image-space origin of its
/// top-left corner. The origin can be negative when the quad overhangs the
/// left or top image edge; compositing clips, the raster does not. Pixels
/// outside the quad keep zero alpha.
pub fn warp_to_quad(source: &RgbaImage, quad: &Quad) -> WarpResult<(RgbaImage, (i64, i64))> {
    let qbox = quad.bounding_box();
    if qbox.width < 1.0 || qbox.height < 1.0 {
        return Err(WarpError::DegenerateQuad);
    }

    let (src_w, src_h) = source.dimensions();
    let src_corners = [
        Point::new(0.0, 0.0),
        Point::new(src_w as f64, 0.0),
        Point::new(src_w as f64, src_h as f64),
        Point::new(0.0, src_h as f64),
    ];
    let forward = solve_homography(&src_corners, &quad.points)?;
    let inverse = invert_homography(&forward)?;

    let out_x = qbox.x.floor();
    let out_y = qbox.y.floor();
    let out_w = (qbox.right().ceil() - out_x).max(1.0) as u32;
    let out_h = (qbox.bottom().ceil() - out_y).max(1.0) as u32;

    let mut output = RgbaImage::new(out_w, out_h);
    output
        .par_chunks_mut(out_w as usize * 4)
        .enumerate()
        .for_each(|(row, pixels)| {
            for col in 0..out_w as usize {
                let dest = Point::new(out_x + col as f64 + 0.5, out_y + row as f64 + 0.5);
                if !point_in_quad(quad, dest) {
                    continue;
                }
                let src = apply_homography(&inverse, dest);
                if let Some(sample) = bilinear_sample(source, src) {
                    pixels[col * 4..col * 4 + 4].copy_from_slice(&sample);
                }
            }
        });

    Ok((output, (out_x as i64, out_y as i64)))
}

/// Bilinear interpolation of the four nearest source pixels, all channels.
fn bilinear_sample(source: &RgbaImage, p: Point) -> Option<[u8; 4]> {
    let (w, h) = source.dimensions();
    let x = p.x - 0.5;
    let y = p.y - 0.5;
    if x < -1.0 || y < -1.0 || x > w as f64 || y > h as f64 {
        return None;
    }

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let fetch = |px: i64, py: i64| -> [f64; 4] {
        let cx = px.clamp(0, w as i64 - 1) as u32;
        let cy = py.clamp(0, h as i64 - 1) as u32;
        let p = source.get_pixel(cx, cy);
        [p[0] as f64, p[1] as f64, p[2] as f64, p[3] as f64]
    };

    let tl = fetch(x0, y0);
    let tr = fetch(x0 + 1, y0);
    let bl = fetch(x0, y0 + 1);
    let br = fetch(x0 + 1, y0 + 1);

    let mut out = [0u8; 4];
    for ch in 0..4 {
        let top = tl[ch] + (tr[ch] - tl[ch]) * fx;
        let bottom = bl[ch] + (br[ch] - bl[ch]) * fx;
        out[ch] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn rect_quad_matches_its_bbox() {
        let bbox = BoundingBox::new(10.0, 20.0, 100.0, 40.0);
        let quad = Quad::from_bbox(&bbox);
        assert!(is_rect_quad(&quad, &bbox, 0.5));
    }

    #[test]
    fn deviating_corner_breaks_rect_quad() {
        let bbox = BoundingBox::new(10.0, 20.0, 100.0, 40.0);
        let mut quad = Quad::from_bbox(&bbox);
        quad.points[2].x += 0.8;
        assert!(!is_rect_quad(&quad, &bbox, 0.5));
    }

    #[test]
    fn identity_homography_for_identical_quads() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        let h = solve_homography(&pts, &pts).unwrap();
        let expected = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        for (a, b) in h.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn homography_round_trip_on_defining_points() {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(80.0, 0.0),
            Point::new(80.0, 30.0),
            Point::new(0.0, 30.0),
        ];
        let dst = [
            Point::new(5.0, 2.0),
            Point::new(90.0, 8.0),
            Point::new(85.0, 44.0),
            Point::new(2.0, 35.0),
        ];
        let h = solve_homography(&src, &dst).unwrap();
        let inv = invert_homography(&h).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            let mapped = apply_homography(&h, *s);
            assert!((mapped.x - d.x).abs() < 1e-6);
            assert!((mapped.y - d.y).abs() < 1e-6);
            let back = apply_homography(&inv, mapped);
            assert!((back.x - s.x).abs() < 1e-6);
            assert!((back.y - s.y).abs() < 1e-6);
        }
    }

    #[test]
    fn collinear_destination_fails_solve() {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        let dst = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(3.0, 3.0),
        ];
        assert!(solve_homography(&src, &dst).is_err());
    }

    #[test]
    fn point_in_quad_inside_and_out() {
        let quad = Quad::new([
            Point::new(0.0, 0.0),
            Point::new(10.0, 2.0),
            Point::new(9.0, 12.0),
            Point::new(-1.0, 10.0),
        ]);
        assert!(point_in_quad(&quad, Point::new(5.0, 6.0)));
        assert!(!point_in_quad(&quad, Point::new(20.0, 6.0)));
        assert!(!point_in_quad(&quad, Point::new(5.0, -5.0)));
    }

    #[test]
    fn warp_translates_content_into_quad() {
        let source = RgbaImage::from_pixel(20, 10, Rgba([9, 9, 9, 255]));
        // Pure translation by (30, 40).
        let quad = Quad::new([
            Point::new(30.0, 40.0),
            Point::new(50.0, 40.0),
            Point::new(50.0, 50.0),
            Point::new(30.0, 50.0),
        ]);
        let (warped, origin) = warp_to_quad(&source, &quad).unwrap();
        assert_eq!(origin, (30, 40));
        // Interior pixel carries the source color with full alpha.
        let px = warped.get_pixel(10, 5);
        assert_eq!(px[3], 255);
        assert_eq!(px[0], 9);
    }

    #[test]
    fn quad_overhanging_left_edge_keeps_signed_origin() {
        let mut source = RgbaImage::from_pixel(20, 10, Rgba([0, 0, 0, 255]));
        // Marker column at source x = 10.
        for y in 0..10 {
            source.put_pixel(10, y, Rgba([255, 255, 255, 255]));
        }
        // Pure translation by (-5, 0): the marker must land at image x = 5.
        let quad = Quad::new([
            Point::new(-5.0, 0.0),
            Point::new(15.0, 0.0),
            Point::new(15.0, 10.0),
            Point::new(-5.0, 10.0),
        ]);
        let (warped, origin) = warp_to_quad(&source, &quad).unwrap();
        assert_eq!(origin, (-5, 0));
        let col = (5i64 - origin.0) as u32;
        let px = warped.get_pixel(col, 5);
        assert_eq!(px[0], 255);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn pixels_outside_quad_keep_zero_alpha() {
        let source = RgbaImage::from_pixel(20, 20, Rgba([200, 0, 0, 255]));
        // Diamond inside its own 20x20 bounding box.
        let quad = Quad::new([
            Point::new(10.0, 0.0),
            Point::new(20.0, 10.0),
            Point::new(10.0, 20.0),
            Point::new(0.0, 10.0),
        ]);
        let (warped, _) = warp_to_quad(&source, &quad).unwrap();
        assert_eq!(warped.get_pixel(0, 0)[3], 0);
        assert_eq!(warped.get_pixel(19, 0)[3], 0);
        assert_eq!(warped.get_pixel(10, 10)[3], 255);
    }

    #[test]
    fn degenerate_quad_is_rejected() {
        let source = RgbaImage::new(10, 10);
        let quad = Quad::new([
            Point::new(5.0, 5.0),
            Point::new(5.0, 5.0),
            Point::new(5.0, 5.0),
            Point::new(5.0, 5.0),
        ]);
        assert!(warp_to_quad(&source, &quad).is_err());
    }
}
