// Local luminance texture sampling and polarity-aware compositing.
//
// Texture isolates micro-contrast ("grain") by subtracting a box blur of the
// luminance from itself; compositing modulates glyph alpha with that grain so
// rendered text integrates with the surface instead of looking pasted on.

use image::RgbaImage;

use crate::core::types::{Bounds, Rgb, TextureData};

/// Blur radius for the luminance high-pass filter.
const TEXTURE_BLUR_RADIUS: i64 = 2;

/// Text colors with luma below this read as perceptually dark.
const DARK_LUMA_CUTOFF: f32 = 128.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Straight alpha blend of the shadow color over the background.
    Shadow,
    /// Dark text: multiply against the background, preserving texture.
    Multiply,
    /// Light text: screen blend, brightening without flattening texture.
    Screen,
}

pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Pick the composite mode for a main-text color by perceptual darkness.
pub fn text_blend_mode(color: Rgb) -> BlendMode {
    if luma(color[0], color[1], color[2]) < DARK_LUMA_CUTOFF {
        BlendMode::Multiply
    } else {
        BlendMode::Screen
    }
}

/// Sample per-pixel local contrast and the window-average luminance from the
/// (already inpainted) background within `bounds`.
pub fn sample_texture(image: &RgbaImage, bounds: Bounds) -> TextureData {
    let w = bounds.width as usize;
    let h = bounds.height as usize;

    let mut lumas = vec![0f32; w * h];
    let mut total = 0f64;
    for y in 0..h {
        for x in 0..w {
            let px = image.get_pixel(bounds.x + x as u32, bounds.y + y as u32);
            let l = luma(px[0], px[1], px[2]);
            lumas[y * w + x] = l;
            total += l as f64;
        }
    }
    let avg_luma = (total / (w * h) as f64 / 255.0) as f32;

    // Integral image over luminance for the O(1) windowed blur.
    let stride = w + 1;
    let mut integral = vec![0f64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0f64;
        for x in 0..w {
            row_sum += lumas[y * w + x] as f64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let r = TEXTURE_BLUR_RADIUS;
    let mut contrast = vec![0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let x0 = (x as i64 - r).clamp(0, w as i64) as usize;
            let y0 = (y as i64 - r).clamp(0, h as i64) as usize;
            let x1 = (x as i64 + r + 1).clamp(0, w as i64) as usize;
            let y1 = (y as i64 + r + 1).clamp(0, h as i64) as usize;
            let area = ((x1 - x0) * (y1 - y0)).max(1) as f64;
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            contrast[y * w + x] = lumas[y * w + x] - (sum / area) as f32;
        }
    }

    TextureData {
        bounds,
        contrast,
        avg_luma,
    }
}

/// Composite one rendered glyph layer onto the background.
///
/// `layer` supplies per-pixel coverage via its alpha channel; `origin` places
/// the layer's top-left corner in target coordinates. Main-text passes carry
/// a texture reference and a grain fraction; shadow passes never do.
#[allow(clippy::too_many_arguments)]
pub fn blend_layer(
    target: &mut RgbaImage,
    layer: &RgbaImage,
    origin: (i64, i64),
    color: Rgb,
    mode: BlendMode,
    texture: Option<&TextureData>,
    grain: f32,
) {
    let (img_w, img_h) = target.dimensions();

    for (lx, ly, layer_px) in layer.enumerate_pixels() {
        if layer_px[3] == 0 {
            continue;
        }
        let tx = origin.0 + lx as i64;
        let ty = origin.1 + ly as i64;
        if tx < 0 || ty < 0 || tx >= img_w as i64 || ty >= img_h as i64 {
            continue;
        }
        let (tx, ty) = (tx as u32, ty as u32);

        let mut alpha = layer_px[3] as f32 / 255.0;
        if mode != BlendMode::Shadow {
            if let Some(texture) = texture {
                let b = texture.bounds;
                if tx >= b.x && tx < b.right() && ty >= b.y && ty < b.bottom() {
                    let t = texture.contrast_at(tx - b.x, ty - b.y);
                    let factor = (1.0 + grain * (t / 64.0)).clamp(1.0 - grain, 1.0 + grain);
                    alpha = (alpha * factor).clamp(0.0, 1.0);
                }
            }
        }

        let bg = *target.get_pixel(tx, ty);
        let mut out = bg;
        for ch in 0..3 {
            let b = bg[ch] as f32;
            let c = color[ch] as f32;
            let blended = match mode {
                BlendMode::Shadow => c,
                BlendMode::Multiply => b * c / 255.0,
                BlendMode::Screen => 255.0 - (255.0 - b) * (255.0 - c) / 255.0,
            };
            out[ch] = (b + (blended - b) * alpha).round().clamp(0.0, 255.0) as u8;
        }
        out[3] = bg[3].max(layer_px[3]);
        target.put_pixel(tx, ty, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn bounds(w: u32, h: u32) -> Bounds {
        Bounds { x: 0, y: 0, width: w, height: h }
    }

    #[test]
    fn flat_surface_has_zero_contrast() {
        let image = RgbaImage::from_pixel(16, 16, Rgba([100, 100, 100, 255]));
        let texture = sample_texture(&image, bounds(16, 16));
        assert!((texture.avg_luma - 100.0 / 255.0).abs() < 1e-3);
        assert!(texture.contrast.iter().all(|c| c.abs() < 1e-3));
    }

    #[test]
    fn bright_speck_yields_positive_contrast() {
        let mut image = RgbaImage::from_pixel(16, 16, Rgba([50, 50, 50, 255]));
        image.put_pixel(8, 8, Rgba([250, 250, 250, 255]));
        let texture = sample_texture(&image, bounds(16, 16));
        assert!(texture.contrast_at(8, 8) > 100.0);
        assert!(texture.contrast_at(0, 0).abs() < 1e-3);
    }

    #[test]
    fn dark_text_multiplies_light_text_screens() {
        assert_eq!(text_blend_mode([20, 20, 20]), BlendMode::Multiply);
        assert_eq!(text_blend_mode([240, 240, 240]), BlendMode::Screen);
    }

    #[test]
    fn shadow_blend_is_straight_alpha() {
        let mut target = RgbaImage::from_pixel(4, 4, Rgba([200, 200, 200, 255]));
        let mut layer = RgbaImage::new(4, 4);
        layer.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
        blend_layer(&mut target, &layer, (0, 0), [40, 40, 40], BlendMode::Shadow, None, 0.0);
        assert_eq!(target.get_pixel(1, 1), &Rgba([40, 40, 40, 255]));
        assert_eq!(target.get_pixel(0, 0), &Rgba([200, 200, 200, 255]));
    }

    #[test]
    fn multiply_darkens_screen_brightens() {
        let mut target = RgbaImage::from_pixel(2, 2, Rgba([100, 100, 100, 255]));
        let mut layer = RgbaImage::new(2, 2);
        layer.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        layer.put_pixel(1, 0, Rgba([0, 0, 0, 255]));

        blend_layer(&mut target, &layer, (0, 0), [64, 64, 64], BlendMode::Multiply, None, 0.0);
        assert!(target.get_pixel(0, 0)[0] < 100);

        let mut target2 = RgbaImage::from_pixel(2, 2, Rgba([100, 100, 100, 255]));
        blend_layer(&mut target2, &layer, (0, 0), [200, 200, 200], BlendMode::Screen, None, 0.0);
        assert!(target2.get_pixel(0, 0)[0] > 100);
    }

    #[test]
    fn layer_clips_at_image_edges() {
        let mut target = RgbaImage::from_pixel(4, 4, Rgba([10, 10, 10, 255]));
        let layer = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        // Partially off-canvas placement must not panic.
        blend_layer(&mut target, &layer, (-2, -2), [255, 255, 255], BlendMode::Screen, None, 0.0);
        assert!(target.get_pixel(0, 0)[0] > 10);
    }
}
