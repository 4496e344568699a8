// Text layout and glyph rasterization with cosmic-text.
//
// The engine wraps text itself (instead of delegating to cosmic-text's Wrap)
// so the font-fit search can compare wrapped line counts against the source
// layout; cosmic-text is used for shaping, measuring, and drawing only.

use cosmic_text::{
    fontdb, Attrs, Buffer, Color as CosmicColor, Family, FontSystem, Metrics, Shaping, SwashCache,
};
use image::RgbaImage;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::config::RenderConfig;
use crate::core::errors::{PipelineError, PipelineResult};

/// Smallest font size the fit search will return.
const MIN_FONT_SIZE: u32 = 8;

/// Binary search iterations for the fit search.
const FIT_ITERATIONS: u32 = 12;

/// Fraction of the target box a fitting layout may occupy.
const FIT_TOLERANCE: f32 = 0.98;

/// Line height as a multiple of the font size.
const LINE_HEIGHT_FACTOR: f32 = 1.2;

/// Alpha mixing weight of the 3x3 neighborhood in the soften pass.
const SOFTEN_FACTOR: f32 = 0.4;

/// Detect CJK codepoints; CJK text wraps per character instead of per word.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c,
            '\u{4E00}'..='\u{9FFF}' |  // CJK Unified Ideographs
            '\u{3040}'..='\u{309F}' |  // Hiragana
            '\u{30A0}'..='\u{30FF}' |  // Katakana
            '\u{AC00}'..='\u{D7AF}'    // Hangul
        )
    })
}

fn contains_arabic(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}'))
}

/// One region's rendering request: translated text plus the box it must fill.
#[derive(Debug, Clone)]
pub struct RenderTextRequest {
    pub text: String,
    pub box_width: u32,
    pub box_height: u32,
    /// Line count of the source text; the fit search prefers layouts close
    /// to it so paragraph shape survives translation.
    pub target_line_count: usize,
    pub rtl: bool,
}

/// Rasterized text layers for one region. Color is applied later during
/// compositing; the canvases carry coverage in their alpha channel.
#[derive(Debug, Clone)]
pub struct TextMasks {
    pub text_canvas: RgbaImage,
    pub shadow_canvas: RgbaImage,
    pub lines: Vec<String>,
    pub font_size: u32,
    pub line_height: f32,
}

/// Shared shaping engine. FontSystem and SwashCache are behind mutexes so the
/// engine can be used from the blocking pipeline without cloning font data.
pub struct TextLayoutEngine {
    font_system: Mutex<FontSystem>,
    swash_cache: Mutex<SwashCache>,
}

impl TextLayoutEngine {
    /// Build an engine from the fonts directory only, skipping the system
    /// font scan.
    pub fn new(fonts_dir: &str) -> Self {
        let mut db = fontdb::Database::new();
        let mut loaded = 0usize;

        if let Ok(entries) = std::fs::read_dir(fonts_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_font = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc"))
                    .unwrap_or(false);
                if !is_font {
                    continue;
                }
                match std::fs::read(&path) {
                    Ok(data) => {
                        db.load_font_data(data);
                        loaded += 1;
                        debug!(path = %path.display(), "loaded font");
                    }
                    Err(err) => warn!(path = %path.display(), %err, "failed to read font"),
                }
            }
        }

        if loaded == 0 {
            warn!(fonts_dir, "no fonts loaded; falling back to system fonts");
            return Self {
                font_system: Mutex::new(FontSystem::new()),
                swash_cache: Mutex::new(SwashCache::new()),
            };
        }

        info!(loaded, fonts_dir, "font system initialized");
        Self {
            font_system: Mutex::new(FontSystem::new_with_locale_and_db(
                "en-US".to_string(),
                db,
            )),
            swash_cache: Mutex::new(SwashCache::new()),
        }
    }

    fn font_family(text: &str) -> Family<'static> {
        if contains_cjk(text) {
            Family::Name("Noto Sans CJK SC")
        } else if contains_arabic(text) {
            Family::Name("Noto Naskh Arabic")
        } else {
            Family::SansSerif
        }
    }

    /// Width of one already-wrapped line at `font_size`, from actual glyph
    /// bounds rather than logical advances.
    fn measure_line(
        font_system: &mut FontSystem,
        line: &str,
        family: Family<'static>,
        font_size: f32,
    ) -> f32 {
        if line.trim().is_empty() {
            return 0.0;
        }

        let metrics = Metrics::new(font_size, font_size * LINE_HEIGHT_FACTOR);
        let mut buffer = Buffer::new(font_system, metrics);
        buffer.set_size(font_system, None, None);
        let attrs = Attrs::new().family(family);
        buffer.set_text(font_system, line, &attrs, Shaping::Advanced);
        buffer.shape_until_scroll(font_system, false);

        let mut width = 0f32;
        for run in buffer.layout_runs() {
            let (min_x, max_x) = run
                .glyphs
                .iter()
                .map(|g| (g.x, g.x + g.w))
                .fold((f32::MAX, f32::MIN), |(lo, hi), (a, b)| {
                    (lo.min(a), hi.max(b))
                });
            let run_w = if min_x == f32::MAX {
                run.line_w
            } else {
                max_x - min_x.min(0.0)
            };
            width = width.max(run_w);
        }
        width
    }

    /// Greedy wrap of `text` into lines no wider than `max_width`.
    ///
    /// Explicit newlines are hard breaks. Within a segment, CJK text breaks
    /// between any two characters; other scripts break at whitespace. A
    /// single token wider than the box gets its own line rather than being
    /// split mid-glyph.
    fn wrap_lines(
        font_system: &mut FontSystem,
        text: &str,
        family: Family<'static>,
        font_size: f32,
        max_width: f32,
    ) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        for segment in text.split('\n') {
            Self::wrap_segment(font_system, segment, family, font_size, max_width, &mut lines);
        }
        lines
    }

    fn wrap_segment(
        font_system: &mut FontSystem,
        segment: &str,
        family: Family<'static>,
        font_size: f32,
        max_width: f32,
        lines: &mut Vec<String>,
    ) {
        let cjk = contains_cjk(segment);
        let tokens: Vec<String> = if cjk {
            segment
                .chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| c.to_string())
                .collect()
        } else {
            segment.split_whitespace().map(|t| t.to_string()).collect()
        };
        let separator = if cjk { "" } else { " " };

        let mut current = String::new();
        for token in tokens {
            let candidate = if current.is_empty() {
                token.clone()
            } else {
                format!("{current}{separator}{token}")
            };
            if Self::measure_line(font_system, &candidate, family, font_size) <= max_width
                || current.is_empty()
            {
                current = candidate;
            } else {
                lines.push(std::mem::take(&mut current));
                current = token;
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    /// Binary search over integer font sizes in [MIN_FONT_SIZE, box_height].
    ///
    /// Among fitting candidates, prefer the layout whose line count is
    /// closest to `target_line_count`; ties go to the larger size.
    fn fit_font_size(
        font_system: &mut FontSystem,
        request: &RenderTextRequest,
        family: Family<'static>,
    ) -> (u32, Vec<String>) {
        let max_width = request.box_width as f32 * FIT_TOLERANCE;
        let max_height = request.box_height as f32 * FIT_TOLERANCE;

        let mut lo = MIN_FONT_SIZE;
        let mut hi = request.box_height.max(MIN_FONT_SIZE);
        let mut best: Option<(u32, Vec<String>)> = None;

        for _ in 0..FIT_ITERATIONS {
            let mid = (lo + hi) / 2;
            let size = mid as f32;
            let lines = Self::wrap_lines(font_system, &request.text, family, size, max_width);

            let widest = lines
                .iter()
                .map(|l| Self::measure_line(font_system, l, family, size))
                .fold(0f32, f32::max);
            let height = lines.len() as f32 * size * LINE_HEIGHT_FACTOR;
            let fits = widest <= max_width && height <= max_height;

            if fits {
                let replace = match &best {
                    None => true,
                    Some((best_size, best_lines)) => {
                        let dist = lines.len().abs_diff(request.target_line_count);
                        let best_dist = best_lines.len().abs_diff(request.target_line_count);
                        dist < best_dist || (dist == best_dist && mid > *best_size)
                    }
                };
                if replace {
                    best = Some((mid, lines));
                }
                lo = mid + 1;
            } else if mid <= MIN_FONT_SIZE {
                break;
            } else {
                hi = mid - 1;
            }
            if lo > hi {
                break;
            }
        }

        // Even at the minimum size nothing fit; wrap at minimum and clip.
        best.unwrap_or_else(|| {
            let lines = Self::wrap_lines(
                font_system,
                &request.text,
                family,
                MIN_FONT_SIZE as f32,
                max_width,
            );
            (MIN_FONT_SIZE, lines)
        })
    }

    /// Lay out and rasterize one region's text into coverage canvases.
    pub fn render_text_masks(
        &self,
        request: &RenderTextRequest,
        config: &RenderConfig,
    ) -> PipelineResult<TextMasks> {
        if request.text.trim().is_empty() {
            return Err(PipelineError::NoTranslatedText);
        }

        let family = Self::font_family(&request.text);
        let mut font_system = self.font_system.lock();
        let mut swash_cache = self.swash_cache.lock();

        let (font_size, lines) = Self::fit_font_size(&mut font_system, request, family);
        let line_height = font_size as f32 * LINE_HEIGHT_FACTOR;
        debug!(
            font_size,
            line_count = lines.len(),
            target = request.target_line_count,
            "fitted text layout"
        );

        let w = request.box_width.max(1);
        let h = request.box_height.max(1);
        let mut text_canvas = RgbaImage::new(w, h);

        // Vertically center the block; horizontally anchor per direction.
        let block_height = lines.len() as f32 * line_height;
        let y_start = ((h as f32 - block_height) / 2.0).max(0.0);

        for (index, line) in lines.iter().enumerate() {
            let line_width = Self::measure_line(&mut font_system, line, family, font_size as f32);
            let x = if request.rtl {
                (w as f32 - line_width).max(0.0)
            } else {
                0.0
            };
            let y = y_start + index as f32 * line_height;
            draw_line(
                &mut font_system,
                &mut swash_cache,
                &mut text_canvas,
                line,
                family,
                font_size as f32,
                line_height,
                x.round() as i32,
                y.round() as i32,
            );
        }

        soften_alpha(&mut text_canvas);

        let mut shadow_canvas = offset_copy(
            &text_canvas,
            config.shadow_offset_x,
            config.shadow_offset_y,
        );
        let radius = config.shadow_blur.round().max(1.0) as u32;
        for _ in 0..3 {
            box_blur_alpha(&mut shadow_canvas, radius);
        }

        Ok(TextMasks {
            text_canvas,
            shadow_canvas,
            lines,
            font_size,
            line_height,
        })
    }
}

/// Shape and draw one line into the canvas at (x, y). Glyph coverage lands in
/// the alpha channel; color channels stay white for the compositor.
#[allow(clippy::too_many_arguments)]
fn draw_line(
    font_system: &mut FontSystem,
    swash_cache: &mut SwashCache,
    canvas: &mut RgbaImage,
    line: &str,
    family: Family<'static>,
    font_size: f32,
    line_height: f32,
    x: i32,
    y: i32,
) {
    let metrics = Metrics::new(font_size, line_height);
    let mut buffer = Buffer::new(font_system, metrics);
    buffer.set_size(font_system, None, None);
    let attrs = Attrs::new().family(family);
    buffer.set_text(font_system, line, &attrs, Shaping::Advanced);
    buffer.shape_until_scroll(font_system, false);

    let (w, h) = canvas.dimensions();
    let white = CosmicColor::rgba(255, 255, 255, 255);
    buffer.draw(font_system, swash_cache, white, |px, py, _gw, _gh, color| {
        let cx = x + px;
        let cy = y + py;
        if cx < 0 || cy < 0 || cx >= w as i32 || cy >= h as i32 {
            return;
        }
        let pixel = canvas.get_pixel_mut(cx as u32, cy as u32);
        pixel[0] = 255;
        pixel[1] = 255;
        pixel[2] = 255;
        pixel[3] = pixel[3].max(color.a());
    });
}

/// Mix each pixel's alpha with its 3x3 neighborhood average to take the
/// digital edge off rasterized glyphs.
fn soften_alpha(canvas: &mut RgbaImage) {
    let (w, h) = canvas.dimensions();
    let snapshot: Vec<u8> = canvas.pixels().map(|p| p[3]).collect();

    for y in 0..h {
        for x in 0..w {
            let mut sum = 0u32;
            let mut count = 0u32;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    sum += snapshot[ny as usize * w as usize + nx as usize] as u32;
                    count += 1;
                }
            }
            let avg = (sum / count.max(1)) as f32;
            let original = snapshot[y as usize * w as usize + x as usize] as f32;
            let softened = original * (1.0 - SOFTEN_FACTOR) + avg * SOFTEN_FACTOR;
            canvas.get_pixel_mut(x, y)[3] = softened.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Copy a canvas shifted by (dx, dy), clipping at the edges.
fn offset_copy(canvas: &RgbaImage, dx: i32, dy: i32) -> RgbaImage {
    let (w, h) = canvas.dimensions();
    let mut out = RgbaImage::new(w, h);
    for (x, y, px) in canvas.enumerate_pixels() {
        if px[3] == 0 {
            continue;
        }
        let nx = x as i32 + dx;
        let ny = y as i32 + dy;
        if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
            continue;
        }
        out.put_pixel(nx as u32, ny as u32, *px);
    }
    out
}

/// Single box-blur pass over the alpha channel.
fn box_blur_alpha(canvas: &mut RgbaImage, radius: u32) {
    let (w, h) = canvas.dimensions();
    let r = radius as i64;
    let snapshot: Vec<u8> = canvas.pixels().map(|p| p[3]).collect();

    for y in 0..h {
        for x in 0..w {
            let mut sum = 0u32;
            let mut count = 0u32;
            for dy in -r..=r {
                for dx in -r..=r {
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    sum += snapshot[ny as usize * w as usize + nx as usize] as u32;
                    count += 1;
                }
            }
            let blurred = (sum / count.max(1)) as u8;
            let pixel = canvas.get_pixel_mut(x, y);
            pixel[3] = blurred;
            if blurred > 0 && pixel[0] == 0 {
                pixel[0] = 255;
                pixel[1] = 255;
                pixel[2] = 255;
            }
        }
    }
}
