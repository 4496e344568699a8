// End-to-end image translation orchestrator.
//
// Stage order per invocation: group OCR items into regions, translate all
// regions concurrently, inpaint the source text away, then re-render the
// translations region by region. Any stage failure aborts the whole call;
// the caller never receives a partially translated image.

use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use image::{DynamicImage, RgbaImage};
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{PipelineError, PipelineResult, RegionContext};
use crate::core::types::{
    Bounds, DebugArtifacts, DebugStep, Quad, Region, Rgb, TranslateStats, TranslatedImage,
    TranslationRequest,
};
use crate::pipeline::inpaint::{
    build_inpaint_groups, inpaint_image, should_union_inpaint, InpaintStrategy,
};
use crate::pipeline::layout::{RenderTextRequest, TextLayoutEngine, TextMasks};
use crate::pipeline::mask::{dilate_mask, dilation_radius, rasterize_mask, union_bounds};
use crate::pipeline::regions::{build_regions, RegionOptions, RegionScale};
use crate::pipeline::texture::{blend_layer, luma, sample_texture, text_blend_mode, BlendMode};
use crate::pipeline::warp::{is_rect_quad, warp_to_quad};
use crate::services::translation::Translator;
use crate::utils::image_ops::encode_png_sync;
use crate::utils::Metrics;

/// Corner tolerance below which a quad is treated as axis-aligned.
const RECT_QUAD_EPSILON: f64 = 0.5;

fn is_rtl_lang(code: &str) -> bool {
    let primary = code
        .split(['-', '_'])
        .next()
        .unwrap_or(code)
        .to_ascii_lowercase();
    matches!(primary.as_str(), "ar" | "he" | "fa" | "ur")
}

/// One translation invocation: the decoded image plus its OCR results.
///
/// OCR coordinates refer to the `ocr_width`x`ocr_height` raster the OCR
/// engine saw, which may differ from the image's pixel dimensions.
#[derive(Debug)]
pub struct TranslateImageRequest {
    pub image: DynamicImage,
    pub items: Vec<crate::core::types::OcrItem>,
    pub source_lang: String,
    pub target_lang: String,
    pub ocr_width: u32,
    pub ocr_height: u32,
    pub debug: bool,
}

pub struct ImageTranslator {
    config: Arc<Config>,
    translator: Arc<dyn Translator>,
    layout_engine: Arc<TextLayoutEngine>,
    metrics: Option<Metrics>,
}

impl ImageTranslator {
    pub fn new(
        config: Arc<Config>,
        translator: Arc<dyn Translator>,
        layout_engine: Arc<TextLayoutEngine>,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            config,
            translator,
            layout_engine,
            metrics,
        }
    }

    /// Translate every text region in the image in place.
    #[instrument(skip(self, request), fields(
        source = %request.source_lang,
        target = %request.target_lang,
        items = request.items.len(),
    ))]
    pub async fn translate_image(
        &self,
        request: TranslateImageRequest,
    ) -> PipelineResult<TranslatedImage> {
        let start = Instant::now();

        if request.items.is_empty() {
            return Err(PipelineError::NoOcrRegions);
        }
        if request.ocr_width == 0 || request.ocr_height == 0 {
            return Err(PipelineError::InvalidOcrDimensions {
                width: request.ocr_width,
                height: request.ocr_height,
            });
        }

        let mut canvas = request.image.to_rgba8();
        let (img_w, img_h) = canvas.dimensions();
        let scale = RegionScale {
            x: img_w as f64 / request.ocr_width as f64,
            y: img_h as f64 / request.ocr_height as f64,
        };

        let options = RegionOptions {
            source_lang: &request.source_lang,
            scale,
        };
        let mut regions = build_regions(&request.items, &options, &self.config.grouping);
        if regions.is_empty() {
            return Err(PipelineError::NoOcrRegions);
        }
        let region_count = regions.len();
        debug!(region_count, "grouped OCR items into regions");

        // Translation fan-out: all regions in flight at once; the first
        // failure aborts the call.
        let translations = try_join_all(regions.iter().map(|region| {
            let translator = Arc::clone(&self.translator);
            let request_body = TranslationRequest {
                from: request.source_lang.clone(),
                to: request.target_lang.clone(),
                text: region.source_text(),
            };
            let region_id = region.id.clone();
            async move {
                translator
                    .translate(request_body)
                    .await
                    .with_region_context(&region_id)
            }
        }))
        .await?;
        for (region, translated) in regions.iter_mut().zip(translations) {
            region.translated_text = translated.trim().to_string();
        }

        // Regions whose translation came back empty have nothing to render;
        // an entirely empty set is an error, not a silent no-op.
        let active: Vec<&Region> = regions
            .iter()
            .filter(|r| !r.translated_text.is_empty())
            .collect();
        if active.is_empty() {
            return Err(PipelineError::NoTranslatedText);
        }

        let radius = dilation_radius(&active, &self.config.inpaint);
        // The work window must extend at least the dilation radius past the
        // region boxes, or the dilated mask gets clipped at the window edge.
        let padding = self.config.mask_padding().max(radius as f64);
        let work_bounds = union_bounds(&active, img_w, img_h, padding)
            .ok_or(PipelineError::BoundsUnavailable)?;

        let mut out_of_bounds = 0usize;
        let placeable: Vec<&Region> = active
            .iter()
            .copied()
            .filter(|r| {
                let ok = Bounds::from_bbox(&r.bbox, img_w, img_h, padding).is_some();
                if !ok {
                    out_of_bounds += 1;
                    warn!(region = %r.id, "region outside image; skipped");
                }
                ok
            })
            .collect();
        if placeable.is_empty() {
            return Err(PipelineError::BoundsUnavailable);
        }

        let strategy = InpaintStrategy::from_name(&self.config.inpaint.strategy);

        let mut steps: Vec<DebugStep> = Vec::new();
        let mut raw_mask_pixels = 0u64;
        let mut dilated_mask_pixels = 0u64;

        // Inpainting is grouped: nearby regions often share one balloon or
        // panel, and reconstructing them together avoids seams between
        // per-region fills.
        let member_bounds: Vec<Bounds> = placeable
            .iter()
            .map(|r| {
                // Checked above; placeable regions always produce bounds.
                Bounds::from_bbox(&r.bbox, img_w, img_h, padding)
                    .unwrap_or(work_bounds)
            })
            .collect();
        for group in build_inpaint_groups(&member_bounds, self.config.inpaint.group_gap_px) {
            let group_union = group
                .iter()
                .map(|&i| member_bounds[i])
                .reduce(|a, b| a.union(&b))
                .unwrap_or(work_bounds);
            let group_quads: Vec<Quad> = group.iter().map(|&i| placeable[i].quad).collect();
            let group_mask = rasterize_mask(&group_quads, group_union);
            let group_bounds: Vec<Bounds> = group.iter().map(|&i| member_bounds[i]).collect();

            if should_union_inpaint(
                &group_bounds,
                group_mask.coverage(),
                group_union,
                &self.config.inpaint,
            ) {
                raw_mask_pixels += group_mask.coverage();
                let dilated = dilate_mask(&group_mask, radius);
                dilated_mask_pixels += dilated.coverage();
                inpaint_image(&mut canvas, &dilated, strategy, &self.config.inpaint);
            } else {
                for &i in &group {
                    let mask = rasterize_mask(&[placeable[i].quad], member_bounds[i]);
                    raw_mask_pixels += mask.coverage();
                    let dilated = dilate_mask(&mask, radius);
                    dilated_mask_pixels += dilated.coverage();
                    inpaint_image(&mut canvas, &dilated, strategy, &self.config.inpaint);
                }
            }
        }

        if request.debug {
            capture_step(&mut steps, "inpainted", &canvas);
        }

        // Compositing runs sequentially so overlapping shadows and glyphs
        // stack deterministically in region order.
        let rtl = is_rtl_lang(&request.target_lang);
        for region in &placeable {
            self.render_region(&mut canvas, region, rtl)?;
        }

        apply_noise(&mut canvas, self.config.render.noise_amplitude);

        if request.debug {
            capture_step(&mut steps, "composited", &canvas);
        }

        let png = encode_png(&canvas)?;

        let debug_payload = request.debug.then(|| DebugArtifacts {
            regions: regions.clone(),
            steps,
            stats: TranslateStats {
                image_width: img_w,
                image_height: img_h,
                ocr_width: request.ocr_width,
                ocr_height: request.ocr_height,
                scale_x: scale.x,
                scale_y: scale.y,
                region_count,
                out_of_bounds_regions: out_of_bounds,
                bounds: Some(work_bounds),
                raw_mask_pixels,
                dilated_mask_pixels,
            },
        });

        if let Some(metrics) = &self.metrics {
            metrics.record_image(placeable.len(), start.elapsed());
        }
        info!(
            regions = placeable.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "image translated"
        );

        Ok(TranslatedImage {
            png,
            width: img_w,
            height: img_h,
            debug: debug_payload,
        })
    }

    /// Lay out, optionally warp, and composite one region's translation.
    fn render_region(
        &self,
        canvas: &mut RgbaImage,
        region: &Region,
        rtl: bool,
    ) -> PipelineResult<()> {
        let (img_w, img_h) = canvas.dimensions();
        let bounds = Bounds::from_bbox(&region.bbox, img_w, img_h, 0.0)
            .ok_or(PipelineError::BoundsUnavailable)?;

        let texture = sample_texture(canvas, bounds);
        let text_color = region
            .style
            .as_ref()
            .and_then(|s| s.text)
            .unwrap_or(if texture.avg_luma < 0.5 {
                [255, 255, 255]
            } else {
                [16, 16, 16]
            });
        let shadow_color: Rgb = if luma(text_color[0], text_color[1], text_color[2]) < 128.0 {
            [255, 255, 255]
        } else {
            [0, 0, 0]
        };
        let mode = text_blend_mode(text_color);

        let layout_request = RenderTextRequest {
            text: region.translated_text.clone(),
            box_width: bounds.width,
            box_height: bounds.height,
            target_line_count: region.source_line_count,
            rtl,
        };
        let masks = self.layout_engine.render_text_masks(&layout_request, &self.config.render)?;

        if is_rect_quad(&region.quad, &region.bbox, RECT_QUAD_EPSILON) {
            let origin = (bounds.x as i64, bounds.y as i64);
            blend_layer(
                canvas,
                &masks.shadow_canvas,
                origin,
                shadow_color,
                BlendMode::Shadow,
                None,
                0.0,
            );
            blend_layer(
                canvas,
                &masks.text_canvas,
                origin,
                text_color,
                mode,
                Some(&texture),
                self.config.render.texture_grain,
            );
        } else {
            self.render_warped(canvas, region, &masks, text_color, shadow_color, mode, &texture)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn render_warped(
        &self,
        canvas: &mut RgbaImage,
        region: &Region,
        masks: &TextMasks,
        text_color: Rgb,
        shadow_color: Rgb,
        mode: BlendMode,
        texture: &crate::core::types::TextureData,
    ) -> PipelineResult<()> {
        let (warped_shadow, shadow_origin) = warp_to_quad(&masks.shadow_canvas, &region.quad)
            .with_region_context(&region.id)?;
        let (warped_text, text_origin) =
            warp_to_quad(&masks.text_canvas, &region.quad).with_region_context(&region.id)?;

        blend_layer(
            canvas,
            &warped_shadow,
            shadow_origin,
            shadow_color,
            BlendMode::Shadow,
            None,
            0.0,
        );
        blend_layer(
            canvas,
            &warped_text,
            text_origin,
            text_color,
            mode,
            Some(texture),
            self.config.render.texture_grain,
        );
        Ok(())
    }
}

/// Per-pixel uniform noise over RGB, hiding the statistical flatness of
/// reconstructed areas. Amplitude 0 disables the pass.
fn apply_noise(canvas: &mut RgbaImage, amplitude: f32) {
    if amplitude <= 0.0 {
        return;
    }
    let mut rng = rand::thread_rng();
    for pixel in canvas.pixels_mut() {
        for ch in 0..3 {
            let delta: f32 = rng.gen_range(-amplitude..=amplitude);
            pixel[ch] = (pixel[ch] as f32 + delta).round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn encode_png(canvas: &RgbaImage) -> PipelineResult<Vec<u8>> {
    use image::ImageFormat;
    use std::io::Cursor;

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(canvas.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

fn capture_step(steps: &mut Vec<DebugStep>, label: &str, canvas: &RgbaImage) {
    match encode_png_sync(canvas) {
        Ok(blob) => steps.push(DebugStep {
            label: label.to_string(),
            blob,
            width: canvas.width(),
            height: canvas.height(),
        }),
        Err(err) => warn!(label, %err, "debug snapshot failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BoundingBox, OcrItem};
    use crate::services::translation::MockTranslator;
    use image::Rgba;

    fn translator_with(mock: MockTranslator) -> ImageTranslator {
        let config = Arc::new(Config::for_tests());
        let layout = Arc::new(TextLayoutEngine::new("fonts"));
        ImageTranslator::new(config, Arc::new(mock), layout, Some(Metrics::new()))
    }

    fn item(text: &str, x: f64, y: f64, w: f64, h: f64) -> OcrItem {
        OcrItem {
            text: text.to_string(),
            confidence: 0.95,
            bounding_box: BoundingBox::new(x, y, w, h),
            quad: None,
            style: None,
        }
    }

    fn sample_image(w: u32, h: u32) -> DynamicImage {
        let mut img = image::RgbaImage::from_pixel(w, h, Rgba([128, 128, 128, 255]));
        // Dark "text" strip where the OCR items sit.
        for y in 24..40 {
            for x in 20..180 {
                img.put_pixel(x, y, Rgba([30, 30, 30, 255]));
            }
        }
        DynamicImage::ImageRgba8(img)
    }

    fn request(items: Vec<OcrItem>, debug: bool) -> TranslateImageRequest {
        TranslateImageRequest {
            image: sample_image(256, 128),
            items,
            source_lang: "ja".to_string(),
            target_lang: "en".to_string(),
            ocr_width: 256,
            ocr_height: 128,
            debug,
        }
    }

    #[tokio::test]
    async fn empty_items_abort_with_no_regions() {
        let translator = translator_with(MockTranslator::default());
        let err = translator
            .translate_image(request(Vec::new(), false))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No OCR regions available for translation.");
    }

    #[tokio::test]
    async fn zero_ocr_dimensions_are_rejected() {
        let translator = translator_with(MockTranslator::default());
        let mut req = request(vec![item("テスト", 20.0, 24.0, 160.0, 16.0)], false);
        req.ocr_width = 0;
        let err = translator.translate_image(req).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidOcrDimensions { width: 0, .. }
        ));
    }

    #[tokio::test]
    async fn whitespace_only_items_abort_with_no_regions() {
        let translator = translator_with(MockTranslator::default());
        let err = translator
            .translate_image(request(vec![item("   ", 20.0, 24.0, 160.0, 16.0)], false))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoOcrRegions));
    }

    #[tokio::test]
    async fn empty_translations_abort_with_no_text() {
        let translator = translator_with(MockTranslator::returning("  "));
        let err = translator
            .translate_image(request(vec![item("テスト", 20.0, 24.0, 160.0, 16.0)], false))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No translated text to render.");
    }

    #[tokio::test]
    async fn translates_single_region_end_to_end() {
        let translator = translator_with(MockTranslator::returning("Hello"));
        let result = translator
            .translate_image(request(vec![item("テスト", 20.0, 24.0, 160.0, 16.0)], true))
            .await
            .unwrap();

        assert_eq!(result.width, 256);
        assert_eq!(result.height, 128);
        assert!(!result.png.is_empty());

        let decoded = image::load_from_memory(&result.png).unwrap();
        assert_eq!(decoded.width(), 256);

        let debug = result.debug.unwrap();
        assert_eq!(debug.stats.region_count, 1);
        assert_eq!(debug.regions[0].translated_text, "Hello");
        assert!(debug.stats.raw_mask_pixels > 0);
        assert!(debug.stats.dilated_mask_pixels >= debug.stats.raw_mask_pixels);
        assert_eq!(debug.steps.len(), 2);
    }

    #[tokio::test]
    async fn inpaint_covers_source_text_area() {
        let mut config = Config::for_tests();
        // Noise off so reconstructed pixels can be checked exactly.
        config.render.noise_amplitude = 0.0;
        let translator = ImageTranslator::new(
            Arc::new(config),
            Arc::new(MockTranslator::returning("Hi")),
            Arc::new(TextLayoutEngine::new("fonts")),
            None,
        );

        let result = translator
            .translate_image(request(vec![item("テスト", 20.0, 24.0, 160.0, 16.0)], false))
            .await
            .unwrap();
        let decoded = image::load_from_memory(&result.png).unwrap().to_rgba8();

        // A corner far from any region stays byte-identical.
        assert_eq!(decoded.get_pixel(250, 120), &Rgba([128, 128, 128, 255]));
    }

    #[tokio::test]
    async fn work_window_covers_full_dilation_reach() {
        let mut config = Config::for_tests();
        config.render.noise_amplitude = 0.0;
        let translator = ImageTranslator::new(
            Arc::new(config),
            Arc::new(MockTranslator::returning("Hi")),
            Arc::new(TextLayoutEngine::new("fonts")),
            None,
        );

        // Large region: dilation radius comes out at 10, past the configured
        // 8 px window padding. A glyph fringe 9 px above the box must still
        // land inside the work window and get reconstructed.
        let mut img = image::RgbaImage::from_pixel(600, 400, Rgba([128, 128, 128, 255]));
        img.put_pixel(250, 91, Rgba([10, 10, 10, 255]));
        let req = TranslateImageRequest {
            image: DynamicImage::ImageRgba8(img),
            items: vec![item("見出し", 100.0, 100.0, 300.0, 220.0)],
            source_lang: "ja".to_string(),
            target_lang: "en".to_string(),
            ocr_width: 600,
            ocr_height: 400,
            debug: false,
        };

        let result = translator.translate_image(req).await.unwrap();
        let decoded = image::load_from_memory(&result.png).unwrap().to_rgba8();
        assert!(decoded.get_pixel(250, 91)[0] > 100);
    }

    #[tokio::test]
    async fn two_distant_regions_stay_separate() {
        let translator = translator_with(MockTranslator::returning("Text"));
        let mut req = request(
            vec![
                item("上", 20.0, 10.0, 60.0, 14.0),
                item("下", 20.0, 100.0, 60.0, 14.0),
            ],
            true,
        );
        req.image = sample_image(256, 128);
        let result = translator.translate_image(req).await.unwrap();
        let debug = result.debug.unwrap();
        assert_eq!(debug.stats.region_count, 2);
    }
}
