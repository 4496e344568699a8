// Data model for the image translation pipeline.
//
// Everything here is created and destroyed within a single translate_image
// invocation; there is no cross-invocation caching.

use serde::{Deserialize, Serialize};

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Four-corner polygon describing a (possibly rotated) text region.
/// Corners are stored in clockwise order starting at the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub points: [Point; 4],
}

impl Quad {
    pub fn new(points: [Point; 4]) -> Self {
        Self { points }
    }

    /// Axis-aligned quad from a bounding box, corners clockwise from top-left.
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self {
            points: [
                Point::new(bbox.x, bbox.y),
                Point::new(bbox.x + bbox.width, bbox.y),
                Point::new(bbox.x + bbox.width, bbox.y + bbox.height),
                Point::new(bbox.x, bbox.y + bbox.height),
            ],
        }
    }

    /// Smallest axis-aligned box covering all four corners.
    pub fn bounding_box(&self) -> BoundingBox {
        let min_x = self.points.iter().map(|p| p.x).fold(f64::MAX, f64::min);
        let min_y = self.points.iter().map(|p| p.y).fold(f64::MAX, f64::min);
        let max_x = self.points.iter().map(|p| p.x).fold(f64::MIN, f64::max);
        let max_y = self.points.iter().map(|p| p.y).fold(f64::MIN, f64::max);
        BoundingBox {
            x: min_x,
            y: min_y,
            width: (max_x - min_x).max(0.0),
            height: (max_y - min_y).max(0.0),
        }
    }

    pub fn scale(&self, sx: f64, sy: f64) -> Self {
        Self {
            points: self.points.map(|p| Point::new(p.x * sx, p.y * sy)),
        }
    }
}

/// Axis-aligned rectangle in floating-point image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    pub fn scale(&self, sx: f64, sy: f64) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }

    pub fn union(&self, other: &BoundingBox) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let r = self.right().max(other.right());
        let b = self.bottom().max(other.bottom());
        Self {
            x,
            y,
            width: r - x,
            height: b - y,
        }
    }

    /// Vertical overlap (in pixels) between the y-bands of two boxes.
    pub fn vertical_overlap(&self, other: &BoundingBox) -> f64 {
        (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0)
    }
}

/// RGB color triple as delivered by OCR style hints.
pub type Rgb = [u8; 3];

/// Optional foreground/background color hints attached to an OCR item.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ItemStyle {
    pub text: Option<Rgb>,
    pub bg: Option<Rgb>,
}

/// A single OCR token: text plus geometry, as produced by an OCR collaborator.
/// Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrItem {
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quad: Option<Quad>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<ItemStyle>,
}

/// A paragraph-level cluster of OCR items, translated and rendered as one unit.
#[derive(Debug, Clone, Serialize)]
pub struct Region {
    /// Stable identifier within one invocation ("region_0", "region_1", ...).
    pub id: String,
    /// Constituent items in reading order.
    pub items: Vec<OcrItem>,
    /// Union of constituent item boxes, in target-raster coordinates.
    pub bbox: BoundingBox,
    /// Best-fit quadrilateral; equals the bbox corners for axis-aligned text.
    pub quad: Quad,
    /// Per-line joined source text, preserving the original line count.
    pub source_lines: Vec<String>,
    pub source_line_count: usize,
    /// Populated once by the orchestrator; empty means "nothing to render".
    pub translated_text: String,
    /// Averaged color hints from constituent items, if any carried them.
    pub style: Option<ItemStyle>,
}

impl Region {
    pub fn source_text(&self) -> String {
        self.source_lines.join("\n")
    }
}

/// Axis-aligned integer rectangle clamped to image extents.
/// Derived, ephemeral, recomputed per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    /// Expand a floating-point box by `padding` and clamp to the image.
    /// Returns None when the clamped rectangle is empty.
    pub fn from_bbox(
        bbox: &BoundingBox,
        image_width: u32,
        image_height: u32,
        padding: f64,
    ) -> Option<Self> {
        let x0 = (bbox.x - padding).floor().max(0.0) as u32;
        let y0 = (bbox.y - padding).floor().max(0.0) as u32;
        let x1 = ((bbox.right() + padding).ceil() as i64).clamp(0, image_width as i64) as u32;
        let y1 = ((bbox.bottom() + padding).ceil() as i64).clamp(0, image_height as i64) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Whether two bounds are within `gap` pixels of touching.
    pub fn within_gap(&self, other: &Bounds, gap: u32) -> bool {
        let dx = if self.right() <= other.x {
            other.x - self.right()
        } else if other.right() <= self.x {
            self.x - other.right()
        } else {
            0
        };
        let dy = if self.bottom() <= other.y {
            other.y - self.bottom()
        } else if other.bottom() <= self.y {
            self.y - other.bottom()
        } else {
            0
        };
        dx <= gap && dy <= gap
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let r = self.right().max(other.right());
        let b = self.bottom().max(other.bottom());
        Bounds {
            x,
            y,
            width: r - x,
            height: b - y,
        }
    }
}

/// Dense intensity mask over a Bounds window. 0 = keep original pixel,
/// >0 = candidate for inpainting/overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub bounds: Bounds,
    pub data: Vec<u8>,
}

impl Mask {
    pub fn new(bounds: Bounds) -> Self {
        Self {
            data: vec![0; bounds.width as usize * bounds.height as usize],
            bounds,
        }
    }

    #[inline]
    pub fn at(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.bounds.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        self.data[y as usize * self.bounds.width as usize + x as usize] = value;
    }

    /// Number of foreground (>0) pixels.
    pub fn coverage(&self) -> u64 {
        self.data.iter().filter(|&&v| v > 0).count() as u64
    }
}

/// Local luminance texture sampled from the (already inpainted) background.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub bounds: Bounds,
    /// Per-pixel `luma - blurred_luma`, isolating local grain.
    pub contrast: Vec<f32>,
    /// Mean luminance over the window, normalized to [0, 1].
    pub avg_luma: f32,
}

impl TextureData {
    #[inline]
    pub fn contrast_at(&self, x: u32, y: u32) -> f32 {
        self.contrast[y as usize * self.bounds.width as usize + x as usize]
    }
}

/// One labeled intermediate raster captured while debugging.
#[derive(Debug, Clone, Serialize)]
pub struct DebugStep {
    pub label: String,
    /// PNG-encoded snapshot.
    #[serde(skip)]
    pub blob: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Statistics attached to the debug payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranslateStats {
    pub image_width: u32,
    pub image_height: u32,
    pub ocr_width: u32,
    pub ocr_height: u32,
    pub scale_x: f64,
    pub scale_y: f64,
    pub region_count: usize,
    pub out_of_bounds_regions: usize,
    pub bounds: Option<Bounds>,
    pub raw_mask_pixels: u64,
    pub dilated_mask_pixels: u64,
}

/// Optional debug payload returned alongside the translated raster.
#[derive(Debug, Clone, Serialize)]
pub struct DebugArtifacts {
    pub regions: Vec<Region>,
    pub steps: Vec<DebugStep>,
    pub stats: TranslateStats,
}

/// Final pipeline output: a PNG blob at the input's pixel dimensions.
#[derive(Debug, Clone)]
pub struct TranslatedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub debug: Option<DebugArtifacts>,
}

/// A single translation call for one region's joined source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub from: String,
    pub to: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_clamp_to_image() {
        let bbox = BoundingBox::new(-10.0, 5.0, 50.0, 200.0);
        let bounds = Bounds::from_bbox(&bbox, 100, 100, 4.0).unwrap();
        assert_eq!(bounds.x, 0);
        assert_eq!(bounds.y, 1);
        assert_eq!(bounds.right(), 44);
        assert_eq!(bounds.bottom(), 100);
    }

    #[test]
    fn bounds_empty_when_outside_image() {
        let bbox = BoundingBox::new(200.0, 200.0, 10.0, 10.0);
        assert!(Bounds::from_bbox(&bbox, 100, 100, 0.0).is_none());
    }

    #[test]
    fn bounds_gap_adjacency() {
        let a = Bounds { x: 0, y: 0, width: 10, height: 10 };
        let b = Bounds { x: 15, y: 0, width: 10, height: 10 };
        assert!(a.within_gap(&b, 5));
        assert!(!a.within_gap(&b, 4));
        assert!(!a.intersects(&b));
    }

    #[test]
    fn quad_bbox_roundtrip() {
        let bbox = BoundingBox::new(3.0, 4.0, 20.0, 10.0);
        let quad = Quad::from_bbox(&bbox);
        assert_eq!(quad.bounding_box(), bbox);
    }

    #[test]
    fn ocr_item_wire_format() {
        let json = r#"{
            "text": "Hello",
            "confidence": 0.9,
            "boundingBox": {"x": 0.0, "y": 0.0, "width": 40.0, "height": 10.0}
        }"#;
        let item: OcrItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.text, "Hello");
        assert!(item.quad.is_none());
    }
}
