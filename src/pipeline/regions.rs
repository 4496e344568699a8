// Region builder: clusters raw OCR tokens into lines, then lines into
// paragraphs, producing geometrically and semantically coherent regions.

use tracing::debug;

use crate::core::config::GroupingConfig;
use crate::core::types::{BoundingBox, ItemStyle, OcrItem, Point, Quad, Region};
use crate::pipeline::warp::is_rect_quad;

/// Scale factors mapping OCR-space coordinates into the target raster.
#[derive(Debug, Clone, Copy)]
pub struct RegionScale {
    pub x: f64,
    pub y: f64,
}

/// Options for a single build pass.
#[derive(Debug, Clone)]
pub struct RegionOptions<'a> {
    pub source_lang: &'a str,
    pub scale: RegionScale,
}

struct Line {
    items: Vec<OcrItem>,
    bbox: BoundingBox,
}

impl Line {
    fn new(item: OcrItem) -> Self {
        let bbox = item.bounding_box;
        Self {
            items: vec![item],
            bbox,
        }
    }

    fn push(&mut self, item: OcrItem) {
        self.bbox = self.bbox.union(&item.bounding_box);
        self.items.push(item);
    }
}

/// Language codes whose scripts join tokens without separators.
pub fn is_cjk_lang(code: &str) -> bool {
    let primary = code
        .split(['-', '_'])
        .next()
        .unwrap_or(code)
        .to_ascii_lowercase();
    matches!(primary.as_str(), "zh" | "ja" | "ko")
}

/// Cluster OCR items into paragraph-level regions.
///
/// Items with empty/whitespace-only text are dropped; remaining boxes and
/// quads are scaled by (scale.x, scale.y) into the target raster's space.
/// Zero surviving items yield an empty region list, not an error.
pub fn build_regions(
    items: &[OcrItem],
    options: &RegionOptions<'_>,
    config: &GroupingConfig,
) -> Vec<Region> {
    let scaled: Vec<OcrItem> = items
        .iter()
        .filter(|item| !item.text.trim().is_empty())
        .map(|item| OcrItem {
            text: item.text.clone(),
            confidence: item.confidence,
            bounding_box: item.bounding_box.scale(options.scale.x, options.scale.y),
            quad: item.quad.map(|q| q.scale(options.scale.x, options.scale.y)),
            style: item.style,
        })
        .collect();

    if scaled.is_empty() {
        return Vec::new();
    }

    let lines = group_lines(scaled, config);
    let cjk = is_cjk_lang(options.source_lang);
    let regions = group_paragraphs(lines, cjk, config);

    debug!(
        regions = regions.len(),
        source_lang = options.source_lang,
        "built regions from OCR items"
    );
    regions
}

/// Greedy line assignment: a token joins an existing line when its vertical
/// center is within `line_center_factor * median_height` of the line's center,
/// or its vertical overlap with the line's band is at least `line_overlap_min`.
/// Ties pick the closest-center candidate.
fn group_lines(mut items: Vec<OcrItem>, config: &GroupingConfig) -> Vec<Line> {
    let median_height = median(items.iter().map(|i| i.bounding_box.height));

    items.sort_by(|a, b| {
        a.bounding_box
            .center_y()
            .total_cmp(&b.bounding_box.center_y())
    });

    let mut lines: Vec<Line> = Vec::new();
    for item in items {
        let center = item.bounding_box.center_y();
        let mut best: Option<(usize, f64)> = None;

        for (idx, line) in lines.iter().enumerate() {
            let distance = (line.bbox.center_y() - center).abs();
            let within_center = distance <= config.line_center_factor * median_height;
            let overlap = line.bbox.vertical_overlap(&item.bounding_box);
            let denom = item.bounding_box.height.min(line.bbox.height).max(1e-6);
            let within_band = overlap / denom >= config.line_overlap_min;

            if within_center || within_band {
                match best {
                    Some((_, best_distance)) if best_distance <= distance => {}
                    _ => best = Some((idx, distance)),
                }
            }
        }

        match best {
            Some((idx, _)) => lines[idx].push(item),
            None => lines.push(Line::new(item)),
        }
    }

    // Reading order within each line.
    for line in &mut lines {
        line.items
            .sort_by(|a, b| a.bounding_box.x.total_cmp(&b.bounding_box.x));
    }
    lines
}

/// Join one line's tokens into text. CJK scripts concatenate without
/// separators; everything else is whitespace-normalized and space-joined.
fn join_line_text(line: &Line, cjk: bool) -> String {
    if cjk {
        line.items.iter().map(|i| i.text.trim()).collect()
    } else {
        line.items
            .iter()
            .flat_map(|i| i.text.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Merge top-to-bottom sorted lines into paragraphs while the vertical gap
/// stays within `paragraph_gap_factor * median_line_height`. The gap-to-height
/// ratio is scale-invariant across font sizes.
fn group_paragraphs(mut lines: Vec<Line>, cjk: bool, config: &GroupingConfig) -> Vec<Region> {
    if lines.is_empty() {
        return Vec::new();
    }

    lines.sort_by(|a, b| {
        a.bbox
            .y
            .total_cmp(&b.bbox.y)
            .then(a.bbox.x.total_cmp(&b.bbox.x))
    });

    let median_line_height = median(lines.iter().map(|l| l.bbox.height));
    let max_gap = config.paragraph_gap_factor * median_line_height;

    let mut paragraphs: Vec<Vec<Line>> = Vec::new();
    for line in lines {
        match paragraphs.last_mut() {
            Some(current) => {
                let prev_bottom = current
                    .iter()
                    .map(|l| l.bbox.bottom())
                    .fold(f64::MIN, f64::max);
                if line.bbox.y - prev_bottom <= max_gap {
                    current.push(line);
                } else {
                    paragraphs.push(vec![line]);
                }
            }
            None => paragraphs.push(vec![line]),
        }
    }

    paragraphs
        .into_iter()
        .enumerate()
        .map(|(idx, lines)| build_region(idx, lines, cjk))
        .collect()
}

fn build_region(index: usize, lines: Vec<Line>, cjk: bool) -> Region {
    let source_lines: Vec<String> = lines.iter().map(|l| join_line_text(l, cjk)).collect();

    let bbox = lines
        .iter()
        .flat_map(|l| l.items.iter())
        .map(|i| i.bounding_box)
        .reduce(|a, b| a.union(&b))
        .unwrap_or_default();

    let items: Vec<OcrItem> = lines.into_iter().flat_map(|l| l.items).collect();
    let quad = region_quad(&items, &bbox);
    let style = average_style(&items);

    Region {
        id: format!("region_{index}"),
        source_line_count: source_lines.len(),
        source_lines,
        bbox,
        quad,
        items,
        translated_text: String::new(),
        style,
    }
}

/// Region quad defaults to the bbox corners. When item-supplied quads diverge
/// significantly from their own boxes (rotated/skewed text), derive the quad
/// from the items' corner extremes instead so warp detection can kick in.
fn region_quad(items: &[OcrItem], bbox: &BoundingBox) -> Quad {
    let rotated = items.iter().any(|item| {
        item.quad
            .map(|q| !is_rect_quad(&q, &item.bounding_box, 0.5))
            .unwrap_or(false)
    });
    if !rotated {
        return Quad::from_bbox(bbox);
    }

    // Corner extremes over all item quad points: top-left minimizes x+y,
    // bottom-right maximizes it, and the diagonal x-y picks the other two.
    let points: Vec<Point> = items
        .iter()
        .filter_map(|i| i.quad)
        .flat_map(|q| q.points)
        .collect();
    if points.is_empty() {
        return Quad::from_bbox(bbox);
    }

    let corner = |key: fn(&Point) -> f64| {
        points
            .iter()
            .copied()
            .max_by(|a, b| key(a).total_cmp(&key(b)))
            .unwrap_or_default()
    };
    Quad::new([
        corner(|p| -(p.x + p.y)),
        corner(|p| p.x - p.y),
        corner(|p| p.x + p.y),
        corner(|p| p.y - p.x),
    ])
}

/// Per-channel average of any item-supplied text/background colors.
/// Regions with no hints get none; render-time contrast picks colors instead.
fn average_style(items: &[OcrItem]) -> Option<ItemStyle> {
    let average = |select: fn(&ItemStyle) -> Option<[u8; 3]>| {
        let colors: Vec<[u8; 3]> = items
            .iter()
            .filter_map(|i| i.style.as_ref().and_then(select))
            .collect();
        if colors.is_empty() {
            return None;
        }
        let mut sums = [0u32; 3];
        for c in &colors {
            for ch in 0..3 {
                sums[ch] += c[ch] as u32;
            }
        }
        Some([
            (sums[0] / colors.len() as u32) as u8,
            (sums[1] / colors.len() as u32) as u8,
            (sums[2] / colors.len() as u32) as u8,
        ])
    };

    let text = average(|s| s.text);
    let bg = average(|s| s.bg);
    if text.is_none() && bg.is_none() {
        None
    } else {
        Some(ItemStyle { text, bg })
    }
}

pub(super) fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = values.collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;

    fn item(text: &str, x: f64, y: f64, w: f64, h: f64) -> OcrItem {
        OcrItem {
            text: text.to_string(),
            confidence: 0.95,
            bounding_box: BoundingBox::new(x, y, w, h),
            quad: None,
            style: None,
        }
    }

    fn options(lang: &'static str) -> RegionOptions<'static> {
        RegionOptions {
            source_lang: lang,
            scale: RegionScale { x: 1.0, y: 1.0 },
        }
    }

    fn grouping() -> crate::core::config::GroupingConfig {
        Config::for_tests().grouping
    }

    #[test]
    fn same_row_items_form_one_line() {
        let items = vec![item("Hello", 0.0, 0.0, 40.0, 10.0), item("World", 50.0, 0.0, 40.0, 10.0)];
        let regions = build_regions(&items, &options("en"), &grouping());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].source_lines, vec!["Hello World"]);
        assert_eq!(regions[0].source_line_count, 1);
    }

    #[test]
    fn distant_rows_form_separate_regions() {
        let items = vec![item("Top", 0.0, 0.0, 30.0, 10.0), item("Bottom", 0.0, 100.0, 30.0, 10.0)];
        let regions = build_regions(&items, &options("en"), &grouping());
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].source_lines, vec!["Top"]);
        assert_eq!(regions[1].source_lines, vec!["Bottom"]);
    }

    #[test]
    fn close_rows_merge_into_one_paragraph() {
        // Gap of 4px with line height 10px stays within 0.7x.
        let items = vec![item("first", 0.0, 0.0, 30.0, 10.0), item("second", 0.0, 14.0, 30.0, 10.0)];
        let regions = build_regions(&items, &options("en"), &grouping());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].source_line_count, 2);
        assert_eq!(regions[0].source_lines, vec!["first", "second"]);
    }

    #[test]
    fn cjk_join_has_no_separator() {
        let items = vec![item("你", 0.0, 0.0, 10.0, 10.0), item("好", 12.0, 0.0, 10.0, 10.0)];
        let regions = build_regions(&items, &options("zh"), &grouping());
        assert_eq!(regions[0].source_lines, vec!["你好"]);
    }

    #[test]
    fn cjk_applies_to_subtags() {
        assert!(is_cjk_lang("zh-TW"));
        assert!(is_cjk_lang("ja_JP"));
        assert!(!is_cjk_lang("en-US"));
    }

    #[test]
    fn whitespace_only_items_are_dropped() {
        let items = vec![item("  ", 0.0, 0.0, 10.0, 10.0), item("\t", 0.0, 20.0, 10.0, 10.0)];
        let regions = build_regions(&items, &options("en"), &grouping());
        assert!(regions.is_empty());
    }

    #[test]
    fn coordinates_scale_into_raster_space() {
        let items = vec![item("x", 10.0, 10.0, 20.0, 10.0)];
        let opts = RegionOptions {
            source_lang: "en",
            scale: RegionScale { x: 2.0, y: 3.0 },
        };
        let regions = build_regions(&items, &opts, &grouping());
        assert_eq!(regions[0].bbox, BoundingBox::new(20.0, 30.0, 40.0, 30.0));
    }

    #[test]
    fn line_order_is_left_to_right() {
        let items = vec![item("World", 50.0, 0.0, 40.0, 10.0), item("Hello", 0.0, 1.0, 40.0, 10.0)];
        let regions = build_regions(&items, &options("en"), &grouping());
        assert_eq!(regions[0].source_lines, vec!["Hello World"]);
    }

    #[test]
    fn style_hints_are_averaged() {
        let mut a = item("a", 0.0, 0.0, 10.0, 10.0);
        a.style = Some(ItemStyle {
            text: Some([10, 20, 30]),
            bg: None,
        });
        let mut b = item("b", 12.0, 0.0, 10.0, 10.0);
        b.style = Some(ItemStyle {
            text: Some([30, 40, 50]),
            bg: None,
        });
        let regions = build_regions(&[a, b], &options("en"), &grouping());
        let style = regions[0].style.unwrap();
        assert_eq!(style.text, Some([20, 30, 40]));
        assert_eq!(style.bg, None);
    }

    #[test]
    fn rotated_item_quads_shape_the_region_quad() {
        let mut a = item("tilt", 0.0, 0.0, 40.0, 10.0);
        a.quad = Some(Quad::new([
            Point::new(2.0, 0.0),
            Point::new(40.0, 4.0),
            Point::new(38.0, 14.0),
            Point::new(0.0, 10.0),
        ]));
        let regions = build_regions(&[a], &options("en"), &grouping());
        let quad = regions[0].quad;
        assert!(!is_rect_quad(&quad, &regions[0].bbox, 0.5));
    }
}
