use image::{DynamicImage, GenericImageView};
use tracing::{debug, info, instrument, warn};

use crate::config::RegionConfig;
use crate::detection::{contours, preprocessing};
use crate::geometry::bounding_rect;
use crate::models::BoundingBox;

/// A cropped answer box with its padded position in the page.
#[derive(Debug, Clone)]
pub struct DetectedRegion {
    pub bbox: BoundingBox,
    /// Box before inward padding.
    pub outer: BoundingBox,
    pub image: DynamicImage,
}

/// Locates answer boxes on a rectified page.
#[derive(Debug, Clone, Default)]
pub struct RegionDetector {
    pub config: RegionConfig,
}

impl RegionDetector {
    pub fn new(config: RegionConfig) -> Self {
        Self { config }
    }

    /// Candidate boxes in reading order, padded inward, before cropping.
    #[instrument(skip_all, fields(width = img.width(), height = img.height()))]
    pub fn detect_boxes(&self, img: &DynamicImage) -> Vec<(BoundingBox, BoundingBox)> {
        let cfg = &self.config;
        let (img_w, img_h) = img.dimensions();

        let gray = preprocessing::to_grayscale(img);
        let blurred = preprocessing::apply_blur(&gray, cfg.blur_kernel);
        let binary =
            preprocessing::adaptive_threshold_inv(&blurred, cfg.threshold_block_size, cfg.threshold_c);

        let all = contours::find_all_contours(&binary);
        if all.is_empty() {
            warn!("No contours found; page has no answer boxes");
            return Vec::new();
        }

        let img_area = img_w as f64 * img_h as f64;
        let min_area = img_area * cfg.min_area_ratio;
        let max_area = img_area * cfg.max_area_ratio;

        let mut candidates: Vec<BoundingBox> = all
            .iter()
            .filter_map(|c| {
                let approx = contours::approximate_polygon(&c.points, cfg.approx_epsilon_ratio);
                if approx.len() > cfg.max_vertices {
                    return None;
                }
                let bbox = bounding_rect(&approx)?;
                let area = bbox.area as f64;
                (area > min_area && area < max_area).then_some(bbox)
            })
            .collect();
        debug!(contours = all.len(), candidates = candidates.len(), "Box candidates");

        // Largest first; a later candidate whose corner sits near a kept one
        // is the inner or outer edge of the same drawn box.
        candidates.sort_by(|a, b| b.area.cmp(&a.area));
        let threshold = img_w.min(img_h) as f64 * cfg.duplicate_distance_ratio;
        let mut unique: Vec<BoundingBox> = Vec::new();
        for candidate in candidates {
            let duplicate = unique.iter().any(|kept| {
                (candidate.x as f64 - kept.x as f64).abs() < threshold
                    && (candidate.y as f64 - kept.y as f64).abs() < threshold
            });
            if !duplicate {
                unique.push(candidate);
            }
        }

        unique.truncate(cfg.max_boxes);
        unique.sort_by_key(|b| b.y);

        let boxes: Vec<(BoundingBox, BoundingBox)> = unique
            .into_iter()
            .filter_map(|outer| {
                let padded = pad_inward(&outer, cfg.padding_x, cfg.padding_y, img_w, img_h);
                if padded.is_none() {
                    debug!(?outer, "Box collapsed under padding");
                }
                padded.map(|inner| (inner, outer))
            })
            .collect();

        info!(boxes = boxes.len(), "Answer boxes detected");
        boxes
    }

    /// Crops of the detected boxes, top to bottom.
    pub fn detect(&self, img: &DynamicImage) -> Vec<DetectedRegion> {
        self.detect_boxes(img)
            .into_iter()
            .filter_map(|(bbox, outer)| {
                bbox.crop(img).map(|image| DetectedRegion { bbox, outer, image })
            })
            .collect()
    }
}

/// Shrink a box by the padding, never by more than half its own size, and
/// clip to the image. `None` when nothing is left.
pub fn pad_inward(
    bbox: &BoundingBox,
    padding_x: u32,
    padding_y: u32,
    img_w: u32,
    img_h: u32,
) -> Option<BoundingBox> {
    let pad_x = (padding_x as i64).min(bbox.width as i64 / 2 - 1).max(0);
    let pad_y = (padding_y as i64).min(bbox.height as i64 / 2 - 1).max(0);

    let x1 = (bbox.x as i64 + pad_x).max(0);
    let y1 = (bbox.y as i64 + pad_y).max(0);
    let x2 = (bbox.right() as i64 - pad_x).min(img_w as i64);
    let y2 = (bbox.bottom() as i64 - pad_y).min(img_h as i64);

    if x2 > x1 && y2 > y1 {
        Some(BoundingBox::new(x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_is_clamped_for_small_boxes() {
        let bbox = BoundingBox::new(10, 10, 40, 30);
        let padded = pad_inward(&bbox, 50, 50, 200, 200).unwrap();
        // pad_x = 19, pad_y = 14
        assert_eq!(padded, BoundingBox::new(29, 24, 2, 2));
    }

    #[test]
    fn large_box_gets_full_padding() {
        let bbox = BoundingBox::new(100, 100, 400, 300);
        let padded = pad_inward(&bbox, 50, 50, 1000, 1000).unwrap();
        assert_eq!(padded, BoundingBox::new(150, 150, 300, 200));
    }

    #[test]
    fn tiny_box_is_never_inverted() {
        let bbox = BoundingBox::new(10, 10, 1, 1);
        assert_eq!(pad_inward(&bbox, 50, 50, 100, 100), Some(bbox));
    }

    #[test]
    fn box_outside_image_is_dropped() {
        let bbox = BoundingBox::new(120, 10, 30, 30);
        assert!(pad_inward(&bbox, 5, 5, 100, 100).is_none());
    }
}
