use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::RecognitionConfig;
use crate::detection::line_cleaner::LineCleaner;
use crate::detection::perspective::PerspectiveRectifier;
use crate::detection::preprocessing;
use crate::detection::regions::RegionDetector;
use crate::detection::segmentation::{self, LineSegmenter};
use crate::detection::skew::SkewCorrector;
use crate::error::Result;
use crate::pipeline::{keys, MetadataValue, PipelineContext, PipelineData, PipelineStep};
use crate::recognition::{BoundedRecognizer, LineRecognizer};

/// Warp the page quadrilateral to a rectangle.
pub struct PerspectiveStep {
    pub rectifier: PerspectiveRectifier,
}

impl PipelineStep for PerspectiveStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        Ok(data
            .into_iter()
            .map(|item| {
                let rectified = self.rectifier.rectify(&item.image);
                item.derive(rectified, None)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "Perspective"
    }
}

/// Small-angle rotation; used once for the page and once per region with
/// different presets.
pub struct DeskewStep {
    pub corrector: SkewCorrector,
    pub label: &'static str,
}

impl DeskewStep {
    pub fn page(corrector: SkewCorrector) -> Self {
        Self {
            corrector,
            label: "Page Deskew",
        }
    }

    pub fn region(corrector: SkewCorrector) -> Self {
        Self {
            corrector,
            label: "Region Deskew",
        }
    }
}

impl PipelineStep for DeskewStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        Ok(data
            .into_iter()
            .map(|item| {
                let (corrected, estimate) = self.corrector.correct_with_estimate(&item.image);
                let angle = estimate.map(|e| e.angle).unwrap_or(0.0);
                debug!(step = self.label, angle, "Deskewed");
                item.derive(corrected, item.bbox)
                    .with_metadata(keys::SKEW_ANGLE, MetadataValue::Float(angle as f32))
            })
            .collect())
    }

    fn name(&self) -> &str {
        self.label
    }
}

/// Split a page into its answer boxes, top to bottom.
pub struct RegionStep {
    pub detector: RegionDetector,
}

impl PipelineStep for RegionStep {
    fn process(&self, data: Vec<PipelineData>, context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();
        for item in data {
            let regions = self.detector.detect(&item.image);
            if regions.is_empty() {
                warn!("No answer boxes on page");
            }
            for (idx, region) in regions.into_iter().enumerate() {
                let mut new_item = item
                    .derive(region.image, Some(region.bbox))
                    .with_metadata(keys::REGION_INDEX, MetadataValue::Int(idx as i32))
                    .with_metadata(keys::REGION_BOX, MetadataValue::Box(region.bbox));
                if context.debug_enabled() {
                    let mut page = item.image.to_rgb8();
                    for (b, colour) in [(region.outer, Rgb([255, 0, 0])), (region.bbox, Rgb([0, 160, 0]))] {
                        if b.width > 0 && b.height > 0 {
                            let rect = Rect::at(b.x as i32, b.y as i32).of_size(b.width, b.height);
                            draw_hollow_rect_mut(&mut page, rect, colour);
                        }
                    }
                    new_item = new_item.with_artifact("boxes", DynamicImage::ImageRgb8(page));
                }
                result.push(new_item);
            }
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Regions"
    }
}

/// Remove ruled lines; the item image becomes the binary text mask.
pub struct LineCleanStep {
    pub cleaner: LineCleaner,
}

impl PipelineStep for LineCleanStep {
    fn process(&self, data: Vec<PipelineData>, context: &PipelineContext) -> Result<Vec<PipelineData>> {
        Ok(data
            .into_iter()
            .map(|item| {
                let cleaned = self.cleaner.clean(&item.image);
                let mut new_item = item.derive(DynamicImage::ImageLuma8(cleaned.binary), item.bbox);
                if context.debug_enabled() {
                    new_item = new_item.with_artifact("ruling", DynamicImage::ImageLuma8(cleaned.ruling));
                }
                new_item
            })
            .collect())
    }

    fn name(&self) -> &str {
        "Clean Lines"
    }
}

/// Split a cleaned mask into line crops, dark text on white. A region with
/// no lines yields one placeholder item marked [`keys::NO_TEXT`] so that it
/// still contributes an (empty) entry to the page.
pub struct LineSegmentStep {
    pub segmenter: LineSegmenter,
}

impl PipelineStep for LineSegmentStep {
    fn process(&self, data: Vec<PipelineData>, context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();
        for item in data {
            let binary = item.image.to_luma8();
            let (w, h) = binary.dimensions();
            let lines = self.segmenter.segment(&binary);

            let mut produced = Vec::with_capacity(lines.len().max(1));
            for (idx, line) in lines.iter().enumerate() {
                let crop_box = self.segmenter.crop_box(line, w, h);
                let Some(crop) = crop_box.crop(&item.image) else {
                    continue;
                };
                let inverted = preprocessing::invert(&crop.to_luma8());
                produced.push(
                    item.derive(DynamicImage::ImageLuma8(inverted), Some(crop_box))
                        .with_metadata(keys::LINE_INDEX, MetadataValue::Int(idx as i32)),
                );
            }

            if produced.is_empty() {
                debug!(region = ?item.get_int(keys::REGION_INDEX), "Region has no text lines");
                produced.push(
                    item.derive(item.image.clone(), item.bbox)
                        .with_metadata(keys::NO_TEXT, MetadataValue::Bool(true)),
                );
            }

            if context.debug_enabled() {
                let annotated = DynamicImage::ImageRgb8(segmentation::annotate_lines(&binary, &lines));
                let plot = DynamicImage::ImageRgb8(segmentation::profile_plot(
                    &segmentation::projection_profile(&binary),
                    w.max(100),
                ));
                if let Some(first) = produced.first_mut() {
                    first.artifacts.push(("lines".to_string(), annotated));
                    first.artifacts.push(("profile".to_string(), plot));
                }
            }
            result.extend(produced);
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Segment Lines"
    }
}

/// Hand each line crop to the recognizer under bounded concurrency and a
/// per-call timeout. Failures leave the line text empty.
pub struct RecognizeStep {
    recognizer: BoundedRecognizer,
}

impl RecognizeStep {
    pub fn new(recognizer: Arc<dyn LineRecognizer>, config: &RecognitionConfig) -> Self {
        Self {
            recognizer: BoundedRecognizer::from_config(recognizer, config),
        }
    }
}

impl PipelineStep for RecognizeStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        Ok(data
            .into_iter()
            .map(|item| {
                if item.get_bool(keys::NO_TEXT) == Some(true) {
                    return item;
                }
                let text = self.recognizer.recognize_or_empty(&item.image);
                item.with_metadata(keys::TEXT, MetadataValue::String(text))
            })
            .collect())
    }

    fn name(&self) -> &str {
        "Recognize"
    }
}
