pub mod preprocessing;
pub mod contours;
pub mod hough;
pub mod perspective;
pub mod skew;
pub mod regions;
pub mod line_cleaner;
pub mod segmentation;
pub mod steps;

use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{BoundingBox, ImageInput};
use crate::pipeline::{keys, Pipeline, WorkItem};
use crate::recognition::LineRecognizer;

use line_cleaner::LineCleaner;
use perspective::PerspectiveRectifier;
use regions::RegionDetector;
use segmentation::LineSegmenter;
use skew::SkewCorrector;
use steps::*;

/// Standard answer-sheet pipeline: rectify, deskew, split into boxes, deskew
/// each box, strip ruling, cut lines and, given a recognizer, read them.
pub fn build_answer_sheet_pipeline(
    config: &PipelineConfig,
    recognizer: Option<Arc<dyn LineRecognizer>>,
) -> Result<Pipeline> {
    config.validate()?;

    let mut pipeline = Pipeline::new()
        .add_step(Arc::new(PerspectiveStep {
            rectifier: PerspectiveRectifier::new(config.perspective.clone()),
        }))
        .add_step(Arc::new(DeskewStep::page(SkewCorrector::new(config.page_skew.clone()))))
        .add_step(Arc::new(RegionStep {
            detector: RegionDetector::new(config.regions.clone()),
        }))
        .add_step(Arc::new(DeskewStep::region(SkewCorrector::new(config.region_skew.clone()))))
        .add_step(Arc::new(LineCleanStep {
            cleaner: LineCleaner::new(config.cleaner.clone()),
        }))
        .add_step(Arc::new(LineSegmentStep {
            segmenter: LineSegmenter::new(config.segmentation.clone()),
        }));

    if let Some(recognizer) = recognizer {
        pipeline = pipeline.add_step(Arc::new(RecognizeStep::new(recognizer, &config.recognition)));
    }
    Ok(pipeline)
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineResult {
    /// Padded crop box inside the region.
    pub bbox: BoundingBox,
    /// Empty when recognition is skipped or failed.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionResult {
    pub index: usize,
    /// Padded box in the deskewed page.
    pub bbox: BoundingBox,
    pub lines: Vec<LineResult>,
}

impl RegionResult {
    /// Line texts joined by newlines, blank-line runs collapsed and trimmed.
    pub fn text(&self) -> String {
        let joined: Vec<&str> = self.lines.iter().map(|l| l.text.as_str()).collect();
        normalize_region_text(&joined.join("\n"))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageResult {
    pub regions: Vec<RegionResult>,
}

impl PageResult {
    /// Region texts in order, each followed by a newline, separated by a
    /// blank line.
    pub fn text(&self) -> String {
        let parts: Vec<String> = self.regions.iter().map(|r| format!("{}\n", r.text())).collect();
        parts.join("\n")
    }

    pub fn line_count(&self) -> usize {
        self.regions.iter().map(|r| r.lines.len()).sum()
    }

    /// Group completed pipeline items (already in lineage order) by region.
    pub fn from_work_items(items: &[WorkItem]) -> Self {
        let mut regions: Vec<RegionResult> = Vec::new();
        for item in items {
            let data = &item.data;
            let Some(index) = data.get_int(keys::REGION_INDEX) else {
                continue;
            };
            let index = index as usize;
            if regions.last().is_none_or(|r| r.index != index) {
                regions.push(RegionResult {
                    index,
                    bbox: data.get_box(keys::REGION_BOX).unwrap_or(BoundingBox::new(0, 0, 0, 0)),
                    lines: Vec::new(),
                });
            }
            let Some(region) = regions.last_mut() else {
                continue;
            };
            if data.get_bool(keys::NO_TEXT) == Some(true) {
                continue;
            }
            region.lines.push(LineResult {
                bbox: data.bbox.unwrap_or(BoundingBox::new(0, 0, 0, 0)),
                text: data.get_string(keys::TEXT).unwrap_or_default().to_string(),
            });
        }
        Self { regions }
    }
}

/// Collapse newline runs to one and trim surrounding whitespace.
pub fn normalize_region_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_newline = false;
    for ch in text.chars() {
        if ch == '\n' {
            if !previous_newline {
                out.push(ch);
            }
            previous_newline = true;
        } else {
            out.push(ch);
            previous_newline = false;
        }
    }
    out.trim().to_string()
}

/// Reads answer sheets with a prebuilt pipeline.
pub struct AnswerSheetReader {
    pipeline: Pipeline,
}

impl AnswerSheetReader {
    pub fn new(config: &PipelineConfig, recognizer: Option<Arc<dyn LineRecognizer>>) -> Result<Self> {
        Ok(Self {
            pipeline: build_answer_sheet_pipeline(config, recognizer)?,
        })
    }

    /// Write intermediate images under `dir` (must be empty or absent).
    pub fn with_debug(mut self, dir: impl Into<PathBuf>) -> Result<Self> {
        self.pipeline = self.pipeline.with_debug(dir)?;
        Ok(self)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// One page. Fails only when the input cannot be decoded.
    #[instrument(skip_all)]
    pub fn read_page(&self, input: impl Into<ImageInput>) -> Result<PageResult> {
        let image = input.into().load()?;
        let items = self.pipeline.run(image)?;
        Ok(self.summarize(&items))
    }

    /// Pages are independent and run in parallel; results keep input order.
    /// Debug output for page `n` goes to `page_NN/`.
    pub fn read_document(&self, inputs: Vec<ImageInput>) -> Result<Vec<PageResult>> {
        inputs
            .into_par_iter()
            .enumerate()
            .map(|(idx, input)| {
                let image = input.load()?;
                let items = self.pipeline.run_scoped(image, &format!("page_{:02}", idx + 1))?;
                Ok(self.summarize(&items))
            })
            .collect()
    }

    fn summarize(&self, items: &[WorkItem]) -> PageResult {
        let page = PageResult::from_work_items(items);
        info!(regions = page.regions.len(), lines = page.line_count(), "Page read");
        page
    }
}

/// Text of a multi-page document, pages in order.
pub fn document_text(pages: &[PageResult]) -> String {
    pages.iter().map(PageResult::text).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(index: usize, texts: &[&str]) -> RegionResult {
        RegionResult {
            index,
            bbox: BoundingBox::new(0, 0, 10, 10),
            lines: texts
                .iter()
                .map(|t| LineResult {
                    bbox: BoundingBox::new(0, 0, 10, 2),
                    text: t.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn newline_runs_collapse() {
        assert_eq!(normalize_region_text("\n a\n\n\nb \n\n"), "a\nb");
    }

    #[test]
    fn empty_lines_from_failed_recognition_do_not_leave_gaps() {
        assert_eq!(region(0, &["first", "", "third"]).text(), "first\nthird");
    }

    #[test]
    fn page_text_separates_regions() {
        let page = PageResult {
            regions: vec![region(0, &["a", "b"]), region(1, &[]), region(2, &["c"])],
        };
        assert_eq!(page.text(), "a\nb\n\n\n\nc\n");
    }
}
