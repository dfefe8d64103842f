//! Threshold bags for every pipeline stage.
//!
//! Defaults reproduce the tuned constants of the answer-sheet pipeline. Every
//! struct is `#[serde(default)]`, so a JSON file only needs to name the values
//! it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Perspective rectification (page quadrilateral search).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerspectiveConfig {
    /// Gaussian kernel size (odd) applied before thresholding.
    pub blur_kernel: u32,
    /// Adaptive threshold neighbourhood size (odd).
    pub threshold_block_size: u32,
    /// Constant subtracted from the local weighted mean.
    pub threshold_c: f32,
    /// Square closing kernel side.
    pub close_kernel: u32,
    pub close_iterations: u32,
    /// Contours below this area are ignored.
    pub min_contour_area: f64,
    /// Douglas-Peucker epsilon as a fraction of the contour perimeter.
    pub approx_epsilon_ratio: f64,
    /// Exclusive bounds on bounding-box width / height.
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
}

impl Default for PerspectiveConfig {
    fn default() -> Self {
        Self {
            blur_kernel: 5,
            threshold_block_size: 35,
            threshold_c: 10.0,
            close_kernel: 5,
            close_iterations: 2,
            min_contour_area: 10_000.0,
            approx_epsilon_ratio: 0.02,
            min_aspect_ratio: 0.7,
            max_aspect_ratio: 1.4,
        }
    }
}

/// Skew detection and correction.
///
/// The page-level and region-level correctors differ in inversion, angle
/// window and minimum segment length; use [`SkewConfig::page`] and
/// [`SkewConfig::region`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkewConfig {
    /// Invert intensities before edge detection.
    pub invert: bool,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Minimum number of edge pixels voting for a line.
    pub hough_threshold: u32,
    /// Non-maximum suppression radius in Hough space.
    pub hough_suppression_radius: u32,
    pub min_line_length: u32,
    pub max_line_gap: u32,
    /// Segments are kept when `|angle| < max_angle_degrees`.
    pub max_angle_degrees: f64,
}

impl SkewConfig {
    pub fn page() -> Self {
        Self {
            invert: true,
            canny_low: 50.0,
            canny_high: 150.0,
            hough_threshold: 100,
            hough_suppression_radius: 8,
            min_line_length: 100,
            max_line_gap: 10,
            max_angle_degrees: 45.0,
        }
    }

    pub fn region() -> Self {
        Self {
            invert: false,
            min_line_length: 50,
            max_angle_degrees: 15.0,
            ..Self::page()
        }
    }
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self::page()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Maximum number of answer boxes returned per page.
    pub max_boxes: usize,
    pub blur_kernel: u32,
    pub threshold_block_size: u32,
    pub threshold_c: f32,
    /// Deliberately coarse so hand-drawn rectangles collapse to <= 4 vertices.
    pub approx_epsilon_ratio: f64,
    pub max_vertices: usize,
    /// Candidate bounding-box area bounds as fractions of the image area.
    pub min_area_ratio: f64,
    pub max_area_ratio: f64,
    /// Two candidates are duplicates when their top-left corners are closer
    /// than this fraction of the shorter image side on both axes.
    pub duplicate_distance_ratio: f64,
    pub padding_x: u32,
    pub padding_y: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            max_boxes: 4,
            blur_kernel: 5,
            threshold_block_size: 15,
            threshold_c: 8.0,
            approx_epsilon_ratio: 0.3,
            max_vertices: 4,
            min_area_ratio: 0.1,
            max_area_ratio: 0.3,
            duplicate_distance_ratio: 0.5,
            padding_x: 50,
            padding_y: 50,
        }
    }
}

/// HSV bounds use the 0..180 hue scale, saturation and value in 0..=255.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineCleanerConfig {
    pub blue_lower: [u8; 3],
    pub blue_upper: [u8; 3],
    /// Inclusive grayscale range treated as dark ruling.
    pub dark_lower: u8,
    pub dark_upper: u8,
    /// Opening kernel width is `image_width / kernel_divisor`.
    pub kernel_divisor: u32,
    pub open_iterations: u32,
}

impl Default for LineCleanerConfig {
    fn default() -> Self {
        Self {
            blue_lower: [90, 20, 120],
            blue_upper: [120, 180, 255],
            dark_lower: 0,
            dark_upper: 70,
            kernel_divisor: 30,
            open_iterations: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationStrategy {
    /// Row projection profile; lines span the full region width.
    ProjectionProfile,
    /// Greedy clustering of connected components by vertical extent.
    #[default]
    ConnectedComponents,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub strategy: SegmentationStrategy,
    /// Projection ranges must be strictly taller than this.
    pub min_line_height: u32,
    /// Projection ranges closer than this are merged.
    pub merge_gap: u32,
    pub projection_padding: u32,
    /// Components must be strictly wider and taller than this.
    pub min_component_size: u32,
    /// A clustered line needs this many components...
    pub min_components: usize,
    /// ...or at least this width.
    pub min_line_width: u32,
    pub component_padding: u32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            strategy: SegmentationStrategy::default(),
            min_line_height: 10,
            merge_gap: 2,
            projection_padding: 5,
            min_component_size: 5,
            min_components: 2,
            min_line_width: 40,
            component_padding: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Upper bound on simultaneous recognizer calls.
    pub max_concurrency: usize,
    /// Per-line timeout; `0` disables it.
    pub timeout_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout_ms: 30_000,
        }
    }
}

/// Full configuration handed to the pipeline builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub perspective: PerspectiveConfig,
    #[serde(deserialize_with = "page_skew")]
    pub page_skew: SkewConfig,
    #[serde(deserialize_with = "region_skew")]
    pub region_skew: SkewConfig,
    pub regions: RegionConfig,
    pub cleaner: LineCleanerConfig,
    pub segmentation: SegmentationConfig,
    pub recognition: RecognitionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            perspective: PerspectiveConfig::default(),
            page_skew: SkewConfig::page(),
            region_skew: SkewConfig::region(),
            regions: RegionConfig::default(),
            cleaner: LineCleanerConfig::default(),
            segmentation: SegmentationConfig::default(),
            recognition: RecognitionConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| PipelineError::config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject values that would make a stage meaningless.
    pub fn validate(&self) -> Result<()> {
        check_odd("perspective.blur_kernel", self.perspective.blur_kernel)?;
        check_odd("perspective.threshold_block_size", self.perspective.threshold_block_size)?;
        check_odd("regions.blur_kernel", self.regions.blur_kernel)?;
        check_odd("regions.threshold_block_size", self.regions.threshold_block_size)?;

        if self.perspective.min_aspect_ratio >= self.perspective.max_aspect_ratio {
            return Err(PipelineError::config("perspective aspect ratio bounds are inverted"));
        }
        if self.regions.min_area_ratio >= self.regions.max_area_ratio {
            return Err(PipelineError::config("regions area ratio bounds are inverted"));
        }
        if self.regions.max_boxes == 0 {
            return Err(PipelineError::config("regions.max_boxes must be at least 1"));
        }
        for (name, skew) in [("page_skew", &self.page_skew), ("region_skew", &self.region_skew)] {
            if !(skew.max_angle_degrees > 0.0 && skew.max_angle_degrees <= 90.0) {
                return Err(PipelineError::config(format!(
                    "{}.max_angle_degrees must be in (0, 90]",
                    name
                )));
            }
            if skew.canny_low > skew.canny_high {
                return Err(PipelineError::config(format!("{} canny thresholds are inverted", name)));
            }
        }
        if self.cleaner.kernel_divisor == 0 {
            return Err(PipelineError::config("cleaner.kernel_divisor must be positive"));
        }
        if self.recognition.max_concurrency == 0 {
            return Err(PipelineError::config("recognition.max_concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// Field-wise overrides layered over a skew preset, so a partial
/// `region_skew` object keeps the region defaults for unnamed fields.
#[derive(Debug, Default, Deserialize)]
struct SkewOverrides {
    invert: Option<bool>,
    canny_low: Option<f32>,
    canny_high: Option<f32>,
    hough_threshold: Option<u32>,
    hough_suppression_radius: Option<u32>,
    min_line_length: Option<u32>,
    max_line_gap: Option<u32>,
    max_angle_degrees: Option<f64>,
}

impl SkewOverrides {
    fn apply(self, base: SkewConfig) -> SkewConfig {
        SkewConfig {
            invert: self.invert.unwrap_or(base.invert),
            canny_low: self.canny_low.unwrap_or(base.canny_low),
            canny_high: self.canny_high.unwrap_or(base.canny_high),
            hough_threshold: self.hough_threshold.unwrap_or(base.hough_threshold),
            hough_suppression_radius: self
                .hough_suppression_radius
                .unwrap_or(base.hough_suppression_radius),
            min_line_length: self.min_line_length.unwrap_or(base.min_line_length),
            max_line_gap: self.max_line_gap.unwrap_or(base.max_line_gap),
            max_angle_degrees: self.max_angle_degrees.unwrap_or(base.max_angle_degrees),
        }
    }
}

fn page_skew<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<SkewConfig, D::Error> {
    Ok(SkewOverrides::deserialize(deserializer)?.apply(SkewConfig::page()))
}

fn region_skew<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<SkewConfig, D::Error> {
    Ok(SkewOverrides::deserialize(deserializer)?.apply(SkewConfig::region()))
}

fn check_odd(name: &str, value: u32) -> Result<()> {
    if value == 0 || value % 2 == 0 {
        return Err(PipelineError::config(format!("{} must be odd, got {}", name, value)));
    }
    Ok(())
}
