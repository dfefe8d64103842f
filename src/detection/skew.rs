use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::{debug, info, instrument};

use crate::config::SkewConfig;
use crate::detection::hough::{detect_segments, SegmentOptions};
use crate::detection::preprocessing;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewEstimate {
    /// Median segment angle in degrees, positive when lines fall to the right.
    pub angle: f64,
    /// Segments inside the angle window that voted.
    pub segments: usize,
}

/// Best-effort small-angle deskew driven by line-segment voting.
#[derive(Debug, Clone, Default)]
pub struct SkewCorrector {
    pub config: SkewConfig,
}

impl SkewCorrector {
    pub fn new(config: SkewConfig) -> Self {
        Self { config }
    }

    pub fn page() -> Self {
        Self::new(SkewConfig::page())
    }

    pub fn region() -> Self {
        Self::new(SkewConfig::region())
    }

    /// Median angle of near-horizontal segments, `None` when nothing votes.
    #[instrument(skip_all, fields(invert = self.config.invert))]
    pub fn estimate(&self, img: &DynamicImage) -> Option<SkewEstimate> {
        let cfg = &self.config;
        let mut gray = preprocessing::to_grayscale(img);
        if cfg.invert {
            gray = preprocessing::invert(&gray);
        }
        let edges = preprocessing::detect_edges(&gray, cfg.canny_low, cfg.canny_high);
        let segments = detect_segments(
            &edges,
            &SegmentOptions {
                vote_threshold: cfg.hough_threshold,
                suppression_radius: cfg.hough_suppression_radius,
                min_line_length: cfg.min_line_length,
                max_line_gap: cfg.max_line_gap,
            },
        );

        let angles: Vec<f64> = segments
            .iter()
            .map(|s| s.angle_degrees())
            .filter(|a| a.abs() < cfg.max_angle_degrees)
            .collect();
        debug!(detected = segments.len(), kept = angles.len(), "Line segments voted");

        median(angles.clone()).map(|angle| SkewEstimate {
            angle,
            segments: angles.len(),
        })
    }

    /// Rotate about the centre to cancel the estimated skew. Images with no
    /// qualifying segments come back unchanged.
    pub fn correct(&self, img: &DynamicImage) -> DynamicImage {
        self.correct_with_estimate(img).0
    }

    /// Like [`correct`](Self::correct), also returning the estimate used.
    pub fn correct_with_estimate(&self, img: &DynamicImage) -> (DynamicImage, Option<SkewEstimate>) {
        let estimate = self.estimate(img);
        let corrected = match estimate {
            Some(e) if e.angle != 0.0 => {
                info!(angle = e.angle, segments = e.segments, "Correcting skew");
                rotate_replicate(img, e.angle)
            }
            Some(_) => img.clone(),
            None => {
                info!("No near-horizontal lines; skipping skew correction");
                img.clone()
            }
        };
        (corrected, estimate)
    }
}

/// Middle value, mean of the two middle values for even counts.
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Rotate counter-clockwise by `angle_degrees` about `(w / 2, h / 2)` with
/// bicubic sampling. Pixels that would come from outside the source repeat
/// the nearest edge pixel instead of a fill colour.
pub fn rotate_replicate(img: &DynamicImage, angle_degrees: f64) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(gray) => {
            let (padded, projection, margin) = prepare_rotation(gray, angle_degrees);
            let mut out = GrayImage::new(gray.width(), gray.height());
            if margin.is_some() {
                warp_into(&padded, &projection, Interpolation::Bicubic, Luma([255]), &mut out);
            }
            DynamicImage::ImageLuma8(out)
        }
        other => {
            let rgb = other.to_rgb8();
            let (padded, projection, margin) = prepare_rotation(&rgb, angle_degrees);
            let mut out = RgbImage::new(rgb.width(), rgb.height());
            if margin.is_some() {
                warp_into(&padded, &projection, Interpolation::Bicubic, Rgb([255, 255, 255]), &mut out);
            }
            DynamicImage::ImageRgb8(out)
        }
    }
}

type Image<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;

/// Edge-replicated copy big enough that every output pixel samples inside
/// it, plus the projection from padded coordinates to output coordinates.
fn prepare_rotation<P: Pixel>(img: &Image<P>, angle_degrees: f64) -> (Image<P>, Projection, Option<u32>) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return (img.clone(), Projection::translate(0.0, 0.0), None);
    }
    let theta = angle_degrees.to_radians();
    let cx = (w / 2) as f64;
    let cy = (h / 2) as f64;

    // Output corners pulled back into source coordinates.
    let (sin, cos) = theta.sin_cos();
    let mut overshoot = 0.0f64;
    for (x, y) in [(0.0, 0.0), ((w - 1) as f64, 0.0), (0.0, (h - 1) as f64), ((w - 1) as f64, (h - 1) as f64)] {
        let (dx, dy) = (x - cx, y - cy);
        let sx = cx + dx * cos - dy * sin;
        let sy = cy + dx * sin + dy * cos;
        overshoot = overshoot
            .max(-sx)
            .max(-sy)
            .max(sx - (w - 1) as f64)
            .max(sy - (h - 1) as f64);
    }
    // Slack for the 4x4 bicubic footprint.
    let margin = overshoot.max(0.0).ceil() as u32 + 4;

    let padded = ImageBuffer::from_fn(w + 2 * margin, h + 2 * margin, |x, y| {
        let sx = (x as i64 - margin as i64).clamp(0, w as i64 - 1) as u32;
        let sy = (y as i64 - margin as i64).clamp(0, h as i64 - 1) as u32;
        *img.get_pixel(sx, sy)
    });

    let (pcx, pcy) = ((cx + margin as f64) as f32, (cy + margin as f64) as f32);
    let projection = Projection::translate(cx as f32, cy as f32)
        * Projection::rotate(-theta as f32)
        * Projection::translate(-pcx, -pcy);
    (padded, projection, Some(margin))
}
