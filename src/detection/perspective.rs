use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::{debug, info, instrument, warn};

use crate::config::PerspectiveConfig;
use crate::detection::{contours, preprocessing};
use crate::geometry::{self, bounding_rect, order_points, target_rectangle_size};
use crate::models::{BoundingBox, Quadrilateral};

/// How the page quadrilateral was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuadSource {
    /// A page-like polygon passed the area and aspect-ratio filters.
    Polygon,
    /// Bounding box of the largest contour.
    LargestContour,
    /// No contour at all; the whole image.
    FullImage,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDetection {
    pub quad: Quadrilateral,
    pub source: QuadSource,
}

/// Finds the dominant page quadrilateral and warps it fronto-parallel.
#[derive(Debug, Clone, Default)]
pub struct PerspectiveRectifier {
    pub config: PerspectiveConfig,
}

impl PerspectiveRectifier {
    pub fn new(config: PerspectiveConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all, fields(width = img.width(), height = img.height()))]
    pub fn detect_page(&self, img: &DynamicImage) -> PageDetection {
        let cfg = &self.config;
        let gray = preprocessing::to_grayscale(img);
        let blurred = preprocessing::apply_blur(&gray, cfg.blur_kernel);
        let binary =
            preprocessing::adaptive_threshold_inv(&blurred, cfg.threshold_block_size, cfg.threshold_c);
        let closed = preprocessing::close_square(&binary, cfg.close_kernel, cfg.close_iterations);
        let outer = contours::find_external_contours(&closed);
        debug!(contours = outer.len(), "External contours found");

        let mut best: Option<(f64, Quadrilateral)> = None;
        for contour in &outer {
            let area = contours::contour_area(contour);
            if area < cfg.min_contour_area {
                continue;
            }
            let approx = contours::approximate_polygon(&contour.points, cfg.approx_epsilon_ratio);
            let Some(bbox) = bounding_rect(&approx) else {
                continue;
            };
            let ratio = bbox.aspect_ratio();
            if ratio <= cfg.min_aspect_ratio || ratio >= cfg.max_aspect_ratio {
                continue;
            }
            if best.as_ref().is_some_and(|(best_area, _)| area <= *best_area) {
                continue;
            }
            if let Some(quad) = order_points(&geometry::to_point2d(&approx)) {
                best = Some((area, quad));
            }
        }

        if let Some((area, quad)) = best {
            debug!(area, "Page polygon selected");
            return PageDetection {
                quad,
                source: QuadSource::Polygon,
            };
        }

        let largest = outer
            .iter()
            .max_by(|a, b| contours::contour_area(a).total_cmp(&contours::contour_area(b)))
            .and_then(|c| bounding_rect(&c.points));

        match largest {
            Some(bbox) => {
                warn!(?bbox, "No page-like polygon; using largest contour bounds");
                PageDetection {
                    quad: Quadrilateral::from_bbox(&bbox),
                    source: QuadSource::LargestContour,
                }
            }
            None => {
                let (w, h) = img.dimensions();
                warn!("No contours at all; rectifying the full image");
                PageDetection {
                    quad: Quadrilateral::from_bbox(&BoundingBox::new(0, 0, w, h)),
                    source: QuadSource::FullImage,
                }
            }
        }
    }

    /// Detect the page and warp it to its estimated true rectangle.
    pub fn rectify(&self, img: &DynamicImage) -> DynamicImage {
        let detection = self.detect_page(img);
        match warp_quadrilateral(&img.to_rgb8(), &detection.quad) {
            Some(warped) => {
                info!(
                    width = warped.width(),
                    height = warped.height(),
                    source = ?detection.source,
                    "Perspective corrected"
                );
                DynamicImage::ImageRgb8(warped)
            }
            None => {
                warn!(quad = ?detection.quad, "Degenerate page quadrilateral; leaving image unwarped");
                img.clone()
            }
        }
    }
}

/// Map `quad` onto `(0,0)-(W-1,0)-(W-1,H-1)-(0,H-1)` and resample.
pub fn warp_quadrilateral(img: &RgbImage, quad: &Quadrilateral) -> Option<RgbImage> {
    let (width, height) = target_rectangle_size(quad);
    if width < 2 || height < 2 {
        return None;
    }
    let (w, h) = ((width - 1) as f32, (height - 1) as f32);

    let from = quad.corners().map(|p| (p.x, p.y));
    let to = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let projection = Projection::from_control_points(from, to)?;

    let mut out = RgbImage::new(width, height);
    warp_into(img, &projection, Interpolation::Bilinear, Rgb([255, 255, 255]), &mut out);
    Some(out)
}
