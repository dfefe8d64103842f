use image::{DynamicImage, GrayImage, Luma};
use tracing::{debug, instrument};

use crate::config::LineCleanerConfig;
use crate::detection::preprocessing;

/// Output of [`LineCleaner::clean`].
#[derive(Debug, Clone)]
pub struct CleanedRegion {
    /// Text as 255 on a black background, ruling removed.
    pub binary: GrayImage,
    /// Pixels recognised as ruled lines.
    pub ruling: GrayImage,
}

/// Strips printed guide lines (light blue or near black) from a region.
#[derive(Debug, Clone, Default)]
pub struct LineCleaner {
    pub config: LineCleanerConfig,
}

impl LineCleaner {
    pub fn new(config: LineCleanerConfig) -> Self {
        Self { config }
    }

    /// Long horizontal runs of ruling-coloured pixels.
    pub fn detect_ruling(&self, img: &DynamicImage) -> GrayImage {
        let cfg = &self.config;
        let rgb = img.to_rgb8();
        let blue = preprocessing::in_range_hsv(&rgb, cfg.blue_lower, cfg.blue_upper);
        let gray = preprocessing::to_grayscale(img);
        let dark = preprocessing::in_range_gray(&gray, cfg.dark_lower, cfg.dark_upper);
        let combined = preprocessing::union(&blue, &dark);

        // A handwritten stroke is rarely a thirtieth of the box wide.
        let kernel_width = rgb.width() / cfg.kernel_divisor;
        preprocessing::horizontal_open(&combined, kernel_width, cfg.open_iterations)
    }

    #[instrument(skip_all, fields(width = img.width(), height = img.height()))]
    pub fn clean(&self, img: &DynamicImage) -> CleanedRegion {
        let ruling = self.detect_ruling(img);
        let without_lines = preprocessing::mask_out(&img.to_rgb8(), &ruling);
        let gray = DynamicImage::ImageRgb8(without_lines).to_luma8();
        let mut binary = preprocessing::otsu_threshold_inv(&gray);

        // Masked pixels are black in the colour image, so Otsu marks them as
        // ink; force them back to background.
        for (x, y, pixel) in binary.enumerate_pixels_mut() {
            if ruling.get_pixel(x, y)[0] > 0 {
                *pixel = Luma([0]);
            }
        }

        debug!(
            ruling_pixels = preprocessing::count_foreground(&ruling),
            text_pixels = preprocessing::count_foreground(&binary),
            "Ruled lines removed"
        );
        CleanedRegion { binary, ruling }
    }
}
