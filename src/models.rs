use std::path::PathBuf;

use image::{DynamicImage, GenericImageView, ImageReader};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

impl Point2D {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2D) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Four corners in canonical order: top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadrilateral {
    pub top_left: Point2D,
    pub top_right: Point2D,
    pub bottom_right: Point2D,
    pub bottom_left: Point2D,
}

impl Quadrilateral {
    /// Corners of an axis-aligned box, already in canonical order.
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        let x0 = bbox.x as f32;
        let y0 = bbox.y as f32;
        let x1 = (bbox.x + bbox.width) as f32;
        let y1 = (bbox.y + bbox.height) as f32;
        Self {
            top_left: Point2D::new(x0, y0),
            top_right: Point2D::new(x1, y0),
            bottom_right: Point2D::new(x1, y1),
            bottom_left: Point2D::new(x0, y1),
        }
    }

    pub fn corners(&self) -> [Point2D; 4] {
        [self.top_left, self.top_right, self.bottom_right, self.bottom_left]
    }
}

/// Axis-aligned pixel rectangle. `area` is cached for sorting and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub area: u64,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            area: width as u64 * height as u64,
        }
    }

    /// Box spanning the inclusive pixel range `[min_x, max_x] x [min_y, max_y]`.
    pub fn from_extent(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn center_y(&self) -> f32 {
        self.y as f32 + self.height as f32 / 2.0
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox::new(x, y, right - x, bottom - y)
    }

    /// Grow by `padding` on every side, clipped to `width x height`.
    pub fn padded(&self, padding: u32, width: u32, height: u32) -> BoundingBox {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let right = (self.right() + padding).min(width);
        let bottom = (self.bottom() + padding).min(height);
        BoundingBox::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    /// Clip to the image bounds; `None` when nothing is left.
    pub fn clipped(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        if self.x >= right || self.y >= bottom {
            return None;
        }
        Some(BoundingBox::new(self.x, self.y, right - self.x, bottom - self.y))
    }

    pub fn crop(&self, img: &DynamicImage) -> Option<DynamicImage> {
        let (w, h) = img.dimensions();
        let clip = self.clipped(w, h)?;
        Some(img.crop_imm(clip.x, clip.y, clip.width, clip.height))
    }
}

/// What produced a [`LineRegion`].
#[derive(Debug, Clone, PartialEq)]
pub enum LineSource {
    /// Member component boxes of a clustered line.
    Components(Vec<BoundingBox>),
    /// Half-open row range `[start, end)` from a projection profile.
    Rows { start: u32, end: u32 },
}

/// One detected text line inside a region.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRegion {
    /// Unpadded enclosing box.
    pub bbox: BoundingBox,
    pub source: LineSource,
}

impl LineRegion {
    pub fn component_count(&self) -> usize {
        match &self.source {
            LineSource::Components(members) => members.len(),
            LineSource::Rows { .. } => 0,
        }
    }

    /// A clustered line is text when it has enough members or enough width;
    /// this rejects lone dots and stray marks but keeps short words.
    pub fn is_text_line(&self, min_components: usize, min_width: u32) -> bool {
        match &self.source {
            LineSource::Components(members) => {
                members.len() >= min_components || self.bbox.width >= min_width
            }
            LineSource::Rows { .. } => true,
        }
    }
}

/// Pipeline input, resolved once at the boundary.
#[derive(Debug, Clone)]
pub enum ImageInput {
    Path(PathBuf),
    /// Encoded bytes (PNG, JPEG, ...).
    Bytes(Vec<u8>),
    Image(DynamicImage),
}

impl ImageInput {
    pub fn load(self) -> Result<DynamicImage> {
        match self {
            ImageInput::Path(path) => {
                let decoded = ImageReader::open(&path)
                    .map_err(image::ImageError::IoError)
                    .and_then(|reader| reader.with_guessed_format().map_err(image::ImageError::IoError))
                    .and_then(|reader| reader.decode());
                decoded.map_err(|source| PipelineError::ImageLoad { path, source })
            }
            ImageInput::Bytes(bytes) => image::load_from_memory(&bytes)
                .map_err(|e| PipelineError::ImageDecode(e.to_string())),
            ImageInput::Image(image) => Ok(image),
        }
    }
}

impl From<PathBuf> for ImageInput {
    fn from(path: PathBuf) -> Self {
        ImageInput::Path(path)
    }
}

impl From<DynamicImage> for ImageInput {
    fn from(image: DynamicImage) -> Self {
        ImageInput::Image(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_box_is_clipped_to_image() {
        let bbox = BoundingBox::new(2, 3, 10, 10);
        let padded = bbox.padded(5, 14, 100);
        assert_eq!(padded, BoundingBox::new(0, 0, 14, 18));
    }

    #[test]
    fn short_wide_line_is_text() {
        let line = LineRegion {
            bbox: BoundingBox::new(0, 0, 45, 12),
            source: LineSource::Components(vec![BoundingBox::new(0, 0, 45, 12)]),
        };
        assert!(line.is_text_line(2, 40));

        let dot = LineRegion {
            bbox: BoundingBox::new(0, 0, 7, 7),
            source: LineSource::Components(vec![BoundingBox::new(0, 0, 7, 7)]),
        };
        assert!(!dot.is_text_line(2, 40));
    }

    #[test]
    fn missing_file_is_a_fatal_input_error() {
        let err = ImageInput::Path(PathBuf::from("/nonexistent/page.png"))
            .load()
            .unwrap_err();
        assert!(err.is_fatal_input());
    }
}
