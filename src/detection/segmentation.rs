//! Splitting a cleaned region mask into text lines.
//!
//! Two strategies are available. The projection profile is cheap and works
//! for straight, well separated lines. Component clustering follows lines
//! that drift or tilt slightly and drops isolated specks.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use tracing::{debug, instrument};

use crate::config::{SegmentationConfig, SegmentationStrategy};
use crate::detection::contours;
use crate::models::{BoundingBox, LineRegion, LineSource};

#[derive(Debug, Clone, Default)]
pub struct LineSegmenter {
    pub config: SegmentationConfig,
}

impl LineSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    /// Text lines of a binary mask (text = non-zero), top to bottom. A blank
    /// mask yields no lines.
    #[instrument(skip_all, fields(strategy = ?self.config.strategy))]
    pub fn segment(&self, binary: &GrayImage) -> Vec<LineRegion> {
        let lines = match self.config.strategy {
            SegmentationStrategy::ProjectionProfile => self.segment_by_projection(binary),
            SegmentationStrategy::ConnectedComponents => self.segment_by_components(binary),
        };
        debug!(lines = lines.len(), "Lines segmented");
        lines
    }

    /// Padded crop rectangle for a line, clipped to the mask.
    pub fn crop_box(&self, line: &LineRegion, width: u32, height: u32) -> BoundingBox {
        let padding = match line.source {
            LineSource::Rows { .. } => self.config.projection_padding,
            LineSource::Components(_) => self.config.component_padding,
        };
        line.bbox.padded(padding, width, height)
    }

    pub fn segment_by_projection(&self, binary: &GrayImage) -> Vec<LineRegion> {
        let (width, _) = binary.dimensions();
        let profile = projection_profile(binary);
        let ranges = merge_ranges(
            row_ranges(&profile),
            self.config.min_line_height,
            self.config.merge_gap,
        );
        ranges
            .into_iter()
            .map(|(start, end)| LineRegion {
                bbox: BoundingBox::new(0, start, width, end - start),
                source: LineSource::Rows { start, end },
            })
            .collect()
    }

    pub fn segment_by_components(&self, binary: &GrayImage) -> Vec<LineRegion> {
        let mut components = contours::component_boxes(binary, self.config.min_component_size);
        components.sort_by_key(|c| c.y);

        let mut lines: Vec<LineRegion> = cluster_components(components)
            .into_iter()
            .filter_map(|members| {
                let bbox = members.iter().skip(1).fold(members[0], |acc, b| acc.union(b));
                let line = LineRegion {
                    bbox,
                    source: LineSource::Components(members),
                };
                line.is_text_line(self.config.min_components, self.config.min_line_width)
                    .then_some(line)
            })
            .collect();
        lines.sort_by_key(|l| l.bbox.y);
        lines
    }
}

/// Foreground mass per row.
pub fn projection_profile(binary: &GrayImage) -> Vec<u64> {
    let (w, h) = binary.dimensions();
    (0..h)
        .map(|y| (0..w).map(|x| binary.get_pixel(x, y)[0] as u64).sum())
        .collect()
}

/// Maximal runs of non-empty rows as half-open `[start, end)` ranges.
pub fn row_ranges(profile: &[u64]) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();
    let mut start: Option<u32> = None;
    for (i, &mass) in profile.iter().enumerate() {
        match (mass > 0, start) {
            (true, None) => start = Some(i as u32),
            (false, Some(s)) => {
                ranges.push((s, i as u32));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        ranges.push((s, profile.len() as u32));
    }
    ranges
}

/// Drop ranges not taller than `min_height`, then join neighbours whose
/// gap is below `merge_gap`.
pub fn merge_ranges(ranges: Vec<(u32, u32)>, min_height: u32, merge_gap: u32) -> Vec<(u32, u32)> {
    let mut merged: Vec<(u32, u32)> = Vec::new();
    for (start, end) in ranges.into_iter().filter(|(s, e)| e - s > min_height) {
        match merged.last_mut() {
            Some(last) if start - last.1 < merge_gap => last.1 = end,
            _ => merged.push((start, end)),
        }
    }
    merged
}

enum ClusterState {
    Idle,
    Accumulating {
        members: Vec<BoundingBox>,
        top: u32,
        bottom: u32,
    },
}

/// Greedy clustering of components sorted by top edge.
///
/// A component joins the open group while its vertical centre lies within
/// the group's accumulated `[top, bottom]` extent, so a slowly drifting line
/// stays together. Otherwise the group is emitted and a new one starts.
pub fn cluster_components(components: Vec<BoundingBox>) -> Vec<Vec<BoundingBox>> {
    let mut groups = Vec::new();
    let mut state = ClusterState::Idle;

    for component in components {
        state = match state {
            ClusterState::Idle => ClusterState::Accumulating {
                members: vec![component],
                top: component.y,
                bottom: component.bottom(),
            },
            ClusterState::Accumulating {
                mut members,
                top,
                bottom,
            } => {
                let center = component.center_y();
                if center >= top as f32 && center <= bottom as f32 {
                    members.push(component);
                    ClusterState::Accumulating {
                        members,
                        top: top.min(component.y),
                        bottom: bottom.max(component.bottom()),
                    }
                } else {
                    groups.push(members);
                    ClusterState::Accumulating {
                        members: vec![component],
                        top: component.y,
                        bottom: component.bottom(),
                    }
                }
            }
        };
    }

    if let ClusterState::Accumulating { members, .. } = state {
        groups.push(members);
    }
    groups
}

/// Mask with line boxes drawn over it, for debugging.
pub fn annotate_lines(binary: &GrayImage, lines: &[LineRegion]) -> RgbImage {
    let mut canvas = RgbImage::from_fn(binary.width(), binary.height(), |x, y| {
        let v = binary.get_pixel(x, y)[0];
        Rgb([v, v, v])
    });
    for line in lines {
        let b = &line.bbox;
        if b.width == 0 || b.height == 0 {
            continue;
        }
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(b.x as i32, b.y as i32).of_size(b.width, b.height),
            Rgb([0, 255, 0]),
        );
    }
    canvas
}

/// Horizontal bar chart of the projection profile, one row per mask row.
pub fn profile_plot(profile: &[u64], width: u32) -> RgbImage {
    let height = profile.len().max(1) as u32;
    let width = width.max(1);
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let peak = profile.iter().copied().max().unwrap_or(0).max(1);
    for (y, &mass) in profile.iter().enumerate() {
        let len = (mass as f64 / peak as f64 * (width - 1) as f64) as f32;
        if mass > 0 {
            draw_line_segment_mut(&mut canvas, (0.0, y as f32), (len, y as f32), Rgb([30, 60, 200]));
        }
    }
    canvas
}
