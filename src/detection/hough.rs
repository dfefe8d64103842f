//! Line-segment detection over an edge map.
//!
//! Candidate infinite lines come from the Hough accumulator; each is then
//! walked across the edge map to cut it into finite segments (bridging gaps
//! up to `max_line_gap`, keeping runs of at least `min_line_length`). The
//! segment orientation is refined with a principal-axis fit over the edge
//! pixels it covers, which removes the one-degree quantisation of the
//! accumulator.

use image::GrayImage;
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl LineSegment {
    /// `atan2(dy, dx)` in degrees; endpoints are ordered left to right so
    /// this lies in `(-90, 90]`.
    pub fn angle_degrees(&self) -> f64 {
        ((self.y2 - self.y1) as f64).atan2((self.x2 - self.x1) as f64).to_degrees()
    }

    pub fn length(&self) -> f32 {
        let dx = self.x2 - self.x1;
        let dy = self.y2 - self.y1;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentOptions {
    pub vote_threshold: u32,
    pub suppression_radius: u32,
    pub min_line_length: u32,
    pub max_line_gap: u32,
}

pub fn detect_segments(edges: &GrayImage, options: &SegmentOptions) -> Vec<LineSegment> {
    let lines = detect_lines(
        edges,
        LineDetectionOptions {
            vote_threshold: options.vote_threshold,
            suppression_radius: options.suppression_radius,
        },
    );

    lines
        .iter()
        .flat_map(|line| segments_along(edges, line, options))
        .collect()
}

/// Walk one polar line and cut it into segments of supporting edge pixels.
fn segments_along(edges: &GrayImage, line: &PolarLine, options: &SegmentOptions) -> Vec<LineSegment> {
    let (w, h) = edges.dimensions();
    let theta = (line.angle_in_degrees as f32).to_radians();
    // Normal (cos, sin); direction chosen with a non-negative x component.
    let (nx, ny) = (theta.cos(), theta.sin());
    let (dx, dy) = (ny, -nx);
    let (ox, oy) = (line.r * nx, line.r * ny);
    let reach = ((w as f32).hypot(h as f32)).ceil() as i32;

    let mut segments = Vec::new();
    let mut run: Vec<(f32, f32)> = Vec::new();
    let mut run_start = 0i32;
    let mut last_hit: Option<i32> = None;

    for t in -reach..=reach {
        let px = ox + t as f32 * dx;
        let py = oy + t as f32 * dy;

        if let Some(last) = last_hit {
            if t - last > options.max_line_gap as i32 {
                flush_run(&mut run, last - run_start, options, &mut segments);
                last_hit = None;
            }
        }

        if let Some((x, y)) = supporting_pixel(edges, px, py, nx, ny) {
            if last_hit.is_none() {
                run_start = t;
            }
            run.push((x as f32, y as f32));
            last_hit = Some(t);
        }
    }
    if let Some(last) = last_hit {
        flush_run(&mut run, last - run_start, options, &mut segments);
    }
    segments
}

/// An edge pixel on the line or one pixel either side of it.
fn supporting_pixel(edges: &GrayImage, px: f32, py: f32, nx: f32, ny: f32) -> Option<(u32, u32)> {
    let (w, h) = edges.dimensions();
    for offset in [0.0f32, -1.0, 1.0] {
        let x = (px + offset * nx).round();
        let y = (py + offset * ny).round();
        if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
            continue;
        }
        let (x, y) = (x as u32, y as u32);
        if edges.get_pixel(x, y)[0] > 0 {
            return Some((x, y));
        }
    }
    None
}

fn flush_run(
    run: &mut Vec<(f32, f32)>,
    span: i32,
    options: &SegmentOptions,
    segments: &mut Vec<LineSegment>,
) {
    if span >= options.min_line_length as i32 && run.len() >= 2 {
        if let Some(segment) = fit_segment(run) {
            segments.push(segment);
        }
    }
    run.clear();
}

/// Principal-axis fit; endpoints are the extreme projections on that axis.
fn fit_segment(points: &[(f32, f32)]) -> Option<LineSegment> {
    let n = points.len() as f64;
    let (mut mx, mut my) = (0.0f64, 0.0f64);
    for &(x, y) in points {
        mx += x as f64;
        my += y as f64;
    }
    mx /= n;
    my /= n;

    let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
    for &(x, y) in points {
        let (ex, ey) = (x as f64 - mx, y as f64 - my);
        sxx += ex * ex;
        syy += ey * ey;
        sxy += ex * ey;
    }
    if sxx + syy == 0.0 {
        return None;
    }

    let phi = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let (ux, uy) = (phi.cos(), phi.sin());

    let (mut t_min, mut t_max) = (f64::MAX, f64::MIN);
    for &(x, y) in points {
        let t = (x as f64 - mx) * ux + (y as f64 - my) * uy;
        t_min = t_min.min(t);
        t_max = t_max.max(t);
    }

    let mut segment = LineSegment {
        x1: (mx + t_min * ux) as f32,
        y1: (my + t_min * uy) as f32,
        x2: (mx + t_max * ux) as f32,
        y2: (my + t_max * uy) as f32,
    };
    if segment.x1 > segment.x2 {
        segment = LineSegment {
            x1: segment.x2,
            y1: segment.y2,
            x2: segment.x1,
            y2: segment.y1,
        };
    }
    Some(segment)
}
