//! Corner ordering and polygon helpers shared by the detection stages.

use imageproc::point::Point;

use crate::models::{BoundingBox, Point2D, Quadrilateral};

/// Canonical corner order for four unordered points.
///
/// Top-left minimises `x + y`, bottom-right maximises it, top-right
/// minimises `y - x` and bottom-left maximises it. Ties go to the point
/// with the smaller `(y, x)` so any permutation of the same input yields the
/// same quadrilateral.
pub fn order_quadrilateral(points: [Point2D; 4]) -> Quadrilateral {
    order_points(&points).unwrap_or(Quadrilateral {
        top_left: points[0],
        top_right: points[1],
        bottom_right: points[2],
        bottom_left: points[3],
    })
}

/// Same rule as [`order_quadrilateral`] applied to a polygon of any size.
/// Returns `None` for fewer than four points.
pub fn order_points(points: &[Point2D]) -> Option<Quadrilateral> {
    if points.len() < 4 {
        return None;
    }

    let sum = |p: &Point2D| p.x + p.y;
    let diff = |p: &Point2D| p.y - p.x;

    Some(Quadrilateral {
        top_left: extreme_by(points, sum, false),
        top_right: extreme_by(points, diff, false),
        bottom_right: extreme_by(points, sum, true),
        bottom_left: extreme_by(points, diff, true),
    })
}

fn extreme_by(points: &[Point2D], key: impl Fn(&Point2D) -> f32, maximise: bool) -> Point2D {
    let mut best = points[0];
    for p in &points[1..] {
        let (kp, kb) = (key(p), key(&best));
        let better = if maximise { kp > kb } else { kp < kb };
        let tie_break = kp == kb && (p.y, p.x) < (best.y, best.x);
        if better || tie_break {
            best = *p;
        }
    }
    best
}

/// Output size of the rectified quadrilateral: the longer of each pair of
/// opposing edges, floored to whole pixels.
pub fn target_rectangle_size(quad: &Quadrilateral) -> (u32, u32) {
    let width_bottom = quad.bottom_right.distance(&quad.bottom_left);
    let width_top = quad.top_right.distance(&quad.top_left);
    let height_right = quad.top_right.distance(&quad.bottom_right);
    let height_left = quad.top_left.distance(&quad.bottom_left);

    let width = width_bottom.max(width_top).floor() as u32;
    let height = height_right.max(height_left).floor() as u32;
    (width, height)
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice_area as f64 / 2.0).abs()
}

/// Inclusive pixel bounding rectangle of a point set.
pub fn bounding_rect(points: &[Point<i32>]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let min_x = min_x.max(0) as u32;
    let min_y = min_y.max(0) as u32;
    Some(BoundingBox::from_extent(
        min_x,
        min_y,
        (max_x.max(0) as u32).max(min_x),
        (max_y.max(0) as u32).max(min_y),
    ))
}

pub fn to_point2d(points: &[Point<i32>]) -> Vec<Point2D> {
    points
        .iter()
        .map(|p| Point2D::new(p.x as f32, p.y as f32))
        .collect()
}
