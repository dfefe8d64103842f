use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;

use crate::geometry::{bounding_rect, polygon_area};
use crate::models::BoundingBox;

/// Every border in the binary image, holes included, with parent links.
pub fn find_all_contours(binary: &GrayImage) -> Vec<Contour<i32>> {
    find_contours::<i32>(binary)
}

/// Outer borders that are not nested inside any other shape.
pub fn find_external_contours(binary: &GrayImage) -> Vec<Contour<i32>> {
    find_all_contours(binary)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .collect()
}

pub fn contour_area(contour: &Contour<i32>) -> f64 {
    polygon_area(&contour.points)
}

/// Rounds of farthest-point search used to settle on a near-diameter pair.
const DIAMETER_SEARCH_ROUNDS: usize = 3;

/// Douglas-Peucker on a closed contour, epsilon given as a fraction of the
/// perimeter.
///
/// The curve is cut at both ends of a near-diameter pair, found by hopping to
/// the farthest point a few times from the raster start, and each arc is
/// simplified on its own. On a convex box the pair lands on opposite corners
/// even when the start pixel is mid-edge, so coarse epsilons keep the full
/// extent.
pub fn approximate_polygon(points: &[Point<i32>], epsilon_ratio: f64) -> Vec<Point<i32>> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let epsilon = (epsilon_ratio * arc_length(points, true)).max(f64::EPSILON);

    let (mut a, mut b) = (0, farthest_from(points, 0));
    for _ in 1..DIAMETER_SEARCH_ROUNDS {
        let next = farthest_from(points, b);
        if next == a {
            break;
        }
        (a, b) = (b, next);
    }
    if points[a] == points[b] {
        return vec![points[a]];
    }
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };

    let mut first_half = approximate_polygon_dp(&points[lo..=hi], epsilon, false);
    let mut second_arc = points[hi..].to_vec();
    second_arc.extend_from_slice(&points[..=lo]);
    let second_half = approximate_polygon_dp(&second_arc, epsilon, false);

    // Both arcs repeat the two cut points.
    first_half.pop();
    first_half.extend_from_slice(&second_half[..second_half.len() - 1]);
    first_half
}

fn farthest_from(points: &[Point<i32>], from: usize) -> usize {
    let origin = points[from];
    points
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| {
            let dx = (p.x - origin.x) as i64;
            let dy = (p.y - origin.y) as i64;
            dx * dx + dy * dy
        })
        .map(|(i, _)| i)
        .unwrap_or(from)
}

/// Bounding boxes of the external components strictly larger than
/// `min_size` on both axes.
pub fn component_boxes(binary: &GrayImage, min_size: u32) -> Vec<BoundingBox> {
    find_external_contours(binary)
        .iter()
        .filter_map(|c| bounding_rect(&c.points))
        .filter(|b| b.width > min_size && b.height > min_size)
        .collect()
}
