//! Plan-view line segment operations.
//!
//! Obstacle crossings and terrain navigation work in the horizontal plane
//! with elevations interpolated separately, so the intersection tests here
//! ignore Z entirely.

use crate::Point;
use crate::geom::EPS;

/// Finds the plan-view intersection point of two segments.
///
/// Parallel, collinear and disjoint pairs return `None`. The returned point
/// carries `z = NaN`; callers interpolate the elevation they need.
pub fn intersection_2d(p1: Point, p2: Point, p3: Point, p4: Point) -> Option<Point> {
    let d1x = p2.x - p1.x;
    let d1y = p2.y - p1.y;
    let d2x = p4.x - p3.x;
    let d2y = p4.y - p3.y;

    let denom = d1x * d2y - d1y * d2x;
    if denom.abs() < EPS {
        return None;
    }

    let rx = p3.x - p1.x;
    let ry = p3.y - p1.y;
    let t = (rx * d2y - ry * d2x) / denom;
    let s = (rx * d1y - ry * d1x) / denom;

    if !(-EPS..=1.0 + EPS).contains(&t) || !(-EPS..=1.0 + EPS).contains(&s) {
        return None;
    }

    Some(Point::new(p1.x + t * d1x, p1.y + t * d1y, f64::NAN))
}

/// Closest pair of plan-view points between two segments.
///
/// Returns `(on_first, on_second)`. When the segments cross, both points
/// coincide with the intersection.
pub fn closest_points_2d(p1: Point, p2: Point, p3: Point, p4: Point) -> (Point, Point) {
    if let Some(x) = intersection_2d(p1, p2, p3, p4) {
        let pt = Point::new(x.x, x.y, 0.0);
        return (pt, pt);
    }

    // No proper crossing: the minimum is attained at an endpoint projection.
    let candidates = [
        (p1, closest_point_on_segment_2d(p1, p3, p4)),
        (p2, closest_point_on_segment_2d(p2, p3, p4)),
        (closest_point_on_segment_2d(p3, p1, p2), p3),
        (closest_point_on_segment_2d(p4, p1, p2), p4),
    ];
    let mut best = candidates[0];
    let mut best_d = best.0.distance_2d(&best.1);
    for c in &candidates[1..] {
        let d = c.0.distance_2d(&c.1);
        if d < best_d {
            best_d = d;
            best = *c;
        }
    }
    (best.0, best.1)
}

/// Projects `pt` onto the segment `p1`-`p2` in plan view, clamped to the
/// segment bounds.
pub fn closest_point_on_segment_2d(pt: Point, p1: Point, p2: Point) -> Point {
    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq < EPS * EPS {
        return p1;
    }
    let t = (((pt.x - p1.x) * dx + (pt.y - p1.y) * dy) / len_sq).clamp(0.0, 1.0);
    Point::new(p1.x + t * dx, p1.y + t * dy, p1.z + t * (p2.z - p1.z))
}

/// Plan-view distance from `pt` to the segment `p1`-`p2`.
pub fn distance_point_to_segment_2d(pt: Point, p1: Point, p2: Point) -> f64 {
    pt.distance_2d(&closest_point_on_segment_2d(pt, p1, p2))
}

/// Distance from `pt` to the 3-D segment `p1`-`p2`.
pub fn distance_point_to_segment_3d(pt: Point, p1: Point, p2: Point) -> f64 {
    let seg = p2 - p1;
    let len_sq = seg.dot(seg);
    if len_sq < EPS * EPS {
        return pt.distance_3d(&p1);
    }
    let t = ((pt - p1).dot(seg) / len_sq).clamp(0.0, 1.0);
    pt.distance_3d(&Point::new(
        p1.x + t * seg.dx,
        p1.y + t * seg.dy,
        p1.z + t * seg.dz,
    ))
}

/// Fraction of the projection of `pt` onto the infinite line `p1`-`p2`,
/// measured in plan view (0 at `p1`, 1 at `p2`, unclamped).
pub fn projection_fraction_2d(pt: Point, p1: Point, p2: Point) -> f64 {
    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq < EPS * EPS {
        return 0.0;
    }
    ((pt.x - p1.x) * dx + (pt.y - p1.y) * dy) / len_sq
}

/// Splits the segment `c0`-`c1` into pieces no longer than `max_len`.
///
/// Spatial index queries along a long segment use one bounded envelope per
/// piece instead of a single oversized envelope covering the whole scene.
pub fn split_segment(c0: Point, c1: Point, max_len: f64) -> Vec<(Point, Point)> {
    let len = c0.distance_2d(&c1);
    if len < max_len {
        return vec![(c0, c1)];
    }
    let mut parts = Vec::new();
    let n = (len / max_len).ceil() as usize;
    for i in 0..n {
        let t0 = i as f64 / n as f64;
        let t1 = ((i + 1) as f64 / n as f64).min(1.0);
        parts.push((Point::lerp(c0, c1, t0), Point::lerp(c0, c1, t1)));
    }
    parts
}
