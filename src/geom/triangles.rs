use crate::Point;
use crate::geom::EPS;
use crate::geom::segment::distance_point_to_segment_2d;

/// Interpolates the Z of the plane through `a`, `b`, `c` at the plan-view
/// position of `pt`, using barycentric coordinates.
///
/// The result is the plane elevation even when `pt` lies outside the
/// triangle; pair with [`point_in_triangle_error`] when containment matters.
pub fn interpolate_z(pt: Point, a: Point, b: Point, c: Point) -> f64 {
    let det = (b.y - c.y) * (a.x - c.x) + (c.x - b.x) * (a.y - c.y);
    if det.abs() < EPS {
        // Degenerate triangle, fall back to the mean elevation
        return (a.z + b.z + c.z) / 3.0;
    }
    let w_a = ((b.y - c.y) * (pt.x - c.x) + (c.x - b.x) * (pt.y - c.y)) / det;
    let w_b = ((c.y - a.y) * (pt.x - c.x) + (a.x - c.x) * (pt.y - c.y)) / det;
    let w_c = 1.0 - w_a - w_b;
    w_a * a.z + w_b * b.z + w_c * c.z
}

/// Plan-view distance from `pt` to the triangle `a`, `b`, `c`.
///
/// Zero when the point is inside or on the boundary, otherwise the distance
/// to the nearest edge. Used to pick the best candidate triangle among the
/// spatial index hits.
pub fn point_in_triangle_error(pt: Point, a: Point, b: Point, c: Point) -> f64 {
    let d1 = sign(pt, a, b);
    let d2 = sign(pt, b, c);
    let d3 = sign(pt, c, a);
    let has_neg = d1 < -EPS || d2 < -EPS || d3 < -EPS;
    let has_pos = d1 > EPS || d2 > EPS || d3 > EPS;
    if !(has_neg && has_pos) {
        return 0.0;
    }
    distance_point_to_segment_2d(pt, a, b)
        .min(distance_point_to_segment_2d(pt, b, c))
        .min(distance_point_to_segment_2d(pt, c, a))
}

/// Returns true if `pt` lies inside or on the triangle in plan view.
pub fn point_in_triangle(pt: Point, a: Point, b: Point, c: Point) -> bool {
    point_in_triangle_error(pt, a, b, c) < EPS
}

fn sign(p: Point, a: Point, b: Point) -> f64 {
    (p.x - b.x) * (a.y - b.y) - (a.x - b.x) * (p.y - b.y)
}
