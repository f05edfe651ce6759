//! Triangulated terrain surface and the segment walk over it.

use std::collections::HashSet;

use crate::Point;
use crate::geom::delaunay::Triangulation;
use crate::geom::envelope::Envelope;
use crate::geom::segment::{closest_point_on_segment_2d, closest_points_2d, intersection_2d};
use crate::geom::triangles::{interpolate_z, point_in_triangle, point_in_triangle_error};
use crate::scene::index::GridIndex;

/// Two plan-view lines closer than this at their nearest approach are
/// treated as crossing during the triangle walk.
pub const TRIANGLE_INTERSECTION_EPSILON: f64 = 1e-7;

/// Result of walking a segment across the terrain mesh.
pub struct TerrainWalk {
    /// Crossing coordinates in walk order, elevations interpolated from the
    /// mesh. Empty when the segment never touches the mesh.
    pub points: Vec<Point>,
    /// True when the straight chord stays above the terrain everywhere.
    pub free_field: bool,
}

/// Immutable triangulated elevation surface with a spatial index over
/// triangle envelopes.
pub struct TerrainMesh {
    vertices: Vec<Point>,
    triangles: Vec<[usize; 3]>,
    neighbors: Vec<[Option<usize>; 3]>,
    index: GridIndex,
}

impl TerrainMesh {
    pub fn new(tin: Triangulation) -> Self {
        let env = Envelope::from_points(&tin.vertices).unwrap_or(Envelope {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 1.0,
            max_y: 1.0,
        });
        let mut index = GridIndex::new(GridIndex::step_for(&env));
        for (ti, tri) in tin.triangles.iter().enumerate() {
            let pts = [
                tin.vertices[tri[0]],
                tin.vertices[tri[1]],
                tin.vertices[tri[2]],
            ];
            if let Some(tri_env) = Envelope::from_points(&pts) {
                index.insert(&tri_env, ti);
            }
        }
        Self {
            vertices: tin.vertices,
            triangles: tin.triangles,
            neighbors: tin.neighbors,
            index,
        }
    }

    pub fn triangle_vertices(&self, t: usize) -> [Point; 3] {
        let tri = self.triangles[t];
        [
            self.vertices[tri[0]],
            self.vertices[tri[1]],
            self.vertices[tri[2]],
        ]
    }

    /// Terrain elevation at a plan-view position, or `None` outside the mesh.
    pub fn elevation(&self, pt: Point) -> Option<f64> {
        for ti in self.index.query(&Envelope::from_point(pt)) {
            let [a, b, c] = self.triangle_vertices(ti);
            if point_in_triangle(pt, a, b, c) {
                return Some(interpolate_z(pt, a, b, c));
            }
        }
        None
    }

    /// Best candidate triangle near a point: the one with the smallest
    /// plan-view distance error among the index hits (zero when containing).
    fn triangle_at(&self, pt: Point) -> Option<usize> {
        let mut env = Envelope::from_point(pt);
        env.expand_by(1.0);
        let mut best: Option<(f64, usize)> = None;
        for ti in self.index.query(&env) {
            let [a, b, c] = self.triangle_vertices(ti);
            let err = point_in_triangle_error(pt, a, b, c);
            if best.map(|(e, _)| err < e).unwrap_or(true) {
                best = Some((err, ti));
            }
        }
        best.map(|(_, ti)| ti)
    }

    /// Entry point of the segment into the mesh when its origin lies outside:
    /// the nearest edge crossing to `p1` over all candidate triangles.
    fn closest_triangle_intersection(&self, p1: Point, p2: Point) -> Option<(Point, usize)> {
        let mut env = Envelope::new(p1, p2);
        if env.width() < 1.0 || env.height() < 1.0 {
            env.expand_by(1.0);
        }
        let mut best: Option<(f64, Point, usize)> = None;
        for ti in self.index.query(&env) {
            let verts = self.triangle_vertices(ti);
            for k in 0..3 {
                let e0 = verts[k];
                let e1 = verts[(k + 1) % 3];
                if let Some(x) = intersection_2d(p1, p2, e0, e1) {
                    let crossing = Point::new(x.x, x.y, x.interpolate_z_segment(&e0, &e1));
                    let d = p1.distance_2d(&crossing);
                    if best.map(|(bd, _, _)| d < bd).unwrap_or(true) {
                        best = Some((d, crossing, ti));
                    }
                }
            }
        }
        best.map(|(_, pt, ti)| (pt, ti))
    }

    /// Nearest edge crossing of the segment out of triangle `tri`, skipping
    /// edges whose neighbor was already visited in this walk.
    ///
    /// Returns the neighbor across the chosen edge (`None` on the mesh
    /// boundary) and the crossing coordinate with edge-interpolated Z.
    fn next_triangle(
        &self,
        tri: usize,
        p1: Point,
        p2: Point,
        history: &HashSet<usize>,
    ) -> Option<(Option<usize>, Point)> {
        let verts = self.triangle_vertices(tri);
        let mut best: Option<(f64, usize)> = None;
        let mut best_crossing = Point::new_2d(0.0, 0.0);
        for k in 0..3 {
            if let Some(n) = self.neighbors[tri][k] {
                if history.contains(&n) {
                    continue;
                }
            }
            let e0 = verts[k];
            let e1 = verts[(k + 1) % 3];
            let (on_line, on_edge) = closest_points_2d(p1, p2, e0, e1);
            if on_line.distance_2d(&on_edge) < TRIANGLE_INTERSECTION_EPSILON {
                let crossing = Point::new(
                    on_line.x,
                    on_line.y,
                    on_line.interpolate_z_segment(&e0, &e1),
                );
                let d = p2.distance_2d(&crossing);
                if best.map(|(bd, _)| d < bd).unwrap_or(true) {
                    best = Some((d, k));
                    best_crossing = crossing;
                }
            }
        }
        best.map(|(_, k)| (self.neighbors[tri][k], best_crossing))
    }

    /// Walks the mesh from `p1` to `p2`, collecting every triangle-boundary
    /// crossing with its interpolated elevation.
    ///
    /// At each interior crossing the terrain elevation is compared with the
    /// chord between `p1` and `p2`; terrain above the chord clears
    /// `free_field`. With `stop_on_obstruction` the walk aborts at the first
    /// such crossing and returns the partial point list.
    ///
    /// An origin outside the mesh is snapped to the nearest triangle the
    /// segment enters; when the segment misses the mesh entirely, the walk
    /// reports free field with no points.
    pub fn walk(&self, p1: Point, p2: Point, stop_on_obstruction: bool) -> TerrainWalk {
        let mut points = Vec::new();

        let start = match self.triangle_at(p1) {
            Some(t) => t,
            None => match self.closest_triangle_intersection(p1, p2) {
                Some((entry, t)) => {
                    points.push(entry);
                    t
                }
                None => {
                    // The segment never meets the mesh.
                    return TerrainWalk {
                        points,
                        free_field: true,
                    };
                }
            },
        };

        let [a, b, c] = self.triangle_vertices(start);
        points.push(Point::new(p1.x, p1.y, interpolate_z(p1, a, b, c)));

        let mut history: HashSet<usize> = HashSet::new();
        let mut navigation = Some(start);
        let mut free_field = true;
        while let Some(tri) = navigation {
            history.insert(tri);
            match self.next_triangle(tri, p1, p2, &history) {
                Some((Some(neighbor), crossing)) => {
                    points.push(crossing);
                    let chord = closest_point_on_segment_2d(crossing, p1, p2);
                    if chord.z < crossing.z {
                        free_field = false;
                        if stop_on_obstruction {
                            return TerrainWalk {
                                points,
                                free_field: false,
                            };
                        }
                    }
                    navigation = Some(neighbor);
                }
                _ => {
                    // Segment leaves the mesh (or ends) in this triangle.
                    let [a, b, c] = self.triangle_vertices(tri);
                    points.push(Point::new(p2.x, p2.y, interpolate_z(p2, a, b, c)));
                    navigation = None;
                }
            }
        }

        TerrainWalk { points, free_field }
    }
}
