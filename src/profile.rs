//! Cut profiles: the ordered sequence of significant points along the
//! straight line between one source and one receiver.

use std::collections::HashSet;

use log::warn;

use crate::Point;
use crate::geom::MILLIMETER;
use crate::geom::envelope::Envelope;
use crate::geom::segment::{
    distance_point_to_segment_3d, intersection_2d, projection_fraction_2d, split_segment,
};
use crate::scene::{FacetKind, Scene};

/// Ground coefficient forced onto points inside a building footprint.
pub const BUILDING_INTERIOR_G: f64 = 0.0;

/// Terrain points closer than this to the line through their neighbors are
/// dropped as triangulation artifacts.
const PLANARITY_TOLERANCE: f64 = 1e-3;

/// The event a cut point stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutKind {
    Source,
    Receiver,
    /// Crossing of a building boundary (index into `Scene::buildings`).
    Building(usize),
    /// Crossing of a free-standing wall (index into `Scene::walls`).
    Wall(usize),
    /// Crossing into a ground-absorption change (index into
    /// `Scene::ground_regions`).
    GroundEffect(usize),
    /// Elevation break of the terrain mesh.
    Topography,
    /// Bounce point of a reflected path, supplied by callers that build
    /// mirrored profiles.
    Reflection,
}

/// A single position along the propagation line where something happens.
///
/// Elevation and ground coefficient start unresolved (`None`) and are filled
/// by the forward passes before the profile is returned.
#[derive(Debug, Clone)]
pub struct CutPoint {
    pub x: f64,
    pub y: f64,
    /// Elevation of the event itself (wall top at a crossing, endpoint Z at
    /// the source). `None` for points that deliberately have no independent
    /// elevation, e.g. wall-bottom markers; these resolve to the ground.
    pub z: Option<f64>,
    /// Terrain elevation under the point.
    pub z_ground: Option<f64>,
    /// Ground-absorption coefficient; `None` inherits from the predecessor.
    pub ground_coef: Option<f64>,
    pub kind: CutKind,
    /// Per-band absorption of the crossed obstacle; empty otherwise.
    pub absorption: Vec<f64>,
}

impl CutPoint {
    pub fn new(pt: Point, kind: CutKind) -> Self {
        Self {
            x: pt.x,
            y: pt.y,
            z: if pt.z.is_nan() { None } else { Some(pt.z) },
            z_ground: None,
            ground_coef: None,
            kind,
            absorption: Vec::new(),
        }
    }

    /// Full 3-D position; the resolved elevation falls back to the ground.
    pub fn position(&self) -> Point {
        Point::new(
            self.x,
            self.y,
            self.z.or(self.z_ground).unwrap_or(0.0),
        )
    }

    fn sort_rank(&self) -> i8 {
        match self.kind {
            CutKind::Source => -1,
            CutKind::Receiver => 1,
            _ => 0,
        }
    }
}

/// Ordered cut points between one source and one receiver.
///
/// The first point is always the source and the last the receiver;
/// intermediate points are sorted by projected distance from the source.
#[derive(Debug, Clone, Default)]
pub struct CutProfile {
    pub pts: Vec<CutPoint>,
    pub has_building_intersection: bool,
    pub has_topography_intersection: bool,
}

impl CutProfile {
    pub fn source(&self) -> &CutPoint {
        &self.pts[0]
    }

    pub fn receiver(&self) -> &CutPoint {
        &self.pts[self.pts.len() - 1]
    }

    /// 3-D distance between source and receiver.
    pub fn direct_distance(&self) -> f64 {
        self.source().position().distance_3d(&self.receiver().position())
    }

    /// True when neither terrain nor any obstacle blocks the chord.
    pub fn is_free_field(&self) -> bool {
        !self.has_building_intersection && !self.has_topography_intersection
    }

    /// Sorts points by projected distance from the source, keeping the
    /// source first and the receiver last.
    fn sort(&mut self, source: Point, receiver: Point) {
        self.pts.sort_by(|a, b| {
            let ta = projection_fraction_2d(Point::new_2d(a.x, a.y), source, receiver)
                .clamp(0.0, 1.0);
            let tb = projection_fraction_2d(Point::new_2d(b.x, b.y), source, receiver)
                .clamp(0.0, 1.0);
            ta.total_cmp(&tb).then(a.sort_rank().cmp(&b.sort_rank()))
        });
    }

    /// Forward-propagates ground coefficients: unresolved points inherit the
    /// last coefficient established by a ground-effect boundary (or the
    /// source's coefficient before any boundary was crossed).
    fn propagate_ground(&mut self) {
        let mut current = self.pts[0].ground_coef.unwrap_or(0.0);
        for pt in &mut self.pts {
            if pt.ground_coef.is_none() {
                pt.ground_coef = Some(current);
            } else if matches!(pt.kind, CutKind::GroundEffect(_)) {
                current = pt.ground_coef.unwrap_or(current);
            }
        }
    }

    /// Interpolates unresolved ground elevations between the nearest
    /// resolved neighbors; a point that also lacks its own elevation is set
    /// onto the interpolated ground.
    fn interpolate_z_ground(&mut self) {
        let len = self.pts.len();
        let mut prev = 0;
        for i in 1..len.saturating_sub(1) {
            if self.pts[i].z_ground.is_some() {
                prev = i;
                continue;
            }
            let next = (i + 1..len)
                .find(|&j| self.pts[j].z_ground.is_some())
                .unwrap_or(len - 1);
            let a = &self.pts[prev];
            let b = &self.pts[next];
            let pa = Point::new(a.x, a.y, a.z_ground.unwrap_or(0.0));
            let pb = Point::new(b.x, b.y, b.z_ground.unwrap_or(0.0));
            let here = Point::new_2d(self.pts[i].x, self.pts[i].y);
            let zg = here.interpolate_z_segment(&pa, &pb);
            let pt = &mut self.pts[i];
            pt.z_ground = Some(zg);
            if pt.z.is_none() {
                pt.z = Some(zg);
            }
        }
    }
}

impl Scene {
    /// Builds the cut profile along the straight line from `source` to
    /// `receiver`.
    ///
    /// `g_default` is the ground coefficient used wherever no ground region
    /// covers a probed point. With `stop_at_obstruction` the search returns
    /// the partial profile as soon as terrain or an obstacle blocks the
    /// chord; only the intersection flags are meaningful then.
    pub fn cut_profile(
        &self,
        source: Point,
        receiver: Point,
        g_default: f64,
        stop_at_obstruction: bool,
    ) -> CutProfile {
        let mut profile = CutProfile::default();

        let mut source_pt = CutPoint::new(source, CutKind::Source);
        source_pt.ground_coef = Some(self.ground_coefficient(source).unwrap_or(g_default));
        profile.pts.push(source_pt);
        profile.pts.push(CutPoint::new(receiver, CutKind::Receiver));

        // Terrain crossings
        if let Some(mesh) = &self.terrain {
            let walk = mesh.walk(source, receiver, stop_at_obstruction);
            if walk.points.len() >= 2 {
                profile.pts[0].z_ground = Some(walk.points[0].z);
                profile.pts[1].z_ground = Some(walk.points[walk.points.len() - 1].z);
                profile.has_topography_intersection = !walk.free_field;
                for i in 1..walk.points.len() - 1 {
                    let prev = walk.points[i - 1];
                    let cur = walk.points[i];
                    let next = walk.points[i + 1];
                    // Skip near-collinear triangulation artifacts
                    if distance_point_to_segment_3d(cur, prev, next) < PLANARITY_TOLERANCE {
                        continue;
                    }
                    let mut pt = CutPoint::new(cur, CutKind::Topography);
                    pt.z_ground = Some(cur.z);
                    profile.pts.push(pt);
                }
            } else {
                warn!(
                    "propagation out of the terrain area from ({:.1}, {:.1}) to ({:.1}, {:.1})",
                    source.x, source.y, receiver.x, receiver.y
                );
                profile.pts[0].z_ground = Some(0.0);
                profile.pts[1].z_ground = Some(0.0);
            }
            if stop_at_obstruction && profile.has_topography_intersection {
                return finalize(profile, source, receiver);
            }
        } else {
            profile.pts[0].z_ground = Some(0.0);
            profile.pts[1].z_ground = Some(0.0);
        }

        // Obstacle and ground-region boundary crossings
        self.add_obstacle_cut_points(&mut profile, source, receiver, g_default, stop_at_obstruction);

        finalize(profile, source, receiver)
    }

    fn add_obstacle_cut_points(
        &self,
        profile: &mut CutProfile,
        source: Point,
        receiver: Point,
        g_default: f64,
        stop_at_obstruction: bool,
    ) {
        let dir = match (receiver - source).normalize_2d() {
            Some(v) => v,
            None => return, // coincident endpoints, nothing to cross
        };
        let step_after = dir * MILLIMETER;
        let step_before = step_after * -1.0;

        let mut processed: HashSet<usize> = HashSet::new();
        for (a, b) in split_segment(source, receiver, self.max_line_length) {
            for fi in self.facets_near(&Envelope::new(a, b)) {
                if !processed.insert(fi) {
                    continue;
                }
                let facet = &self.facets[fi];
                let Some(raw) = intersection_2d(source, receiver, facet.p0, facet.p1) else {
                    continue;
                };
                let crossing = if facet.p0.z.is_finite() && facet.p1.z.is_finite() {
                    Point::new(
                        raw.x,
                        raw.y,
                        raw.interpolate_z_segment(&facet.p0, &facet.p1),
                    )
                } else {
                    raw
                };
                let chord_z = crossing.interpolate_z_segment(&source, &receiver);

                match facet.kind {
                    FacetKind::Building(bi) => {
                        let mut pt = CutPoint::new(crossing, CutKind::Building(bi));
                        pt.ground_coef = Some(BUILDING_INTERIOR_G);
                        pt.absorption = facet.absorption.clone();
                        profile.pts.push(pt);
                        // Marker at the bottom of the outer face, offset an
                        // infinitesimal distance to the exterior side
                        let along = match (facet.p1 - facet.p0).normalize_2d() {
                            Some(v) => v,
                            None => continue,
                        };
                        let offset = along.rotate_left() * MILLIMETER;
                        let exterior = Point::new(
                            crossing.x + offset.dx,
                            crossing.y + offset.dy,
                            f64::NAN,
                        );
                        profile
                            .pts
                            .push(CutPoint::new(exterior, CutKind::Building(bi)));
                        if chord_z <= crossing.z {
                            profile.has_building_intersection = true;
                        }
                    }
                    FacetKind::Wall(wi) => {
                        // Straddling points let a thin screen show up as a
                        // clean diffraction edge; only the middle point
                        // carries the wall-top elevation
                        for off in [Some(step_before), None, Some(step_after)] {
                            let pos = match off {
                                Some(v) => {
                                    Point::new(crossing.x + v.dx, crossing.y + v.dy, f64::NAN)
                                }
                                None => crossing,
                            };
                            let mut pt = CutPoint::new(pos, CutKind::Wall(wi));
                            pt.absorption = facet.absorption.clone();
                            profile.pts.push(pt);
                        }
                        if chord_z <= crossing.z {
                            profile.has_building_intersection = true;
                        }
                    }
                    FacetKind::GroundBoundary(gi) => {
                        // Probe just past the crossing to learn the new
                        // coefficient in the direction of travel
                        let probe = Point::new_2d(
                            crossing.x + step_after.dx,
                            crossing.y + step_after.dy,
                        );
                        let region = &self.ground_regions[gi];
                        let boundary = Point::new(crossing.x, crossing.y, f64::NAN);
                        if region.contains(probe) {
                            let mut pt = CutPoint::new(boundary, CutKind::GroundEffect(gi));
                            pt.ground_coef = Some(region.coefficient);
                            profile.pts.push(pt);
                        } else if self.ground_coefficient(probe).is_none() {
                            let mut pt = CutPoint::new(boundary, CutKind::GroundEffect(gi));
                            pt.ground_coef = Some(g_default);
                            profile.pts.push(pt);
                        }
                    }
                }
                if stop_at_obstruction && profile.has_building_intersection {
                    return;
                }
            }
        }
    }
}

fn finalize(mut profile: CutProfile, source: Point, receiver: Point) -> CutProfile {
    profile.sort(source, receiver);
    profile.propagate_ground();
    profile.interpolate_z_ground();
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneBuilder;

    fn square(x0: f64, y0: f64, side: f64) -> Vec<Point> {
        vec![
            Point::new_2d(x0, y0),
            Point::new_2d(x0 + side, y0),
            Point::new_2d(x0 + side, y0 + side),
            Point::new_2d(x0, y0 + side),
        ]
    }

    #[test]
    fn test_free_field_two_points() {
        let scene = SceneBuilder::new().seal().unwrap();
        let profile = scene.cut_profile(
            Point::new(0.0, 0.0, 1.0),
            Point::new(10.0, 0.0, 1.0),
            0.0,
            false,
        );
        assert_eq!(profile.pts.len(), 2);
        assert_eq!(profile.source().kind, CutKind::Source);
        assert_eq!(profile.receiver().kind, CutKind::Receiver);
        assert!(profile.is_free_field());
        assert_eq!(profile.source().ground_coef, Some(0.0));
        assert_eq!(profile.source().z_ground, Some(0.0));
    }

    #[test]
    fn test_free_field_over_flat_terrain() {
        let mut builder = SceneBuilder::new();
        for (x, y) in [(0.0, -10.0), (30.0, -10.0), (30.0, 10.0), (0.0, 10.0)] {
            builder.add_terrain_point(Point::new(x, y, 0.0));
        }
        builder.add_ground_region(vec![square(-5.0, -15.0, 50.0)], 0.5);
        let scene = builder.seal().unwrap();
        let profile = scene.cut_profile(
            Point::new(2.0, 0.0, 1.0),
            Point::new(28.0, 0.0, 1.0),
            0.0,
            false,
        );
        // Collinear terrain crossings are simplified away; the single ground
        // region adds no transition along the line.
        assert!(
            profile
                .pts
                .iter()
                .all(|p| !matches!(p.kind, CutKind::Topography)),
            "flat terrain must not add topography points"
        );
        assert!(profile.is_free_field());
        assert_eq!(profile.source().ground_coef, Some(0.5));
        assert_eq!(profile.receiver().ground_coef, Some(0.5));
    }

    #[test]
    fn test_wall_crossing_inserts_three_points() {
        let mut builder = SceneBuilder::new();
        builder.add_wall(
            vec![Point::new_2d(5.0, -5.0), Point::new_2d(5.0, 5.0)],
            4.0,
            vec![0.3; 8],
            1,
        );
        let scene = builder.seal().unwrap();
        let profile = scene.cut_profile(
            Point::new(0.0, 0.0, 1.0),
            Point::new(10.0, 0.0, 1.5),
            0.0,
            false,
        );
        let wall_pts: Vec<&CutPoint> = profile
            .pts
            .iter()
            .filter(|p| matches!(p.kind, CutKind::Wall(_)))
            .collect();
        assert_eq!(wall_pts.len(), 3, "wall crossing must contribute 3 points");
        assert!(profile.has_building_intersection);
        // Middle point carries the wall top, straddles sit on the ground.
        assert!((wall_pts[1].position().z - 4.0).abs() < 1e-9);
        assert!(wall_pts[0].position().z.abs() < 1e-9);
        assert!(wall_pts[2].position().z.abs() < 1e-9);
        assert_eq!(wall_pts[0].absorption.len(), 8);
        // Straddling points sit a millimeter around the crossing.
        assert!((wall_pts[0].x - (5.0 - MILLIMETER)).abs() < 1e-9);
        assert!((wall_pts[2].x - (5.0 + MILLIMETER)).abs() < 1e-9);
    }

    #[test]
    fn test_low_wall_does_not_obstruct() {
        let mut builder = SceneBuilder::new();
        builder.add_wall(
            vec![Point::new_2d(5.0, -5.0), Point::new_2d(5.0, 5.0)],
            0.5,
            vec![],
            1,
        );
        let scene = builder.seal().unwrap();
        let profile = scene.cut_profile(
            Point::new(0.0, 0.0, 2.0),
            Point::new(10.0, 0.0, 2.0),
            0.0,
            false,
        );
        assert!(!profile.has_building_intersection);
    }

    #[test]
    fn test_building_crossing() {
        let mut builder = SceneBuilder::new();
        builder.add_building(square(4.0, -5.0, 10.0), Some(6.0), vec![0.1; 8], 42);
        let scene = builder.seal().unwrap();
        let profile = scene.cut_profile(
            Point::new(0.0, 0.0, 1.0),
            Point::new(20.0, 0.0, 1.0),
            0.0,
            false,
        );
        assert!(profile.has_building_intersection);
        // Two boundary crossings, each with an exterior marker.
        let building_pts: Vec<&CutPoint> = profile
            .pts
            .iter()
            .filter(|p| matches!(p.kind, CutKind::Building(_)))
            .collect();
        assert_eq!(building_pts.len(), 4);
        // Crossing points carry the building-interior ground coefficient.
        assert!(
            building_pts
                .iter()
                .any(|p| p.ground_coef == Some(BUILDING_INTERIOR_G))
        );
        // The crossing elevation is the building top.
        assert!(
            building_pts
                .iter()
                .any(|p| p.z.map(|z| (z - 6.0).abs() < 1e-9).unwrap_or(false))
        );
    }

    #[test]
    fn test_points_sorted_by_projection() {
        let mut builder = SceneBuilder::new();
        builder.add_building(square(4.0, -2.0, 4.0), Some(6.0), vec![], 1);
        builder.add_wall(
            vec![Point::new_2d(12.0, -5.0), Point::new_2d(12.0, 5.0)],
            4.0,
            vec![],
            2,
        );
        builder.add_ground_region(vec![square(15.0, -5.0, 10.0)], 0.9);
        let scene = builder.seal().unwrap();
        let source = Point::new(0.0, 0.0, 1.0);
        let receiver = Point::new(20.0, 0.0, 1.0);
        let profile = scene.cut_profile(source, receiver, 0.0, false);

        assert_eq!(profile.source().kind, CutKind::Source);
        assert_eq!(profile.receiver().kind, CutKind::Receiver);
        let mut last_t = -1.0;
        for pt in &profile.pts {
            let t = projection_fraction_2d(Point::new_2d(pt.x, pt.y), source, receiver)
                .clamp(0.0, 1.0);
            assert!(
                t >= last_t - 1e-12,
                "cut points must be monotone along the line"
            );
            last_t = t;
        }
        // Every point has resolved ground data after the passes.
        for pt in &profile.pts {
            assert!(pt.ground_coef.is_some());
            assert!(pt.z_ground.is_some());
        }
    }

    #[test]
    fn test_ground_transition_coefficient() {
        let mut builder = SceneBuilder::new();
        builder.add_ground_region(vec![square(10.0, -5.0, 10.0)], 0.7);
        let scene = builder.seal().unwrap();
        let profile = scene.cut_profile(
            Point::new(0.0, 0.0, 1.0),
            Point::new(30.0, 0.0, 1.0),
            0.1,
            false,
        );
        // Two boundary crossings: entering at x=10 (G=0.7), leaving at x=20
        // (fall back to the default).
        let transitions: Vec<&CutPoint> = profile
            .pts
            .iter()
            .filter(|p| matches!(p.kind, CutKind::GroundEffect(_)))
            .collect();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].ground_coef, Some(0.7));
        assert_eq!(transitions[1].ground_coef, Some(0.1));
        // The receiver inherits the coefficient active after the last
        // transition.
        assert_eq!(profile.receiver().ground_coef, Some(0.1));
        // Source starts outside any region -> caller default.
        assert_eq!(profile.source().ground_coef, Some(0.1));
    }

    #[test]
    fn test_terrain_obstruction_early_exit() {
        let mut builder = SceneBuilder::new();
        builder.add_terrain_point(Point::new(0.0, -10.0, 0.0));
        builder.add_terrain_point(Point::new(0.0, 10.0, 0.0));
        builder.add_terrain_point(Point::new(10.0, -10.0, 8.0));
        builder.add_terrain_point(Point::new(10.0, 10.0, 8.0));
        builder.add_terrain_point(Point::new(20.0, -10.0, 0.0));
        builder.add_terrain_point(Point::new(20.0, 10.0, 0.0));
        let scene = builder.seal().unwrap();
        let profile = scene.cut_profile(
            Point::new(1.0, 0.0, 1.0),
            Point::new(19.0, 0.0, 1.0),
            0.0,
            true,
        );
        assert!(profile.has_topography_intersection);
        // Early exit still returns a well-formed, sorted partial profile.
        assert_eq!(profile.source().kind, CutKind::Source);
        assert_eq!(profile.receiver().kind, CutKind::Receiver);
    }

    #[test]
    fn test_obstacle_early_exit_stops_at_first_blocker() {
        let mut builder = SceneBuilder::new();
        builder.add_wall(
            vec![Point::new_2d(3.0, -5.0), Point::new_2d(3.0, 5.0)],
            4.0,
            vec![],
            1,
        );
        builder.add_wall(
            vec![Point::new_2d(7.0, -5.0), Point::new_2d(7.0, 5.0)],
            4.0,
            vec![],
            2,
        );
        let scene = builder.seal().unwrap();
        let profile = scene.cut_profile(
            Point::new(0.0, 0.0, 1.0),
            Point::new(10.0, 0.0, 1.0),
            0.0,
            true,
        );
        assert!(profile.has_building_intersection);
        let wall_pts: Vec<&CutPoint> = profile
            .pts
            .iter()
            .filter(|p| matches!(p.kind, CutKind::Wall(_)))
            .collect();
        // The search aborts after the first obstructing wall.
        assert_eq!(wall_pts.len(), 3);
        assert!(wall_pts.iter().all(|p| p.kind == CutKind::Wall(0)));
    }

    #[test]
    fn test_ridge_adds_topography_points() {
        let mut builder = SceneBuilder::new();
        builder.add_terrain_point(Point::new(0.0, -10.0, 0.0));
        builder.add_terrain_point(Point::new(0.0, 10.0, 0.0));
        builder.add_terrain_line(Point::new(10.0, -10.0, 4.0), Point::new(10.0, 10.0, 4.0));
        builder.add_terrain_point(Point::new(20.0, -10.0, 0.0));
        builder.add_terrain_point(Point::new(20.0, 10.0, 0.0));
        let scene = builder.seal().unwrap();
        let profile = scene.cut_profile(
            Point::new(1.0, 0.0, 10.0),
            Point::new(19.0, 0.0, 10.0),
            0.0,
            false,
        );
        // Chord at z=10 clears the 4 m ridge but the break line must appear.
        assert!(!profile.has_topography_intersection);
        assert!(
            profile
                .pts
                .iter()
                .any(|p| matches!(p.kind, CutKind::Topography)),
            "ridge break point missing from profile"
        );
    }
}
