//! Spatial scene model: buildings, walls, ground-absorption regions and the
//! terrain mesh, fed incrementally and then sealed into an immutable,
//! thread-shareable structure with read-only spatial indexes.

pub mod index;
pub mod terrain;

use anyhow::{Context, Result};
use log::warn;

use crate::Point;
use crate::geom::EPS;
use crate::geom::delaunay::triangulate;
use crate::geom::envelope::Envelope;
use crate::scene::index::GridIndex;
use crate::scene::terrain::TerrainMesh;

/// Max length of one spatial-index query segment; longer propagation lines
/// are split so each query envelope stays local.
pub const DEFAULT_MAX_LINE_LENGTH: f64 = 60.0;

/// What an atomic obstacle segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetKind {
    /// Boundary segment of a building footprint (index into `Scene::buildings`).
    Building(usize),
    /// Segment of a free-standing wall (index into `Scene::walls`).
    Wall(usize),
    /// Boundary segment of a ground-absorption region (index into
    /// `Scene::ground_regions`).
    GroundBoundary(usize),
}

/// One atomic segment in the unified obstacle index.
///
/// Building and wall facets carry resolved top elevations in `p0.z` / `p1.z`
/// after sealing; ground-boundary facets are purely planimetric.
#[derive(Debug, Clone)]
pub struct Facet {
    pub p0: Point,
    pub p1: Point,
    pub kind: FacetKind,
    /// Per-band absorption of the owning obstacle; empty for ground boundaries.
    pub absorption: Vec<f64>,
}

/// Anything that decomposes into obstacle facets once the scene is sealed.
pub trait Obstacle {
    /// Indices into `Scene::facets` of this obstacle's boundary segments.
    fn boundary_facets(&self) -> &[usize];
}

/// A closed polygon obstacle with a height.
#[derive(Debug, Clone)]
pub struct Building {
    /// Open exterior ring, normalized to clockwise winding.
    pub footprint: Vec<Point>,
    /// Height above ground; `None` when unknown.
    pub height: Option<f64>,
    /// Per-band absorption coefficients.
    pub absorption: Vec<f64>,
    /// Database primary key, -1 when detached.
    pub pk: i64,
    /// Resolved top elevation (terrain under footprint + height), set at seal.
    pub z_top: f64,
    facets: Vec<usize>,
}

impl Obstacle for Building {
    fn boundary_facets(&self) -> &[usize] {
        &self.facets
    }
}

/// A free-standing barrier defined by a polyline.
#[derive(Debug, Clone)]
pub struct Wall {
    pub pts: Vec<Point>,
    pub height: f64,
    pub absorption: Vec<f64>,
    pub pk: i64,
    facets: Vec<usize>,
}

impl Obstacle for Wall {
    fn boundary_facets(&self) -> &[usize] {
        &self.facets
    }
}

/// An area with a dimensionless ground-absorption coefficient G in [0, 1].
#[derive(Debug, Clone)]
pub struct GroundRegion {
    /// One or more polygon parts (open rings).
    pub parts: Vec<Vec<Point>>,
    pub coefficient: f64,
}

impl GroundRegion {
    /// Even-odd containment over all parts, plan view.
    pub fn contains(&self, pt: Point) -> bool {
        self.parts.iter().any(|ring| ring_contains(ring, pt))
    }
}

/// Plan-view even-odd point-in-ring test. Boundary points count as inside.
fn ring_contains(ring: &[Point], pt: Point) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (ring[i], ring[j]);
        // On-edge test first so boundary points are deterministic
        if crate::geom::segment::distance_point_to_segment_2d(pt, a, b) < EPS {
            return true;
        }
        if (a.y > pt.y) != (b.y > pt.y) {
            let x_cross = a.x + (pt.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if pt.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Signed plan-view area of an open ring (positive for counter-clockwise).
fn ring_signed_area(ring: &[Point]) -> f64 {
    let n = ring.len();
    let mut sum = 0.0;
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        sum += a.x * b.y - b.x * a.y;
    }
    sum * 0.5
}

/// Drops consecutive duplicates and a closing point equal to the first.
fn sanitize_ring(mut ring: Vec<Point>) -> Vec<Point> {
    ring.dedup_by(|a, b| a.distance_2d(b) < EPS);
    let closed = matches!(ring.as_slice(), [first, .., last] if first.distance_2d(last) < EPS);
    if closed {
        ring.pop();
    }
    ring
}

/// Incrementally fed scene under construction.
///
/// Sealing consumes the builder, so every query path only ever sees the
/// immutable [`Scene`]; there is no mutation-after-seal to guard at runtime.
#[derive(Default)]
pub struct SceneBuilder {
    buildings: Vec<Building>,
    walls: Vec<Wall>,
    ground_regions: Vec<GroundRegion>,
    terrain_points: Vec<Point>,
    terrain_lines: Vec<(Point, Point)>,
    envelope: Option<Envelope>,
    /// When true, a finite Z on footprint vertices is taken as the absolute
    /// top altitude instead of extruding `height` from the terrain.
    z_buildings: bool,
    max_line_length: f64,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            ..Self::default()
        }
    }

    pub fn with_z_buildings(mut self, z_buildings: bool) -> Self {
        self.z_buildings = z_buildings;
        self
    }

    pub fn with_max_line_length(mut self, max_line_length: f64) -> Self {
        self.max_line_length = max_line_length.max(1.0);
        self
    }

    fn grow_envelope(&mut self, pts: &[Point]) {
        for p in pts {
            match &mut self.envelope {
                Some(env) => env.expand_to_include_point(*p),
                None => self.envelope = Some(Envelope::from_point(*p)),
            }
        }
    }

    /// Adds a building footprint. Degenerate rings are skipped with a warning.
    pub fn add_building(
        &mut self,
        footprint: Vec<Point>,
        height: Option<f64>,
        absorption: Vec<f64>,
        pk: i64,
    ) {
        let mut ring = sanitize_ring(footprint);
        if ring.len() < 3 {
            warn!("skipping building {pk}: footprint has fewer than 3 distinct vertices");
            return;
        }
        if let Some(h) = height {
            if h < 0.0 {
                warn!("skipping building {pk}: negative height {h}");
                return;
            }
        }
        // Normalize to clockwise so the exterior lies left of each segment
        if ring_signed_area(&ring) > 0.0 {
            ring.reverse();
        }
        self.grow_envelope(&ring);
        self.buildings.push(Building {
            footprint: ring,
            height,
            absorption,
            pk,
            z_top: 0.0,
            facets: Vec::new(),
        });
    }

    /// Adds a free-standing wall polyline.
    pub fn add_wall(&mut self, pts: Vec<Point>, height: f64, absorption: Vec<f64>, pk: i64) {
        let mut clean = pts;
        clean.dedup_by(|a, b| a.distance_2d(b) < EPS);
        if clean.len() < 2 {
            warn!("skipping wall {pk}: fewer than 2 distinct points");
            return;
        }
        self.grow_envelope(&clean);
        self.walls.push(Wall {
            pts: clean,
            height,
            absorption,
            pk,
            facets: Vec::new(),
        });
    }

    /// Adds a ground-absorption region (possibly multi-part).
    pub fn add_ground_region(&mut self, parts: Vec<Vec<Point>>, coefficient: f64) {
        let parts: Vec<Vec<Point>> = parts
            .into_iter()
            .map(sanitize_ring)
            .filter(|ring| ring.len() >= 3)
            .collect();
        if parts.is_empty() {
            warn!("skipping ground region: no valid polygon part");
            return;
        }
        let g = if (0.0..=1.0).contains(&coefficient) {
            coefficient
        } else {
            warn!("ground coefficient {coefficient} outside [0, 1], clamping");
            coefficient.clamp(0.0, 1.0)
        };
        for ring in &parts {
            self.grow_envelope(ring);
        }
        self.ground_regions.push(GroundRegion {
            parts,
            coefficient: g,
        });
    }

    /// Adds an elevation point for the terrain triangulation.
    pub fn add_terrain_point(&mut self, mut pt: Point) {
        if pt.z.is_nan() {
            pt.z = 0.0;
        }
        self.grow_envelope(&[pt]);
        self.terrain_points.push(pt);
    }

    /// Adds an elevation break line for the terrain triangulation.
    pub fn add_terrain_line(&mut self, p0: Point, p1: Point) {
        self.grow_envelope(&[p0, p1]);
        self.terrain_lines.push((p0, p1));
    }

    /// Finishes feeding: triangulates the terrain, resolves building and
    /// wall elevations and builds the spatial indexes.
    ///
    /// Consumes the builder; the returned [`Scene`] is immutable and can be
    /// shared read-only across worker threads.
    pub fn seal(self) -> Result<Scene> {
        let envelope = self.envelope.unwrap_or(Envelope {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 1.0,
            max_y: 1.0,
        });

        // Terrain triangulation
        let terrain = if self.terrain_points.len() + self.terrain_lines.len() > 1 {
            let mut vertices = self.terrain_points.clone();
            for (p0, p1) in &self.terrain_lines {
                vertices.push(*p0);
                vertices.push(*p1);
            }
            let tin = triangulate(&vertices).context("terrain triangulation failed")?;
            Some(TerrainMesh::new(tin))
        } else {
            None
        };

        let mut buildings = self.buildings;
        let mut walls = self.walls;
        let ground_regions = self.ground_regions;

        // Resolve elevations: building tops sit at height above the lowest
        // terrain under the footprint, wall endpoints at height above the
        // ground beneath each endpoint.
        for b in &mut buildings {
            let has_own_z = self.z_buildings
                && b.footprint.iter().all(|p| p.z.is_finite())
                && b.footprint.iter().any(|p| p.z != 0.0);
            if has_own_z {
                b.z_top = b
                    .footprint
                    .iter()
                    .map(|p| p.z)
                    .fold(f64::NEG_INFINITY, f64::max);
                continue;
            }
            let ground = match &terrain {
                Some(mesh) => b
                    .footprint
                    .iter()
                    .map(|p| mesh.elevation(*p).unwrap_or(0.0))
                    .fold(f64::INFINITY, f64::min),
                None => 0.0,
            };
            b.z_top = ground + b.height.unwrap_or(0.0);
        }
        for w in &mut walls {
            for p in &mut w.pts {
                if p.z.is_nan() || p.z == 0.0 {
                    let ground = terrain
                        .as_ref()
                        .and_then(|mesh| mesh.elevation(*p))
                        .unwrap_or(0.0);
                    p.z = ground + w.height;
                }
            }
        }

        // Decompose boundaries into the unified obstacle index
        fn push_facet(facets: &mut Vec<Facet>, index: &mut GridIndex, facet: Facet) -> usize {
            let id = facets.len();
            index.insert(&Envelope::new(facet.p0, facet.p1), id);
            facets.push(facet);
            id
        }
        let step = GridIndex::step_for(&envelope);
        let mut facets: Vec<Facet> = Vec::new();
        let mut obstacle_index = GridIndex::new(step);

        for (bi, b) in buildings.iter_mut().enumerate() {
            let n = b.footprint.len();
            for i in 0..n {
                let p0 = b.footprint[i];
                let p1 = b.footprint[(i + 1) % n];
                let id = push_facet(
                    &mut facets,
                    &mut obstacle_index,
                    Facet {
                        p0: Point::new(p0.x, p0.y, b.z_top),
                        p1: Point::new(p1.x, p1.y, b.z_top),
                        kind: FacetKind::Building(bi),
                        absorption: b.absorption.clone(),
                    },
                );
                b.facets.push(id);
            }
        }
        for (wi, w) in walls.iter_mut().enumerate() {
            for pair in 0..w.pts.len() - 1 {
                let id = push_facet(
                    &mut facets,
                    &mut obstacle_index,
                    Facet {
                        p0: w.pts[pair],
                        p1: w.pts[pair + 1],
                        kind: FacetKind::Wall(wi),
                        absorption: w.absorption.clone(),
                    },
                );
                w.facets.push(id);
            }
        }
        let mut ground_index = GridIndex::new(step);
        for (gi, region) in ground_regions.iter().enumerate() {
            for ring in &region.parts {
                if let Some(env) = Envelope::from_points(ring) {
                    ground_index.insert(&env, gi);
                }
                let n = ring.len();
                for i in 0..n {
                    push_facet(
                        &mut facets,
                        &mut obstacle_index,
                        Facet {
                            p0: ring[i],
                            p1: ring[(i + 1) % n],
                            kind: FacetKind::GroundBoundary(gi),
                            absorption: Vec::new(),
                        },
                    );
                }
            }
        }

        Ok(Scene {
            buildings,
            walls,
            ground_regions,
            facets,
            obstacle_index,
            ground_index,
            terrain,
            envelope,
            max_line_length: self.max_line_length,
        })
    }
}

/// Sealed scene: immutable geometry plus read-only spatial indexes.
pub struct Scene {
    pub buildings: Vec<Building>,
    pub walls: Vec<Wall>,
    pub ground_regions: Vec<GroundRegion>,
    pub facets: Vec<Facet>,
    obstacle_index: GridIndex,
    ground_index: GridIndex,
    pub terrain: Option<TerrainMesh>,
    pub envelope: Envelope,
    pub max_line_length: f64,
}

impl Scene {
    /// Ground-absorption coefficient at a plan-view position: the first
    /// inserted region containing the point, or `None`.
    pub fn ground_coefficient(&self, pt: Point) -> Option<f64> {
        for gi in self.ground_index.query(&Envelope::from_point(pt)) {
            let region = &self.ground_regions[gi];
            if region.contains(pt) {
                return Some(region.coefficient);
            }
        }
        None
    }

    /// Ids of obstacle facets whose envelope intersects the query envelope.
    pub fn facets_near(&self, env: &Envelope) -> Vec<usize> {
        self.obstacle_index.query(env)
    }

    /// Terrain elevation at a position, `None` outside the mesh (or when the
    /// scene has no terrain).
    pub fn terrain_elevation(&self, pt: Point) -> Option<f64> {
        self.terrain.as_ref().and_then(|mesh| mesh.elevation(pt))
    }

    pub fn has_terrain(&self) -> bool {
        self.terrain.is_some()
    }
}
