//! Abstract geometry and receiver provisioning.
//!
//! The computation core never talks to a data store directly; it consumes
//! these capabilities and leaves persistence to the embedding application.
//! [`MemoryProvider`] is the in-memory reference implementation used by the
//! tests.

use anyhow::{Result, bail};

use crate::Point;
use crate::compute::{PointSource, Receiver};
use crate::geom::envelope::Envelope;
use crate::scene::SceneBuilder;

/// A building row as delivered by a provider.
#[derive(Debug, Clone)]
pub struct BuildingRecord {
    pub footprint: Vec<Point>,
    pub height: Option<f64>,
    pub absorption: Vec<f64>,
    pub pk: i64,
}

/// A free-standing wall row as delivered by a provider.
#[derive(Debug, Clone)]
pub struct WallRecord {
    pub pts: Vec<Point>,
    pub height: f64,
    pub absorption: Vec<f64>,
    pub pk: i64,
}

/// A ground-absorption row; large regions are pre-split into bounded tiles
/// by the provider.
#[derive(Debug, Clone)]
pub struct GroundRecord {
    pub parts: Vec<Vec<Point>>,
    pub coefficient: f64,
}

/// Terrain input: scattered elevation points and break lines.
#[derive(Debug, Clone, Default)]
pub struct TerrainRecords {
    pub points: Vec<Point>,
    pub lines: Vec<(Point, Point)>,
}

/// Obstacles, ground regions and terrain clipped to an envelope.
pub trait GeometryProvider {
    fn buildings_in(&self, envelope: &Envelope) -> Result<Vec<BuildingRecord>>;
    fn walls_in(&self, envelope: &Envelope) -> Result<Vec<WallRecord>>;
    fn ground_regions_in(&self, envelope: &Envelope) -> Result<Vec<GroundRecord>>;
    fn terrain_in(&self, envelope: &Envelope) -> Result<TerrainRecords>;
}

/// Emission sources clipped to an envelope.
pub trait SourceProvider {
    /// Every source coordinate must carry an explicit elevation; a source
    /// without one fails the whole fetch.
    fn sources_in(&self, envelope: &Envelope) -> Result<Vec<PointSource>>;
}

/// Receivers of one computation cell.
pub trait ReceiverProvider {
    fn receivers_in(&self, cell: &Envelope) -> Result<Vec<Receiver>>;
}

/// Plain-vector provider backing tests and small in-process runs.
#[derive(Default)]
pub struct MemoryProvider {
    pub buildings: Vec<BuildingRecord>,
    pub walls: Vec<WallRecord>,
    pub ground_regions: Vec<GroundRecord>,
    pub terrain: TerrainRecords,
    pub sources: Vec<PointSource>,
    pub receivers: Vec<Receiver>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

fn any_point_in(pts: &[Point], envelope: &Envelope) -> bool {
    pts.iter().any(|p| envelope.contains_point(*p))
}

impl GeometryProvider for MemoryProvider {
    fn buildings_in(&self, envelope: &Envelope) -> Result<Vec<BuildingRecord>> {
        Ok(self
            .buildings
            .iter()
            .filter(|b| any_point_in(&b.footprint, envelope))
            .cloned()
            .collect())
    }

    fn walls_in(&self, envelope: &Envelope) -> Result<Vec<WallRecord>> {
        Ok(self
            .walls
            .iter()
            .filter(|w| any_point_in(&w.pts, envelope))
            .cloned()
            .collect())
    }

    fn ground_regions_in(&self, envelope: &Envelope) -> Result<Vec<GroundRecord>> {
        Ok(self
            .ground_regions
            .iter()
            .filter(|g| g.parts.iter().any(|ring| any_point_in(ring, envelope)))
            .cloned()
            .collect())
    }

    fn terrain_in(&self, envelope: &Envelope) -> Result<TerrainRecords> {
        Ok(TerrainRecords {
            points: self
                .terrain
                .points
                .iter()
                .filter(|p| envelope.contains_point(**p))
                .copied()
                .collect(),
            lines: self
                .terrain
                .lines
                .iter()
                .filter(|(a, b)| envelope.contains_point(*a) || envelope.contains_point(*b))
                .copied()
                .collect(),
        })
    }
}

impl SourceProvider for MemoryProvider {
    fn sources_in(&self, envelope: &Envelope) -> Result<Vec<PointSource>> {
        let mut out = Vec::new();
        for s in &self.sources {
            if !envelope.contains_point(s.position) {
                continue;
            }
            if !s.position.z.is_finite() {
                bail!(
                    "source {} has no elevation; every source coordinate must carry an explicit Z",
                    s.pk
                );
            }
            out.push(s.clone());
        }
        Ok(out)
    }
}

impl ReceiverProvider for MemoryProvider {
    fn receivers_in(&self, cell: &Envelope) -> Result<Vec<Receiver>> {
        Ok(self
            .receivers
            .iter()
            .filter(|r| cell.contains_point(r.position))
            .cloned()
            .collect())
    }
}

/// Feeds everything a geometry provider returns for `envelope` into a scene
/// builder.
pub fn populate_scene<P: GeometryProvider>(
    builder: &mut SceneBuilder,
    provider: &P,
    envelope: &Envelope,
) -> Result<()> {
    for b in provider.buildings_in(envelope)? {
        builder.add_building(b.footprint, b.height, b.absorption, b.pk);
    }
    for w in provider.walls_in(envelope)? {
        builder.add_wall(w.pts, w.height, w.absorption, w.pk);
    }
    for g in provider.ground_regions_in(envelope)? {
        builder.add_ground_region(g.parts, g.coefficient);
    }
    let terrain = provider.terrain_in(envelope)?;
    for p in terrain.points {
        builder.add_terrain_point(p);
    }
    for (a, b) in terrain.lines {
        builder.add_terrain_line(a, b);
    }
    Ok(())
}
