pub mod delaunay;
pub mod envelope;
pub mod point;
pub mod segment;
pub mod triangles;
pub mod vector;

/// Geometric precision
pub const EPS: f64 = 1e-9;

/// One millimeter. Used for the infinitesimal offsets inserted around
/// obstacle crossings and for probing just past a ground-region boundary.
pub const MILLIMETER: f64 = 1e-3;
