//! Plan-view Delaunay triangulation via Bowyer-Watson incremental insertion.
//!
//! Terrain points are 2.5-D: triangulation happens in the XY plane while each
//! vertex keeps its elevation for later barycentric interpolation.

use std::collections::HashMap;

use anyhow::{Result, bail};

use crate::Point;
use crate::geom::EPS;
use crate::geom::envelope::Envelope;

/// A triangulated point set with per-triangle adjacency.
///
/// `neighbors[t][k]` is the triangle sharing the edge from `triangles[t][k]`
/// to `triangles[t][(k + 1) % 3]`, or `None` on the mesh boundary.
pub struct Triangulation {
    pub vertices: Vec<Point>,
    pub triangles: Vec<[usize; 3]>,
    pub neighbors: Vec<[Option<usize>; 3]>,
}

/// Internal triangle with cached circumcircle data.
struct BwTri {
    v: [usize; 3],
    cx: f64,
    cy: f64,
    radius_sq: f64,
}

/// Circumcircle of a plan-view triangle; `None` for collinear vertices.
fn circumcircle(a: Point, b: Point, c: Point) -> Option<(f64, f64, f64)> {
    let d = 2.0 * (a.x * (b.y - c.y) + b.x * (c.y - a.y) + c.x * (a.y - b.y));
    if d.abs() < EPS {
        return None;
    }
    let a2 = a.x * a.x + a.y * a.y;
    let b2 = b.x * b.x + b.y * b.y;
    let c2 = c.x * c.x + c.y * c.y;
    let ux = (a2 * (b.y - c.y) + b2 * (c.y - a.y) + c2 * (a.y - b.y)) / d;
    let uy = (a2 * (c.x - b.x) + b2 * (a.x - c.x) + c2 * (b.x - a.x)) / d;
    let dx = a.x - ux;
    let dy = a.y - uy;
    Some((ux, uy, dx * dx + dy * dy))
}

fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}

/// Triangulates the given points, welding duplicates in plan view.
///
/// Fails when fewer than 3 distinct points remain or when all points are
/// collinear (no valid triangle exists).
pub fn triangulate(points: &[Point]) -> Result<Triangulation> {
    // Weld duplicate XY positions; the first elevation wins.
    let mut vertices: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if !vertices.iter().any(|v| v.distance_2d(p) < EPS) {
            vertices.push(*p);
        }
    }
    let n = vertices.len();
    if n < 3 {
        bail!("terrain triangulation needs at least 3 distinct points, got {n}");
    }

    // Super-triangle comfortably enclosing the point set
    let Some(env) = Envelope::from_points(&vertices) else {
        bail!("terrain triangulation received no vertices");
    };
    let cx = (env.min_x + env.max_x) * 0.5;
    let cy = (env.min_y + env.max_y) * 0.5;
    let m = env.width().max(env.height()).max(1.0);
    let mut all_points = vertices.clone();
    all_points.push(Point::new_2d(cx - 20.0 * m, cy - 10.0 * m));
    all_points.push(Point::new_2d(cx + 20.0 * m, cy - 10.0 * m));
    all_points.push(Point::new_2d(cx, cy + 20.0 * m));
    let si = [n, n + 1, n + 2];

    let Some((scx, scy, sr2)) =
        circumcircle(all_points[si[0]], all_points[si[1]], all_points[si[2]])
    else {
        bail!("degenerate super-triangle");
    };
    let mut tris: Vec<BwTri> = vec![BwTri {
        v: si,
        cx: scx,
        cy: scy,
        radius_sq: sr2,
    }];

    for i in 0..n {
        let pt = all_points[i];

        // Bad triangles: circumcircle contains the new point
        let mut bad_indices: Vec<usize> = Vec::new();
        for (ti, tri) in tris.iter().enumerate() {
            let dx = tri.cx - pt.x;
            let dy = tri.cy - pt.y;
            if dx * dx + dy * dy < tri.radius_sq + 1e-10 {
                bad_indices.push(ti);
            }
        }
        if bad_indices.is_empty() {
            continue;
        }

        // Cavity boundary: edges belonging to exactly one bad triangle
        let mut edge_count: HashMap<(usize, usize), (usize, (usize, usize))> = HashMap::new();
        for &bi in &bad_indices {
            let v = tris[bi].v;
            for k in 0..3 {
                let e = (v[k], v[(k + 1) % 3]);
                edge_count
                    .entry(edge_key(e.0, e.1))
                    .and_modify(|(count, _)| *count += 1)
                    .or_insert((1, e));
            }
        }
        let boundary: Vec<(usize, usize)> = edge_count
            .into_values()
            .filter(|(count, _)| *count == 1)
            .map(|(_, e)| e)
            .collect();

        // Remove bad triangles (reverse order to keep indices valid)
        bad_indices.sort_unstable();
        for &bi in bad_indices.iter().rev() {
            tris.swap_remove(bi);
        }

        // Re-triangulate the cavity around the new point
        for (e0, e1) in boundary {
            if let Some((ccx, ccy, r2)) = circumcircle(all_points[e0], all_points[e1], pt) {
                tris.push(BwTri {
                    v: [e0, e1, i],
                    cx: ccx,
                    cy: ccy,
                    radius_sq: r2,
                });
            }
        }
    }

    // Drop triangles touching the super-triangle and normalize winding to CCW
    let mut triangles: Vec<[usize; 3]> = Vec::new();
    for tri in tris {
        if tri.v.iter().any(|&vi| vi >= n) {
            continue;
        }
        let [a, b, c] = tri.v;
        let (pa, pb, pc) = (all_points[a], all_points[b], all_points[c]);
        let area2 = (pb.x - pa.x) * (pc.y - pa.y) - (pc.x - pa.x) * (pb.y - pa.y);
        if area2.abs() < EPS {
            continue;
        }
        if area2 > 0.0 {
            triangles.push([a, b, c]);
        } else {
            triangles.push([a, c, b]);
        }
    }
    if triangles.is_empty() {
        bail!("terrain triangulation produced no triangles (collinear input?)");
    }

    // Adjacency by matching shared undirected edges
    let mut edge_tris: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for (ti, tri) in triangles.iter().enumerate() {
        for k in 0..3 {
            edge_tris
                .entry(edge_key(tri[k], tri[(k + 1) % 3]))
                .or_default()
                .push(ti);
        }
    }
    let mut neighbors: Vec<[Option<usize>; 3]> = vec![[None; 3]; triangles.len()];
    for (ti, tri) in triangles.iter().enumerate() {
        for k in 0..3 {
            let owners = &edge_tris[&edge_key(tri[k], tri[(k + 1) % 3])];
            neighbors[ti][k] = owners.iter().copied().find(|&o| o != ti);
        }
    }

    Ok(Triangulation {
        vertices,
        triangles,
        neighbors,
    })
}
