//! Per-band attenuation of a single propagation path.

use crate::Point;
use crate::attenuation::bands::{BAND_FREQUENCIES, NUM_BANDS, Spectrum};
use crate::attenuation::parameters::AttenuationParameters;
use crate::geom::MILLIMETER;
use crate::geom::segment::projection_fraction_2d;
use crate::profile::{CutKind, CutProfile};

/// Diffraction attenuation is capped at 25 dB per band.
const MAX_DIFFRACTION: f64 = 25.0;

/// Computes the per-band attenuation of the path described by `profile`.
///
/// Returns `None` when the profile is degenerate (source and receiver
/// coincide or fewer than two points): no valid path exists.
///
/// The model accumulates geometric divergence, atmospheric absorption, the
/// ground effect over the path-averaged ground coefficient, diffraction over
/// the obstruction hull when the chord is blocked, and the reflection loss of
/// any bounce points present in the profile.
pub fn attenuation(profile: &CutProfile, params: &AttenuationParameters) -> Option<Spectrum> {
    if profile.pts.len() < 2 {
        return None;
    }
    let distance = profile.direct_distance();
    if distance < MILLIMETER {
        return None;
    }

    let a_div = 20.0 * distance.log10() + 11.0;
    let a_ground = ground_attenuation(profile, distance);
    let delta = if profile.is_free_field() {
        0.0
    } else {
        path_difference(profile)
    };

    let mut result = [0.0; NUM_BANDS];
    for (b, out) in result.iter_mut().enumerate() {
        let a_atm = params.alpha_atmo[b] * distance / 1000.0;
        let a_dif = if delta > 0.0 {
            let lambda = params.celerity / BAND_FREQUENCIES[b];
            let screen = (10.0 * (3.0 + 40.0 * delta / lambda).log10()).clamp(0.0, MAX_DIFFRACTION);
            screen + barrier_loss(profile, b)
        } else {
            0.0
        };
        let a_refl = reflection_loss(profile, b);
        *out = a_div + a_atm + a_ground + a_dif + a_refl;
    }
    Some(result)
}

/// Received per-band levels: emission minus path attenuation.
pub fn received_level(emission: &Spectrum, attenuation: &Spectrum) -> Spectrum {
    let mut out = [0.0; NUM_BANDS];
    for (i, o) in out.iter_mut().enumerate() {
        *o = emission[i] - attenuation[i];
    }
    out
}

/// Ground effect over flat-equivalent terrain: active for acoustically soft
/// ground, low mean propagation height and long range; zero otherwise.
fn ground_attenuation(profile: &CutProfile, distance: f64) -> f64 {
    let g_path = mean_ground_coefficient(profile);
    if g_path <= 0.0 {
        return 0.0;
    }
    let hs = (profile.source().position().z - profile.source().z_ground.unwrap_or(0.0)).max(0.0);
    let hr = (profile.receiver().position().z - profile.receiver().z_ground.unwrap_or(0.0)).max(0.0);
    let hm = (hs + hr) / 2.0;
    g_path * (4.8 - (2.0 * hm / distance) * (17.0 + 300.0 / distance)).max(0.0)
}

/// Length-weighted mean ground coefficient along the profile. Each point's
/// coefficient applies from that point up to the next one.
pub fn mean_ground_coefficient(profile: &CutProfile) -> f64 {
    let pts = &profile.pts;
    let mut weighted = 0.0;
    let mut total = 0.0;
    for pair in pts.windows(2) {
        let a = pair[0].position();
        let b = pair[1].position();
        let len = a.distance_2d(&b);
        weighted += pair[0].ground_coef.unwrap_or(0.0) * len;
        total += len;
    }
    if total > 0.0 {
        weighted / total
    } else {
        profile.source().ground_coef.unwrap_or(0.0)
    }
}

/// Path-length difference between the shortest path over the obstruction
/// hull and the straight chord, in the unfolded vertical plane.
fn path_difference(profile: &CutProfile) -> f64 {
    let source = profile.source().position();
    let receiver = profile.receiver().position();

    // Unfold onto (distance along the line, elevation)
    let mut unfolded: Vec<(f64, f64)> = profile
        .pts
        .iter()
        .map(|pt| {
            let pos = pt.position();
            let t = projection_fraction_2d(Point::new_2d(pos.x, pos.y), source, receiver)
                .clamp(0.0, 1.0);
            (t * source.distance_2d(&receiver), pos.z)
        })
        .collect();
    unfolded.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Upper convex hull from source to receiver
    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(unfolded.len());
    for p in unfolded {
        while hull.len() >= 2 {
            let a = hull[hull.len() - 2];
            let b = hull[hull.len() - 1];
            let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
            if cross >= 0.0 {
                hull.pop();
            } else {
                break;
            }
        }
        hull.push(p);
    }

    let hull_len: f64 = hull
        .windows(2)
        .map(|w| {
            let dx = w[1].0 - w[0].0;
            let dz = w[1].1 - w[0].1;
            (dx * dx + dz * dz).sqrt()
        })
        .sum();
    let first = hull.first().copied().unwrap_or((0.0, 0.0));
    let last = hull.last().copied().unwrap_or((0.0, 0.0));
    let chord = {
        let dx = last.0 - first.0;
        let dz = last.1 - first.1;
        (dx * dx + dz * dz).sqrt()
    };
    hull_len - chord
}

/// Per-band absorption loss of the topmost obstruction crossing; the wall or
/// building facet the sound bends over dissipates part of the energy when it
/// carries absorption data.
fn barrier_loss(profile: &CutProfile, band: usize) -> f64 {
    let top = profile
        .pts
        .iter()
        .filter(|pt| matches!(pt.kind, CutKind::Building(_) | CutKind::Wall(_)))
        .max_by(|a, b| a.position().z.total_cmp(&b.position().z));
    match top {
        Some(pt) => {
            let alpha = pt.absorption.get(band).copied().unwrap_or(0.0);
            -10.0 * (1.0 - alpha).max(1e-4).log10()
        }
        None => 0.0,
    }
}

/// Summed per-band reflection loss of every bounce point in the profile.
fn reflection_loss(profile: &CutProfile, band: usize) -> f64 {
    let mut loss = 0.0;
    for pt in &profile.pts {
        if pt.kind == CutKind::Reflection {
            let alpha = pt.absorption.get(band).copied().unwrap_or(0.0);
            loss += -10.0 * (1.0 - alpha).max(1e-4).log10();
        }
    }
    loss
}
