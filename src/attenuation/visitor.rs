//! Pull-style visitor protocol between the path search and the attenuation
//! accumulation.
//!
//! The scheduler pushes every cut profile it finds into a visitor, which
//! answers with a directive steering the remaining search. Implementations
//! that keep mutable accumulation state are not shared across workers: each
//! worker gets its own instance from [`PathVisitorFactory::for_worker`] and
//! only the final merge into the shared sink is synchronized.

use crate::attenuation::bands::{Spectrum, sum_db, sum_db_spectrum, total_level};
use crate::attenuation::parameters::AttenuationParameters;
use crate::attenuation::path::{attenuation, received_level};
use crate::compute::{LevelSink, PointSource, Receiver, ReceiverLevel};
use crate::profile::CutProfile;

/// Answer of a visitor to one cut profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDirective {
    /// Keep searching additional geometric paths.
    Continue,
    /// Abandon the remaining paths for the current source only.
    SkipSource,
    /// Abandon all remaining sources for the current receiver.
    SkipReceiver,
}

/// Identities around one cut profile, supplied by the scheduler.
pub struct PathContext<'a> {
    pub source: &'a PointSource,
    pub source_index: usize,
    pub receiver: &'a Receiver,
    pub receiver_index: usize,
    /// Upper bound in dB on what the not-yet-visited sources could still
    /// contribute to this receiver; `-inf` after the last source.
    pub remaining_level_bound: f64,
}

pub trait PathVisitor {
    /// A new vertical cut profile between a source and the receiver was found.
    fn on_cut_profile(&mut self, ctx: &PathContext<'_>, profile: &CutProfile) -> PathDirective;

    /// No more profiles will be pushed for this receiver; merge accumulated
    /// contributions into the shared sink and clear transient state.
    fn finalize_receiver(&mut self, receiver_index: usize, receiver: &Receiver);
}

/// Factory handing each worker an independent visitor instance.
pub trait PathVisitorFactory: Sync {
    type Visitor: PathVisitor;

    fn for_worker(&self) -> Self::Visitor;
}

/// Shared configuration of the attenuation accumulation, one per cell run.
pub struct Attenuation<'a> {
    pub params: &'a AttenuationParameters,
    /// Accumulation cutoff: once the remaining sources cannot raise the
    /// receiver total by more than this many dB, the rest are skipped.
    /// Zero disables the cutoff.
    pub maximum_error: f64,
    pub sink: &'a LevelSink,
}

impl<'a> Attenuation<'a> {
    pub fn new(params: &'a AttenuationParameters, maximum_error: f64, sink: &'a LevelSink) -> Self {
        Self {
            params,
            maximum_error,
            sink,
        }
    }
}

impl<'a> PathVisitorFactory for Attenuation<'a> {
    type Visitor = AttenuationVisitor<'a>;

    fn for_worker(&self) -> AttenuationVisitor<'a> {
        AttenuationVisitor {
            params: self.params,
            maximum_error: self.maximum_error,
            sink: self.sink,
            rows: Vec::new(),
        }
    }
}

/// Per-worker accumulator of receiver levels.
pub struct AttenuationVisitor<'a> {
    params: &'a AttenuationParameters,
    maximum_error: f64,
    sink: &'a LevelSink,
    /// One row per accepted path of the receiver in progress.
    rows: Vec<ReceiverLevel>,
}

impl PathVisitor for AttenuationVisitor<'_> {
    fn on_cut_profile(&mut self, ctx: &PathContext<'_>, profile: &CutProfile) -> PathDirective {
        if let Some(att) = attenuation(profile, self.params) {
            let spectrum = received_level(&ctx.source.spectrum, &att);
            self.rows.push(ReceiverLevel {
                receiver_index: ctx.receiver_index,
                receiver_pk: ctx.receiver.pk,
                source_index: ctx.source_index,
                source_pk: ctx.source.pk,
                spectrum,
                position: ctx.receiver.position,
            });
        }

        if self.maximum_error > 0.0 && ctx.remaining_level_bound.is_finite() {
            let current = self.accumulated_total();
            if current.is_finite() {
                let gain = sum_db(current, ctx.remaining_level_bound) - current;
                if gain < self.maximum_error {
                    return PathDirective::SkipReceiver;
                }
            }
        }
        PathDirective::Continue
    }

    fn finalize_receiver(&mut self, receiver_index: usize, _receiver: &Receiver) {
        // Merge repeated contributions of the same source (multiple path
        // types) by decibel summation before handing them to the sink.
        let mut merged: Vec<ReceiverLevel> = Vec::new();
        for row in self.rows.drain(..) {
            debug_assert_eq!(row.receiver_index, receiver_index);
            match merged
                .iter_mut()
                .find(|m| m.source_index == row.source_index)
            {
                Some(existing) => {
                    existing.spectrum = sum_db_spectrum(&existing.spectrum, &row.spectrum);
                }
                None => merged.push(row),
            }
        }
        self.sink.push_all(merged);
    }
}

impl AttenuationVisitor<'_> {
    /// Energy total over every accumulated row of the current receiver.
    fn accumulated_total(&self) -> f64 {
        let mut total = f64::NEG_INFINITY;
        for row in &self.rows {
            total = sum_db(total, total_level(&row.spectrum));
        }
        total
    }

    /// Spectra accumulated so far for the receiver in progress, keyed by
    /// source index. Exposed for tests.
    pub fn pending_rows(&self) -> &[ReceiverLevel] {
        &self.rows
    }
}

/// Upper bound of the free-field level a source can produce at distance `d`:
/// emission total minus pure geometric divergence.
pub fn free_field_level_bound(spectrum: &Spectrum, distance: f64) -> f64 {
    total_level(spectrum) - (20.0 * distance.max(1.0).log10() + 11.0)
}
