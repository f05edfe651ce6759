//! Cell scheduler: drives the profile search and attenuation accumulation
//! for every receiver of a computation cell across worker threads.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Point;
use crate::attenuation::bands::{Spectrum, sum_db};
use crate::attenuation::visitor::{
    PathContext, PathDirective, PathVisitor, PathVisitorFactory, free_field_level_bound,
};
use crate::scene::Scene;

/// A point sound source with its per-band emission levels.
#[derive(Debug, Clone)]
pub struct PointSource {
    pub position: Point,
    pub spectrum: Spectrum,
    pub pk: i64,
}

/// A receiver position with its database key.
#[derive(Debug, Clone)]
pub struct Receiver {
    pub position: Point,
    pub pk: i64,
}

/// Per-cell computation settings, validated before any receiver is processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Sources farther than this from a receiver are not considered (m).
    pub max_source_distance: f64,
    /// Search distance for reflected paths; must not exceed the propagation
    /// distance (m).
    pub reflection_search_distance: f64,
    /// Maximum number of obstacle bounces for alternate paths. Path
    /// generation beyond the direct one is a caller concern; the value is
    /// validated here so misconfiguration fails before the parallel phase.
    pub reflection_order: usize,
    /// Accumulation cutoff in dB; 0 disables it.
    pub maximum_error: f64,
    /// Ground coefficient used where no ground region applies.
    pub g_default: f64,
    /// Worker count; 0 uses the rayon default.
    pub threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_source_distance: 1000.0,
            reflection_search_distance: 50.0,
            reflection_order: 0,
            maximum_error: 0.0,
            g_default: 0.0,
            threads: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_source_distance <= 0.0 {
            bail!(
                "maximum source distance must be positive, got {}",
                self.max_source_distance
            );
        }
        if self.reflection_search_distance > self.max_source_distance {
            bail!(
                "reflection search distance ({}) exceeds the propagation distance ({})",
                self.reflection_search_distance,
                self.max_source_distance
            );
        }
        if self.maximum_error < 0.0 {
            bail!("maximum error must not be negative, got {}", self.maximum_error);
        }
        if !(0.0..=1.0).contains(&self.g_default) {
            bail!(
                "default ground coefficient must be within [0, 1], got {}",
                self.g_default
            );
        }
        Ok(())
    }
}

/// Shared progress and cancellation state, polled once per receiver.
#[derive(Default)]
pub struct Progress {
    cancelled: AtomicBool,
    done: AtomicUsize,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn receivers_done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}

/// How a cell run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOutcome {
    Complete { receivers: usize },
    /// Cancelled cooperatively; already-finalized receivers remain valid.
    Cancelled { completed: usize },
}

/// One finalized contribution: the merged per-band level one source produces
/// at one receiver.
#[derive(Debug, Clone)]
pub struct ReceiverLevel {
    pub receiver_index: usize,
    pub receiver_pk: i64,
    pub source_index: usize,
    pub source_pk: i64,
    pub spectrum: Spectrum,
    pub position: Point,
}

/// Synchronized append-only collector of finalized receiver levels.
///
/// The only mutable state shared between workers; everything else in the
/// parallel phase is read-only.
#[derive(Default)]
pub struct LevelSink {
    rows: Mutex<Vec<ReceiverLevel>>,
}

impl LevelSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_all(&self, mut rows: Vec<ReceiverLevel>) {
        if rows.is_empty() {
            return;
        }
        let mut guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        guard.append(&mut rows);
    }

    /// Snapshot of all rows, ordered by receiver then source so the output
    /// is invariant to worker scheduling.
    pub fn rows(&self) -> Vec<ReceiverLevel> {
        let guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows = guard.clone();
        rows.sort_by_key(|r| (r.receiver_index, r.source_index));
        rows
    }
}

/// Partitions the receivers of one cell into contiguous index ranges and
/// processes them in parallel against a sealed scene.
pub struct CellScheduler<'a> {
    scene: &'a Scene,
    sources: &'a [PointSource],
    receivers: &'a [Receiver],
    config: SchedulerConfig,
}

impl<'a> CellScheduler<'a> {
    pub fn new(
        scene: &'a Scene,
        sources: &'a [PointSource],
        receivers: &'a [Receiver],
        config: SchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scene,
            sources,
            receivers,
            config,
        })
    }

    /// Runs the cell. Each worker takes a contiguous receiver range with its
    /// own visitor instance; the cancellation token is polled once per
    /// receiver.
    pub fn run<F>(&self, factory: &F, progress: &Progress) -> CellOutcome
    where
        F: PathVisitorFactory,
    {
        let n = self.receivers.len();
        if n == 0 {
            return CellOutcome::Complete { receivers: 0 };
        }
        let workers = if self.config.threads > 0 {
            self.config.threads
        } else {
            rayon::current_num_threads()
        };
        let chunk_size = n.div_ceil(workers.max(1));

        self.receivers
            .par_chunks(chunk_size)
            .enumerate()
            .for_each(|(chunk_index, chunk)| {
                let mut visitor = factory.for_worker();
                let base = chunk_index * chunk_size;
                for (offset, receiver) in chunk.iter().enumerate() {
                    if progress.is_cancelled() {
                        break;
                    }
                    self.process_receiver(base + offset, receiver, &mut visitor);
                    progress.done.fetch_add(1, Ordering::Relaxed);
                }
            });

        if progress.is_cancelled() {
            let completed = progress.receivers_done();
            debug!("cell cancelled after {completed} of {n} receivers");
            CellOutcome::Cancelled { completed }
        } else {
            CellOutcome::Complete { receivers: n }
        }
    }

    fn process_receiver<V: PathVisitor>(
        &self,
        receiver_index: usize,
        receiver: &Receiver,
        visitor: &mut V,
    ) {
        // Candidate sources in a fixed order: ascending distance, index as
        // tie-break, so skip directives are deterministic across runs.
        let mut candidates: Vec<(usize, f64)> = self
            .sources
            .iter()
            .enumerate()
            .map(|(si, s)| (si, s.position.distance_3d(&receiver.position)))
            .filter(|(_, d)| *d <= self.config.max_source_distance)
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        // Upper bound of what the sources after rank k can still contribute,
        // assuming unobstructed propagation.
        let mut remaining_bounds = vec![f64::NEG_INFINITY; candidates.len() + 1];
        for k in (0..candidates.len()).rev() {
            let (si, d) = candidates[k];
            let level = free_field_level_bound(&self.sources[si].spectrum, d);
            remaining_bounds[k] = sum_db(remaining_bounds[k + 1], level);
        }

        'sources: for (rank, (si, _)) in candidates.iter().enumerate() {
            let source = &self.sources[*si];
            let profile = self.scene.cut_profile(
                source.position,
                receiver.position,
                self.config.g_default,
                false,
            );
            let ctx = PathContext {
                source,
                source_index: *si,
                receiver,
                receiver_index,
                remaining_level_bound: remaining_bounds[rank + 1],
            };
            match visitor.on_cut_profile(&ctx, &profile) {
                PathDirective::Continue => {
                    // Alternate paths (reflections, lateral diffraction) are
                    // generated by callers layered above this scheduler.
                }
                PathDirective::SkipSource => continue,
                PathDirective::SkipReceiver => break 'sources,
            }
        }

        visitor.finalize_receiver(receiver_index, receiver);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attenuation::bands::{spectrum_repartition, total_level};
    use crate::attenuation::parameters::AttenuationParameters;
    use crate::attenuation::visitor::Attenuation;
    use crate::scene::SceneBuilder;

    fn empty_scene() -> Scene {
        SceneBuilder::new().seal().unwrap()
    }

    fn source_at(x: f64, y: f64, level: f64, pk: i64) -> PointSource {
        PointSource {
            position: Point::new(x, y, 1.0),
            spectrum: spectrum_repartition(level),
            pk,
        }
    }

    fn receiver_at(x: f64, y: f64, pk: i64) -> Receiver {
        Receiver {
            position: Point::new(x, y, 1.0),
            pk,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(SchedulerConfig::default().validate().is_ok());
        let bad = SchedulerConfig {
            max_source_distance: -5.0,
            ..SchedulerConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = SchedulerConfig {
            reflection_search_distance: 2000.0,
            ..SchedulerConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = SchedulerConfig {
            g_default: 1.5,
            ..SchedulerConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_invalid_config_rejected_before_run() {
        let scene = empty_scene();
        let config = SchedulerConfig {
            reflection_search_distance: 1e6,
            ..SchedulerConfig::default()
        };
        assert!(CellScheduler::new(&scene, &[], &[], config).is_err());
    }

    #[test]
    fn test_single_source_single_receiver() {
        let scene = empty_scene();
        let sources = vec![source_at(0.0, 0.0, 85.0, 1)];
        let receivers = vec![receiver_at(10.0, 0.0, 100)];
        let params = AttenuationParameters::default();
        let sink = LevelSink::new();
        let factory = Attenuation::new(&params, 0.0, &sink);
        let scheduler =
            CellScheduler::new(&scene, &sources, &receivers, SchedulerConfig::default()).unwrap();
        let outcome = scheduler.run(&factory, &Progress::new());
        assert_eq!(outcome, CellOutcome::Complete { receivers: 1 });

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].receiver_pk, 100);
        // 85 dB(A) at 10 m free field: ~85 - 31.01 with a whiff of air
        // absorption.
        let level = total_level(&rows[0].spectrum);
        assert!((level - 53.9).abs() < 0.3, "level = {level}");
    }

    #[test]
    fn test_source_beyond_max_distance_ignored() {
        let scene = empty_scene();
        let sources = vec![source_at(5000.0, 0.0, 85.0, 1)];
        let receivers = vec![receiver_at(0.0, 0.0, 100)];
        let params = AttenuationParameters::default();
        let sink = LevelSink::new();
        let factory = Attenuation::new(&params, 0.0, &sink);
        let scheduler =
            CellScheduler::new(&scene, &sources, &receivers, SchedulerConfig::default()).unwrap();
        scheduler.run(&factory, &Progress::new());
        assert!(sink.rows().is_empty());
    }

    #[test]
    fn test_multiple_sources_merge_per_receiver() {
        let scene = empty_scene();
        // Two equal sources symmetric around the receiver
        let sources = vec![source_at(-10.0, 0.0, 85.0, 1), source_at(10.0, 0.0, 85.0, 2)];
        let receivers = vec![receiver_at(0.0, 0.0, 100)];
        let params = AttenuationParameters::default();
        let sink = LevelSink::new();
        let factory = Attenuation::new(&params, 0.0, &sink);
        let scheduler =
            CellScheduler::new(&scene, &sources, &receivers, SchedulerConfig::default()).unwrap();
        scheduler.run(&factory, &Progress::new());

        let rows = sink.rows();
        assert_eq!(rows.len(), 2, "one row per source");
        let total = sum_db(total_level(&rows[0].spectrum), total_level(&rows[1].spectrum));
        let single = total_level(&rows[0].spectrum);
        assert!((total - single - 3.0103).abs() < 1e-3);
    }

    #[test]
    fn test_worker_count_invariance() {
        let scene = empty_scene();
        let sources: Vec<PointSource> = (0..4)
            .map(|i| source_at(i as f64 * 7.0, 3.0, 75.0 + i as f64, i as i64))
            .collect();
        let receivers: Vec<Receiver> = (0..13)
            .map(|i| receiver_at(i as f64 * 2.5, -4.0, 100 + i as i64))
            .collect();
        let params = AttenuationParameters::default();

        let run_with = |threads: usize| {
            let sink = LevelSink::new();
            let factory = Attenuation::new(&params, 0.0, &sink);
            let config = SchedulerConfig {
                threads,
                ..SchedulerConfig::default()
            };
            let scheduler = CellScheduler::new(&scene, &sources, &receivers, config).unwrap();
            scheduler.run(&factory, &Progress::new());
            sink.rows()
        };

        let serial = run_with(1);
        let parallel = run_with(4);
        assert_eq!(serial.len(), parallel.len());
        for (a, b) in serial.iter().zip(parallel.iter()) {
            assert_eq!(a.receiver_index, b.receiver_index);
            assert_eq!(a.source_index, b.source_index);
            for band in 0..a.spectrum.len() {
                assert!(
                    (a.spectrum[band] - b.spectrum[band]).abs() < 1e-12,
                    "worker split must not change results"
                );
            }
        }
    }

    #[test]
    fn test_cancellation_before_run() {
        let scene = empty_scene();
        let sources = vec![source_at(0.0, 0.0, 85.0, 1)];
        let receivers: Vec<Receiver> =
            (0..8).map(|i| receiver_at(5.0 + i as f64, 0.0, i as i64)).collect();
        let params = AttenuationParameters::default();
        let sink = LevelSink::new();
        let factory = Attenuation::new(&params, 0.0, &sink);
        let config = SchedulerConfig {
            threads: 1,
            ..SchedulerConfig::default()
        };
        let scheduler = CellScheduler::new(&scene, &sources, &receivers, config).unwrap();
        let progress = Progress::new();
        progress.cancel();
        let outcome = scheduler.run(&factory, &progress);
        assert_eq!(outcome, CellOutcome::Cancelled { completed: 0 });
        assert!(sink.rows().is_empty());
    }

    #[test]
    fn test_error_floor_skips_remote_sources() {
        let scene = empty_scene();
        // A dominant nearby source and a negligible remote one
        let sources = vec![source_at(5.0, 0.0, 95.0, 1), source_at(900.0, 0.0, 40.0, 2)];
        let receivers = vec![receiver_at(0.0, 0.0, 100)];
        let params = AttenuationParameters::default();
        let sink = LevelSink::new();
        let factory = Attenuation::new(&params, 0.1, &sink);
        let scheduler =
            CellScheduler::new(&scene, &sources, &receivers, SchedulerConfig::default()).unwrap();
        scheduler.run(&factory, &Progress::new());
        let rows = sink.rows();
        assert_eq!(rows.len(), 1, "remote source should be cut off");
        assert_eq!(rows[0].source_pk, 1);
    }
}
