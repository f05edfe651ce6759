use std::collections::HashMap;

use crate::geom::envelope::Envelope;

/// Uniform grid over plan-view envelopes.
///
/// Built once while the scene is sealed, then queried read-only from any
/// number of threads. Queries return candidate ids whose envelope shares a
/// grid cell with the query envelope; callers still run the exact geometric
/// test.
pub struct GridIndex {
    grid: HashMap<(i64, i64), Vec<usize>>,
    step: f64,
}

impl GridIndex {
    pub fn new(step: f64) -> Self {
        Self {
            grid: HashMap::new(),
            step: step.max(1e-6),
        }
    }

    /// Picks a cell size so a typical scene spans a few dozen cells per axis.
    pub fn step_for(envelope: &Envelope) -> f64 {
        (envelope.width().max(envelope.height()) / 64.0).max(1.0)
    }

    fn cell_range(&self, env: &Envelope) -> (i64, i64, i64, i64) {
        (
            (env.min_x / self.step).floor() as i64,
            (env.max_x / self.step).floor() as i64,
            (env.min_y / self.step).floor() as i64,
            (env.max_y / self.step).floor() as i64,
        )
    }

    pub fn insert(&mut self, env: &Envelope, id: usize) {
        let (i0, i1, j0, j1) = self.cell_range(env);
        for i in i0..=i1 {
            for j in j0..=j1 {
                self.grid.entry((i, j)).or_default().push(id);
            }
        }
    }

    /// Returns the ids of all envelopes sharing a cell with `env`, deduplicated.
    pub fn query(&self, env: &Envelope) -> Vec<usize> {
        let (i0, i1, j0, j1) = self.cell_range(env);
        let mut result = Vec::new();
        for i in i0..=i1 {
            for j in j0..=j1 {
                if let Some(ids) = self.grid.get(&(i, j)) {
                    result.extend_from_slice(ids);
                }
            }
        }
        result.sort_unstable();
        result.dedup();
        result
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;

    #[test]
    fn test_insert_and_query() {
        let mut index = GridIndex::new(1.0);
        index.insert(
            &Envelope::new(Point::new_2d(0.0, 0.0), Point::new_2d(2.0, 2.0)),
            7,
        );
        let hits = index.query(&Envelope::from_point(Point::new_2d(1.5, 1.5)));
        assert_eq!(hits, vec![7]);
        let misses = index.query(&Envelope::from_point(Point::new_2d(50.0, 50.0)));
        assert!(misses.is_empty());
    }

    #[test]
    fn test_query_deduplicates() {
        let mut index = GridIndex::new(1.0);
        // Spans many cells; a query overlapping several must return it once.
        index.insert(
            &Envelope::new(Point::new_2d(0.0, 0.0), Point::new_2d(10.0, 10.0)),
            3,
        );
        let hits = index.query(&Envelope::new(
            Point::new_2d(2.0, 2.0),
            Point::new_2d(8.0, 8.0),
        ));
        assert_eq!(hits, vec![3]);
    }

    #[test]
    fn test_negative_coordinates() {
        let mut index = GridIndex::new(2.0);
        index.insert(
            &Envelope::new(Point::new_2d(-5.0, -5.0), Point::new_2d(-3.0, -3.0)),
            1,
        );
        let hits = index.query(&Envelope::from_point(Point::new_2d(-4.0, -4.0)));
        assert_eq!(hits, vec![1]);
    }

    #[test]
    fn test_step_for_small_scene() {
        let env = Envelope::new(Point::new_2d(0.0, 0.0), Point::new_2d(10.0, 10.0));
        assert!((GridIndex::step_for(&env) - 1.0).abs() < 1e-12);
        let env = Envelope::new(Point::new_2d(0.0, 0.0), Point::new_2d(6400.0, 100.0));
        assert!((GridIndex::step_for(&env) - 100.0).abs() < 1e-12);
    }
}
