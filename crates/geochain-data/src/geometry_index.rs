//! Multi-level cell grid over lon/lat used as the geometry index.
//!
//! Level `l` splits the world into `2^l x 2^l` cells; a cell id is the Morton
//! (Z-order) interleave of its column and row, so the parent of a cell is its
//! id shifted right by two bits and a rect cover is a short list of id
//! intervals. Every feature is registered at the deepest level where its
//! bounding rect spans at most two cells per axis.

use std::{collections::BTreeMap, ops::ControlFlow};

use geo::Rect;

use crate::FeatureId;

/// Deepest grid level. Level 17 cells are roughly 300 m wide at the equator.
pub const MAX_DEPTH: u8 = 17;

/// Default budget of cells a single rect cover may use before it is coarsened.
pub const DEFAULT_MAX_COVER_CELLS: usize = 1024;

pub type CellId = u64;

fn interleave(x: u32, y: u32, level: u8) -> CellId {
    let mut id = 0u64;
    for bit in 0..level {
        id |= u64::from((x >> bit) & 1) << (2 * bit);
        id |= u64::from((y >> bit) & 1) << (2 * bit + 1);
    }
    id
}

fn cell_coord(value: f64, min: f64, extent: f64, level: u8) -> u32 {
    let cells = 1u64 << level;
    let normalized = ((value - min) / extent).clamp(0.0, 1.0);
    let cell = (normalized * cells as f64).floor() as u64;
    cell.min(cells - 1) as u32
}

/// Column and row ranges (inclusive) of the cells a rect touches at `level`.
fn cell_span(rect: &Rect<f64>, level: u8) -> ((u32, u32), (u32, u32)) {
    let x0 = cell_coord(rect.min().x, -180.0, 360.0, level);
    let x1 = cell_coord(rect.max().x, -180.0, 360.0, level);
    let y0 = cell_coord(rect.min().y, -90.0, 180.0, level);
    let y1 = cell_coord(rect.max().y, -90.0, 180.0, level);
    ((x0, x1), (y0, y1))
}

fn span_cells(span: ((u32, u32), (u32, u32))) -> u64 {
    let ((x0, x1), (y0, y1)) = span;
    u64::from(x1 - x0 + 1) * u64::from(y1 - y0 + 1)
}

/// Cells covering a rect at one level, as sorted half-open id intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    level: u8,
    intervals: Vec<(CellId, CellId)>,
}

impl Coverage {
    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn intervals(&self) -> &[(CellId, CellId)] {
        &self.intervals
    }

    pub fn cell_count(&self) -> u64 {
        self.intervals.iter().map(|(a, b)| b - a).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

/// Covers `rect` with cells at `scale`, coarsening the level while the cover
/// would need more than `max_cells` cells.
pub fn cover_rect(rect: &Rect<f64>, scale: u8, max_cells: usize) -> Coverage {
    let mut level = scale.min(MAX_DEPTH);
    let mut span = cell_span(rect, level);
    while level > 0 && span_cells(span) > max_cells.max(1) as u64 {
        level -= 1;
        span = cell_span(rect, level);
    }

    let ((x0, x1), (y0, y1)) = span;
    let mut ids: Vec<CellId> = (y0..=y1)
        .flat_map(|y| (x0..=x1).map(move |x| interleave(x, y, level)))
        .collect();
    ids.sort_unstable();

    let mut intervals: Vec<(CellId, CellId)> = Vec::new();
    for id in ids {
        match intervals.last_mut() {
            Some((_, end)) if *end == id => *end = id + 1,
            _ => intervals.push((id, id + 1)),
        }
    }
    Coverage { level, intervals }
}

#[derive(Debug, Clone)]
pub struct GeometryIndex {
    levels: Vec<BTreeMap<CellId, Vec<FeatureId>>>,
    len: usize,
}

impl Default for GeometryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryIndex {
    pub fn new() -> Self {
        Self {
            levels: vec![BTreeMap::new(); usize::from(MAX_DEPTH) + 1],
            len: 0,
        }
    }

    /// Number of registered features.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, id: FeatureId, rect: &Rect<f64>) {
        let (level, span) = (0..=MAX_DEPTH)
            .rev()
            .map(|level| (level, cell_span(rect, level)))
            .find(|(_, ((x0, x1), (y0, y1)))| x1 - x0 <= 1 && y1 - y0 <= 1)
            .unwrap_or((0, ((0, 0), (0, 0))));

        let ((x0, x1), (y0, y1)) = span;
        let cells = &mut self.levels[usize::from(level)];
        for y in y0..=y1 {
            for x in x0..=x1 {
                cells.entry(interleave(x, y, level)).or_default().push(id);
            }
        }
        self.len += 1;
    }

    /// Visits ids registered in any cell that overlaps the coverage, on every
    /// level. Ids may repeat; stop early by returning `ControlFlow::Break`.
    pub fn for_each_in_coverage(
        &self,
        coverage: &Coverage,
        mut visit: impl FnMut(FeatureId) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let cover_level = coverage.level();
        for (level, cells) in self.levels.iter().enumerate() {
            if cells.is_empty() {
                continue;
            }
            let level = level as u8;
            for &(start, end) in coverage.intervals() {
                let (lo, hi) = if level >= cover_level {
                    let shift = 2 * u32::from(level - cover_level);
                    (start << shift, end << shift)
                } else {
                    let shift = 2 * u32::from(cover_level - level);
                    (start >> shift, ((end - 1) >> shift) + 1)
                };
                for ids in cells.range(lo..hi).map(|(_, ids)| ids) {
                    for &id in ids {
                        visit(id)?;
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use geo::Point;

    use super::*;
    use crate::geometry::{offset_point, rect_around};

    fn origin() -> Point<f64> {
        Point::new(13.4, 52.5)
    }

    fn collect(index: &GeometryIndex, coverage: &Coverage) -> Vec<FeatureId> {
        let mut ids = Vec::new();
        let _ = index.for_each_in_coverage(coverage, |id| {
            ids.push(id);
            ControlFlow::Continue(())
        });
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    #[test]
    fn test_parent_cell_is_shifted_child() {
        let child = interleave(13, 6, 5);
        assert_eq!(child >> 2, interleave(13 >> 1, 6 >> 1, 4));
    }

    #[test]
    fn test_cover_rect_merges_intervals() {
        let coverage = cover_rect(&rect_around(origin(), 400.0), MAX_DEPTH, 4096);
        assert_eq!(coverage.level(), MAX_DEPTH);
        assert!(coverage.cell_count() >= 4);
        assert!(coverage.intervals().len() as u64 <= coverage.cell_count());
        for window in coverage.intervals().windows(2) {
            assert!(window[0].1 < window[1].0, "intervals must be disjoint and sorted");
        }
    }

    #[test]
    fn test_cover_rect_coarsens_over_budget() {
        let coverage = cover_rect(&rect_around(origin(), 20_000.0), MAX_DEPTH, 16);
        assert!(coverage.level() < MAX_DEPTH);
        assert!(coverage.cell_count() <= 16);
    }

    #[test]
    fn test_index_finds_small_and_large_features() {
        let mut index = GeometryIndex::new();
        index.insert(1, &rect_around(origin(), 5.0));
        index.insert(2, &rect_around(offset_point(origin(), 3_000.0, 0.0), 5.0));
        // A region-sized feature lands on a coarse level.
        index.insert(3, &rect_around(origin(), 50_000.0));
        assert_eq!(index.len(), 3);

        let near = cover_rect(&rect_around(origin(), 100.0), MAX_DEPTH, 1024);
        assert_eq!(collect(&index, &near), vec![1, 3]);

        let far = cover_rect(
            &rect_around(offset_point(origin(), 3_000.0, 0.0), 100.0),
            MAX_DEPTH,
            1024,
        );
        assert_eq!(collect(&index, &far), vec![2, 3]);
    }

    #[test]
    fn test_coarse_cover_reaches_fine_features() {
        let mut index = GeometryIndex::new();
        index.insert(7, &rect_around(origin(), 5.0));
        let coarse = cover_rect(&rect_around(origin(), 100.0), 10, 1024);
        assert_eq!(coarse.level(), 10);
        assert_eq!(collect(&index, &coarse), vec![7]);
    }

    #[test]
    fn test_visit_stops_on_break() {
        let mut index = GeometryIndex::new();
        for id in 0..10 {
            index.insert(id, &rect_around(origin(), 5.0));
        }
        let coverage = cover_rect(&rect_around(origin(), 50.0), MAX_DEPTH, 1024);
        let mut seen = 0;
        let flow = index.for_each_in_coverage(&coverage, |_| {
            seen += 1;
            if seen == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(seen, 3);
    }
}
