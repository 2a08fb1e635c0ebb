//! Grid-bucket spatial index for visibility queries.

use std::collections::{HashMap, HashSet};

use kurbo::Rect;

/// Default grid cell edge length in world units.
pub const DEFAULT_CELL_SIZE: f64 = 100.0;

type Cell = (i64, i64);

/// Buckets object ids into fixed-size grid cells keyed by every cell their
/// bounds overlap.
///
/// `query` returns the union of the id sets of all cells a rectangle
/// touches: a conservative superset of the true intersections. No exact
/// bounds re-check happens here; callers that need precision test the
/// candidate bounds themselves.
#[derive(Debug, Default)]
pub struct SpatialGrid {
    cell_size: f64,
    cells: HashMap<Cell, HashSet<String>>,
    object_cells: HashMap<String, Vec<Cell>>,
}

impl SpatialGrid {
    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { DEFAULT_CELL_SIZE };
        Self { cell_size, cells: HashMap::new(), object_cells: HashMap::new() }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Inclusive cell bounds a rectangle overlaps. Degenerate rectangles map
    /// to the single cell containing their origin.
    fn cell_range(&self, bounds: Rect) -> (Cell, Cell) {
        let x0 = (bounds.x0 / self.cell_size).floor() as i64;
        let y0 = (bounds.y0 / self.cell_size).floor() as i64;
        let x1 = ((bounds.x1.max(bounds.x0)) / self.cell_size).floor() as i64;
        let y1 = ((bounds.y1.max(bounds.y0)) / self.cell_size).floor() as i64;
        ((x0, y0), (x1, y1))
    }

    /// All cells a rectangle overlaps.
    fn cells_for(&self, bounds: Rect) -> Vec<Cell> {
        let ((x0, y0), (x1, y1)) = self.cell_range(bounds);
        let mut cells = Vec::new();
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                cells.push((cx, cy));
            }
        }
        cells
    }

    /// Index an object by its bounds. Re-inserting an existing id updates it.
    pub fn insert(&mut self, id: &str, bounds: Rect) {
        if self.object_cells.contains_key(id) {
            self.remove(id);
        }
        let cells = self.cells_for(bounds);
        for &cell in &cells {
            self.cells.entry(cell).or_default().insert(id.to_string());
        }
        self.object_cells.insert(id.to_string(), cells);
    }

    /// Drop an object from the index. Unknown ids are ignored.
    pub fn remove(&mut self, id: &str) {
        let Some(cells) = self.object_cells.remove(id) else {
            return;
        };
        for cell in cells {
            if let Some(set) = self.cells.get_mut(&cell) {
                set.remove(id);
                if set.is_empty() {
                    self.cells.remove(&cell);
                }
            }
        }
    }

    /// Move an object to new bounds.
    pub fn update(&mut self, id: &str, bounds: Rect) {
        self.insert(id, bounds);
    }

    /// Ids of all objects whose cells overlap `rect` (superset of true
    /// intersections, at cell granularity).
    ///
    /// Work is bounded by the number of occupied cells: a request rect
    /// spanning more cells than exist in the index (arbitrarily large rects,
    /// near-zero zoom) walks the occupied map instead of the request range.
    pub fn query(&self, rect: Rect) -> HashSet<String> {
        let mut result = HashSet::new();
        if self.cells.is_empty() {
            return result;
        }
        let ((x0, y0), (x1, y1)) = self.cell_range(rect);
        let span_x = x1 as i128 - x0 as i128 + 1;
        let span_y = y1 as i128 - y0 as i128 + 1;
        let over_occupancy = span_x
            .checked_mul(span_y)
            .is_none_or(|span| span > self.cells.len() as i128);
        if over_occupancy {
            for (&(cx, cy), set) in &self.cells {
                if cx >= x0 && cx <= x1 && cy >= y0 && cy <= y1 {
                    result.extend(set.iter().cloned());
                }
            }
        } else {
            for cx in x0..=x1 {
                for cy in y0..=y1 {
                    if let Some(set) = self.cells.get(&(cx, cy)) {
                        result.extend(set.iter().cloned());
                    }
                }
            }
        }
        result
    }

    pub fn contains(&self, id: &str) -> bool {
        self.object_cells.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.object_cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_cells.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.object_cells.clear();
    }
}
