//! Dirty rectangle accumulation for partial redraws.

use std::cmp::Ordering;

use kurbo::{Rect, Size};
use serde::{Deserialize, Serialize};

/// Dirty tracker configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DirtyConfig {
    /// Two regions merge when their overlap exceeds this fraction of the
    /// smaller region.
    pub merge_threshold: f64,
    /// Over this many tracked regions, a consolidation pass runs.
    pub max_regions: usize,
    /// Over this dirty fraction of the canvas, redraw everything at once.
    pub full_redraw_threshold: f64,
}

impl Default for DirtyConfig {
    fn default() -> Self {
        Self { merge_threshold: 0.3, max_regions: 16, full_redraw_threshold: 0.8 }
    }
}

/// Accumulates changed canvas regions, merging overlapping ones.
#[derive(Debug, Clone)]
pub struct DirtyTracker {
    canvas: Size,
    regions: Vec<Rect>,
    config: DirtyConfig,
}

/// Overlap of `a` and `b` as a fraction of the smaller rectangle, taken as
/// the lesser of the per-axis overlap fractions (overlap width over the
/// smaller width, overlap height over the smaller height) -- not the
/// intersection-area ratio. Two equal squares offset by half their side
/// score 0.5 here where the area ratio would give 0.25, so they merge at
/// the default threshold.
fn overlap_ratio(a: Rect, b: Rect) -> f64 {
    let overlap = a.intersect(b);
    if overlap.width() <= 0.0 || overlap.height() <= 0.0 {
        return 0.0;
    }
    let min_width = a.width().min(b.width());
    let min_height = a.height().min(b.height());
    if min_width <= 0.0 || min_height <= 0.0 {
        return 0.0;
    }
    (overlap.width() / min_width).min(overlap.height() / min_height)
}

impl DirtyTracker {
    pub fn new(canvas: Size) -> Self {
        Self::with_config(canvas, DirtyConfig::default())
    }

    pub fn with_config(canvas: Size, config: DirtyConfig) -> Self {
        Self { canvas, regions: Vec::new(), config }
    }

    pub fn config(&self) -> DirtyConfig {
        self.config
    }

    fn canvas_rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.canvas.width, self.canvas.height)
    }

    /// Record a changed region.
    ///
    /// The region is clamped to canvas bounds; empty regions are dropped.
    /// When the region overlaps an existing one past the merge threshold,
    /// their union bounding box replaces the existing rectangle.
    pub fn mark_dirty(&mut self, region: Rect) {
        let clamped = region.intersect(self.canvas_rect());
        if clamped.width() <= 0.0 || clamped.height() <= 0.0 {
            return;
        }

        for existing in &mut self.regions {
            if overlap_ratio(*existing, clamped) > self.config.merge_threshold {
                *existing = existing.union(clamped);
                return;
            }
        }

        self.regions.push(clamped);
        if self.regions.len() > self.config.max_regions {
            self.consolidate();
        }
    }

    /// Greedy single-pass merge over area-descending regions. This is a
    /// heuristic to cap region count, not optimal packing.
    fn consolidate(&mut self) {
        self.regions.sort_by(|a, b| {
            b.area().partial_cmp(&a.area()).unwrap_or(Ordering::Equal)
        });
        let mut merged: Vec<Rect> = Vec::with_capacity(self.regions.len());
        'regions: for region in self.regions.drain(..) {
            for kept in &mut merged {
                if overlap_ratio(*kept, region) > self.config.merge_threshold {
                    *kept = kept.union(region);
                    continue 'regions;
                }
            }
            merged.push(region);
        }
        self.regions = merged;
    }

    /// Mark the whole canvas dirty, replacing all tracked regions.
    pub fn mark_all_dirty(&mut self) {
        self.regions.clear();
        let canvas = self.canvas_rect();
        if canvas.width() > 0.0 && canvas.height() > 0.0 {
            self.regions.push(canvas);
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.regions.is_empty()
    }

    pub fn regions(&self) -> &[Rect] {
        &self.regions
    }

    /// Sum of tracked region areas. Regions below the merge threshold may
    /// still overlap slightly, so this can overcount.
    pub fn total_dirty_area(&self) -> f64 {
        self.regions.iter().map(|r| r.area()).sum()
    }

    /// Dirty area relative to canvas area, clamped to 1.0.
    pub fn dirty_fraction(&self) -> f64 {
        let canvas_area = self.canvas_rect().area();
        if canvas_area <= 0.0 {
            return if self.is_dirty() { 1.0 } else { 0.0 };
        }
        (self.total_dirty_area() / canvas_area).min(1.0)
    }

    /// Drop all tracked regions. Called after they have been rendered.
    pub fn clear(&mut self) {
        self.regions.clear();
    }

    pub fn set_canvas_size(&mut self, canvas: Size) {
        self.canvas = canvas;
    }

    pub fn canvas_size(&self) -> Size {
        self.canvas
    }
}
