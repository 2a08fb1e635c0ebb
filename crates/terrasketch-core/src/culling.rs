//! Viewport culling over the grid spatial index.

use std::collections::{HashMap, HashSet};

use kurbo::Rect;
use serde::{Deserialize, Serialize};

use crate::spatial::{DEFAULT_CELL_SIZE, SpatialGrid};

/// Default padding around the viewport, in screen units.
pub const DEFAULT_CULL_PADDING: f64 = 50.0;

/// Scale is clamped away from zero so padding expansion never divides by it.
const MIN_SCALE: f64 = 1e-6;

/// The visible region of the canvas in world units, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Zoom factor.
    pub scale: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, width: 800.0, height: 600.0, scale: 1.0 }
    }
}

impl Viewport {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }

    /// The viewport grown by `padding / scale` on all sides.
    ///
    /// Dividing by scale makes culling more permissive at low zoom, trading
    /// over-inclusion for no pop-in at the edges.
    pub fn expanded(&self, padding: f64) -> Rect {
        let scale = self.scale.abs().max(MIN_SCALE);
        let pad = padding / scale;
        self.rect().inflate(pad, pad)
    }

    /// Merge a partial update into this viewport.
    pub fn apply(&mut self, patch: &ViewportPatch) {
        if let Some(x) = patch.x {
            self.x = x;
        }
        if let Some(y) = patch.y {
            self.y = y;
        }
        if let Some(width) = patch.width {
            self.width = width;
        }
        if let Some(height) = patch.height {
            self.height = height;
        }
        if let Some(scale) = patch.scale {
            self.scale = scale;
        }
    }
}

/// Partial viewport update; unset fields keep their current value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ViewportPatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub scale: Option<f64>,
}

/// Culler configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CullingConfig {
    pub cull_padding: f64,
    pub cell_size: f64,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self { cull_padding: DEFAULT_CULL_PADDING, cell_size: DEFAULT_CELL_SIZE }
    }
}

/// Counters from the most recent culling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CullingStats {
    pub total: usize,
    pub visible: usize,
    pub culled: usize,
}

#[derive(Debug, Clone, Copy)]
struct CullEntry {
    bounds: Rect,
    visible: bool,
}

/// Tracks which scene objects intersect the current viewport.
///
/// Single-object `add_object`/`update_object` calls resolve visibility with
/// an exact rectangle test; bulk `perform_culling` trusts grid cell
/// membership directly, which is conservative (occasionally over-inclusive)
/// but cheaper across the whole scene.
pub struct ViewportCuller {
    grid: SpatialGrid,
    entries: HashMap<String, CullEntry>,
    visible: HashSet<String>,
    viewport: Viewport,
    padding: f64,
}

impl Default for ViewportCuller {
    fn default() -> Self {
        Self::new(CullingConfig::default())
    }
}

impl ViewportCuller {
    pub fn new(config: CullingConfig) -> Self {
        Self {
            grid: SpatialGrid::new(config.cell_size),
            entries: HashMap::new(),
            visible: HashSet::new(),
            viewport: Viewport::default(),
            padding: config.cull_padding,
        }
    }

    fn cull_rect(&self) -> Rect {
        self.viewport.expanded(self.padding)
    }

    fn rects_overlap(a: Rect, b: Rect) -> bool {
        let overlap = a.intersect(b);
        overlap.width() > 0.0 && overlap.height() > 0.0
    }

    /// Register an object and resolve its visibility immediately.
    pub fn add_object(&mut self, id: &str, bounds: Rect) {
        self.grid.insert(id, bounds);
        let visible = Self::rects_overlap(self.cull_rect(), bounds);
        self.entries.insert(id.to_string(), CullEntry { bounds, visible });
        if visible {
            self.visible.insert(id.to_string());
        } else {
            self.visible.remove(id);
        }
    }

    /// Move an object; its visibility flag is recomputed synchronously.
    pub fn update_object(&mut self, id: &str, bounds: Rect) {
        self.add_object(id, bounds);
    }

    pub fn remove_object(&mut self, id: &str) {
        self.grid.remove(id);
        self.entries.remove(id);
        self.visible.remove(id);
    }

    /// Recompute the entire visible set against the padded viewport.
    ///
    /// Candidates come straight from the grid query; the call is idempotent
    /// for a fixed viewport and object layout.
    pub fn perform_culling(&mut self) {
        let candidates = self.grid.query(self.cull_rect());
        let mut next_visible = HashSet::with_capacity(candidates.len());
        for (id, entry) in &mut self.entries {
            let visible = candidates.contains(id);
            entry.visible = visible;
            if visible {
                next_visible.insert(id.clone());
            }
        }
        self.visible = next_visible;
    }

    /// Merge a viewport patch and re-run culling.
    pub fn update_viewport(&mut self, patch: ViewportPatch) {
        self.viewport.apply(&patch);
        self.perform_culling();
    }

    /// Replace the viewport wholesale and re-run culling.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.perform_culling();
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Visibility flag from the most recent culling pass. Unknown ids are
    /// not visible.
    pub fn is_visible(&self, id: &str) -> bool {
        self.entries.get(id).map(|e| e.visible).unwrap_or(false)
    }

    pub fn visible_ids(&self) -> impl Iterator<Item = &str> {
        self.visible.iter().map(String::as_str)
    }

    pub fn bounds_of(&self, id: &str) -> Option<Rect> {
        self.entries.get(id).map(|e| e.bounds)
    }

    pub fn stats(&self) -> CullingStats {
        let total = self.entries.len();
        let visible = self.visible.len();
        CullingStats { total, visible, culled: total - visible }
    }

    pub fn clear(&mut self) {
        self.grid.clear();
        self.entries.clear();
        self.visible.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn culler() -> ViewportCuller {
        ViewportCuller::default()
    }

    #[test]
    fn test_object_inside_default_viewport_is_visible() {
        let mut culler = culler();
        culler.add_object("a", Rect::new(100.0, 100.0, 150.0, 150.0));
        assert!(culler.is_visible("a"));
    }

    #[test]
    fn test_object_moved_far_away_becomes_invisible() {
        let mut culler = culler();
        culler.add_object("a", Rect::new(100.0, 100.0, 150.0, 150.0));
        assert!(culler.is_visible("a"));

        culler.update_object("a", Rect::new(2000.0, 2000.0, 2050.0, 2050.0));
        assert!(!culler.is_visible("a"));
    }

    #[test]
    fn test_culling_is_idempotent() {
        let mut culler = culler();
        culler.add_object("a", Rect::new(0.0, 0.0, 10.0, 10.0));
        culler.add_object("b", Rect::new(5000.0, 5000.0, 5010.0, 5010.0));

        culler.perform_culling();
        let first: Vec<String> = {
            let mut v: Vec<String> = culler.visible_ids().map(String::from).collect();
            v.sort();
            v
        };
        culler.perform_culling();
        let second: Vec<String> = {
            let mut v: Vec<String> = culler.visible_ids().map(String::from).collect();
            v.sort();
            v
        };
        assert_eq!(first, second);
    }

    #[test]
    fn test_lower_scale_never_shrinks_visible_set() {
        let mut culler = culler();
        for i in 0..20 {
            let offset = i as f64 * 120.0;
            culler.add_object(&format!("obj{i}"), Rect::new(offset, 0.0, offset + 50.0, 50.0));
        }
        culler.perform_culling();
        let at_scale_1 = culler.stats().visible;

        culler.update_viewport(ViewportPatch { scale: Some(0.25), ..Default::default() });
        let at_scale_quarter = culler.stats().visible;
        assert!(at_scale_quarter >= at_scale_1);
    }

    #[test]
    fn test_update_viewport_merges_patch() {
        let mut culler = culler();
        culler.add_object("a", Rect::new(1000.0, 0.0, 1050.0, 50.0));
        assert!(!culler.is_visible("a"));

        culler.update_viewport(ViewportPatch { x: Some(800.0), ..Default::default() });
        let viewport = culler.viewport();
        assert_eq!(viewport.x, 800.0);
        assert_eq!(viewport.width, 800.0);
        assert!(culler.is_visible("a"));
    }

    #[test]
    fn test_remove_object_clears_visibility() {
        let mut culler = culler();
        culler.add_object("a", Rect::new(0.0, 0.0, 10.0, 10.0));
        culler.remove_object("a");
        assert!(!culler.is_visible("a"));
        assert_eq!(culler.stats().total, 0);
    }

    #[test]
    fn test_degenerate_viewport_does_not_panic() {
        let mut culler = culler();
        culler.add_object("a", Rect::new(0.0, 0.0, 10.0, 10.0));
        culler.update_viewport(ViewportPatch {
            width: Some(0.0),
            height: Some(-5.0),
            ..Default::default()
        });
        culler.perform_culling();
    }

    #[test]
    fn test_extreme_scales_do_not_panic() {
        // Tiny scales inflate the padded cull rect enormously; the pass must
        // terminate and keep in-range objects visible.
        let mut culler = culler();
        culler.add_object("a", Rect::new(0.0, 0.0, 10.0, 10.0));
        culler.add_object("far", Rect::new(1e6, 1e6, 1e6 + 10.0, 1e6 + 10.0));

        culler.update_viewport(ViewportPatch { scale: Some(0.0), ..Default::default() });
        assert!(culler.is_visible("a"));
        assert!(culler.is_visible("far"));

        culler.update_viewport(ViewportPatch { scale: Some(1e12), ..Default::default() });
        assert!(culler.is_visible("a"));
        assert!(!culler.is_visible("far"));

        culler.update_viewport(ViewportPatch { scale: Some(1e-12), ..Default::default() });
        assert!(culler.is_visible("a"));
        assert!(culler.is_visible("far"));
    }

    #[test]
    fn test_stats_add_up() {
        let mut culler = culler();
        culler.add_object("near", Rect::new(0.0, 0.0, 10.0, 10.0));
        culler.add_object("far", Rect::new(9000.0, 9000.0, 9010.0, 9010.0));
        culler.perform_culling();
        let stats = culler.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.visible + stats.culled, stats.total);
        assert_eq!(stats.visible, 1);
    }

    #[test]
    fn test_end_to_end_default_padding_scenario() {
        // 800x600 viewport at origin, scale 1, default padding 50.
        let mut culler = culler();
        culler.add_object("obj", Rect::new(100.0, 100.0, 150.0, 150.0));
        assert!(culler.is_visible("obj"));

        culler.update_object("obj", Rect::new(2000.0, 2000.0, 2050.0, 2050.0));
        assert!(!culler.is_visible("obj"));
    }
}
