//! Render optimizer: decides full vs. partial redraw from dirty regions.

use kurbo::{Rect, Size};

use crate::dirty::{DirtyConfig, DirtyTracker};

/// Minimal drawing-context surface the optimizer drives.
///
/// Implementations wrap a real canvas context; tests use a recording
/// surface. The optimizer applies clipping itself, so draw callbacks must
/// not assume anything beyond the clip already in place.
pub trait RenderSurface {
    fn size(&self) -> Size;
    fn save(&mut self);
    fn restore(&mut self);
    fn clip(&mut self, region: Rect);
    fn clear(&mut self, region: Rect);
}

/// Drives a draw callback over dirty regions only.
pub struct RenderOptimizer {
    tracker: DirtyTracker,
}

impl RenderOptimizer {
    pub fn new(canvas: Size) -> Self {
        Self { tracker: DirtyTracker::new(canvas) }
    }

    pub fn with_config(canvas: Size, config: DirtyConfig) -> Self {
        Self { tracker: DirtyTracker::with_config(canvas, config) }
    }

    pub fn mark_dirty(&mut self, region: Rect) {
        self.tracker.mark_dirty(region);
    }

    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    pub fn tracker(&self) -> &DirtyTracker {
        &self.tracker
    }

    pub fn resize(&mut self, canvas: Size) {
        self.tracker.set_canvas_size(canvas);
    }

    /// Redraw dirty regions through `draw`.
    ///
    /// A no-op while clean. Past the full-redraw threshold the whole canvas
    /// is cleared and drawn in one callback invocation; otherwise each
    /// region is clipped, cleared and drawn in isolation. All tracked
    /// regions are cleared afterwards on either path.
    pub fn render<S: RenderSurface>(
        &mut self,
        surface: &mut S,
        mut draw: impl FnMut(&mut S, Rect),
    ) {
        if !self.tracker.is_dirty() {
            return;
        }

        let canvas = surface.size();
        let canvas_rect = Rect::new(0.0, 0.0, canvas.width, canvas.height);

        if self.tracker.dirty_fraction() > self.tracker.config().full_redraw_threshold {
            surface.clear(canvas_rect);
            draw(surface, canvas_rect);
        } else {
            for region in self.tracker.regions().to_vec() {
                surface.save();
                surface.clip(region);
                surface.clear(region);
                draw(surface, region);
                surface.restore();
            }
        }

        self.tracker.clear();
    }

    /// Mark everything dirty and render immediately. Used on viewport jumps
    /// where no incremental diff is meaningful.
    pub fn force_full_redraw<S: RenderSurface>(
        &mut self,
        surface: &mut S,
        draw: impl FnMut(&mut S, Rect),
    ) {
        self.tracker.mark_all_dirty();
        self.render(surface, draw);
    }
}
