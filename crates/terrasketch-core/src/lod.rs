//! Level-of-detail selection and dispatch.

use std::collections::{HashMap, VecDeque};

use kurbo::{Rect, Size};
use serde::{Deserialize, Serialize};

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// One 60fps frame budget, in milliseconds. Objects averaging past this are
/// downgraded from High detail.
pub const FRAME_BUDGET_MS: f64 = 16.0;

/// Trailing render-time samples kept per object.
const RENDER_TIME_SAMPLES: usize = 10;

/// Rendering fidelity tier for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetailLevel {
    High,
    Medium,
    Low,
    Hidden,
}

/// LOD selection thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LodConfig {
    /// Zoom at or above which objects render at full fidelity.
    pub high_detail_threshold: f64,
    pub medium_detail_threshold: f64,
    pub low_detail_threshold: f64,
    /// On-screen diagonal (pixels) below which an object is hidden outright.
    pub pixel_size_threshold: f64,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            high_detail_threshold: 1.0,
            medium_detail_threshold: 0.5,
            low_detail_threshold: 0.25,
            pixel_size_threshold: 4.0,
        }
    }
}

/// A scene object that can draw itself at three fidelity tiers.
pub trait DetailRender<S> {
    fn id(&self) -> &str;
    fn render_high(&self, surface: &mut S);
    fn render_medium(&self, surface: &mut S);
    fn render_low(&self, surface: &mut S);
}

#[derive(Debug)]
struct LodEntry {
    bounds: Rect,
    level: DetailLevel,
    render_times: VecDeque<f64>,
}

impl LodEntry {
    fn average_render_time(&self) -> f64 {
        if self.render_times.is_empty() {
            return 0.0;
        }
        self.render_times.iter().sum::<f64>() / self.render_times.len() as f64
    }
}

/// Assigns a detail level per object from zoom, on-screen size and measured
/// render cost. Levels are derived state, recomputed wholesale whenever
/// zoom, viewport size or performance mode changes.
pub struct LodManager {
    config: LodConfig,
    zoom: f64,
    viewport_size: Size,
    performance_mode: bool,
    entries: HashMap<String, LodEntry>,
}

impl Default for LodManager {
    fn default() -> Self {
        Self::new(LodConfig::default())
    }
}

impl LodManager {
    pub fn new(config: LodConfig) -> Self {
        Self {
            config,
            zoom: 1.0,
            viewport_size: Size::new(800.0, 600.0),
            performance_mode: false,
            entries: HashMap::new(),
        }
    }

    fn select_level(&self, bounds: Rect, average_render_time: f64) -> DetailLevel {
        // The pixel-size check dominates everything else.
        let width = bounds.width().abs() * self.zoom;
        let height = bounds.height().abs() * self.zoom;
        let diagonal = (width * width + height * height).sqrt();
        if diagonal < self.config.pixel_size_threshold {
            return DetailLevel::Hidden;
        }

        let mut level = if self.performance_mode {
            // Performance mode never grants High.
            if self.zoom >= self.config.high_detail_threshold {
                DetailLevel::Medium
            } else if self.zoom >= self.config.medium_detail_threshold {
                DetailLevel::Low
            } else {
                DetailLevel::Hidden
            }
        } else if self.zoom >= self.config.high_detail_threshold {
            DetailLevel::High
        } else if self.zoom >= self.config.medium_detail_threshold {
            DetailLevel::Medium
        } else if self.zoom >= self.config.low_detail_threshold {
            DetailLevel::Low
        } else {
            DetailLevel::Hidden
        };

        if level == DetailLevel::High && average_render_time > FRAME_BUDGET_MS {
            level = DetailLevel::Medium;
        }
        level
    }

    fn reevaluate_all(&mut self) {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for id in ids {
            let (bounds, average) = {
                let entry = &self.entries[&id];
                (entry.bounds, entry.average_render_time())
            };
            let level = self.select_level(bounds, average);
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.level = level;
            }
        }
    }

    /// Track an object; its level is computed immediately.
    pub fn add_object(&mut self, id: &str, bounds: Rect) {
        let level = self.select_level(bounds, 0.0);
        self.entries.insert(
            id.to_string(),
            LodEntry { bounds, level, render_times: VecDeque::with_capacity(RENDER_TIME_SAMPLES) },
        );
    }

    pub fn update_object_bounds(&mut self, id: &str, bounds: Rect) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        entry.bounds = bounds;
        let average = entry.average_render_time();
        let level = self.select_level(bounds, average);
        if let Some(entry) = self.entries.get_mut(id) {
            entry.level = level;
        }
    }

    pub fn remove_object(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Update the zoom factor and re-derive every level.
    pub fn update_zoom(&mut self, zoom: f64) {
        self.zoom = zoom;
        self.reevaluate_all();
    }

    pub fn set_viewport_size(&mut self, size: Size) {
        self.viewport_size = size;
        self.reevaluate_all();
    }

    /// Toggle degraded-quality mode and re-evaluate all objects immediately.
    /// The performance monitor flips this under sustained low FPS.
    pub fn set_performance_mode(&mut self, enabled: bool) {
        self.performance_mode = enabled;
        self.reevaluate_all();
    }

    pub fn performance_mode(&self) -> bool {
        self.performance_mode
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn level_of(&self, id: &str) -> Option<DetailLevel> {
        self.entries.get(id).map(|e| e.level)
    }

    pub fn average_render_time(&self, id: &str) -> Option<f64> {
        self.entries.get(id).map(|e| e.average_render_time())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render an object at its current level and record the duration into
    /// its trailing average. Hidden and untracked objects are skipped.
    pub fn render_object<S>(&mut self, object: &dyn DetailRender<S>, surface: &mut S) {
        let Some(level) = self.level_of(object.id()) else {
            return;
        };
        if level == DetailLevel::Hidden {
            return;
        }
        let start = Instant::now();
        match level {
            DetailLevel::High => object.render_high(surface),
            DetailLevel::Medium => object.render_medium(surface),
            DetailLevel::Low => object.render_low(surface),
            DetailLevel::Hidden => unreachable!(),
        }
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.record_render_time(object.id(), elapsed_ms);
    }

    /// Feed a measured render duration into an object's trailing average.
    pub fn record_render_time(&mut self, id: &str, elapsed_ms: f64) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        if entry.render_times.len() == RENDER_TIME_SAMPLES {
            entry.render_times.pop_front();
        }
        entry.render_times.push_back(elapsed_ms);
        let bounds = entry.bounds;
        let average = entry.average_render_time();
        let level = self.select_level(bounds, average);
        if let Some(entry) = self.entries.get_mut(id) {
            entry.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestObject {
        id: String,
        rendered: std::cell::RefCell<Vec<&'static str>>,
    }

    impl TestObject {
        fn new(id: &str) -> Self {
            Self { id: id.to_string(), rendered: std::cell::RefCell::new(Vec::new()) }
        }
    }

    impl DetailRender<()> for TestObject {
        fn id(&self) -> &str {
            &self.id
        }
        fn render_high(&self, _surface: &mut ()) {
            self.rendered.borrow_mut().push("high");
        }
        fn render_medium(&self, _surface: &mut ()) {
            self.rendered.borrow_mut().push("medium");
        }
        fn render_low(&self, _surface: &mut ()) {
            self.rendered.borrow_mut().push("low");
        }
    }

    #[test]
    fn test_high_detail_at_full_zoom() {
        let mut lod = LodManager::default();
        lod.add_object("a", Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(lod.level_of("a"), Some(DetailLevel::High));
    }

    #[test]
    fn test_levels_step_down_with_zoom() {
        let mut lod = LodManager::default();
        lod.add_object("a", Rect::new(0.0, 0.0, 100.0, 100.0));

        lod.update_zoom(0.6);
        assert_eq!(lod.level_of("a"), Some(DetailLevel::Medium));

        lod.update_zoom(0.3);
        assert_eq!(lod.level_of("a"), Some(DetailLevel::Low));

        lod.update_zoom(0.1);
        // 100x100 at zoom 0.1 is a 14px diagonal, so still drawable, but
        // the zoom ladder bottoms out at Hidden.
        assert_eq!(lod.level_of("a"), Some(DetailLevel::Hidden));
    }

    #[test]
    fn test_pixel_size_check_dominates() {
        // A tiny object is Hidden even at high zoom and in any mode.
        let mut lod = LodManager::default();
        lod.add_object("tiny", Rect::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(lod.level_of("tiny"), Some(DetailLevel::Hidden));

        lod.set_performance_mode(true);
        assert_eq!(lod.level_of("tiny"), Some(DetailLevel::Hidden));

        lod.set_performance_mode(false);
        lod.update_zoom(2.0);
        assert_eq!(lod.level_of("tiny"), Some(DetailLevel::Hidden));
    }

    #[test]
    fn test_performance_mode_never_grants_high() {
        let mut lod = LodManager::default();
        lod.add_object("a", Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(lod.level_of("a"), Some(DetailLevel::High));

        lod.set_performance_mode(true);
        assert_eq!(lod.level_of("a"), Some(DetailLevel::Medium));

        lod.update_zoom(0.6);
        assert_eq!(lod.level_of("a"), Some(DetailLevel::Low));

        lod.set_performance_mode(false);
        assert_eq!(lod.level_of("a"), Some(DetailLevel::Medium));
    }

    #[test]
    fn test_slow_object_downgrades_from_high() {
        let mut lod = LodManager::default();
        lod.add_object("slow", Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(lod.level_of("slow"), Some(DetailLevel::High));

        for _ in 0..10 {
            lod.record_render_time("slow", 20.0);
        }
        assert_eq!(lod.level_of("slow"), Some(DetailLevel::Medium));
    }

    #[test]
    fn test_trailing_average_is_bounded() {
        let mut lod = LodManager::default();
        lod.add_object("a", Rect::new(0.0, 0.0, 100.0, 100.0));
        // Ten slow samples then ten fast ones: the slow ones age out.
        for _ in 0..10 {
            lod.record_render_time("a", 40.0);
        }
        for _ in 0..10 {
            lod.record_render_time("a", 1.0);
        }
        assert!(lod.average_render_time("a").unwrap() < 2.0);
        assert_eq!(lod.level_of("a"), Some(DetailLevel::High));
    }

    #[test]
    fn test_render_dispatches_by_level() {
        let mut lod = LodManager::default();
        let object = TestObject::new("a");
        lod.add_object("a", Rect::new(0.0, 0.0, 100.0, 100.0));

        lod.render_object(&object, &mut ());
        lod.update_zoom(0.6);
        lod.render_object(&object, &mut ());
        lod.update_zoom(0.3);
        lod.render_object(&object, &mut ());

        assert_eq!(*object.rendered.borrow(), vec!["high", "medium", "low"]);
    }

    #[test]
    fn test_hidden_and_untracked_objects_are_skipped() {
        let mut lod = LodManager::default();
        let tracked = TestObject::new("tiny");
        let untracked = TestObject::new("ghost");
        lod.add_object("tiny", Rect::new(0.0, 0.0, 1.0, 1.0));

        lod.render_object(&tracked, &mut ());
        lod.render_object(&untracked, &mut ());

        assert!(tracked.rendered.borrow().is_empty());
        assert!(untracked.rendered.borrow().is_empty());
    }
}
