//! Frame-time and FPS sampling with threshold alerts.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// Frame-delta samples kept in the ring buffer.
const FRAME_SAMPLES: usize = 60;
/// Render/update phase samples kept per ring buffer.
const PHASE_SAMPLES: usize = 30;

/// Alert thresholds checked on every sampling tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerfThresholds {
    pub min_fps: f64,
    pub max_frame_time_ms: f64,
    pub max_memory_pct: f64,
    pub max_render_time_ms: f64,
}

impl Default for PerfThresholds {
    fn default() -> Self {
        Self {
            min_fps: 30.0,
            max_frame_time_ms: 33.3,
            max_memory_pct: 85.0,
            max_render_time_ms: 16.0,
        }
    }
}

/// A threshold crossing observed in one sampling tick. Several may fire in
/// the same tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PerfAlert {
    LowFps { fps: f64, min: f64 },
    SlowFrame { average_ms: f64, max: f64 },
    HighMemory { percentage: f64, max: f64 },
    SlowRender { average_ms: f64, max: f64 },
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerfMetrics {
    pub fps: f64,
    pub average_frame_time_ms: f64,
    pub average_render_time_ms: f64,
    pub average_update_time_ms: f64,
    pub draw_calls: u32,
    pub memory_percentage: Option<f64>,
}

fn average(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn push_bounded(samples: &mut VecDeque<f64>, value: f64, cap: usize) {
    if samples.len() == cap {
        samples.pop_front();
    }
    samples.push_back(value);
}

/// Samples frame timing from the animation loop and raises threshold
/// alerts on a separate sampling interval.
///
/// All measurement work is bounded by the ring-buffer sizes; nothing here
/// scans the scene.
pub struct PerformanceMonitor {
    frame_times: VecDeque<f64>,
    render_times: VecDeque<f64>,
    update_times: VecDeque<f64>,
    last_frame: Option<Instant>,
    render_start: Option<Instant>,
    update_start: Option<Instant>,
    draw_calls: u32,
    fps: f64,
    sample_interval: Duration,
    last_sample: Option<Instant>,
    thresholds: PerfThresholds,
    callback: Option<Box<dyn FnMut(&PerfAlert)>>,
    memory_percentage: Option<f64>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(PerfThresholds::default())
    }
}

impl PerformanceMonitor {
    pub fn new(thresholds: PerfThresholds) -> Self {
        Self {
            frame_times: VecDeque::with_capacity(FRAME_SAMPLES),
            render_times: VecDeque::with_capacity(PHASE_SAMPLES),
            update_times: VecDeque::with_capacity(PHASE_SAMPLES),
            last_frame: None,
            render_start: None,
            update_start: None,
            draw_calls: 0,
            fps: 0.0,
            sample_interval: Duration::from_millis(1000),
            last_sample: None,
            thresholds,
            callback: None,
            memory_percentage: None,
        }
    }

    pub fn set_sample_interval(&mut self, interval: Duration) {
        self.sample_interval = interval;
    }

    pub fn set_alert_callback(&mut self, callback: impl FnMut(&PerfAlert) + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Latest memory figure for threshold checks, fed by the memory manager.
    pub fn set_memory_percentage(&mut self, percentage: f64) {
        self.memory_percentage = Some(percentage);
    }

    /// Record an animation-frame timestamp. Runs one sampling tick when the
    /// sampling interval has elapsed.
    pub fn frame(&mut self, now: Instant) {
        if let Some(last) = self.last_frame {
            let delta_ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
            push_bounded(&mut self.frame_times, delta_ms, FRAME_SAMPLES);
        }
        self.last_frame = Some(now);

        let due = match self.last_sample {
            Some(last) => now.saturating_duration_since(last) >= self.sample_interval,
            None => true,
        };
        if due {
            self.sample_tick(now);
        }
    }

    fn sample_tick(&mut self, now: Instant) {
        let average_frame = average(&self.frame_times);
        self.fps = if average_frame > 0.0 { 1000.0 / average_frame } else { 0.0 };

        let mut alerts: Vec<PerfAlert> = Vec::new();
        // FPS of exactly zero means "no data yet", never a violation.
        if self.fps > 0.0 && self.fps < self.thresholds.min_fps {
            alerts.push(PerfAlert::LowFps { fps: self.fps, min: self.thresholds.min_fps });
        }
        if average_frame > self.thresholds.max_frame_time_ms {
            alerts.push(PerfAlert::SlowFrame {
                average_ms: average_frame,
                max: self.thresholds.max_frame_time_ms,
            });
        }
        if let Some(percentage) = self.memory_percentage {
            if percentage > self.thresholds.max_memory_pct {
                alerts.push(PerfAlert::HighMemory {
                    percentage,
                    max: self.thresholds.max_memory_pct,
                });
            }
        }
        let average_render = average(&self.render_times);
        if average_render > self.thresholds.max_render_time_ms {
            alerts.push(PerfAlert::SlowRender {
                average_ms: average_render,
                max: self.thresholds.max_render_time_ms,
            });
        }

        if let Some(callback) = self.callback.as_mut() {
            for alert in &alerts {
                callback(alert);
            }
        }

        self.draw_calls = 0;
        self.last_sample = Some(now);
    }

    pub fn begin_render(&mut self, now: Instant) {
        self.render_start = Some(now);
    }

    pub fn end_render(&mut self, now: Instant) {
        if let Some(start) = self.render_start.take() {
            let elapsed_ms = now.saturating_duration_since(start).as_secs_f64() * 1000.0;
            push_bounded(&mut self.render_times, elapsed_ms, PHASE_SAMPLES);
        }
    }

    pub fn begin_update(&mut self, now: Instant) {
        self.update_start = Some(now);
    }

    pub fn end_update(&mut self, now: Instant) {
        if let Some(start) = self.update_start.take() {
            let elapsed_ms = now.saturating_duration_since(start).as_secs_f64() * 1000.0;
            push_bounded(&mut self.update_times, elapsed_ms, PHASE_SAMPLES);
        }
    }

    /// Count one draw call for the current sampling window.
    pub fn record_draw_call(&mut self) {
        self.draw_calls += 1;
    }

    pub fn metrics(&self) -> PerfMetrics {
        PerfMetrics {
            fps: self.fps,
            average_frame_time_ms: average(&self.frame_times),
            average_render_time_ms: average(&self.render_times),
            average_update_time_ms: average(&self.update_times),
            draw_calls: self.draw_calls,
            memory_percentage: self.memory_percentage,
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Drop all samples and timers.
    pub fn reset(&mut self) {
        self.frame_times.clear();
        self.render_times.clear();
        self.update_times.clear();
        self.last_frame = None;
        self.render_start = None;
        self.update_start = None;
        self.draw_calls = 0;
        self.fps = 0.0;
        self.last_sample = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn drive_frames(monitor: &mut PerformanceMonitor, start: Instant, count: u32, frame_ms: u64) {
        for i in 0..=count {
            monitor.frame(start + Duration::from_millis(i as u64 * frame_ms));
        }
    }

    #[test]
    fn test_fps_from_frame_deltas() {
        let mut monitor = PerformanceMonitor::default();
        let start = Instant::now();
        // ~16ms frames for well over one sampling interval.
        drive_frames(&mut monitor, start, 80, 16);
        let fps = monitor.fps();
        assert!(fps > 55.0 && fps < 70.0, "fps was {fps}");
    }

    #[test]
    fn test_zero_fps_is_not_a_violation() {
        let alerts = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&alerts);

        let mut monitor = PerformanceMonitor::default();
        monitor.set_alert_callback(move |alert| sink.borrow_mut().push(*alert));

        // First frame triggers a sampling tick with no deltas recorded.
        monitor.frame(Instant::now());
        assert!(alerts.borrow().is_empty());
    }

    #[test]
    fn test_low_fps_alert() {
        let alerts = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&alerts);

        let mut monitor = PerformanceMonitor::default();
        monitor.set_alert_callback(move |alert| sink.borrow_mut().push(*alert));

        // 100ms frames: 10 FPS, also a slow-frame violation.
        drive_frames(&mut monitor, Instant::now(), 15, 100);

        let fired = alerts.borrow();
        assert!(fired.iter().any(|a| matches!(a, PerfAlert::LowFps { .. })));
        assert!(fired.iter().any(|a| matches!(a, PerfAlert::SlowFrame { .. })));
    }

    #[test]
    fn test_memory_alert() {
        let alerts = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&alerts);

        let mut monitor = PerformanceMonitor::default();
        monitor.set_alert_callback(move |alert| sink.borrow_mut().push(*alert));
        monitor.set_memory_percentage(92.0);

        drive_frames(&mut monitor, Instant::now(), 70, 16);
        assert!(alerts.borrow().iter().any(|a| matches!(a, PerfAlert::HighMemory { .. })));
    }

    #[test]
    fn test_render_timer() {
        let mut monitor = PerformanceMonitor::default();
        let start = Instant::now();
        monitor.begin_render(start);
        monitor.end_render(start + Duration::from_millis(8));
        let metrics = monitor.metrics();
        assert!((metrics.average_render_time_ms - 8.0).abs() < 0.5);
    }

    #[test]
    fn test_frame_ring_is_bounded() {
        let mut monitor = PerformanceMonitor::default();
        let start = Instant::now();
        drive_frames(&mut monitor, start, 200, 16);
        assert!(monitor.frame_times.len() <= FRAME_SAMPLES);
    }

    #[test]
    fn test_draw_calls_reset_each_tick() {
        let mut monitor = PerformanceMonitor::default();
        let start = Instant::now();
        monitor.frame(start);
        monitor.record_draw_call();
        monitor.record_draw_call();
        assert_eq!(monitor.metrics().draw_calls, 2);

        // Next tick is due after the sampling interval.
        monitor.frame(start + Duration::from_millis(1100));
        assert_eq!(monitor.metrics().draw_calls, 0);
    }

    #[test]
    fn test_reset() {
        let mut monitor = PerformanceMonitor::default();
        drive_frames(&mut monitor, Instant::now(), 70, 16);
        monitor.reset();
        assert_eq!(monitor.fps(), 0.0);
        assert_eq!(monitor.metrics().average_frame_time_ms, 0.0);
    }
}
