//! Heap-pressure tracking and cooperative cache eviction.
//!
//! The manager samples heap usage on a polling interval, derives a coarse
//! pressure tier, and schedules a cleanup pass onto a low-priority task
//! queue that the host drains between frames. Cleanup never runs inline
//! with a poll so it cannot stall an in-progress frame.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

use lru::LruCache;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// Memory manager configuration. Thresholds are heap-usage percentages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub poll_interval: Duration,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    /// Crossing this schedules a cleanup pass.
    pub gc_threshold: f64,
    pub max_texture_cache_bytes: u64,
    /// Texture budget while low-memory mode is on.
    pub low_memory_texture_cache_bytes: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            warning_threshold: 70.0,
            critical_threshold: 85.0,
            gc_threshold: 80.0,
            max_texture_cache_bytes: 64 * 1024 * 1024,
            low_memory_texture_cache_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Coarse heap-pressure tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryPressure {
    /// Pure function of usage percentage against the configured thresholds,
    /// with a coarse medium band at 50%.
    pub fn from_percentage(percentage: f64, warning: f64, critical: f64) -> Self {
        if percentage >= critical {
            Self::Critical
        } else if percentage >= warning {
            Self::High
        } else if percentage >= 50.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// A raw heap reading: bytes used and the heap limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSample {
    pub used: u64,
    pub limit: u64,
}

/// A processed heap snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryStats {
    pub used: u64,
    pub limit: u64,
    pub available: u64,
    pub percentage: f64,
    pub pressure: MemoryPressure,
}

/// Source of heap readings. Injected so tests can script usage levels.
pub trait HeapProbe {
    /// A reading, or `None` when the platform exposes no heap figures.
    fn sample(&mut self) -> Option<HeapSample>;
}

/// Heap probe backed by system memory figures.
#[cfg(not(target_arch = "wasm32"))]
pub struct SystemHeapProbe {
    system: sysinfo::System,
}

#[cfg(not(target_arch = "wasm32"))]
impl SystemHeapProbe {
    pub fn new() -> Self {
        Self { system: sysinfo::System::new() }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Default for SystemHeapProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl HeapProbe for SystemHeapProbe {
    fn sample(&mut self) -> Option<HeapSample> {
        self.system.refresh_memory();
        let limit = self.system.total_memory();
        if limit == 0 {
            return None;
        }
        Some(HeapSample { used: self.system.used_memory(), limit })
    }
}

/// A cache the memory manager may clear under pressure.
///
/// Registered weakly; caches that have already been dropped are skipped and
/// compacted out of the registry.
pub trait EvictableCache {
    fn clear(&mut self);
    fn len(&self) -> usize;
}

type CacheRef = Weak<RefCell<dyn EvictableCache>>;

/// Byte-budgeted LRU record of texture usage.
pub struct TextureCache {
    entries: LruCache<String, u64>,
    total_bytes: u64,
    max_bytes: u64,
}

impl TextureCache {
    pub fn new(max_bytes: u64) -> Self {
        Self { entries: LruCache::unbounded(), total_bytes: 0, max_bytes }
    }

    /// Record a texture. Least-recently-used entries are evicted first when
    /// adding would exceed the byte budget.
    pub fn insert(&mut self, key: &str, byte_size: u64) {
        if let Some(old) = self.entries.pop(key) {
            self.total_bytes -= old;
        }
        while self.total_bytes + byte_size > self.max_bytes {
            let Some((evicted_key, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes -= evicted;
            debug!("texture cache evicted {evicted_key} ({evicted} bytes)");
        }
        if byte_size <= self.max_bytes {
            self.entries.put(key.to_string(), byte_size);
            self.total_bytes += byte_size;
        }
    }

    /// Refresh an entry's recency. Returns false for unknown keys.
    pub fn touch(&mut self, key: &str) -> bool {
        self.entries.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(bytes) = self.entries.pop(key) {
            self.total_bytes -= bytes;
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn byte_usage(&self) -> u64 {
        self.total_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Shrink (or grow) the budget, evicting LRU entries down to fit.
    pub fn set_max_bytes(&mut self, max_bytes: u64) {
        self.max_bytes = max_bytes;
        while self.total_bytes > self.max_bytes {
            let Some((_, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes -= evicted;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }
}

enum IdleTask {
    Cleanup { critical: bool },
}

type PressureCallback = Box<dyn FnMut(&MemoryStats)>;
type ModeCallback = Box<dyn FnMut(bool)>;

/// Polls heap usage and coordinates eviction under pressure.
pub struct MemoryManager {
    config: MemoryConfig,
    probe: Box<dyn HeapProbe>,
    last_poll: Option<Instant>,
    last_stats: Option<MemoryStats>,
    gc_scheduled: bool,
    idle_tasks: VecDeque<IdleTask>,
    caches: Vec<CacheRef>,
    purge_hooks: Vec<Box<dyn Fn()>>,
    pool_clear_hooks: Vec<Box<dyn Fn()>>,
    texture_cache: TextureCache,
    low_memory_mode: bool,
    pressure_callback: Option<PressureCallback>,
    mode_callback: Option<ModeCallback>,
    destroyed: bool,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig, probe: Box<dyn HeapProbe>) -> Self {
        let texture_cache = TextureCache::new(config.max_texture_cache_bytes);
        Self {
            config,
            probe,
            last_poll: None,
            last_stats: None,
            gc_scheduled: false,
            idle_tasks: VecDeque::new(),
            caches: Vec::new(),
            purge_hooks: Vec::new(),
            pool_clear_hooks: Vec::new(),
            texture_cache,
            low_memory_mode: false,
            pressure_callback: None,
            mode_callback: None,
            destroyed: false,
        }
    }

    /// Process-wide convenience instance over the system probe.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn with_system_probe(config: MemoryConfig) -> Self {
        Self::new(config, Box::new(SystemHeapProbe::new()))
    }

    /// Sample the heap if the polling interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<MemoryStats> {
        if self.destroyed {
            return None;
        }
        if let Some(last) = self.last_poll {
            if now.saturating_duration_since(last) < self.config.poll_interval {
                return None;
            }
        }
        self.poll_now(now)
    }

    /// Sample the heap immediately, ignoring the polling interval.
    pub fn poll_now(&mut self, now: Instant) -> Option<MemoryStats> {
        if self.destroyed {
            return None;
        }
        self.last_poll = Some(now);
        let sample = self.probe.sample()?;
        let stats = Self::stats_from(sample, &self.config);
        self.last_stats = Some(stats);

        // Level-triggered: fires on every non-low poll, not just on
        // transitions. Callers debounce if they want edges.
        if stats.pressure != MemoryPressure::Low {
            if let Some(callback) = self.pressure_callback.as_mut() {
                callback(&stats);
            }
        }

        if stats.percentage >= self.config.gc_threshold && !self.gc_scheduled {
            self.gc_scheduled = true;
            self.idle_tasks.push_back(IdleTask::Cleanup {
                critical: stats.pressure == MemoryPressure::Critical,
            });
            info!("memory at {:.1}%, cleanup pass scheduled", stats.percentage);
        }

        Some(stats)
    }

    fn stats_from(sample: HeapSample, config: &MemoryConfig) -> MemoryStats {
        let percentage = if sample.limit == 0 {
            0.0
        } else {
            sample.used as f64 / sample.limit as f64 * 100.0
        };
        MemoryStats {
            used: sample.used,
            limit: sample.limit,
            available: sample.limit.saturating_sub(sample.used),
            percentage,
            pressure: MemoryPressure::from_percentage(
                percentage,
                config.warning_threshold,
                config.critical_threshold,
            ),
        }
    }

    /// Drain deferred work. Hosts call this between frames.
    pub fn run_idle_tasks(&mut self) -> usize {
        let mut processed = 0;
        while let Some(task) = self.idle_tasks.pop_front() {
            match task {
                IdleTask::Cleanup { critical } => self.cleanup(critical),
            }
            processed += 1;
        }
        processed
    }

    /// Clear registered caches and texture usage; under critical pressure
    /// also empty the object pools.
    fn cleanup(&mut self, critical: bool) {
        let mut cleared = 0;
        self.caches.retain(|weak| match weak.upgrade() {
            Some(cache) => {
                cache.borrow_mut().clear();
                cleared += 1;
                true
            }
            None => false,
        });
        self.texture_cache.clear();
        for hook in &self.purge_hooks {
            hook();
        }
        if critical {
            for hook in &self.pool_clear_hooks {
                hook();
            }
        }
        self.gc_scheduled = false;
        info!("cleanup pass done: {cleared} caches cleared, critical={critical}");
    }

    /// Whether a cleanup pass is scheduled but not yet run.
    pub fn gc_scheduled(&self) -> bool {
        self.gc_scheduled
    }

    pub fn last_stats(&self) -> Option<MemoryStats> {
        self.last_stats
    }

    /// Register a cache for pressure eviction. Held weakly: a dropped cache
    /// is skipped and later compacted.
    pub fn register_cache<C: EvictableCache + 'static>(&mut self, cache: &Rc<RefCell<C>>) {
        let cache: Rc<RefCell<dyn EvictableCache>> = cache.clone();
        self.caches.push(Rc::downgrade(&cache));
    }

    /// Register a callback run on every cleanup pass, for resources the
    /// manager cannot reference directly (detached DOM-equivalents).
    pub fn register_purge_hook(&mut self, hook: impl Fn() + 'static) {
        self.purge_hooks.push(Box::new(hook));
    }

    /// Register a pool-clearing callback, run only under critical pressure.
    pub fn register_pool_clear_hook(&mut self, hook: impl Fn() + 'static) {
        self.pool_clear_hooks.push(Box::new(hook));
    }

    /// Called on every poll whose pressure is not `Low`.
    pub fn set_pressure_callback(&mut self, callback: impl FnMut(&MemoryStats) + 'static) {
        self.pressure_callback = Some(Box::new(callback));
    }

    /// Called with the new mode whenever low-memory mode flips.
    pub fn set_mode_callback(&mut self, callback: impl FnMut(bool) + 'static) {
        self.mode_callback = Some(Box::new(callback));
    }

    /// Shrink cache budgets until [`Self::disable_low_memory_mode`].
    pub fn enable_low_memory_mode(&mut self) {
        if self.low_memory_mode {
            return;
        }
        self.low_memory_mode = true;
        self.texture_cache.set_max_bytes(self.config.low_memory_texture_cache_bytes);
        if let Some(callback) = self.mode_callback.as_mut() {
            callback(true);
        }
    }

    pub fn disable_low_memory_mode(&mut self) {
        if !self.low_memory_mode {
            return;
        }
        self.low_memory_mode = false;
        self.texture_cache.set_max_bytes(self.config.max_texture_cache_bytes);
        if let Some(callback) = self.mode_callback.as_mut() {
            callback(false);
        }
    }

    pub fn low_memory_mode(&self) -> bool {
        self.low_memory_mode
    }

    pub fn texture_cache(&mut self) -> &mut TextureCache {
        &mut self.texture_cache
    }

    /// Tear down queues and registrations. The manager is inert afterwards;
    /// the owner must call this on unmount or polling work leaks.
    pub fn destroy(&mut self) {
        self.idle_tasks.clear();
        self.caches.clear();
        self.purge_hooks.clear();
        self.pool_clear_hooks.clear();
        self.texture_cache.clear();
        self.pressure_callback = None;
        self.mode_callback = None;
        self.gc_scheduled = false;
        self.destroyed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Probe that replays a scripted sequence of usage percentages.
    struct ScriptedProbe {
        readings: Vec<u64>,
        index: usize,
    }

    impl ScriptedProbe {
        fn new(percentages: &[u64]) -> Self {
            Self { readings: percentages.to_vec(), index: 0 }
        }
    }

    impl HeapProbe for ScriptedProbe {
        fn sample(&mut self) -> Option<HeapSample> {
            let pct = *self.readings.get(self.index.min(self.readings.len() - 1))?;
            self.index += 1;
            Some(HeapSample { used: pct, limit: 100 })
        }
    }

    fn manager(percentages: &[u64]) -> MemoryManager {
        MemoryManager::new(MemoryConfig::default(), Box::new(ScriptedProbe::new(percentages)))
    }

    #[test]
    fn test_pressure_tiers() {
        assert_eq!(MemoryPressure::from_percentage(10.0, 70.0, 85.0), MemoryPressure::Low);
        assert_eq!(MemoryPressure::from_percentage(55.0, 70.0, 85.0), MemoryPressure::Medium);
        assert_eq!(MemoryPressure::from_percentage(75.0, 70.0, 85.0), MemoryPressure::High);
        assert_eq!(MemoryPressure::from_percentage(92.0, 70.0, 85.0), MemoryPressure::Critical);
    }

    #[test]
    fn test_poll_respects_interval() {
        let mut manager = manager(&[40, 40, 40]);
        let start = Instant::now();
        assert!(manager.poll(start).is_some());
        assert!(manager.poll(start + Duration::from_secs(1)).is_none());
        assert!(manager.poll(start + Duration::from_secs(6)).is_some());
    }

    #[test]
    fn test_critical_usage_schedules_cleanup_once() {
        // 92% with critical at 85: pressure is Critical and exactly one
        // cleanup pass is scheduled while one is pending.
        let mut manager = manager(&[92, 93, 94]);
        let start = Instant::now();

        let stats = manager.poll_now(start).unwrap();
        assert_eq!(stats.pressure, MemoryPressure::Critical);
        assert!(manager.gc_scheduled());

        manager.poll_now(start + Duration::from_secs(6));
        manager.poll_now(start + Duration::from_secs(12));
        assert_eq!(manager.run_idle_tasks(), 1);
        assert!(!manager.gc_scheduled());
    }

    #[test]
    fn test_cleanup_clears_registered_caches() {
        struct CountedCache {
            items: Vec<u32>,
        }
        impl EvictableCache for CountedCache {
            fn clear(&mut self) {
                self.items.clear();
            }
            fn len(&self) -> usize {
                self.items.len()
            }
        }

        let mut manager = manager(&[95]);
        let cache = Rc::new(RefCell::new(CountedCache { items: vec![1, 2, 3] }));
        manager.register_cache(&cache);

        manager.poll_now(Instant::now());
        manager.run_idle_tasks();
        assert_eq!(cache.borrow().len(), 0);
    }

    #[test]
    fn test_dropped_caches_are_skipped() {
        struct Nop;
        impl EvictableCache for Nop {
            fn clear(&mut self) {}
            fn len(&self) -> usize {
                0
            }
        }

        let mut manager = manager(&[95]);
        {
            let cache = Rc::new(RefCell::new(Nop));
            manager.register_cache(&cache);
        }
        manager.poll_now(Instant::now());
        // Must not panic on the dead weak reference.
        manager.run_idle_tasks();
    }

    #[test]
    fn test_pool_hooks_only_under_critical() {
        use std::cell::Cell;

        let cleared = Rc::new(Cell::new(0));
        let counter = Rc::clone(&cleared);

        // First poll is High (82 >= gc threshold 80 but < critical 85),
        // second is Critical.
        let mut manager = manager(&[82, 95]);
        manager.register_pool_clear_hook(move || counter.set(counter.get() + 1));

        let start = Instant::now();
        manager.poll_now(start);
        manager.run_idle_tasks();
        assert_eq!(cleared.get(), 0);

        manager.poll_now(start + Duration::from_secs(6));
        manager.run_idle_tasks();
        assert_eq!(cleared.get(), 1);
    }

    #[test]
    fn test_pressure_callback_is_level_triggered() {
        use std::cell::Cell;

        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);

        let mut manager = manager(&[75, 75, 40]);
        manager.set_pressure_callback(move |_| counter.set(counter.get() + 1));

        let start = Instant::now();
        manager.poll_now(start);
        manager.poll_now(start + Duration::from_secs(6));
        // Low pressure: no callback.
        manager.poll_now(start + Duration::from_secs(12));
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn test_texture_cache_lru_eviction() {
        let mut cache = TextureCache::new(100);
        cache.insert("a", 40);
        cache.insert("b", 40);
        cache.touch("a"); // b is now least recently used
        cache.insert("c", 40);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.byte_usage(), 80);
    }

    #[test]
    fn test_low_memory_mode_shrinks_and_restores_budget() {
        use std::cell::Cell;

        let mode_changes = Rc::new(Cell::new(0));
        let counter = Rc::clone(&mode_changes);

        let mut manager = manager(&[40]);
        manager.set_mode_callback(move |_| counter.set(counter.get() + 1));
        manager.texture_cache().insert("big", 32 * 1024 * 1024);

        manager.enable_low_memory_mode();
        assert_eq!(manager.texture_cache().max_bytes(), 16 * 1024 * 1024);
        // Entry over the shrunken budget was evicted.
        assert!(!manager.texture_cache().contains("big"));

        manager.disable_low_memory_mode();
        assert_eq!(manager.texture_cache().max_bytes(), 64 * 1024 * 1024);
        assert_eq!(mode_changes.get(), 2);
    }

    #[test]
    fn test_destroyed_manager_is_inert() {
        let mut manager = manager(&[95]);
        manager.destroy();
        assert!(manager.poll_now(Instant::now()).is_none());
        assert!(!manager.gc_scheduled());
    }
}
