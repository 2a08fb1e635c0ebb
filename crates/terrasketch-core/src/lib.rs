//! TerraSketch Core Library
//!
//! Render-loop performance components for the TerraSketch landscape design
//! editor: object pooling, grid-based viewport culling, dirty-rectangle
//! redraw, level-of-detail selection, memory pressure management and frame
//! monitoring. Everything here runs single-threaded inside the host's
//! animation loop; deferred work goes through explicit task queues the host
//! drains between frames.

pub mod config;
pub mod culling;
pub mod dirty;
pub mod lod;
pub mod memory;
pub mod monitor;
pub mod pool;
pub mod render;
pub mod spatial;

pub use config::PerfPreset;
pub use culling::{CullingConfig, CullingStats, Viewport, ViewportCuller, ViewportPatch};
pub use dirty::{DirtyConfig, DirtyTracker};
pub use lod::{DetailLevel, DetailRender, LodConfig, LodManager};
pub use memory::{
    EvictableCache, HeapProbe, HeapSample, MemoryConfig, MemoryManager, MemoryPressure,
    MemoryStats, TextureCache,
};
pub use monitor::{PerfAlert, PerfMetrics, PerfThresholds, PerformanceMonitor};
pub use pool::{ObjectPool, PoolHandle, Poolable, ScratchPoint, ScratchRect, ScratchTransform, with_pooled};
pub use render::{RenderOptimizer, RenderSurface};
pub use spatial::SpatialGrid;

#[cfg(not(target_arch = "wasm32"))]
pub use memory::SystemHeapProbe;
