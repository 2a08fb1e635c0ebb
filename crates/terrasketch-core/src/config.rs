//! Named configuration presets for the performance subsystem.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::culling::CullingConfig;
use crate::dirty::DirtyConfig;
use crate::lod::LodConfig;
use crate::memory::MemoryConfig;

/// A bundle of component configurations. Plain data, not a protocol:
/// callers pick a preset and hand the pieces to each component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerfPreset {
    pub culling: CullingConfig,
    pub dirty: DirtyConfig,
    pub lod: LodConfig,
    pub memory: MemoryConfig,
}

impl Default for PerfPreset {
    fn default() -> Self {
        Self::balanced()
    }
}

impl PerfPreset {
    /// Generous budgets for desktop hardware.
    pub fn high() -> Self {
        Self {
            culling: CullingConfig { cull_padding: 100.0, ..Default::default() },
            dirty: DirtyConfig { max_regions: 32, ..Default::default() },
            lod: LodConfig { pixel_size_threshold: 2.0, ..Default::default() },
            memory: MemoryConfig {
                max_texture_cache_bytes: 128 * 1024 * 1024,
                low_memory_texture_cache_bytes: 32 * 1024 * 1024,
                ..Default::default()
            },
        }
    }

    /// The component defaults.
    pub fn balanced() -> Self {
        Self {
            culling: CullingConfig::default(),
            dirty: DirtyConfig::default(),
            lod: LodConfig::default(),
            memory: MemoryConfig::default(),
        }
    }

    /// Trimmed budgets and earlier LOD drop-off for weak hardware.
    pub fn low() -> Self {
        Self {
            culling: CullingConfig { cull_padding: 25.0, ..Default::default() },
            dirty: DirtyConfig { max_regions: 8, full_redraw_threshold: 0.6, ..Default::default() },
            lod: LodConfig {
                high_detail_threshold: 1.5,
                medium_detail_threshold: 0.75,
                low_detail_threshold: 0.4,
                pixel_size_threshold: 6.0,
            },
            memory: MemoryConfig {
                max_texture_cache_bytes: 32 * 1024 * 1024,
                low_memory_texture_cache_bytes: 8 * 1024 * 1024,
                ..Default::default()
            },
        }
    }

    /// Tight budgets and aggressive polling for phones and tablets.
    pub fn mobile() -> Self {
        Self {
            culling: CullingConfig { cull_padding: 25.0, cell_size: 50.0 },
            dirty: DirtyConfig {
                max_regions: 8,
                merge_threshold: 0.2,
                full_redraw_threshold: 0.5,
            },
            lod: LodConfig {
                high_detail_threshold: 2.0,
                medium_detail_threshold: 1.0,
                low_detail_threshold: 0.5,
                pixel_size_threshold: 8.0,
            },
            memory: MemoryConfig {
                poll_interval: Duration::from_secs(3),
                warning_threshold: 60.0,
                critical_threshold: 75.0,
                gc_threshold: 70.0,
                max_texture_cache_bytes: 16 * 1024 * 1024,
                low_memory_texture_cache_bytes: 4 * 1024 * 1024,
            },
        }
    }
}
