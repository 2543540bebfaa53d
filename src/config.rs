//! Engine configuration
//!
//! Every tunable of the engine is a named field of [`EngineConfig`]. The configuration
//! is passed to [`Device::new`](crate::device::Device::new) and shared by all displays
//! of that device.

use std::time::Duration;

use crate::{
    backend::allocator::Fourcc,
    utils::{Physical, Size},
};

bitflags::bitflags! {
    /// Switches to disable optimizations, mostly useful for debugging
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DebugFlags: u32 {
        /// Compose every layer in software
        const DISABLE_PLANES = 0b001;
        /// Never switch outputs into an HDR mode
        const DISABLE_HDR    = 0b010;
        /// Never arm idle or self-refresh timers
        const DISABLE_IDLE   = 0b100;
    }
}

/// Operator override of the HDR decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HdrPolicy {
    /// Decide per frame from content and output capabilities
    #[default]
    Auto,
    /// Always output SDR, HDR content is tone-mapped in software
    ForceSdr,
    /// Output HDR whenever HDR content is visible and the sink supports it
    ForceHdr,
}

/// HDR heuristics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HdrConfig {
    /// Override of the automatic decision
    pub policy: HdrPolicy,
    /// HDR layers covering less than this fraction of the output are candidates for demotion
    pub min_screen_ratio: f32,
    /// HDR layers covering less than this fraction of their source area are candidates for demotion
    pub min_source_ratio: f32,
    /// Candidates are only demoted if they are down-scaled at least by this factor
    pub min_downscale: f32,
    /// Whether the external metadata parser may be used for metadata-driven HDR
    pub metadata_parser: bool,
}

impl Default for HdrConfig {
    fn default() -> Self {
        HdrConfig {
            policy: HdrPolicy::Auto,
            min_screen_ratio: 0.5,
            min_source_ratio: 0.25,
            min_downscale: 4.0,
            metadata_parser: true,
        }
    }
}

/// Static-screen and self-refresh timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleConfig {
    /// Time without frames after which a static screen drops to the idle refresh rate
    ///
    /// `None` disables the idle optimization.
    pub timeout: Option<Duration>,
    /// Refresh rate requested while idle
    pub idle_refresh_hz: u32,
    /// Period of invalidates for self-refreshing content
    pub self_refresh_interval: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        IdleConfig {
            timeout: Some(Duration::from_millis(100)),
            idle_refresh_hz: 1,
            self_refresh_interval: Duration::from_millis(33),
        }
    }
}

/// Virtual display capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritebackConfig {
    /// Number of finished frames kept for consumers
    pub ring_size: usize,
    /// Largest virtual display the engine accepts
    pub max_size: Size<i32, Physical>,
    /// Format of writeback buffers
    pub format: Fourcc,
    /// Bound on waiting for a finished frame before handing it out
    pub output_wait: Duration,
}

impl Default for WritebackConfig {
    fn default() -> Self {
        WritebackConfig {
            ring_size: 3,
            max_size: (7680, 4320).into(),
            format: Fourcc::Xbgr8888,
            output_wait: Duration::from_millis(100),
        }
    }
}

/// Configuration of the composition engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Expose all usable modes of a sink instead of only its best one
    pub mode_switching: bool,
    /// HDR heuristics
    pub hdr: HdrConfig,
    /// Static-screen and self-refresh timers
    pub idle: IdleConfig,
    /// Number of buffer imports cached per layer
    pub buffer_cache_size: usize,
    /// Virtual display capture
    pub writeback: WritebackConfig,
    /// Number of frames allowed in flight per display
    pub retire_queue_depth: usize,
    /// Bound on waiting for the oldest frame in flight
    pub retire_wait: Duration,
    /// How often a failed buffer import is retried within one frame
    pub import_retries: u32,
    /// Whether cursor layers may use cursor planes
    pub cursor_plane: bool,
    /// Debugging switches
    pub debug_flags: DebugFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            mode_switching: true,
            hdr: HdrConfig::default(),
            idle: IdleConfig::default(),
            buffer_cache_size: 32,
            writeback: WritebackConfig::default(),
            retire_queue_depth: 2,
            retire_wait: Duration::from_millis(100),
            import_retries: 1,
            cursor_plane: true,
            debug_flags: DebugFlags::empty(),
        }
    }
}
