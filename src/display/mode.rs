//! Display modes and the configuration list exposed to clients

use crate::utils::{Physical, Raw, Size};

bitflags::bitflags! {
    /// Properties of a mode
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ModeFlags: u32 {
        /// The sink prefers this mode
        const PREFERRED = 0b01;
        /// The mode is interlaced
        const INTERLACE = 0b10;
    }
}

/// A timing of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    /// Resolution in pixels
    pub size: Size<i32, Physical>,
    /// Refresh rate in mHz
    pub refresh: i32,
    /// Properties of the mode
    pub flags: ModeFlags,
}

impl DisplayMode {
    /// Create a new progressive mode
    pub fn new(size: impl Into<Size<i32, Physical>>, refresh: i32) -> Self {
        DisplayMode {
            size: size.into(),
            refresh,
            flags: ModeFlags::empty(),
        }
    }

    /// Mark this mode as preferred
    pub fn preferred(mut self) -> Self {
        self.flags |= ModeFlags::PREFERRED;
        self
    }

    /// Returns true if the sink prefers this mode
    pub fn is_preferred(&self) -> bool {
        self.flags.contains(ModeFlags::PREFERRED)
    }

    /// Returns true if the mode is interlaced
    pub fn is_interlaced(&self) -> bool {
        self.flags.contains(ModeFlags::INTERLACE)
    }

    /// Returns true if both modes have the same resolution and refresh rate
    pub fn same_timing(&self, other: &DisplayMode) -> bool {
        self.size == other.size && self.refresh == other.refresh
    }
}

/// Identifier of a [`DisplayConfig`], stable until the next reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigId(pub u32);

/// A configuration clients can select
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayConfig {
    /// Identifier to pass to `set_active_config`
    pub id: ConfigId,
    /// Underlying mode
    pub mode: DisplayMode,
    /// Dots per inch, horizontally and vertically, if the physical size is known
    pub dpi: Option<(f32, f32)>,
}

impl DisplayConfig {
    /// Resolution in pixels
    pub fn size(&self) -> Size<i32, Physical> {
        self.mode.size
    }

    /// Refresh rate in mHz
    pub fn refresh_mhz(&self) -> i32 {
        self.mode.refresh
    }
}

/// Pick the single best mode of a sink
///
/// The preferred mode wins, otherwise the largest one with the highest refresh rate.
pub fn best_mode(modes: &[DisplayMode]) -> Option<DisplayMode> {
    modes.iter().find(|m| m.is_preferred()).copied().or_else(|| {
        modes
            .iter()
            .filter(|m| !m.is_interlaced())
            .max_by(|a, b| {
                a.size
                    .area()
                    .total_cmp(&b.size.area())
                    .then(a.refresh.cmp(&b.refresh))
            })
            .or_else(|| modes.first())
            .copied()
    })
}

/// Filter the modes of a sink into the list exposed to clients
///
/// Interlaced modes and modes with an already listed timing are dropped, except for the
/// preferred mode and `previous`, which are always kept.
pub fn filter_modes(modes: &[DisplayMode], previous: Option<&DisplayMode>) -> Vec<DisplayMode> {
    let mut kept: Vec<DisplayMode> = Vec::with_capacity(modes.len());
    for mode in modes {
        let retained = mode.is_preferred() || previous == Some(mode);
        if mode.is_interlaced() && !retained {
            continue;
        }
        if let Some(existing) = kept.iter_mut().find(|k| k.same_timing(mode)) {
            if retained && !(existing.is_preferred() || previous == Some(&*existing)) {
                *existing = *mode;
            }
            continue;
        }
        kept.push(*mode);
    }
    kept
}

/// Build the configuration list of a sink
pub fn configs(
    modes: &[DisplayMode],
    switching: bool,
    previous: Option<&DisplayMode>,
    physical_size: Option<Size<u32, Raw>>,
) -> Vec<DisplayConfig> {
    let modes = if switching {
        filter_modes(modes, previous)
    } else {
        best_mode(modes).into_iter().collect()
    };
    modes
        .into_iter()
        .enumerate()
        .map(|(idx, mode)| DisplayConfig {
            id: ConfigId(idx as u32),
            mode,
            dpi: physical_size.and_then(|mm| dpi(mode.size, mm)),
        })
        .collect()
}

fn dpi(size: Size<i32, Physical>, mm: Size<u32, Raw>) -> Option<(f32, f32)> {
    if mm.is_empty() || size.is_empty() {
        return None;
    }
    Some((
        size.w as f32 * 25.4 / mm.w as f32,
        size.h as f32 * 25.4 / mm.h as f32,
    ))
}
