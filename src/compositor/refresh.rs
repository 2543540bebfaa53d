//! Static-screen and self-refresh optimizations
//!
//! After every validated frame the content is classified. Frames without video,
//! accelerator-processed or stream content arm an idle timer; if it fires before the next
//! frame, the display drops to a low refresh rate. Accelerator content that had to be
//! composed in software arms a periodic invalidate instead, so it keeps animating
//! without the client driving full-rate commits.

use std::time::Duration;

use tracing::{debug, trace};

use crate::{
    config::{DebugFlags, EngineConfig},
    device::{
        alarm::{AlarmKey, AlarmKind, Alarms},
        DisplayHandle,
    },
    layer::CompositionKind,
    utils::{Physical, Size},
};

/// Properties of a layer relevant for refresh decisions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshCandidate {
    /// Content is video
    pub video: bool,
    /// Content passes through an accelerator
    pub accelerated: bool,
    /// Content comes from a side-channel stream
    pub sideband: bool,
    /// Source area in buffer pixels
    pub src_area: f64,
    /// Validated composition kind
    pub composition: CompositionKind,
}

/// Classification of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshClass {
    /// The frame may drop to the idle refresh rate once nothing changes
    pub idle_eligible: bool,
    /// The frame contains content that needs periodic invalidates
    pub self_refresh: bool,
}

/// Classify a frame
pub fn classify(layers: &[RefreshCandidate], output: Size<i32, Physical>) -> RefreshClass {
    let output_area = output.area();
    let idle_eligible = layers.iter().all(|layer| {
        !layer.video && !layer.accelerated && !layer.sideband && layer.src_area <= output_area
    });
    let self_refresh = layers
        .iter()
        .any(|layer| layer.accelerated && layer.composition == CompositionKind::Software);
    RefreshClass {
        idle_eligible,
        self_refresh,
    }
}

/// Timer state of one display
#[derive(Debug, Default)]
pub struct RefreshState {
    generation: u64,
    idle: bool,
    self_refresh: bool,
}

impl RefreshState {
    /// Returns true if the display currently runs at the idle refresh rate
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Returns true if periodic invalidates are active
    pub fn is_self_refreshing(&self) -> bool {
        self.self_refresh
    }

    /// Generation of the last frame, alarms of older generations are stale
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record a new frame and re-arm the timers for its classification
    pub(crate) fn frame(
        &mut self,
        display: DisplayHandle,
        class: RefreshClass,
        config: &EngineConfig,
        alarms: &Alarms,
    ) {
        self.generation += 1;
        if self.idle {
            debug!("Leaving idle refresh");
            self.idle = false;
        }

        let disabled = config.debug_flags.contains(DebugFlags::DISABLE_IDLE);
        let idle_key = AlarmKey {
            display,
            kind: AlarmKind::Idle,
        };
        match config.idle.timeout {
            Some(timeout) if class.idle_eligible && !disabled => {
                trace!(generation = self.generation, ?timeout, "Arming idle timer");
                alarms.arm(idle_key, timeout, self.generation);
            }
            _ => alarms.cancel(idle_key),
        }

        let refresh_key = AlarmKey {
            display,
            kind: AlarmKind::SelfRefresh,
        };
        let self_refresh = class.self_refresh && !disabled;
        if self_refresh && !self.self_refresh {
            debug!(interval = ?config.idle.self_refresh_interval, "Starting self-refresh");
            alarms.arm(refresh_key, config.idle.self_refresh_interval, 0);
        } else if !self_refresh && self.self_refresh {
            debug!("Stopping self-refresh");
            alarms.cancel(refresh_key);
        }
        self.self_refresh = self_refresh;
    }

    /// Handle an expired idle timer
    ///
    /// Returns true if the display entered idle refresh.
    pub(crate) fn idle_expired(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.idle {
            trace!(generation, current = self.generation, "Ignoring stale idle timer");
            return false;
        }
        self.idle = true;
        true
    }

    /// Handle an expired self-refresh timer, re-arming it while still needed
    ///
    /// Returns true if an invalidate should be sent.
    pub(crate) fn self_refresh_expired(&mut self, display: DisplayHandle, interval: Duration, alarms: &Alarms) -> bool {
        if !self.self_refresh {
            return false;
        }
        alarms.arm(
            AlarmKey {
                display,
                kind: AlarmKind::SelfRefresh,
            },
            interval,
            0,
        );
        true
    }

    /// Stop all timers, e.g. when the display is powered off
    pub(crate) fn stop(&mut self, display: DisplayHandle, alarms: &Alarms) {
        self.generation += 1;
        self.idle = false;
        self.self_refresh = false;
        for kind in [AlarmKind::Idle, AlarmKind::SelfRefresh] {
            alarms.cancel(AlarmKey { display, kind });
        }
    }
}
