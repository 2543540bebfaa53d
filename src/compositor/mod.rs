//! Per-frame composition
//!
//! This module contains the decisions taken for every frame, [`planner`] assigns planes,
//! [`hdr`] picks the output mode and [`refresh`] handles static-screen optimizations.
//!
//! The [`Compositor`] is the serialized commit queue of a single timing engine. It turns
//! client buffers into framebuffers, submits commits and hands out release fences
//! following the frame-N-returns-frame-N-1 convention: the release fence returned for a
//! layer in frame *n* signals once the hardware stopped reading the buffer the layer
//! showed in frame *n-1*. The first frame of a layer gets an already signaled fence.

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info_span, instrument, trace, warn};

use crate::{
    backend::{
        driver::{BufferHandle, Commit, CrtcId, Driver, DriverError, FramebufferId},
        sync::Fence,
    },
    layer::{LayerHandle, RELEASE_HISTORY},
};

pub mod hdr;
pub mod planner;
pub mod refresh;

#[derive(Debug, Clone, Copy)]
struct CachedFramebuffer {
    framebuffer: FramebufferId,
    last_used: u64,
}

/// Serialized commit queue of one timing engine
#[derive(Debug)]
pub struct Compositor {
    crtc: CrtcId,
    driver: Arc<dyn Driver>,
    framebuffers: HashMap<BufferHandle, CachedFramebuffer>,
    last_completion: HashMap<LayerHandle, Fence>,
    sequence: u64,
    span: tracing::Span,
}

impl Compositor {
    /// Create a commit queue for `crtc`
    pub fn new(crtc: CrtcId, driver: Arc<dyn Driver>) -> Self {
        let span = info_span!(parent: None, "compositor", crtc = ?crtc);
        Compositor {
            crtc,
            driver,
            framebuffers: HashMap::new(),
            last_completion: HashMap::new(),
            sequence: 0,
            span,
        }
    }

    /// Timing engine this queue submits to
    pub fn crtc(&self) -> CrtcId {
        self.crtc
    }

    /// Number of commits submitted so far
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of framebuffers currently held
    pub fn framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Import `buffer`, retrying up to `retries` times
    ///
    /// Imports are memoized per buffer identity until the buffer was not used for a few
    /// commits.
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    #[profiling::function]
    pub fn import(&mut self, buffer: BufferHandle, retries: u32) -> Result<FramebufferId, DriverError> {
        if let Some(cached) = self.framebuffers.get_mut(&buffer) {
            cached.last_used = self.sequence;
            return Ok(cached.framebuffer);
        }

        let mut attempt = 0;
        let framebuffer = loop {
            match self.driver.import_buffer(buffer) {
                Ok(framebuffer) => break framebuffer,
                Err(err) if attempt < retries => {
                    debug!(?buffer, ?err, attempt, "Import failed, retrying");
                    attempt += 1;
                }
                Err(err) => {
                    warn!(?buffer, ?err, "Failed to import buffer");
                    return Err(err);
                }
            }
        };

        trace!(?buffer, ?framebuffer, "Imported buffer");
        self.framebuffers.insert(
            buffer,
            CachedFramebuffer {
                framebuffer,
                last_used: self.sequence,
            },
        );
        Ok(framebuffer)
    }

    /// Submit a plane commit, returning its completion fence
    #[instrument(level = "trace", parent = &self.span, skip_all)]
    #[profiling::function]
    pub fn submit(&mut self, commit: &Commit) -> Result<Fence, DriverError> {
        let fence = self.driver.commit(self.crtc, commit)?;
        self.submitted();
        Ok(fence)
    }

    /// Submit a full-screen framebuffer through the fallback path
    #[instrument(level = "trace", parent = &self.span, skip_all)]
    pub fn submit_fallback(&mut self, framebuffer: FramebufferId, acquire: &Fence) -> Result<Fence, DriverError> {
        let fence = self.driver.commit_fallback(self.crtc, framebuffer, acquire)?;
        self.submitted();
        Ok(fence)
    }

    fn submitted(&mut self) {
        self.sequence += 1;
        let sequence = self.sequence;
        let driver = &self.driver;
        self.framebuffers.retain(|buffer, cached| {
            let keep = cached.last_used + RELEASE_HISTORY as u64 >= sequence;
            if !keep {
                trace!(?buffer, framebuffer = ?cached.framebuffer, "Releasing stale framebuffer");
                driver.release_framebuffer(cached.framebuffer);
            }
            keep
        });
    }

    /// Release fences for the frame that completes with `completion`
    ///
    /// `layers` are the hardware layers of the frame. Every returned fence signals once the
    /// previous hardware frame of that layer completed, layers new to the hardware get an
    /// already signaled fence. Layers that were scanned out before but not anymore are
    /// appended, their last buffer is released with their previous frame.
    pub fn release_fences(&mut self, layers: &[LayerHandle], completion: &Fence) -> Vec<(LayerHandle, Fence)> {
        let mut previous = std::mem::take(&mut self.last_completion);
        let mut releases: Vec<(LayerHandle, Fence)> = layers
            .iter()
            .map(|layer| {
                let release = previous.remove(layer).unwrap_or_else(Fence::signaled);
                self.last_completion.insert(*layer, completion.clone());
                (*layer, release)
            })
            .collect();

        let mut left: Vec<(LayerHandle, Fence)> = previous.into_iter().collect();
        left.sort_by_key(|(layer, _)| *layer);
        releases.extend(left);
        releases
    }

    /// Forget a destroyed layer
    pub fn forget_layer(&mut self, layer: LayerHandle) {
        self.last_completion.remove(&layer);
    }

    /// Forget the hardware state of all layers, e.g. after powering off
    pub fn reset_layers(&mut self) {
        self.last_completion.clear();
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        for (_, cached) in self.framebuffers.drain() {
            self.driver.release_framebuffer(cached.framebuffer);
        }
    }
}
