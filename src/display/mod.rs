//! Displays and their lifecycle
//!
//! A [`Display`] is either backed by a physical connector or virtual, capturing its
//! output into memory (see [`writeback`]). Physical displays move through
//!
//! ```text
//! Uninitialized -> Ready <-> Disconnected
//! ```
//!
//! driven by hotplug events. Commands sent to a display that is not ready are accepted
//! and ignored, power mode changes are replayed once the display becomes ready.
//!
//! Every frame follows the same cycle: [`Display::validate`] assigns planes,
//! [`Display::accept_changes`] makes the staged layer state current and
//! [`Display::present`] submits the frame.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, info, info_span, instrument, trace, warn};

use crate::{
    backend::{
        allocator::{Format, Fourcc, Modifier},
        driver::{
            BufferHandle, Commit, ConnectorId, ConnectorInfo, CrtcId, Driver, DriverError, PlaneCommit,
            PlaneSource, RenderLayer, VblankEvent,
        },
        sync::Fence,
    },
    compositor::{
        hdr::{self, HdrCandidate, HdrCapabilities, HdrMode},
        planner::{CompositionPlan, PlanCandidate, PlanError, Planner},
        refresh::{self, RefreshCandidate, RefreshState},
        Compositor,
    },
    config::{DebugFlags, EngineConfig},
    device::{
        alarm::{AlarmKind, Alarms},
        DisplayHandle,
    },
    error::{Error, ValidateStatus},
    layer::{BlendMode, CompositionKind, Layer, LayerHandle},
    plane::{PlaneClaimStorage, PlaneGroupClaim, PlaneGroupId, PlaneType, Planes},
    utils::{Buffer as BufferCoords, Physical, Rectangle, Size, Transform},
};

pub mod mode;
pub mod writeback;

use mode::{ConfigId, DisplayConfig, DisplayMode};
use writeback::{Writeback, WritebackFrame, WritebackPath};

/// Formats the frame-buffer-target may use, in order of preference
const TARGET_FORMATS: [Fourcc; 4] = [
    Fourcc::Argb8888,
    Fourcc::Abgr8888,
    Fourcc::Xrgb8888,
    Fourcc::Xbgr8888,
];

/// What backs a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayKind {
    /// A physical connector
    Physical {
        /// The connector
        connector: ConnectorId,
    },
    /// Output captured into memory
    Virtual,
}

/// Connection state of a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, but never connected
    Uninitialized,
    /// Connected and configured
    Ready,
    /// The sink went away
    Disconnected,
}

/// Power mode of a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PowerMode {
    /// Display resources are released
    #[default]
    Off,
    /// Display is scanning out
    On,
    /// Low power mode, not supported
    Doze,
    /// Low power mode without updates, not supported
    DozeSuspend,
}

/// Outcome of [`Display::present`]
#[derive(Debug, Clone)]
pub struct PresentResult {
    /// Number of the presented frame, `None` if nothing was presented
    pub frame: Option<u64>,
    /// Release fences of the layers scanned out by hardware
    pub release_fences: Vec<(LayerHandle, Fence)>,
    /// Signaled once the frame and everything it replaced completed
    pub retire: Fence,
    /// The frame had to be composed entirely in software
    pub degraded: bool,
}

impl PresentResult {
    fn noop() -> Self {
        PresentResult {
            frame: None,
            release_fences: Vec::new(),
            retire: Fence::signaled(),
            degraded: false,
        }
    }
}

/// State shared by all displays of a device
#[derive(Debug, Clone)]
pub(crate) struct DisplayContext {
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) config: EngineConfig,
    pub(crate) planes: Arc<Planes>,
    pub(crate) claims: PlaneClaimStorage,
    pub(crate) alarms: Alarms,
}

/// Composition state of one output
#[derive(Debug)]
pub struct Display {
    handle: DisplayHandle,
    kind: DisplayKind,
    name: String,
    span: tracing::Span,
    ctx: DisplayContext,

    state: ConnectionState,
    power: PowerMode,
    pending_power: Option<PowerMode>,
    crtc: Option<CrtcId>,
    compositor: Option<Compositor>,
    claims: Vec<PlaneGroupClaim>,

    configs: Vec<DisplayConfig>,
    active_config: Option<ConfigId>,
    mode_pending: bool,
    hdr_caps: HdrCapabilities,
    hdr_mode: HdrMode,
    pending_hdr: HdrMode,
    hdr_demoted: SmallVec<[LayerHandle; 2]>,

    layers: IndexMap<LayerHandle, Layer>,
    next_layer: u32,
    target: Layer,
    target_format: Format,
    client_target_fresh: bool,

    plan: Option<CompositionPlan>,
    plan_failed: bool,
    validated: bool,
    accepted: bool,

    frame_counter: u64,
    retire_fences: VecDeque<Fence>,
    refresh: RefreshState,
    writeback: Option<Writeback>,
    vsync_enabled: bool,
    last_vsync: Option<Duration>,
}

fn to_buffer_size(size: Size<i32, Physical>) -> Size<f64, BufferCoords> {
    (size.w as f64, size.h as f64).into()
}

/// Pick the format of the frame-buffer-target from what the planes of `crtc` scan out
fn target_format(planes: &Planes, crtc: CrtcId) -> Format {
    let groups: Vec<PlaneGroupId> = planes.groups_for(crtc).map(|g| g.id).collect();
    let supported: Vec<&Format> = planes
        .planes_in(&groups)
        .filter(|p| p.kind != PlaneType::Cursor)
        .flat_map(|p| p.caps.formats.iter())
        .collect();
    TARGET_FORMATS
        .iter()
        .map(|code| Format {
            code: *code,
            modifier: Modifier::Linear,
        })
        .find(|format| supported.contains(&format))
        .unwrap_or(Format {
            code: Fourcc::Argb8888,
            modifier: Modifier::Linear,
        })
}

/// Describe a layer for the planner
fn plan_candidate(layer: &mut Layer, driver: &dyn Driver, force_software: bool) -> PlanCandidate {
    let handle = layer.handle();
    let force_software = force_software || layer.is_demoted();
    let state = layer.staged();
    let (requested, frame, transform, sideband) = (state.requested, state.frame, state.transform, state.sideband);

    if requested == CompositionKind::Sideband {
        return match sideband {
            Some(_) => PlanCandidate {
                layer: handle,
                requested,
                force_software,
                format: None,
                src: to_buffer_size(frame.size),
                dst: frame,
                transform,
            },
            None => PlanCandidate::software(handle, requested, frame),
        };
    }

    match layer.effective_buffer(driver) {
        Some(buffer) => PlanCandidate {
            layer: handle,
            requested,
            force_software,
            format: Some(buffer.format),
            src: buffer.crop.size,
            dst: frame,
            transform,
        },
        None => PlanCandidate::software(handle, requested, frame),
    }
}

impl Display {
    fn new(handle: DisplayHandle, kind: DisplayKind, name: String, ctx: DisplayContext) -> Self {
        let span = info_span!(parent: None, "display", id = handle.raw(), name = %name);
        let cache_size = ctx.config.buffer_cache_size;
        Display {
            handle,
            kind,
            name,
            span,
            ctx,
            state: ConnectionState::Uninitialized,
            power: PowerMode::Off,
            pending_power: None,
            crtc: None,
            compositor: None,
            claims: Vec::new(),
            configs: Vec::new(),
            active_config: None,
            mode_pending: false,
            hdr_caps: HdrCapabilities::default(),
            hdr_mode: HdrMode::Sdr,
            pending_hdr: HdrMode::Sdr,
            hdr_demoted: SmallVec::new(),
            layers: IndexMap::new(),
            next_layer: 0,
            target: Layer::new(LayerHandle::CLIENT_TARGET, cache_size),
            target_format: Format {
                code: Fourcc::Argb8888,
                modifier: Modifier::Linear,
            },
            client_target_fresh: false,
            plan: None,
            plan_failed: false,
            validated: false,
            accepted: false,
            frame_counter: 0,
            retire_fences: VecDeque::new(),
            refresh: RefreshState::default(),
            writeback: None,
            vsync_enabled: false,
            last_vsync: None,
        }
    }

    pub(crate) fn new_physical(handle: DisplayHandle, connector: &ConnectorInfo, ctx: DisplayContext) -> Self {
        Display::new(
            handle,
            DisplayKind::Physical {
                connector: connector.id,
            },
            connector.name.clone(),
            ctx,
        )
    }

    pub(crate) fn new_virtual(
        handle: DisplayHandle,
        size: Size<i32, Physical>,
        format: Fourcc,
        path: WritebackPath,
        ctx: DisplayContext,
    ) -> Result<Self, Error> {
        let mut display = Display::new(handle, DisplayKind::Virtual, format!("virtual-{}", handle.raw()), ctx);
        let span = display.span.clone();
        let _guard = span.enter();

        display.configs = vec![DisplayConfig {
            id: ConfigId(0),
            mode: DisplayMode::new(size, 60_000).preferred(),
            dpi: None,
        }];
        display.active_config = Some(ConfigId(0));

        let writeback = Writeback::new(
            display.ctx.driver.clone(),
            path,
            (size.w, size.h).into(),
            format,
            display.ctx.config.writeback.ring_size,
        )
        .map_err(|err| {
            warn!(?err, "Failed to allocate writeback buffers");
            Error::NoResources
        })?;
        display.writeback = Some(writeback);

        if let WritebackPath::Hardware(crtc) = path {
            display.attach_crtc(crtc);
        }
        display.state = ConnectionState::Ready;
        display.power_on()?;
        info!(?size, ?path, "Virtual display created");
        Ok(display)
    }

    /// Handle of this display
    pub fn handle(&self) -> DisplayHandle {
        self.handle
    }

    /// What backs this display
    pub fn kind(&self) -> DisplayKind {
        self.kind
    }

    /// Name of the connector, or a generated name for virtual displays
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true if the display is connected and configured
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Current power mode
    pub fn power_mode(&self) -> PowerMode {
        self.power
    }

    /// Timing engine driving this display
    pub fn crtc(&self) -> Option<CrtcId> {
        self.crtc
    }

    /// Number of the next frame
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// HDR mode of the last presented frame
    pub fn hdr_mode(&self) -> HdrMode {
        self.hdr_mode
    }

    /// Static-screen state
    pub fn refresh_state(&self) -> &RefreshState {
        &self.refresh
    }

    /// Result of the last validation
    pub fn composition_plan(&self) -> Option<&CompositionPlan> {
        self.plan.as_ref()
    }

    /// Plane groups currently held by this display
    pub fn plane_groups(&self) -> Vec<PlaneGroupId> {
        self.claims.iter().map(|c| c.group()).collect()
    }

    /// Writeback state of a virtual display
    pub fn writeback(&self) -> Option<&Writeback> {
        self.writeback.as_ref()
    }

    /// Format the frame-buffer-target is expected in
    pub fn target_format(&self) -> Format {
        self.target_format
    }

    fn is_active(&self) -> bool {
        self.state == ConnectionState::Ready && self.power == PowerMode::On
    }

    fn output_size(&self) -> Size<i32, Physical> {
        self.active_mode().map(|m| m.size).unwrap_or_default()
    }

    fn active_mode(&self) -> Option<DisplayMode> {
        let id = self.active_config?;
        self.configs.iter().find(|c| c.id == id).map(|c| c.mode)
    }

    fn attach_crtc(&mut self, crtc: CrtcId) {
        if self.crtc != Some(crtc) || self.compositor.is_none() {
            self.crtc = Some(crtc);
            self.compositor = Some(Compositor::new(crtc, self.ctx.driver.clone()));
            self.target_format = target_format(&self.ctx.planes, crtc);
        }
    }

    fn acquire_plane_groups(&mut self) {
        let Some(crtc) = self.crtc else {
            return;
        };
        let planes = self.ctx.planes.clone();
        for group in planes.groups_for(crtc) {
            if self.claims.iter().any(|c| c.group() == group.id) {
                continue;
            }
            match self.ctx.claims.claim(group.id, crtc) {
                Some(claim) => {
                    trace!(group = ?group.id, "Acquired plane group");
                    self.claims.push(claim);
                }
                None => trace!(group = ?group.id, holder = ?self.ctx.claims.holder(group.id), "Plane group is in use"),
            }
        }
    }

    // lifecycle

    /// Connect to a sink driven by `crtc`
    pub(crate) fn connect(&mut self, info: &ConnectorInfo, crtc: CrtcId) -> Result<(), Error> {
        let span = self.span.clone();
        let _guard = span.enter();

        let previous = self.active_mode();
        let configs = mode::configs(
            &info.modes,
            self.ctx.config.mode_switching,
            previous.as_ref(),
            info.physical_size,
        );
        if configs.is_empty() {
            warn!(connector = %info.name, "Sink advertises no usable mode");
            return Err(Error::BadConfig("sink advertises no usable mode"));
        }

        let active = previous
            .and_then(|previous| configs.iter().find(|c| c.mode.same_timing(&previous)))
            .or_else(|| {
                mode::best_mode(&info.modes).and_then(|best| configs.iter().find(|c| c.mode.same_timing(&best)))
            })
            .unwrap_or(&configs[0])
            .id;
        self.configs = configs;
        self.active_config = Some(active);
        self.mode_pending = false;
        self.hdr_caps = info.hdr;
        self.name = info.name.clone();
        self.attach_crtc(crtc);
        self.state = ConnectionState::Ready;
        info!(connector = %info.name, ?crtc, mode = ?self.active_mode(), "Display connected");

        let power = self.pending_power.take().unwrap_or(self.power);
        self.power = PowerMode::Off;
        if power == PowerMode::On {
            self.power_on()?;
        }
        Ok(())
    }

    /// Release all hardware resources and clear all layers
    ///
    /// The power mode and active configuration are kept for the next connect.
    pub(crate) fn disconnect(&mut self) {
        let span = self.span.clone();
        let _guard = span.enter();

        if self.state == ConnectionState::Ready {
            self.refresh.stop(self.handle, &self.ctx.alarms);
            self.claims.clear();
            if let (DisplayKind::Physical { .. }, Some(crtc), PowerMode::On) = (self.kind, self.crtc, self.power) {
                if let Err(err) = self.ctx.driver.unbind(crtc) {
                    warn!(?err, "Failed to unbind display resources");
                }
            }
            info!("Display disconnected");
        }

        self.compositor = None;
        self.crtc = None;
        self.layers.clear();
        self.target = Layer::new(LayerHandle::CLIENT_TARGET, self.ctx.config.buffer_cache_size);
        self.client_target_fresh = false;
        self.plan = None;
        self.plan_failed = false;
        self.validated = false;
        self.accepted = false;
        self.retire_fences.clear();
        self.last_vsync = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Change the power mode
    ///
    /// Doze modes are rejected with [`Error::Unsupported`]. Requests for a display that
    /// is not ready are deferred until it is.
    pub fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), Error> {
        let span = self.span.clone();
        let _guard = span.enter();

        if matches!(mode, PowerMode::Doze | PowerMode::DozeSuspend) {
            return Err(Error::Unsupported("doze power modes"));
        }
        if self.state != ConnectionState::Ready {
            debug!(?mode, "Display is not ready, deferring power mode");
            self.pending_power = Some(mode);
            return Ok(());
        }
        if self.power == mode {
            return Ok(());
        }

        if mode == PowerMode::On {
            self.power_on()
        } else {
            self.power_off();
            Ok(())
        }
    }

    fn power_on(&mut self) -> Result<(), Error> {
        self.acquire_plane_groups();
        if let (DisplayKind::Physical { connector }, Some(crtc)) = (self.kind, self.crtc) {
            let mode = self.active_mode().ok_or(Error::BadConfig("no active configuration"))?;
            if let Err(err) = self.ctx.driver.bind(crtc, connector, &mode) {
                warn!(?err, "Failed to bind display resources");
                self.claims.clear();
                return Err(Error::NoResources);
            }
        }
        self.power = PowerMode::On;
        info!("Display powered on");
        Ok(())
    }

    fn power_off(&mut self) {
        self.refresh.stop(self.handle, &self.ctx.alarms);
        self.claims.clear();
        if let (DisplayKind::Physical { .. }, Some(crtc)) = (self.kind, self.crtc) {
            if let Err(err) = self.ctx.driver.unbind(crtc) {
                warn!(?err, "Failed to unbind display resources");
            }
        }
        if let Some(compositor) = self.compositor.as_mut() {
            compositor.reset_layers();
        }
        self.plan = None;
        self.validated = false;
        self.accepted = false;
        self.retire_fences.clear();
        self.power = PowerMode::Off;
        info!("Display powered off");
    }

    // configurations

    /// Configurations clients can choose from
    pub fn display_configs(&self) -> &[DisplayConfig] {
        &self.configs
    }

    /// The active configuration
    pub fn active_config(&self) -> Option<DisplayConfig> {
        let id = self.active_config?;
        self.configs.iter().find(|c| c.id == id).copied()
    }

    /// Select a configuration, applied with the next presented frame
    pub fn set_active_config(&mut self, id: ConfigId) -> Result<(), Error> {
        if self.state != ConnectionState::Ready {
            debug!(?id, "Display is not ready, ignoring configuration change");
            return Ok(());
        }
        if !self.configs.iter().any(|c| c.id == id) {
            return Err(Error::BadConfig("unknown configuration"));
        }
        if self.active_config != Some(id) {
            let _guard = self.span.enter();
            debug!(?id, "Switching configuration with the next frame");
            self.active_config = Some(id);
            self.mode_pending = true;
            self.validated = false;
        }
        Ok(())
    }

    /// Enable or disable vsync callbacks
    pub fn set_vsync_enabled(&mut self, enabled: bool) {
        self.vsync_enabled = enabled;
    }

    // layers

    /// Create a new layer
    pub fn create_layer(&mut self) -> LayerHandle {
        let handle = LayerHandle::from_raw(self.next_layer);
        self.next_layer = self.next_layer.wrapping_add(1);
        self.layers
            .insert(handle, Layer::new(handle, self.ctx.config.buffer_cache_size));
        self.validated = false;
        handle
    }

    /// Destroy a layer
    ///
    /// Layers of a display that is not ready are already gone, destroying them succeeds.
    pub fn destroy_layer(&mut self, handle: LayerHandle) -> Result<(), Error> {
        if !self.is_ready() {
            debug!(layer = ?handle, "Display is not ready, layer is already gone");
            return Ok(());
        }
        self.layers
            .shift_remove(&handle)
            .ok_or(Error::BadLayer(Some(handle)))?;
        if let Some(compositor) = self.compositor.as_mut() {
            compositor.forget_layer(handle);
        }
        self.validated = false;
        Ok(())
    }

    /// Access a layer
    pub fn layer(&self, handle: LayerHandle) -> Result<&Layer, Error> {
        self.layers.get(&handle).ok_or(Error::BadLayer(Some(handle)))
    }

    /// Modify a layer, the next present will validate again
    pub fn layer_mut(&mut self, handle: LayerHandle) -> Result<&mut Layer, Error> {
        self.validated = false;
        self.layers.get_mut(&handle).ok_or(Error::BadLayer(Some(handle)))
    }

    /// All layers in creation order
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    /// Layers in paint order
    ///
    /// Ascending z, layers with the same z are painted in creation order.
    pub fn paint_order(&self) -> Vec<LayerHandle> {
        let mut order: Vec<(i32, usize, LayerHandle)> = self
            .layers
            .values()
            .enumerate()
            .map(|(idx, layer)| (layer.staged().z, idx, layer.handle()))
            .collect();
        order.sort_by_key(|(z, idx, _)| (*z, *idx));
        order.into_iter().map(|(_, _, handle)| handle).collect()
    }

    /// Supply the software composed frame-buffer-target for the next frame
    pub fn set_client_target(&mut self, buffer: BufferHandle, acquire: Fence) {
        self.target.set_buffer(Some(buffer), acquire);
        self.client_target_fresh = true;
    }

    // frame cycle

    fn planner(&self) -> Planner {
        Planner {
            cursor_planes: self.ctx.config.cursor_plane,
            disabled: self.ctx.config.debug_flags.contains(DebugFlags::DISABLE_PLANES),
        }
    }

    fn target_candidate(&self) -> PlanCandidate {
        let output = self.output_size();
        PlanCandidate {
            layer: LayerHandle::CLIENT_TARGET,
            requested: CompositionKind::Plane,
            force_software: false,
            format: Some(self.target_format),
            src: to_buffer_size(output),
            dst: Rectangle::from_size(output),
            transform: Transform::Normal,
        }
    }

    fn candidates(&mut self, order: &[LayerHandle]) -> Vec<PlanCandidate> {
        let driver = self.ctx.driver.clone();
        let hdr_demoted = &self.hdr_demoted;
        let layers = &mut self.layers;
        order
            .iter()
            .filter_map(|handle| {
                let layer = layers.get_mut(handle)?;
                Some(plan_candidate(layer, &*driver, hdr_demoted.contains(handle)))
            })
            .collect()
    }

    /// Run the planner, falling back to an all-software plan if the target finds no plane
    fn run_planner(&mut self, order: &[LayerHandle]) -> (CompositionPlan, bool) {
        let candidates = self.candidates(order);
        if self.crtc.is_none() {
            // captured by the accelerator, there are no planes
            return (CompositionPlan::all_software(order.iter().copied()), false);
        }

        let groups = self.plane_groups();
        match self
            .planner()
            .plan(&candidates, &self.target_candidate(), &self.ctx.planes, &groups)
        {
            Ok(plan) => (plan, false),
            Err(PlanError::NoTargetPlane { software }) => {
                warn!(
                    layers = software.len(),
                    "No plane left for the frame-buffer-target, composing everything in software"
                );
                (CompositionPlan::all_software(software), true)
            }
        }
    }

    fn hdr_decision(&mut self, order: &[LayerHandle], output: Size<i32, Physical>) -> hdr::HdrDecision {
        let driver = self.ctx.driver.clone();
        let candidates: Vec<HdrCandidate> = order
            .iter()
            .filter_map(|handle| {
                let layer = self.layers.get_mut(handle)?;
                if !layer.staged().is_hdr() {
                    return None;
                }
                let frame = layer.staged().frame;
                let src = layer
                    .effective_buffer(&*driver)
                    .map(|buffer| buffer.crop.size)
                    .unwrap_or_else(|| to_buffer_size(frame.size));
                let state = layer.staged();
                Some(HdrCandidate {
                    layer: *handle,
                    color_space: state.color_space,
                    metadata: state.hdr_metadata,
                    src,
                    dst: frame.size,
                })
            })
            .collect();

        let caps = if self.ctx.config.debug_flags.contains(DebugFlags::DISABLE_HDR) {
            HdrCapabilities::default()
        } else {
            self.hdr_caps
        };
        hdr::decide(
            &caps,
            &self.ctx.config.hdr,
            driver.has_metadata_parser(),
            &candidates,
            output,
        )
    }

    fn classify_refresh(&mut self, order: &[LayerHandle], output: Size<i32, Physical>) {
        let driver = self.ctx.driver.clone();
        let candidates: Vec<RefreshCandidate> = order
            .iter()
            .filter_map(|handle| {
                let layer = self.layers.get_mut(handle)?;
                let video = layer.buffer_info(&*driver).map(|i| i.is_video()).unwrap_or(false);
                let src_area = layer
                    .effective_buffer(&*driver)
                    .map(|buffer| buffer.crop.size.area())
                    .unwrap_or(0.0);
                let state = layer.staged();
                Some(RefreshCandidate {
                    video,
                    accelerated: state.accelerator.is_some(),
                    sideband: state.requested == CompositionKind::Sideband || state.sideband.is_some(),
                    src_area,
                    composition: layer.validated().unwrap_or(CompositionKind::Software),
                })
            })
            .collect();
        let class = refresh::classify(&candidates, output);
        trace!(?class, "Frame classified");
        self.refresh
            .frame(self.handle, class, &self.ctx.config, &self.ctx.alarms);
    }

    /// Assign planes to the staged layers
    ///
    /// Returns the number of layers whose composition kind differs from the requested
    /// one. If the frame-buffer-target cannot be placed on any plane, every layer is
    /// composed in software, [`Error::BadConfig`] is returned and the frame can still be
    /// presented through the fallback path.
    #[profiling::function]
    pub fn validate(&mut self) -> Result<ValidateStatus, Error> {
        let span = self.span.clone();
        let _guard = span.enter();

        if !self.is_active() {
            trace!("Display is not active, skipping validation");
            return Ok(ValidateStatus::None);
        }
        if self.layers.is_empty() {
            return Err(Error::BadLayer(None));
        }

        self.acquire_plane_groups();
        for layer in self.layers.values_mut() {
            layer.clear_demotion();
        }

        let order = self.paint_order();
        let output = self.output_size();

        let decision = self.hdr_decision(&order, output);
        self.hdr_demoted = decision.demoted;
        self.pending_hdr = decision.mode;

        let (plan, failed) = self.run_planner(&order);
        let mut changed = 0;
        for (handle, layer) in self.layers.iter_mut() {
            let kind = plan.kind_of(*handle).unwrap_or(CompositionKind::Software);
            layer.set_validated(kind);
            if kind != layer.staged().requested {
                trace!(layer = ?handle, requested = ?layer.staged().requested, validated = ?kind, "Composition changed");
                changed += 1;
            }
        }
        debug!(
            hardware = plan.assignments.len(),
            software = plan.software.len(),
            target = ?plan.target,
            changed,
            "Validated frame"
        );

        self.plan = Some(plan);
        self.plan_failed = failed;
        self.validated = true;
        self.accepted = false;
        self.classify_refresh(&order, output);

        if failed {
            return Err(Error::BadConfig("no plane for the frame-buffer-target"));
        }
        Ok(if changed == 0 {
            ValidateStatus::None
        } else {
            ValidateStatus::HasChanges { changed }
        })
    }

    /// Layers whose validated composition kind differs from the requested one
    pub fn changed_composition_types(&self) -> Vec<(LayerHandle, CompositionKind)> {
        self.layers
            .values()
            .filter_map(|layer| {
                let validated = layer.validated()?;
                (validated != layer.staged().requested).then_some((layer.handle(), validated))
            })
            .collect()
    }

    /// Adopt the validated composition kinds and make the staged layer state current
    pub fn accept_changes(&mut self) -> Result<(), Error> {
        if !self.is_active() {
            return Ok(());
        }
        if !self.validated {
            let _guard = self.span.enter();
            debug!("Accepting changes without a validated frame");
        }
        for layer in self.layers.values_mut() {
            layer.accept();
        }
        self.accepted = true;
        Ok(())
    }

    /// Submit the accepted frame
    ///
    /// Validates and accepts first if the client did not. Displays that are not ready or
    /// powered off present nothing and report success with `frame: None`.
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    #[profiling::function]
    pub fn present(&mut self) -> Result<PresentResult, Error> {
        if !self.is_active() {
            trace!("Display is not active, skipping present");
            return Ok(PresentResult::noop());
        }
        if self.layers.is_empty() {
            return Err(Error::BadLayer(None));
        }

        if !self.validated {
            match self.validate() {
                Ok(_) | Err(Error::BadConfig(_)) => {}
                Err(err) => return Err(err),
            }
            self.accept_changes()?;
        } else if !self.accepted {
            self.accept_changes()?;
        }
        self.target.accept();

        if self.retire_fences.len() >= self.ctx.config.retire_queue_depth.max(1) {
            if let Some(oldest) = self.retire_fences.pop_front() {
                if !oldest.wait(self.ctx.config.retire_wait) {
                    warn!("Frame in flight did not retire in time");
                }
            }
        }

        match self.compositor.take() {
            Some(mut compositor) => {
                let result = self.present_planes(&mut compositor);
                self.compositor = Some(compositor);
                result
            }
            None => self.present_captured(),
        }
    }

    /// Import the buffers of all assigned layers, demoting layers that fail
    fn import_assigned(
        &mut self,
        compositor: &mut Compositor,
        plan: &mut CompositionPlan,
    ) -> (Vec<(LayerHandle, PlaneSource)>, bool) {
        let retries = self.ctx.config.import_retries;
        let mut demoted_any = false;
        loop {
            let mut sources = Vec::with_capacity(plan.assignments.len());
            let mut demoted = Vec::new();
            for assignment in &plan.assignments {
                let Some(layer) = self.layers.get(&assignment.layer) else {
                    continue;
                };
                let state = layer.current();
                let source = match (assignment.kind, state.sideband, state.buffer) {
                    (CompositionKind::Sideband, Some(stream), _) => Ok(PlaneSource::Stream(stream)),
                    (_, _, Some(buffer)) => compositor
                        .import(buffer, retries)
                        .map(PlaneSource::Framebuffer),
                    _ => Err(DriverError::Access(String::from("layer has no content"))),
                };
                match source {
                    Ok(source) => sources.push((assignment.layer, source)),
                    Err(err) => {
                        debug!(layer = ?assignment.layer, ?err, "Demoting layer to software composition");
                        demoted.push(assignment.layer);
                    }
                }
            }

            if demoted.is_empty() {
                return (sources, demoted_any);
            }
            demoted_any = true;
            for handle in &demoted {
                if let Some(layer) = self.layers.get_mut(handle) {
                    layer.demote();
                }
            }

            let order = self.paint_order();
            let (replanned, failed) = self.run_planner(&order);
            for (handle, layer) in self.layers.iter_mut() {
                layer.adopt(replanned.kind_of(*handle).unwrap_or(CompositionKind::Software));
            }
            self.plan_failed = failed;
            *plan = replanned;
        }
    }

    fn render_layers(&mut self, layers: &[LayerHandle]) -> Vec<RenderLayer> {
        let driver = self.ctx.driver.clone();
        layers
            .iter()
            .filter_map(|handle| {
                let layer = self.layers.get_mut(handle)?;
                let src = layer.current_crop(&*driver);
                let state = layer.current();
                Some(RenderLayer {
                    buffer: state.buffer,
                    sideband: state.sideband,
                    src,
                    dst: state.frame,
                    transform: state.transform,
                    blend: state.blend,
                    acquire: state.acquire.clone(),
                })
            })
            .collect()
    }

    /// Content of the frame-buffer-target, the client's buffer if it is up to date
    fn compose_target(&mut self, software: &[LayerHandle], reuse_client: bool) -> Result<(BufferHandle, Fence), DriverError> {
        if reuse_client && self.client_target_fresh {
            if let Some(buffer) = self.target.current().buffer {
                return Ok((buffer, self.target.current().acquire.clone()));
            }
        }
        debug!(layers = software.len(), "Composing frame-buffer-target with the fallback renderer");
        let layers = self.render_layers(software);
        self.ctx
            .driver
            .render_fallback(self.output_size(), self.target_format.code, &layers)
    }

    fn build_commit(
        &mut self,
        plan: &CompositionPlan,
        sources: &[(LayerHandle, PlaneSource)],
        target: Option<(PlaneSource, Fence)>,
    ) -> Commit {
        let driver = self.ctx.driver.clone();
        let output = self.output_size();
        let order = self.paint_order();
        let mut planes = Vec::with_capacity(sources.len() + 1);
        let mut target = plan.target.zip(target);

        for handle in order {
            if let Some((_, source)) = sources.iter().find(|(layer, _)| *layer == handle) {
                let Some(assignment) = plan.assignments.iter().find(|a| a.layer == handle) else {
                    continue;
                };
                let Some(layer) = self.layers.get_mut(&handle) else {
                    continue;
                };
                let src = layer.current_crop(&*driver);
                let state = layer.current();
                planes.push(PlaneCommit {
                    plane: assignment.plane,
                    source: *source,
                    src,
                    dst: state.frame,
                    transform: state.transform,
                    blend: state.blend,
                    zpos: planes.len(),
                    acquire: state.acquire.clone(),
                });
            } else if plan.software.contains(&handle) {
                // the target takes the place of the lowest software layer
                if let Some((plane, (source, acquire))) = target.take() {
                    planes.push(PlaneCommit {
                        plane,
                        source,
                        src: Rectangle::from_size(to_buffer_size(output)),
                        dst: Rectangle::from_size(output),
                        transform: Transform::Normal,
                        blend: BlendMode::Premultiplied,
                        zpos: planes.len(),
                        acquire,
                    });
                }
            }
        }

        Commit {
            planes,
            mode: self.mode_pending.then(|| self.active_mode()).flatten(),
            hdr: self.pending_hdr,
            writeback: None,
        }
    }

    fn present_planes(&mut self, compositor: &mut Compositor) -> Result<PresentResult, Error> {
        let retries = self.ctx.config.import_retries;
        let mut plan = self.plan.clone().unwrap_or_default();
        let (sources, demoted) = self.import_assigned(compositor, &mut plan);

        // software layers the client composed are still the same unless layers were demoted
        let target = if plan.software.is_empty() {
            Ok(None)
        } else {
            self.compose_target(&plan.software, !demoted)
                .and_then(|(buffer, acquire)| {
                    compositor
                        .import(buffer, retries)
                        .map(|framebuffer| Some((framebuffer, acquire)))
                })
        };
        let target = match target {
            Ok(target) => target,
            Err(err) => {
                warn!(?err, "Failed to prepare the frame-buffer-target, composing the frame in software");
                let submitted = self.present_degraded(compositor);
                return self.complete_present(compositor, plan, submitted);
            }
        };

        let writeback_target = match self.writeback.as_mut() {
            Some(writeback) => {
                let buffer = writeback.begin_frame().map_err(Error::Driver)?;
                match compositor.import(buffer, retries) {
                    Ok(framebuffer) => Some(framebuffer),
                    Err(err) => {
                        writeback.abort_frame();
                        return Err(Error::Driver(err));
                    }
                }
            }
            None => None,
        };

        let submitted = if self.plan_failed {
            let Some((framebuffer, acquire)) = target.as_ref() else {
                self.abort_writeback();
                return Err(Error::BadConfig("no content for the fallback path"));
            };
            debug!("Presenting through the fallback path");
            compositor
                .submit_fallback(*framebuffer, acquire)
                .map(|fence| (fence, true))
        } else {
            let target_source = target
                .as_ref()
                .map(|(fb, acquire)| (PlaneSource::Framebuffer(*fb), acquire.clone()));
            let mut commit = self.build_commit(&plan, &sources, target_source);
            commit.writeback = writeback_target;
            match compositor.submit(&commit) {
                Ok(fence) => Ok((fence, false)),
                Err(err) => {
                    warn!(?err, "Commit failed, composing the frame in software");
                    self.present_degraded(compositor)
                }
            }
        };

        self.complete_present(compositor, plan, submitted)
    }

    fn complete_present(
        &mut self,
        compositor: &mut Compositor,
        plan: CompositionPlan,
        submitted: Result<(Fence, bool), DriverError>,
    ) -> Result<PresentResult, Error> {
        let (completion, degraded) = match submitted {
            Ok(result) => result,
            Err(err) => {
                warn!(?err, "Failed to present frame");
                self.abort_writeback();
                return Err(Error::NoResources);
            }
        };

        let hardware: Vec<LayerHandle> = if degraded {
            for layer in self.layers.values_mut() {
                layer.adopt(CompositionKind::Software);
            }
            Vec::new()
        } else {
            plan.assignments.iter().map(|a| a.layer).collect()
        };
        let releases = compositor.release_fences(&hardware, &completion);
        self.plan = Some(if degraded {
            CompositionPlan::all_software(self.paint_order())
        } else {
            plan
        });
        Ok(self.finish_frame(releases, completion, degraded))
    }

    /// Render every layer and scan the result out through the fallback path
    fn present_degraded(&mut self, compositor: &mut Compositor) -> Result<(Fence, bool), DriverError> {
        let order = self.paint_order();
        let layers = self.render_layers(&order);
        let (buffer, acquire) = self
            .ctx
            .driver
            .render_fallback(self.output_size(), self.target_format.code, &layers)?;
        let framebuffer = compositor.import(buffer, self.ctx.config.import_retries)?;
        let fence = compositor.submit_fallback(framebuffer, &acquire)?;
        Ok((fence, true))
    }

    /// Present a virtual display without a timing engine, copying the target with the accelerator
    fn present_captured(&mut self) -> Result<PresentResult, Error> {
        let order = self.paint_order();
        let (buffer, acquire) = self.compose_target(&order, true).map_err(Error::Driver)?;
        let Some(writeback) = self.writeback.as_mut() else {
            return Err(Error::Unsupported("display has neither a timing engine nor writeback"));
        };
        let dst = writeback.begin_frame().map_err(Error::Driver)?;
        match self.ctx.driver.blit(buffer, &acquire, dst) {
            Ok(completion) => Ok(self.finish_frame(Vec::new(), completion, false)),
            Err(err) => {
                warn!(?err, "Accelerator copy failed");
                writeback.abort_frame();
                Err(Error::Driver(err))
            }
        }
    }

    fn abort_writeback(&mut self) {
        if let Some(writeback) = self.writeback.as_mut() {
            writeback.abort_frame();
        }
    }

    fn finish_frame(&mut self, releases: Vec<(LayerHandle, Fence)>, completion: Fence, degraded: bool) -> PresentResult {
        let frame = self.frame_counter;
        self.frame_counter += 1;

        for (handle, fence) in &releases {
            if let Some(layer) = self.layers.get_mut(handle) {
                layer.push_release(fence.clone());
            }
        }
        let retire: Fence = releases
            .iter()
            .map(|(_, fence)| fence.clone())
            .chain(std::iter::once(completion.clone()))
            .collect();
        self.retire_fences.push_back(retire.clone());
        while self.retire_fences.len() > self.ctx.config.retire_queue_depth.max(1) {
            self.retire_fences.pop_front();
        }

        if let Some(writeback) = self.writeback.as_mut() {
            if let Err(err) = writeback.finish_frame(frame, completion) {
                warn!(?err, "Failed to dequeue the next writeback buffer");
            }
        }

        if self.hdr_mode != self.pending_hdr {
            info!(mode = ?self.pending_hdr, "Output HDR mode changed");
            self.hdr_mode = self.pending_hdr;
        }
        self.mode_pending = false;
        self.validated = false;
        self.accepted = false;
        self.client_target_fresh = false;
        trace!(frame, degraded, "Presented frame");

        PresentResult {
            frame: Some(frame),
            release_fences: releases,
            retire,
            degraded,
        }
    }

    /// Hand out the newest captured frame after `last_consumed`
    pub fn take_output(&self, last_consumed: Option<u64>) -> Result<Option<WritebackFrame>, Error> {
        let writeback = self
            .writeback
            .as_ref()
            .ok_or(Error::Unsupported("output capture of a physical display"))?;
        Ok(writeback.take_output(last_consumed, self.ctx.config.writeback.output_wait))
    }

    // events

    /// Returns true if the vblank should be reported to vsync callbacks
    pub(crate) fn on_vblank(&mut self, event: &VblankEvent) -> bool {
        if !self.vsync_enabled || !self.is_active() {
            return false;
        }
        if self.refresh.is_idle() {
            let hz = self.ctx.config.idle.idle_refresh_hz.max(1);
            let period = Duration::from_secs(1) / hz;
            if let Some(last) = self.last_vsync {
                if event.timestamp.saturating_sub(last) < period {
                    return false;
                }
            }
        }
        self.last_vsync = Some(event.timestamp);
        true
    }

    /// Returns true if clients should be asked to redraw
    pub(crate) fn on_alarm(&mut self, kind: AlarmKind, generation: u64) -> bool {
        if !self.is_active() {
            return false;
        }
        let _guard = self.span.enter();
        match kind {
            AlarmKind::Idle => {
                let idle = self.refresh.idle_expired(generation);
                if idle {
                    debug!(hz = self.ctx.config.idle.idle_refresh_hz, "Static screen, dropping to idle refresh");
                }
                idle
            }
            AlarmKind::SelfRefresh => {
                self.refresh
                    .self_refresh_expired(self.handle, self.ctx.config.idle.self_refresh_interval, &self.ctx.alarms)
            }
        }
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.ctx.alarms.cancel_display(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        allocator::{Fourcc, Modifier},
        sync::Signal,
        test::VirtualDriver,
    };

    fn context(driver: &Arc<VirtualDriver>, config: EngineConfig) -> DisplayContext {
        DisplayContext {
            driver: driver.clone(),
            config,
            planes: Arc::new(driver.planes().unwrap()),
            claims: PlaneClaimStorage::default(),
            alarms: Alarms::default(),
        }
    }

    fn connected(driver: &Arc<VirtualDriver>, config: EngineConfig) -> Display {
        let connector = driver.add_connector("DP-1", vec![DisplayMode::new((1920, 1080), 60_000).preferred()]);
        let info = driver
            .connectors()
            .unwrap()
            .into_iter()
            .find(|c| c.id == connector)
            .unwrap();
        let mut display = Display::new_physical(DisplayHandle::from_raw(0), &info, context(driver, config));
        display.connect(&info, CrtcId(0)).unwrap();
        display
    }

    fn add_layer(display: &mut Display, driver: &VirtualDriver, z: i32) -> LayerHandle {
        let handle = display.create_layer();
        let buffer = driver.add_buffer((256, 256), Fourcc::Argb8888, Modifier::Linear);
        let layer = display.layer_mut(handle).unwrap();
        layer.set_buffer(Some(buffer), Fence::signaled());
        layer.set_frame(Rectangle::from_loc_and_size((z * 10, 0), (256, 256)));
        layer.set_z(z);
        handle
    }

    #[test]
    fn power_mode_is_deferred_until_connected() {
        let driver = Arc::new(VirtualDriver::new());
        let connector = driver.add_connector("DP-1", vec![DisplayMode::new((1920, 1080), 60_000)]);
        let info = driver.connectors().unwrap().remove(0);
        let mut display = Display::new_physical(
            DisplayHandle::from_raw(0),
            &info,
            context(&driver, EngineConfig::default()),
        );

        display.set_power_mode(PowerMode::On).unwrap();
        assert_eq!(display.power_mode(), PowerMode::Off);
        assert!(driver.binding(CrtcId(0)).is_none());

        display.connect(&info, CrtcId(0)).unwrap();
        assert_eq!(display.power_mode(), PowerMode::On);
        assert_eq!(driver.binding(CrtcId(0)).map(|(c, _)| c), Some(connector));
    }

    #[test]
    fn doze_is_unsupported() {
        let driver = Arc::new(VirtualDriver::new());
        let mut display = connected(&driver, EngineConfig::default());
        assert!(matches!(
            display.set_power_mode(PowerMode::Doze),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            display.set_power_mode(PowerMode::DozeSuspend),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn power_cycle_releases_plane_groups() {
        let driver = Arc::new(VirtualDriver::new());
        let mut display = connected(&driver, EngineConfig::default());
        display.set_power_mode(PowerMode::On).unwrap();
        assert_eq!(display.plane_groups(), vec![PlaneGroupId(0)]);

        display.set_power_mode(PowerMode::Off).unwrap();
        assert!(display.plane_groups().is_empty());
        assert!(driver.binding(CrtcId(0)).is_none());
        assert_eq!(display.ctx.claims.holder(PlaneGroupId(0)), None);
    }

    #[test]
    fn paint_order_breaks_ties_by_creation() {
        let driver = Arc::new(VirtualDriver::new());
        let mut display = connected(&driver, EngineConfig::default());
        let a = add_layer(&mut display, &driver, 5);
        let b = add_layer(&mut display, &driver, 1);
        let c = add_layer(&mut display, &driver, 5);
        assert_eq!(display.paint_order(), vec![b, a, c]);
    }

    #[test]
    fn inactive_display_ignores_frames() {
        let driver = Arc::new(VirtualDriver::new());
        let mut display = connected(&driver, EngineConfig::default());
        add_layer(&mut display, &driver, 0);
        assert_eq!(display.validate().unwrap(), ValidateStatus::None);
        let result = display.present().unwrap();
        assert_eq!(result.frame, None);
        assert_eq!(display.frame_counter(), 0);
    }

    #[test]
    fn empty_layer_set_is_rejected() {
        let driver = Arc::new(VirtualDriver::new());
        let mut display = connected(&driver, EngineConfig::default());
        display.set_power_mode(PowerMode::On).unwrap();
        assert!(matches!(display.validate(), Err(Error::BadLayer(None))));
        assert!(matches!(display.present(), Err(Error::BadLayer(None))));
    }

    #[test]
    fn frames_are_numbered_consecutively() {
        let driver = Arc::new(VirtualDriver::new());
        let mut display = connected(&driver, EngineConfig::default());
        display.set_power_mode(PowerMode::On).unwrap();
        add_layer(&mut display, &driver, 0);

        for expected in 0..4 {
            display.validate().unwrap();
            display.accept_changes().unwrap();
            let result = display.present().unwrap();
            assert_eq!(result.frame, Some(expected));
        }
    }

    #[test]
    fn failed_import_demotes_the_layer() {
        let driver = Arc::new(VirtualDriver::new());
        let mut display = connected(&driver, EngineConfig::default());
        display.set_power_mode(PowerMode::On).unwrap();
        let layer = add_layer(&mut display, &driver, 0);
        let buffer = display.layer(layer).unwrap().staged().buffer.unwrap();
        driver.fail_import(buffer, 2);

        assert_eq!(display.validate().unwrap(), ValidateStatus::None);
        display.accept_changes().unwrap();
        let result = display.present().unwrap();
        assert_eq!(result.frame, Some(0));
        assert_eq!(display.layer(layer).unwrap().composition(), CompositionKind::Software);
        // composed by the fallback renderer onto the primary plane
        assert_eq!(driver.renders(), 1);
        let (_, commit) = driver.commits().pop().unwrap();
        assert_eq!(commit.planes.len(), 1);

        // retried next frame
        display.validate().unwrap();
        display.accept_changes().unwrap();
        display.present().unwrap();
        assert_eq!(display.layer(layer).unwrap().composition(), CompositionKind::Plane);
    }

    #[test]
    fn failed_commit_degrades_the_frame() {
        let driver = Arc::new(VirtualDriver::new());
        let mut display = connected(&driver, EngineConfig::default());
        display.set_power_mode(PowerMode::On).unwrap();
        add_layer(&mut display, &driver, 0);
        driver.fail_commits(1);

        let result = display.present().unwrap();
        assert!(result.degraded);
        assert_eq!(result.frame, Some(0));
        assert_eq!(driver.fallback_commits().len(), 1);
        assert!(result.release_fences.is_empty());
    }

    #[test]
    fn client_target_is_used_when_current() {
        let driver = Arc::new(VirtualDriver::new());
        let mut display = connected(&driver, EngineConfig::default());
        display.set_power_mode(PowerMode::On).unwrap();
        let layer = add_layer(&mut display, &driver, 0);
        display
            .layer_mut(layer)
            .unwrap()
            .set_composition_kind(CompositionKind::Software);

        display.validate().unwrap();
        display.accept_changes().unwrap();
        let target = driver.add_buffer((1920, 1080), Fourcc::Argb8888, Modifier::Linear);
        let signal = Signal::new();
        display.set_client_target(target, signal.fence());
        display.present().unwrap();
        assert_eq!(driver.renders(), 0);

        // no fresh client target, the engine renders itself
        display.validate().unwrap();
        display.accept_changes().unwrap();
        display.present().unwrap();
        assert_eq!(driver.renders(), 1);
    }

    #[test]
    fn config_switch_is_applied_with_the_next_frame() {
        let driver = Arc::new(VirtualDriver::new());
        let connector = driver.add_connector(
            "DP-1",
            vec![
                DisplayMode::new((1920, 1080), 60_000).preferred(),
                DisplayMode::new((1280, 720), 60_000),
            ],
        );
        let info = driver.connectors().unwrap().remove(0);
        let mut display = Display::new_physical(
            DisplayHandle::from_raw(0),
            &info,
            context(&driver, EngineConfig::default()),
        );
        display.connect(&info, CrtcId(0)).unwrap();
        display.set_power_mode(PowerMode::On).unwrap();
        add_layer(&mut display, &driver, 0);

        assert_eq!(display.display_configs().len(), 2);
        assert!(matches!(
            display.set_active_config(ConfigId(7)),
            Err(Error::BadConfig(_))
        ));
        display.set_active_config(ConfigId(1)).unwrap();
        display.present().unwrap();

        let (_, commit) = driver.commits().pop().unwrap();
        assert_eq!(commit.mode.map(|m| m.size), Some(Size::from((1280, 720))));
        assert_eq!(
            driver.binding(CrtcId(0)).map(|(c, m)| (c, m.size)),
            Some((connector, Size::from((1280, 720))))
        );

        display.present().unwrap();
        let (_, commit) = driver.commits().pop().unwrap();
        assert_eq!(commit.mode, None);
    }
}
