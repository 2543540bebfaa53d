//! Devices, the entry point of the engine
//!
//! A [`Device`] owns every [`Display`] of one piece of display hardware. It watches the
//! hardware for hotplug and vertical blank events on background threads, which only
//! publish [`DeviceEvent`]s through a [`DeviceNotifier`]. Insert the notifier into your
//! [`calloop`] event loop and pass every event on to [`Device::process_event`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! use scanout::{backend::driver::Driver, config::EngineConfig, device::Device};
//!
//! # fn setup(driver: Arc<dyn Driver>) {
//! let mut event_loop = calloop::EventLoop::<()>::try_new().unwrap();
//! let (device, notifier) = Device::new(driver, EngineConfig::default(), &event_loop.handle()).unwrap();
//! let device = Arc::new(device);
//!
//! let handle = device.clone();
//! event_loop
//!     .handle()
//!     .insert_source(notifier, move |event, _, _| handle.process_event(event))
//!     .unwrap();
//! # }
//! ```
//!
//! Display timers are [`calloop::timer::Timer`] sources of the same event loop.
//!
//! Every display is guarded by its own lock, so frames of different displays can be
//! presented from different threads. Locks are taken in this order: the hotplug lock
//! serializing connector scans, then a display lock, then the connector registry.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use calloop::{channel::Sender, LoopHandle, RegistrationToken};
use tracing::{debug, info, info_span, warn};

use crate::{
    backend::{
        allocator::Fourcc,
        driver::{ConnectorId, ConnectorInfo, CrtcId, Driver, DriverError, VblankEvent},
    },
    config::EngineConfig,
    display::{writeback::WritebackPath, Display, DisplayContext, DisplayKind},
    error::Error,
    plane::PlaneClaimStorage,
    utils::{Physical, Size},
};

pub mod alarm;
mod composer;
pub mod notifier;
pub mod scanner;

pub use composer::{Composer, HotplugCallback, InvalidateCallback, VsyncCallback};

use alarm::{AlarmKind, Alarms};
use notifier::{DeviceEvent, DeviceNotifier};
use scanner::{ConnectorScanEvent, ConnectorScanner, CrtcMapper};

/// How long the watcher threads block on the driver before checking for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stable handle of a [`Display`]
///
/// Handles are never reused within a device, a physical display keeps its handle across
/// disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayHandle(u32);

impl DisplayHandle {
    pub(crate) fn from_raw(raw: u32) -> Self {
        DisplayHandle(raw)
    }

    /// Raw value of this handle
    pub fn raw(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Default)]
struct Registry {
    scanner: ConnectorScanner,
    crtcs: CrtcMapper,
    connectors: HashMap<ConnectorId, DisplayHandle>,
    crtc_displays: HashMap<CrtcId, DisplayHandle>,
    announced: HashSet<DisplayHandle>,
}

#[derive(Default)]
struct Observers {
    hotplug: Option<HotplugCallback>,
    vsync: Option<VsyncCallback>,
    invalidate: Option<InvalidateCallback>,
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("hotplug", &self.hotplug.is_some())
            .field("vsync", &self.vsync.is_some())
            .field("invalidate", &self.invalidate.is_some())
            .finish()
    }
}

enum Transition {
    Connected(DisplayHandle, ConnectorInfo, CrtcId),
    Disconnected(DisplayHandle),
}

/// All displays of one piece of display hardware
#[derive(Debug)]
pub struct Device {
    ctx: DisplayContext,
    displays: RwLock<Vec<Option<Arc<Mutex<Display>>>>>,
    // held for a whole connector scan
    hotplug: Mutex<()>,
    registry: Mutex<Registry>,
    observers: Mutex<Observers>,
    timers: RegistrationToken,
    threads: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    span: tracing::Span,
}

fn spawn_watcher<F>(
    name: &'static str,
    stop: Arc<AtomicBool>,
    sender: Sender<DeviceEvent>,
    mut poll: F,
) -> Result<JoinHandle<()>, Error>
where
    F: FnMut() -> Result<Option<DeviceEvent>, DriverError> + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            while !stop.load(Ordering::Acquire) {
                match poll() {
                    Ok(Some(event)) => {
                        if sender.send(event).is_err() {
                            debug!(thread = name, "Event loop is gone, stopping watcher");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(thread = name, ?err, "Waiting on the driver failed");
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }
        })
        .map_err(|source| Error::Thread { name, source })
}

impl Device {
    /// Create a new device on top of `driver`
    ///
    /// Spawns the hotplug and vblank threads, inserts the display timers into the event loop
    /// of `handle` and scans the connectors once. Connected sinks get a display right away,
    /// but no hotplug callback is registered yet; [`Device::register_hotplug_callback`]
    /// reports them.
    pub fn new<D: 'static>(
        driver: Arc<dyn Driver>,
        config: EngineConfig,
        handle: &LoopHandle<'static, D>,
    ) -> Result<(Device, DeviceNotifier), Error> {
        let span = info_span!(parent: None, "device");
        let planes = driver.planes()?;
        info!(
            parent: &span,
            planes = planes.planes().len(),
            groups = planes.groups().len(),
            "Initializing device"
        );

        let (sender, notifier) = DeviceNotifier::new();
        let (alarms, timers) = Alarms::new(handle, sender.clone())?;
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = DisplayContext {
            driver: driver.clone(),
            config,
            planes: Arc::new(planes),
            claims: PlaneClaimStorage::default(),
            alarms,
        };

        let mut device = Device {
            ctx,
            displays: RwLock::new(Vec::new()),
            hotplug: Mutex::new(()),
            registry: Mutex::new(Registry::default()),
            observers: Mutex::new(Observers::default()),
            timers,
            threads: Vec::new(),
            stop: stop.clone(),
            span,
        };

        let hotplug_driver = driver.clone();
        device.threads.push(spawn_watcher(
            "scanout-hotplug",
            stop.clone(),
            sender.clone(),
            move || {
                hotplug_driver
                    .wait_hotplug(POLL_INTERVAL)
                    .map(|changed| changed.then_some(DeviceEvent::Hotplug))
            },
        )?);
        device.threads.push(spawn_watcher(
            "scanout-vblank",
            stop,
            sender,
            move || driver.wait_vblank(POLL_INTERVAL).map(|event| event.map(DeviceEvent::Vblank)),
        )?);

        device.rescan()?;
        Ok((device, notifier))
    }

    /// Configuration shared by all displays
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Driver of this device
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.ctx.driver
    }

    /// Event source of the display timers
    ///
    /// Remove it from the event loop once the device is dropped.
    pub fn timer_source(&self) -> RegistrationToken {
        self.timers
    }

    /// Handles of all existing displays
    pub fn displays(&self) -> Vec<DisplayHandle> {
        self.displays
            .read()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, display)| display.is_some())
            .map(|(idx, _)| DisplayHandle(idx as u32))
            .collect()
    }

    fn display(&self, handle: DisplayHandle) -> Result<Arc<Mutex<Display>>, Error> {
        self.displays
            .read()
            .unwrap()
            .get(handle.0 as usize)
            .and_then(|display| display.clone())
            .ok_or(Error::BadDisplay(handle))
    }

    /// Run `f` with exclusive access to a display
    pub fn with_display<T>(&self, handle: DisplayHandle, f: impl FnOnce(&mut Display) -> T) -> Result<T, Error> {
        let display = self.display(handle)?;
        let mut display = display.lock().unwrap();
        Ok(f(&mut display))
    }

    fn insert_display(
        &self,
        create: impl FnOnce(DisplayHandle) -> Result<Display, Error>,
    ) -> Result<DisplayHandle, Error> {
        let mut displays = self.displays.write().unwrap();
        let handle = DisplayHandle(displays.len() as u32);
        let display = create(handle)?;
        displays.push(Some(Arc::new(Mutex::new(display))));
        Ok(handle)
    }

    /// Handle pending events of the background threads
    pub fn process_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Hotplug => {
                if let Err(err) = self.rescan() {
                    warn!(parent: &self.span, ?err, "Failed to scan connectors");
                }
            }
            DeviceEvent::Vblank(event) => self.on_vblank(event),
            DeviceEvent::Alarm {
                display,
                kind,
                generation,
            } => self.on_alarm(display, kind, generation),
        }
    }

    /// Compare the connectors of the driver with the last scan and update the displays
    ///
    /// Displays are created for newly seen connectors. Disconnected displays keep their
    /// handle, power mode and configuration for when the sink comes back. Concurrent
    /// scans run one after another.
    #[profiling::function]
    pub fn rescan(&self) -> Result<(), Error> {
        let _guard = self.span.enter();
        let _scan = self.hotplug.lock().unwrap();
        let connectors = self.ctx.driver.connectors()?;

        let mut transitions = Vec::new();
        {
            let mut registry = self.registry.lock().unwrap();
            let registry = &mut *registry;
            for event in registry.scanner.scan(connectors) {
                match event {
                    ConnectorScanEvent::Disconnected(info) => {
                        debug!(connector = %info.name, "Connector disconnected");
                        if let Some(crtc) = registry.crtcs.unmap(info.id) {
                            registry.crtc_displays.remove(&crtc);
                        }
                        if let Some(handle) = registry.connectors.get(&info.id) {
                            transitions.push(Transition::Disconnected(*handle));
                        }
                    }
                    ConnectorScanEvent::Connected(info) => {
                        debug!(connector = %info.name, "Connector connected");
                        let Some(crtc) = registry.crtcs.map(&info) else {
                            warn!(connector = %info.name, "No free timing engine for connector");
                            continue;
                        };
                        let handle = match registry.connectors.get(&info.id) {
                            Some(handle) => *handle,
                            None => {
                                let handle = self.insert_display(|handle| {
                                    Ok(Display::new_physical(handle, &info, self.ctx.clone()))
                                })?;
                                registry.connectors.insert(info.id, handle);
                                handle
                            }
                        };
                        registry.crtc_displays.insert(crtc, handle);
                        transitions.push(Transition::Connected(handle, info, crtc));
                    }
                }
            }
        }

        let mut changes = Vec::new();
        for transition in transitions {
            match transition {
                Transition::Disconnected(handle) => {
                    self.with_display(handle, |display| display.disconnect())?;
                    if self.registry.lock().unwrap().announced.remove(&handle) {
                        changes.push((handle, false));
                    }
                }
                Transition::Connected(handle, info, crtc) => {
                    let ready = self.with_display(handle, |display| {
                        if let Err(err) = display.connect(&info, crtc) {
                            warn!(connector = %info.name, ?err, "Failed to set up display");
                        }
                        display.is_ready()
                    })?;

                    let mut registry = self.registry.lock().unwrap();
                    if ready {
                        if registry.announced.insert(handle) {
                            changes.push((handle, true));
                        }
                    } else {
                        registry.crtcs.unmap(info.id);
                        registry.crtc_displays.remove(&crtc);
                    }
                }
            }
        }

        if !changes.is_empty() {
            let mut observers = self.observers.lock().unwrap();
            if let Some(callback) = observers.hotplug.as_mut() {
                for (handle, connected) in changes {
                    callback(handle, connected);
                }
            }
        }
        Ok(())
    }

    fn on_vblank(&self, event: VblankEvent) {
        let Some(handle) = self.registry.lock().unwrap().crtc_displays.get(&event.crtc).copied() else {
            return;
        };
        match self.with_display(handle, |display| display.on_vblank(&event)) {
            Ok(true) => {
                if let Some(callback) = self.observers.lock().unwrap().vsync.as_mut() {
                    callback(handle, event);
                }
            }
            Ok(false) => {}
            Err(err) => debug!(parent: &self.span, ?err, "Vblank of a removed display"),
        }
    }

    fn on_alarm(&self, handle: DisplayHandle, kind: AlarmKind, generation: u64) {
        match self.with_display(handle, |display| display.on_alarm(kind, generation)) {
            Ok(true) => {
                if let Some(callback) = self.observers.lock().unwrap().invalidate.as_mut() {
                    callback(handle);
                }
            }
            Ok(false) => {}
            Err(err) => debug!(parent: &self.span, ?err, "Timer of a removed display"),
        }
    }

    /// Register the hotplug callback, replacing any previous one
    ///
    /// The callback is called right away for every connected display. Callbacks must not
    /// register callbacks themselves.
    pub fn register_hotplug_callback(&self, mut callback: HotplugCallback) {
        let mut connected: Vec<DisplayHandle> = self.registry.lock().unwrap().announced.iter().copied().collect();
        connected.sort();
        let mut observers = self.observers.lock().unwrap();
        for handle in connected {
            callback(handle, true);
        }
        observers.hotplug = Some(callback);
    }

    /// Register the vsync callback, replacing any previous one
    pub fn register_vsync_callback(&self, callback: VsyncCallback) {
        self.observers.lock().unwrap().vsync = Some(callback);
    }

    /// Register the invalidate callback, replacing any previous one
    pub fn register_invalidate_callback(&self, callback: InvalidateCallback) {
        self.observers.lock().unwrap().invalidate = Some(callback);
    }

    /// Create a virtual display capturing its output into memory
    ///
    /// Output that fits the hardware writeback limit is captured by a free timing engine,
    /// anything else is copied by the accelerator. `format` defaults to
    /// [`WritebackConfig::format`](crate::config::WritebackConfig::format).
    pub fn create_virtual_display(
        &self,
        size: Size<i32, Physical>,
        format: Option<Fourcc>,
    ) -> Result<DisplayHandle, Error> {
        let _guard = self.span.enter();
        let config = &self.ctx.config.writeback;
        if size.is_empty() || !size.fits_into(config.max_size) {
            return Err(Error::BadConfig("unsupported virtual display size"));
        }
        let format = format.unwrap_or(config.format);

        let hardware = self
            .ctx
            .driver
            .writeback_limit()
            .map(|limit| size.fits_into(limit))
            .unwrap_or(false);

        let mut registry = self.registry.lock().unwrap();
        let path = if hardware {
            let crtcs = self.ctx.driver.crtcs()?;
            registry
                .crtcs
                .reserve(&crtcs)
                .map(WritebackPath::Hardware)
                .unwrap_or(WritebackPath::Accelerator)
        } else {
            WritebackPath::Accelerator
        };

        let result = self.insert_display(|handle| Display::new_virtual(handle, size, format, path, self.ctx.clone()));
        if let (Err(_), WritebackPath::Hardware(crtc)) = (&result, path) {
            registry.crtcs.release(crtc);
        }
        result
    }

    /// Destroy a virtual display
    pub fn destroy_virtual_display(&self, handle: DisplayHandle) -> Result<(), Error> {
        let crtc = self.with_display(handle, |display| {
            (display.kind() == DisplayKind::Virtual).then(|| display.crtc())
        })?;
        let Some(crtc) = crtc else {
            return Err(Error::BadDisplay(handle));
        };

        if let Some(slot) = self.displays.write().unwrap().get_mut(handle.0 as usize) {
            slot.take();
        }
        if let Some(crtc) = crtc {
            self.registry.lock().unwrap().crtcs.release(crtc);
        }
        info!(parent: &self.span, display = handle.0, "Virtual display destroyed");
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let span = self.span.clone();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!(parent: &span, "Background thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use calloop::EventLoop;

    use super::*;
    use crate::{
        backend::test::VirtualDriver,
        display::{mode::DisplayMode, ConnectionState, PowerMode},
    };

    fn device(driver: &Arc<VirtualDriver>) -> Device {
        let event_loop: EventLoop<'static, ()> = EventLoop::try_new().unwrap();
        Device::new(driver.clone(), EngineConfig::default(), &event_loop.handle())
            .unwrap()
            .0
    }

    fn record_hotplug(device: &Device) -> Arc<Mutex<Vec<(DisplayHandle, bool)>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        device.register_hotplug_callback(Box::new(move |handle, connected| {
            sink.lock().unwrap().push((handle, connected))
        }));
        events
    }

    #[test]
    fn connected_sinks_are_replayed() {
        let driver = Arc::new(VirtualDriver::new());
        driver.add_connector("HDMI-A-1", vec![DisplayMode::new((1920, 1080), 60_000)]);
        let device = device(&driver);

        let events = record_hotplug(&device);
        assert_eq!(*events.lock().unwrap(), vec![(DisplayHandle(0), true)]);
    }

    #[test]
    fn reconnect_keeps_the_display() {
        let driver = Arc::new(VirtualDriver::new());
        let connector = driver.add_connector("DP-1", vec![DisplayMode::new((1920, 1080), 60_000)]);
        let device = device(&driver);
        let events = record_hotplug(&device);
        device
            .with_display(DisplayHandle(0), |d| d.set_power_mode(PowerMode::On))
            .unwrap()
            .unwrap();

        driver.set_connected(connector, false);
        device.rescan().unwrap();
        let state = device
            .with_display(DisplayHandle(0), |d| (d.connection_state(), d.power_mode()))
            .unwrap();
        assert_eq!(state, (ConnectionState::Disconnected, PowerMode::On));

        driver.set_connected(connector, true);
        device.rescan().unwrap();
        let state = device
            .with_display(DisplayHandle(0), |d| (d.connection_state(), d.power_mode()))
            .unwrap();
        assert_eq!(state, (ConnectionState::Ready, PowerMode::On));
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                (DisplayHandle(0), true),
                (DisplayHandle(0), false),
                (DisplayHandle(0), true)
            ]
        );
        assert_eq!(device.displays(), vec![DisplayHandle(0)]);
    }

    #[test]
    fn concurrent_scans_stay_consistent() {
        let driver = Arc::new(VirtualDriver::new());
        let connector = driver.add_connector("DP-1", vec![DisplayMode::new((1920, 1080), 60_000)]);
        let device = device(&driver);
        let events = record_hotplug(&device);

        thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        device.rescan().unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for idx in 0..100 {
                    driver.set_connected(connector, idx % 2 == 1);
                }
            });
        });
        driver.set_connected(connector, true);
        device.rescan().unwrap();

        let state = device
            .with_display(DisplayHandle(0), |d| (d.connection_state(), d.crtc()))
            .unwrap();
        assert_eq!(state, (ConnectionState::Ready, Some(CrtcId(0))));

        let events = events.lock().unwrap();
        assert_eq!(events.last(), Some(&(DisplayHandle(0), true)));
        for pair in events.windows(2) {
            assert_ne!(pair[0].1, pair[1].1, "hotplug events must alternate");
        }
        assert_eq!(device.displays(), vec![DisplayHandle(0)]);
    }

    #[test]
    fn unknown_display_is_rejected() {
        let driver = Arc::new(VirtualDriver::new());
        let device = device(&driver);
        assert!(matches!(
            device.with_display(DisplayHandle(3), |_| ()),
            Err(Error::BadDisplay(DisplayHandle(3)))
        ));
    }

    #[test]
    fn virtual_display_paths() {
        let driver = Arc::new(VirtualDriver::new());
        let device = device(&driver);

        let small = device.create_virtual_display((1280, 720).into(), None).unwrap();
        let large = device.create_virtual_display((3840, 2160).into(), None).unwrap();
        let path = |handle| {
            device
                .with_display(handle, |d| d.writeback().map(|w| w.path()))
                .unwrap()
        };
        assert!(matches!(path(small), Some(WritebackPath::Hardware(_))));
        assert_eq!(path(large), Some(WritebackPath::Accelerator));

        assert!(matches!(
            device.create_virtual_display((0, 720).into(), None),
            Err(Error::BadConfig(_))
        ));
        assert!(matches!(
            device.create_virtual_display((10000, 720).into(), None),
            Err(Error::BadConfig(_))
        ));

        device.destroy_virtual_display(small).unwrap();
        assert!(matches!(
            device.destroy_virtual_display(small),
            Err(Error::BadDisplay(_))
        ));
        device.destroy_virtual_display(large).unwrap();
        assert_eq!(driver.allocated_buffers(), 0);
    }

    #[test]
    fn physical_displays_cannot_be_destroyed() {
        let driver = Arc::new(VirtualDriver::new());
        driver.add_connector("DP-1", vec![DisplayMode::new((1920, 1080), 60_000)]);
        let device = device(&driver);
        assert!(matches!(
            device.destroy_virtual_display(DisplayHandle(0)),
            Err(Error::BadDisplay(_))
        ));
    }
}
