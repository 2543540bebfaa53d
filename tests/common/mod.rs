#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use calloop::EventLoop;
use scanout::{
    backend::{
        allocator::{Fourcc, Modifier},
        sync::Fence,
        test::VirtualDriver,
    },
    config::EngineConfig,
    device::{notifier::DeviceNotifier, Composer, Device, DisplayHandle},
    display::{mode::DisplayMode, PowerMode},
    layer::LayerHandle,
    utils::Rectangle,
};
use tracing_subscriber::EnvFilter;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Setup {
    pub driver: Arc<VirtualDriver>,
    pub device: Device,
    pub display: DisplayHandle,
    pub notifier: DeviceNotifier,
    pub event_loop: EventLoop<'static, ()>,
}

/// A device with a single 1920x1080 sink, powered on
pub fn single_display(config: EngineConfig) -> Setup {
    init_logging();
    let driver = Arc::new(VirtualDriver::new());
    driver.add_connector("DP-1", vec![DisplayMode::new((1920, 1080), 60_000).preferred()]);
    powered(driver, config)
}

pub fn powered(driver: Arc<VirtualDriver>, config: EngineConfig) -> Setup {
    let event_loop: EventLoop<'static, ()> = EventLoop::try_new().unwrap();
    let (device, notifier) = Device::new(driver.clone(), config, &event_loop.handle()).unwrap();
    let display = device.displays()[0];
    device.set_power_mode(display, PowerMode::On).unwrap();
    Setup {
        driver,
        device,
        display,
        notifier,
        event_loop,
    }
}

/// Add a layer showing a fresh buffer of `size` at `(x, 0)`
pub fn add_layer(setup: &Setup, code: Fourcc, size: (i32, i32), x: i32, z: i32) -> LayerHandle {
    let Setup {
        driver,
        device,
        display,
        ..
    } = setup;
    let layer = device.create_layer(*display).unwrap();
    let buffer = driver.add_buffer(size, code, Modifier::Linear);
    device
        .set_layer_buffer(*display, layer, Some(buffer), Fence::signaled())
        .unwrap();
    device
        .set_layer_frame(*display, layer, Rectangle::from_loc_and_size((x, 0), size))
        .unwrap();
    device.set_layer_z(*display, layer, z).unwrap();
    layer
}

pub fn record<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Vec<T>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    (events.clone(), events)
}
