mod common;

use common::single_display;
use scanout::{
    backend::{
        allocator::{Fourcc, Modifier},
        driver::CrtcId,
        sync::Fence,
    },
    config::EngineConfig,
    device::{Composer, DisplayHandle},
    display::writeback::WritebackPath,
    error::Error,
    utils::{Physical, Rectangle, Size},
};

fn show_layer(setup: &common::Setup, display: DisplayHandle, size: (i32, i32)) {
    let device = &setup.device;
    let layer = device.create_layer(display).unwrap();
    let buffer = setup.driver.add_buffer(size, Fourcc::Argb8888, Modifier::Linear);
    device
        .set_layer_buffer(display, layer, Some(buffer), Fence::signaled())
        .unwrap();
    device
        .set_layer_frame(display, layer, Rectangle::from_loc_and_size((0, 0), size))
        .unwrap();
}

fn path(setup: &common::Setup, display: DisplayHandle) -> Option<WritebackPath> {
    setup
        .device
        .with_display(display, |d| d.writeback().map(|w| w.path()))
        .unwrap()
}

#[test]
fn small_output_is_captured_by_a_timing_engine() {
    let setup = single_display(EngineConfig::default());
    let display = setup
        .device
        .create_virtual_display((1280, 720).into(), None)
        .unwrap();
    assert_eq!(path(&setup, display), Some(WritebackPath::Hardware(CrtcId(1))));
    show_layer(&setup, display, (640, 480));

    let first = setup.device.present(display).unwrap();
    assert_eq!(first.frame, Some(0));
    let (crtc, commit) = setup.driver.commits().pop().unwrap();
    assert_eq!(crtc, CrtcId(1));
    assert!(commit.writeback.is_some());
    assert_eq!(setup.driver.blits(), 0);

    let output = setup.device.take_output(display, None).unwrap().unwrap();
    assert_eq!(output.frame, 0);

    setup.device.present(display).unwrap();
    let output = setup.device.take_output(display, Some(0)).unwrap().unwrap();
    assert_eq!(output.frame, 1);
    // nothing newer, the most recent frame is repeated
    let repeated = setup.device.take_output(display, Some(1)).unwrap().unwrap();
    assert_eq!(repeated.frame, 1);
}

#[test]
fn large_output_is_copied_by_the_accelerator() {
    let setup = single_display(EngineConfig::default());
    let display = setup
        .device
        .create_virtual_display((2560, 1440).into(), Some(Fourcc::Argb8888))
        .unwrap();
    assert_eq!(path(&setup, display), Some(WritebackPath::Accelerator));
    assert_eq!(setup.device.with_display(display, |d| d.crtc()).unwrap(), None);
    show_layer(&setup, display, (640, 480));

    assert!(setup.device.take_output(display, None).unwrap().is_none());
    let result = setup.device.present(display).unwrap();
    assert_eq!(result.frame, Some(0));
    assert_eq!(setup.driver.blits(), 1);
    assert_eq!(setup.driver.renders(), 1);
    assert!(setup.driver.commits().is_empty());

    let output = setup.device.take_output(display, None).unwrap().unwrap();
    assert_eq!(output.frame, 0);
}

#[test]
fn destroying_releases_the_timing_engine() {
    let setup = single_display(EngineConfig::default());
    let size: Size<i32, Physical> = (640, 480).into();
    let first = setup.device.create_virtual_display(size, None).unwrap();
    let second = setup.device.create_virtual_display(size, None).unwrap();
    assert_eq!(path(&setup, second), Some(WritebackPath::Accelerator));
    assert!(setup.driver.allocated_buffers() > 0);

    setup.device.destroy_virtual_display(first).unwrap();
    setup.device.destroy_virtual_display(second).unwrap();
    assert_eq!(setup.driver.allocated_buffers(), 0);

    let third = setup.device.create_virtual_display(size, None).unwrap();
    assert_ne!(third, first);
    assert_eq!(path(&setup, third), Some(WritebackPath::Hardware(CrtcId(1))));
}

#[test]
fn invalid_requests_are_rejected() {
    let setup = single_display(EngineConfig::default());
    assert!(matches!(
        setup.device.create_virtual_display((0, 480).into(), None),
        Err(Error::BadConfig(_))
    ));
    assert!(matches!(
        setup.device.create_virtual_display((16384, 16384).into(), None),
        Err(Error::BadConfig(_))
    ));
    assert!(matches!(
        setup.device.take_output(setup.display, None),
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        setup.device.destroy_virtual_display(setup.display),
        Err(Error::BadDisplay(_))
    ));
}
