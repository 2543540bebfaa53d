use std::{fmt, sync::Arc};

use crate::{
    backend::{
        allocator::Fourcc,
        driver::{BufferHandle, StreamHandle, VblankEvent},
        sync::Fence,
    },
    compositor::hdr::{ColorSpace, HdrMetadata},
    display::{
        mode::{ConfigId, DisplayConfig},
        writeback::WritebackFrame,
        PowerMode, PresentResult,
    },
    error::{Error, ValidateStatus},
    layer::{Accelerator, BlendMode, CompositionKind, Layer, LayerHandle},
    utils::{Buffer as BufferCoords, Physical, Rectangle, Size, Transform},
};

use super::{Device, DisplayHandle};

/// Called with `true` when a display got connected and `false` when it got disconnected
pub type HotplugCallback = Box<dyn FnMut(DisplayHandle, bool) + Send>;
/// Called on every reported vertical blank of a display
pub type VsyncCallback = Box<dyn FnMut(DisplayHandle, VblankEvent) + Send>;
/// Called when a display wants its clients to draw a new frame
pub type InvalidateCallback = Box<dyn FnMut(DisplayHandle) + Send>;

/// Operations exposed to the window system
///
/// Every operation addresses a display by handle and fails with
/// [`Error::BadDisplay`] if it does not exist. Layer operations fail with
/// [`Error::BadLayer`] for unknown layers.
pub trait Composer: fmt::Debug + Send + Sync {
    /// Create a layer on a display
    fn create_layer(&self, display: DisplayHandle) -> Result<LayerHandle, Error>;
    /// Destroy a layer
    fn destroy_layer(&self, display: DisplayHandle, layer: LayerHandle) -> Result<(), Error>;

    /// Set the content buffer of a layer and the fence guarding it
    fn set_layer_buffer(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        buffer: Option<BufferHandle>,
        acquire: Fence,
    ) -> Result<(), Error>;
    /// Set a side-channel stream as the content of a layer
    fn set_layer_sideband(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        stream: Option<StreamHandle>,
    ) -> Result<(), Error>;
    /// Set the source rectangle of a layer, an empty rectangle selects the whole buffer
    fn set_layer_crop(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        crop: Rectangle<f64, BufferCoords>,
    ) -> Result<(), Error>;
    /// Set the destination rectangle of a layer
    fn set_layer_frame(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        frame: Rectangle<i32, Physical>,
    ) -> Result<(), Error>;
    /// Set the blend mode of a layer
    fn set_layer_blend(&self, display: DisplayHandle, layer: LayerHandle, blend: BlendMode) -> Result<(), Error>;
    /// Set the transform of a layer
    fn set_layer_transform(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        transform: Transform,
    ) -> Result<(), Error>;
    /// Set the paint order of a layer
    fn set_layer_z(&self, display: DisplayHandle, layer: LayerHandle, z: i32) -> Result<(), Error>;
    /// Set the composition kind the client wants for a layer
    fn set_layer_composition_kind(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        kind: CompositionKind,
    ) -> Result<(), Error>;
    /// Set the color space of a layer's content
    fn set_layer_color_space(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        color_space: ColorSpace,
    ) -> Result<(), Error>;
    /// Set the static HDR metadata of a layer's content
    fn set_layer_hdr_metadata(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        metadata: Option<HdrMetadata>,
    ) -> Result<(), Error>;
    /// Attach or detach a post-processing step
    fn set_layer_accelerator(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        accelerator: Option<Arc<dyn Accelerator>>,
    ) -> Result<(), Error>;

    /// Assign planes to the staged layers of a display
    fn validate(&self, display: DisplayHandle) -> Result<ValidateStatus, Error>;
    /// Layers whose validated composition kind differs from the requested one
    fn changed_composition_types(&self, display: DisplayHandle) -> Result<Vec<(LayerHandle, CompositionKind)>, Error>;
    /// Accept the validation result
    fn accept_changes(&self, display: DisplayHandle) -> Result<(), Error>;
    /// Supply the software composed frame-buffer-target of the next frame
    fn set_client_target(&self, display: DisplayHandle, buffer: BufferHandle, acquire: Fence) -> Result<(), Error>;
    /// Submit the accepted frame
    fn present(&self, display: DisplayHandle) -> Result<PresentResult, Error>;

    /// Change the power mode of a display
    fn set_power_mode(&self, display: DisplayHandle, mode: PowerMode) -> Result<(), Error>;
    /// Select the configuration of a display
    fn set_active_config(&self, display: DisplayHandle, config: ConfigId) -> Result<(), Error>;
    /// Configurations of a display
    fn display_configs(&self, display: DisplayHandle) -> Result<Vec<DisplayConfig>, Error>;
    /// Active configuration of a display
    fn active_config(&self, display: DisplayHandle) -> Result<Option<DisplayConfig>, Error>;
    /// Enable or disable vsync callbacks of a display
    fn set_vsync_enabled(&self, display: DisplayHandle, enabled: bool) -> Result<(), Error>;

    /// Register the hotplug callback
    fn register_hotplug_callback(&self, callback: HotplugCallback);
    /// Register the vsync callback
    fn register_vsync_callback(&self, callback: VsyncCallback);
    /// Register the invalidate callback
    fn register_invalidate_callback(&self, callback: InvalidateCallback);

    /// Create a virtual display
    fn create_virtual_display(&self, size: Size<i32, Physical>, format: Option<Fourcc>) -> Result<DisplayHandle, Error>;
    /// Destroy a virtual display
    fn destroy_virtual_display(&self, display: DisplayHandle) -> Result<(), Error>;
    /// Take the newest captured frame of a virtual display after `last_consumed`
    fn take_output(&self, display: DisplayHandle, last_consumed: Option<u64>) -> Result<Option<WritebackFrame>, Error>;
}

impl Device {
    // layers of a display that is not ready went away with the sink, updates are dropped
    fn with_layer(&self, display: DisplayHandle, layer: LayerHandle, f: impl FnOnce(&mut Layer)) -> Result<(), Error> {
        self.with_display(display, |d| {
            if !d.is_ready() {
                return Ok(());
            }
            d.layer_mut(layer).map(f)
        })?
    }
}

impl Composer for Device {
    fn create_layer(&self, display: DisplayHandle) -> Result<LayerHandle, Error> {
        self.with_display(display, |d| d.create_layer())
    }

    fn destroy_layer(&self, display: DisplayHandle, layer: LayerHandle) -> Result<(), Error> {
        self.with_display(display, |d| d.destroy_layer(layer))?
    }

    fn set_layer_buffer(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        buffer: Option<BufferHandle>,
        acquire: Fence,
    ) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_buffer(buffer, acquire))
    }

    fn set_layer_sideband(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        stream: Option<StreamHandle>,
    ) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_sideband(stream))
    }

    fn set_layer_crop(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        crop: Rectangle<f64, BufferCoords>,
    ) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_crop(crop))
    }

    fn set_layer_frame(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        frame: Rectangle<i32, Physical>,
    ) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_frame(frame))
    }

    fn set_layer_blend(&self, display: DisplayHandle, layer: LayerHandle, blend: BlendMode) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_blend(blend))
    }

    fn set_layer_transform(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        transform: Transform,
    ) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_transform(transform))
    }

    fn set_layer_z(&self, display: DisplayHandle, layer: LayerHandle, z: i32) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_z(z))
    }

    fn set_layer_composition_kind(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        kind: CompositionKind,
    ) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_composition_kind(kind))
    }

    fn set_layer_color_space(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        color_space: ColorSpace,
    ) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_color_space(color_space))
    }

    fn set_layer_hdr_metadata(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        metadata: Option<HdrMetadata>,
    ) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_hdr_metadata(metadata))
    }

    fn set_layer_accelerator(
        &self,
        display: DisplayHandle,
        layer: LayerHandle,
        accelerator: Option<Arc<dyn Accelerator>>,
    ) -> Result<(), Error> {
        self.with_layer(display, layer, |l| l.set_accelerator(accelerator))
    }

    fn validate(&self, display: DisplayHandle) -> Result<ValidateStatus, Error> {
        self.with_display(display, |d| d.validate())?
    }

    fn changed_composition_types(&self, display: DisplayHandle) -> Result<Vec<(LayerHandle, CompositionKind)>, Error> {
        self.with_display(display, |d| d.changed_composition_types())
    }

    fn accept_changes(&self, display: DisplayHandle) -> Result<(), Error> {
        self.with_display(display, |d| d.accept_changes())?
    }

    fn set_client_target(&self, display: DisplayHandle, buffer: BufferHandle, acquire: Fence) -> Result<(), Error> {
        self.with_display(display, |d| d.set_client_target(buffer, acquire))
    }

    fn present(&self, display: DisplayHandle) -> Result<PresentResult, Error> {
        self.with_display(display, |d| d.present())?
    }

    fn set_power_mode(&self, display: DisplayHandle, mode: PowerMode) -> Result<(), Error> {
        self.with_display(display, |d| d.set_power_mode(mode))?
    }

    fn set_active_config(&self, display: DisplayHandle, config: ConfigId) -> Result<(), Error> {
        self.with_display(display, |d| d.set_active_config(config))?
    }

    fn display_configs(&self, display: DisplayHandle) -> Result<Vec<DisplayConfig>, Error> {
        self.with_display(display, |d| d.display_configs().to_vec())
    }

    fn active_config(&self, display: DisplayHandle) -> Result<Option<DisplayConfig>, Error> {
        self.with_display(display, |d| d.active_config())
    }

    fn set_vsync_enabled(&self, display: DisplayHandle, enabled: bool) -> Result<(), Error> {
        self.with_display(display, |d| d.set_vsync_enabled(enabled))
    }

    fn register_hotplug_callback(&self, callback: HotplugCallback) {
        Device::register_hotplug_callback(self, callback)
    }

    fn register_vsync_callback(&self, callback: VsyncCallback) {
        Device::register_vsync_callback(self, callback)
    }

    fn register_invalidate_callback(&self, callback: InvalidateCallback) {
        Device::register_invalidate_callback(self, callback)
    }

    fn create_virtual_display(&self, size: Size<i32, Physical>, format: Option<Fourcc>) -> Result<DisplayHandle, Error> {
        Device::create_virtual_display(self, size, format)
    }

    fn destroy_virtual_display(&self, display: DisplayHandle) -> Result<(), Error> {
        Device::destroy_virtual_display(self, display)
    }

    fn take_output(&self, display: DisplayHandle, last_consumed: Option<u64>) -> Result<Option<WritebackFrame>, Error> {
        self.with_display(display, |d| d.take_output(last_consumed))?
    }
}
