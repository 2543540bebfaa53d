//! Client layers
//!
//! A [`Layer`] is double-buffered: setters only touch the staged [`LayerState`], which
//! becomes current once the client accepted the validation result of a frame.

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::{debug, trace};

use crate::{
    backend::{
        allocator::{BufferInfo, Format},
        driver::{BufferHandle, Driver, StreamHandle},
        sync::Fence,
    },
    compositor::hdr::{ColorSpace, HdrMetadata},
    utils::{Buffer as BufferCoords, Physical, Rectangle, Size, Transform},
};

/// Number of release fences a layer remembers, one per frame in flight
pub const RELEASE_HISTORY: usize = 3;

/// Handle of a layer within its display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerHandle(u32);

impl LayerHandle {
    /// Handle of the synthetic frame-buffer-target layer of every display
    pub const CLIENT_TARGET: LayerHandle = LayerHandle(u32::MAX);

    pub(crate) fn from_raw(raw: u32) -> Self {
        LayerHandle(raw)
    }

    /// Raw value of this handle
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// How a layer blends with the content below it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Alpha is ignored
    Opaque,
    /// Color channels are premultiplied by alpha
    #[default]
    Premultiplied,
    /// Color channels are not premultiplied
    Coverage,
}

/// How a layer is composed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompositionKind {
    /// Scanned out by a hardware plane
    #[default]
    Plane,
    /// Composed by the software/GPU renderer into the frame-buffer-target
    Software,
    /// Scanned out by a cursor plane
    Cursor,
    /// Content comes from a side-channel stream instead of a buffer
    Sideband,
}

impl CompositionKind {
    /// Returns true if this kind is scanned out by hardware
    pub fn is_hardware(&self) -> bool {
        !matches!(self, CompositionKind::Software)
    }
}

/// Buffer properties as seen by plane matching
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveBuffer {
    /// Source rectangle
    pub crop: Rectangle<f64, BufferCoords>,
    /// Size of the whole buffer
    pub size: Size<i32, BufferCoords>,
    /// Pixel format
    pub format: Format,
}

/// Kind of processing an [`Accelerator`] performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceleratorKind {
    /// Upscales the source
    SuperResolution,
    /// Interpolates intermediate frames
    MotionCompensation,
    /// Converts between color spaces or pixel formats
    ColorConversion,
}

/// A post-processing step applied to a layer's buffer before scan-out
///
/// The processing itself is out of scope for the engine; it only needs to know
/// what the processed buffer looks like.
pub trait Accelerator: fmt::Debug + Send + Sync {
    /// What this accelerator does
    fn kind(&self) -> AcceleratorKind;

    /// Buffer properties after processing `input` for display at `frame`
    fn effective_buffer(&self, input: EffectiveBuffer, frame: Rectangle<i32, Physical>) -> EffectiveBuffer;
}

/// Shared reference to an [`Accelerator`], compared by identity
#[derive(Debug, Clone)]
pub struct AcceleratorRef(pub Arc<dyn Accelerator>);

impl PartialEq for AcceleratorRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// State of a layer as set by the client
#[derive(Debug, Clone, PartialEq)]
pub struct LayerState {
    /// Content buffer
    pub buffer: Option<BufferHandle>,
    /// Fence guarding the content buffer
    pub acquire: Fence,
    /// Side-channel content stream
    pub sideband: Option<StreamHandle>,
    /// Source rectangle in buffer coordinates
    pub crop: Rectangle<f64, BufferCoords>,
    /// Destination rectangle on the output
    pub frame: Rectangle<i32, Physical>,
    /// Blending with layers below
    pub blend: BlendMode,
    /// Rotation and reflection
    pub transform: Transform,
    /// Paint order, ascending
    pub z: i32,
    /// Composition kind the client asked for
    pub requested: CompositionKind,
    /// Color space of the content
    pub color_space: ColorSpace,
    /// Static HDR metadata of the content
    pub hdr_metadata: Option<HdrMetadata>,
    /// Optional post-processing step
    pub accelerator: Option<AcceleratorRef>,
}

impl Default for LayerState {
    fn default() -> Self {
        LayerState {
            buffer: None,
            acquire: Fence::signaled(),
            sideband: None,
            crop: Rectangle::default(),
            frame: Rectangle::default(),
            blend: BlendMode::default(),
            transform: Transform::Normal,
            z: 0,
            requested: CompositionKind::default(),
            color_space: ColorSpace::default(),
            hdr_metadata: None,
            accelerator: None,
        }
    }
}

impl LayerState {
    /// Returns true if the content is tagged as high dynamic range
    pub fn is_hdr(&self) -> bool {
        self.color_space.is_hdr()
    }
}

/// Identity-keyed cache of buffer imports
///
/// Cleared entirely once more than `capacity` distinct buffers were seen.
#[derive(Debug)]
pub struct BufferCache {
    entries: HashMap<BufferHandle, BufferInfo>,
    capacity: usize,
}

impl BufferCache {
    /// Create an empty cache
    pub fn new(capacity: usize) -> Self {
        BufferCache {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Return the cached info of `buffer` or import it with the driver
    ///
    /// Failed imports are not cached.
    pub fn get_or_import(&mut self, buffer: BufferHandle, driver: &dyn Driver) -> Option<BufferInfo> {
        if let Some(info) = self.entries.get(&buffer) {
            return Some(*info);
        }

        match driver.buffer_info(buffer) {
            Ok(info) => {
                if self.entries.len() >= self.capacity {
                    trace!(capacity = self.capacity, "Buffer cache overflow, clearing");
                    self.entries.clear();
                }
                self.entries.insert(buffer, info);
                Some(info)
            }
            Err(err) => {
                debug!(?buffer, ?err, "Failed to query buffer info");
                None
            }
        }
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A client layer
#[derive(Debug)]
pub struct Layer {
    handle: LayerHandle,
    staged: LayerState,
    current: LayerState,
    validated: Option<CompositionKind>,
    composition: CompositionKind,
    demoted: bool,
    buffer_info: Option<(BufferHandle, BufferInfo)>,
    cache: BufferCache,
    release_fences: Vec<Fence>,
}

impl Layer {
    pub(crate) fn new(handle: LayerHandle, cache_size: usize) -> Self {
        Layer {
            handle,
            staged: LayerState::default(),
            current: LayerState::default(),
            validated: None,
            composition: CompositionKind::default(),
            demoted: false,
            buffer_info: None,
            cache: BufferCache::new(cache_size),
            release_fences: Vec::with_capacity(RELEASE_HISTORY),
        }
    }

    /// Handle of this layer
    pub fn handle(&self) -> LayerHandle {
        self.handle
    }

    /// State the next frame will be validated with
    pub fn staged(&self) -> &LayerState {
        &self.staged
    }

    /// State of the last accepted frame
    pub fn current(&self) -> &LayerState {
        &self.current
    }

    /// Set the content buffer and its acquire fence
    pub fn set_buffer(&mut self, buffer: Option<BufferHandle>, acquire: Fence) {
        self.staged.buffer = buffer;
        self.staged.acquire = acquire;
    }

    /// Set a side-channel stream as content
    pub fn set_sideband(&mut self, stream: Option<StreamHandle>) {
        self.staged.sideband = stream;
    }

    /// Set the source rectangle
    pub fn set_crop(&mut self, crop: Rectangle<f64, BufferCoords>) {
        self.staged.crop = crop;
    }

    /// Set the destination rectangle
    pub fn set_frame(&mut self, frame: Rectangle<i32, Physical>) {
        self.staged.frame = frame;
    }

    /// Set the blend mode
    pub fn set_blend(&mut self, blend: BlendMode) {
        self.staged.blend = blend;
    }

    /// Set the transform
    pub fn set_transform(&mut self, transform: Transform) {
        self.staged.transform = transform;
    }

    /// Set the paint order
    pub fn set_z(&mut self, z: i32) {
        self.staged.z = z;
    }

    /// Set the requested composition kind
    pub fn set_composition_kind(&mut self, kind: CompositionKind) {
        self.staged.requested = kind;
    }

    /// Set the color space of the content
    pub fn set_color_space(&mut self, color_space: ColorSpace) {
        self.staged.color_space = color_space;
    }

    /// Set the static HDR metadata of the content
    pub fn set_hdr_metadata(&mut self, metadata: Option<HdrMetadata>) {
        self.staged.hdr_metadata = metadata;
    }

    /// Attach or detach a post-processing step
    pub fn set_accelerator(&mut self, accelerator: Option<Arc<dyn Accelerator>>) {
        self.staged.accelerator = accelerator.map(AcceleratorRef);
    }

    /// Composition kind decided by the last validation, if any
    pub fn validated(&self) -> Option<CompositionKind> {
        self.validated
    }

    /// Composition kind of the last accepted frame
    pub fn composition(&self) -> CompositionKind {
        self.composition
    }

    /// Release fences of the last frames, oldest first
    pub fn release_fences(&self) -> &[Fence] {
        &self.release_fences
    }

    /// Geometry and format of the staged buffer
    ///
    /// Only consults the cache (or the driver) if the buffer changed since the last call.
    pub(crate) fn buffer_info(&mut self, driver: &dyn Driver) -> Option<BufferInfo> {
        let buffer = self.staged.buffer?;
        match self.buffer_info {
            Some((cached, info)) if cached == buffer => Some(info),
            _ => {
                let info = self.cache.get_or_import(buffer, driver)?;
                self.buffer_info = Some((buffer, info));
                Some(info)
            }
        }
    }

    /// Buffer properties plane matching should use for the staged state
    pub(crate) fn effective_buffer(&mut self, driver: &dyn Driver) -> Option<EffectiveBuffer> {
        let info = self.buffer_info(driver)?;
        let crop = if self.staged.crop.is_empty() {
            Rectangle::from_size(info.size.to_f64())
        } else {
            self.staged.crop
        };
        let input = EffectiveBuffer {
            crop,
            size: info.size,
            format: info.format,
        };
        Some(match self.staged.accelerator.as_ref() {
            Some(AcceleratorRef(accelerator)) => accelerator.effective_buffer(input, self.staged.frame),
            None => input,
        })
    }

    /// Source rectangle of the current state, the whole buffer if no crop was set
    pub(crate) fn current_crop(&mut self, driver: &dyn Driver) -> Rectangle<f64, BufferCoords> {
        let state = &self.current;
        if !state.crop.is_empty() {
            return state.crop;
        }
        if state.sideband.is_some() && state.requested == CompositionKind::Sideband {
            return Rectangle::from_size((state.frame.size.w as f64, state.frame.size.h as f64).into());
        }
        state
            .buffer
            .and_then(|buffer| self.cache.get_or_import(buffer, driver))
            .map(|info| Rectangle::from_size(info.size.to_f64()))
            .unwrap_or_default()
    }

    pub(crate) fn set_validated(&mut self, kind: CompositionKind) {
        self.validated = Some(kind);
    }

    /// Whether the engine forced this layer to software composition until the next validation
    pub(crate) fn is_demoted(&self) -> bool {
        self.demoted
    }

    pub(crate) fn demote(&mut self) {
        self.demoted = true;
        self.validated = Some(CompositionKind::Software);
        self.composition = CompositionKind::Software;
    }

    pub(crate) fn clear_demotion(&mut self) {
        self.demoted = false;
    }

    /// Take a composition kind decided while presenting, after the frame was accepted
    pub(crate) fn adopt(&mut self, kind: CompositionKind) {
        self.validated = Some(kind);
        self.composition = kind;
    }

    /// Make the staged state current, adopting the validated composition kind
    pub(crate) fn accept(&mut self) {
        self.current = self.staged.clone();
        self.composition = self.validated.unwrap_or(self.staged.requested);
    }

    pub(crate) fn push_release(&mut self, fence: Fence) {
        if self.release_fences.len() == RELEASE_HISTORY {
            self.release_fences.remove(0);
        }
        self.release_fences.push(fence);
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

    #[test]
    fn setters_only_touch_staged_state() {
        let mut layer = Layer::new(LayerHandle::from_raw(0), 4);
        layer.set_z(3);
        layer.set_blend(BlendMode::Coverage);
        layer.set_frame(Rectangle::from_loc_and_size((10, 10), (100, 100)));

        assert_eq!(layer.staged().z, 3);
        assert_eq!(layer.current().z, 0);
        assert_ne!(layer.staged(), layer.current());
    }

    #[test]
    fn accept_round_trip() {
        let mut layer = Layer::new(LayerHandle::from_raw(0), 4);
        let signal = Signal::new();
        layer.set_buffer(Some(BufferHandle(7)), signal.fence());
        layer.set_transform(Transform::_90);
        layer.set_composition_kind(CompositionKind::Plane);
        layer.set_validated(CompositionKind::Software);
        layer.accept();

        assert_eq!(layer.staged(), layer.current());
        assert_eq!(layer.composition(), CompositionKind::Software);

        layer.set_z(1);
        assert_ne!(layer.staged(), layer.current());
    }

    #[test]
    fn buffer_info_is_cached_per_identity() {
        let driver = VirtualDriver::new();
        let a = driver.add_buffer((64, 64), Fourcc::Argb8888, Modifier::Linear);
        let b = driver.add_buffer((32, 32), Fourcc::Nv12, Modifier::Linear);

        let mut cache = BufferCache::new(2);
        assert_eq!(cache.get_or_import(a, &driver).map(|i| i.width()), Some(64));
        assert_eq!(cache.get_or_import(b, &driver).map(|i| i.width()), Some(32));
        assert_eq!(cache.len(), 2);
        assert_eq!(driver.buffer_queries(), 2);

        // hit
        assert!(cache.get_or_import(a, &driver).is_some());
        assert_eq!(driver.buffer_queries(), 2);

        // overflow clears everything
        let c = driver.add_buffer((16, 16), Fourcc::Xrgb8888, Modifier::Linear);
        assert!(cache.get_or_import(c, &driver).is_some());
        assert_eq!(cache.len(), 1);

        // unknown buffers are not cached
        assert!(cache.get_or_import(BufferHandle(9999), &driver).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn release_history_is_bounded() {
        let mut layer = Layer::new(LayerHandle::from_raw(0), 4);
        for _ in 0..(RELEASE_HISTORY + 2) {
            layer.push_release(Signal::new().fence());
        }
        assert_eq!(layer.release_fences().len(), RELEASE_HISTORY);
    }

    #[derive(Debug)]
    struct Upscaler;

    impl Accelerator for Upscaler {
        fn kind(&self) -> AcceleratorKind {
            AcceleratorKind::SuperResolution
        }

        fn effective_buffer(&self, input: EffectiveBuffer, frame: Rectangle<i32, Physical>) -> EffectiveBuffer {
            let size = (frame.size.w, frame.size.h).into();
            EffectiveBuffer {
                crop: Rectangle::from_loc_and_size((0.0, 0.0), (frame.size.w as f64, frame.size.h as f64)),
                size,
                format: input.format,
            }
        }
    }

    #[test]
    fn accelerator_rewrites_effective_buffer() {
        let driver = VirtualDriver::new();
        let buffer = driver.add_buffer((640, 360), Fourcc::Nv12, Modifier::Linear);

        let mut layer = Layer::new(LayerHandle::from_raw(0), 4);
        layer.set_buffer(Some(buffer), Fence::signaled());
        layer.set_frame(Rectangle::from_loc_and_size((0, 0), (1920, 1080)));

        let plain = layer.effective_buffer(&driver).unwrap();
        assert_eq!(plain.crop.size, (640.0, 360.0).into());

        layer.set_accelerator(Some(Arc::new(Upscaler)));
        let upscaled = layer.effective_buffer(&driver).unwrap();
        assert_eq!(upscaled.crop.size, (1920.0, 1080.0).into());
        assert_eq!(upscaled.format, plain.format);
    }
}
