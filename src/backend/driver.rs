//! Interface to the hardware/driver layer
//!
//! The engine never talks to kernel interfaces directly. Everything it needs from the
//! hardware, like connector enumeration, buffer import, commit submission or writeback,
//! goes through the [`Driver`] trait. [`VirtualDriver`](crate::backend::test::VirtualDriver)
//! is an in-memory implementation used for testing.

use std::{fmt, time::Duration};

use smallvec::SmallVec;

use crate::{
    backend::{
        allocator::{BufferInfo, Fourcc},
        sync::Fence,
    },
    compositor::hdr::{HdrCapabilities, HdrMode},
    display::mode::DisplayMode,
    layer::BlendMode,
    plane::{PlaneId, Planes},
    utils::{Buffer as BufferCoords, Physical, Raw, Rectangle, Size, Transform},
};

/// Handle of a physical connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectorId(pub u32);

/// Handle of a timing engine (crtc) driving one output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrtcId(pub u32);

/// Identity of a client buffer
///
/// Buffers are opaque to the engine, equal handles refer to the same buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Hardware-addressable handle of an imported buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

/// Identity of a side-channel stream, e.g. a tuner feeding a plane directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(pub u64);

/// State of a connector as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorState {
    /// A sink is attached
    Connected,
    /// Nothing is attached
    Disconnected,
    /// The driver could not tell
    Unknown,
}

/// Information about a connector
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorInfo {
    /// Handle of the connector
    pub id: ConnectorId,
    /// Human readable name, e.g. `HDMI-A-1`
    pub name: String,
    /// Connection state
    pub state: ConnectorState,
    /// Modes advertised by the sink, in driver order
    pub modes: Vec<DisplayMode>,
    /// Physical dimensions of the sink in millimeters, if known
    pub physical_size: Option<Size<u32, Raw>>,
    /// HDR capabilities advertised by the sink
    pub hdr: HdrCapabilities,
    /// Timing engines able to drive this connector, in order of preference
    pub possible_crtcs: SmallVec<[CrtcId; 4]>,
}

/// A vertical blank reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VblankEvent {
    /// Timing engine the blank happened on
    pub crtc: CrtcId,
    /// Sequence number of the blank
    pub sequence: u64,
    /// Timestamp of the blank on the monotonic clock
    pub timestamp: Duration,
}

/// Content scanned out by a plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneSource {
    /// An imported buffer
    Framebuffer(FramebufferId),
    /// A side-channel stream connected to the plane by the hardware
    Stream(StreamHandle),
}

/// Configuration of a single plane within a [`Commit`]
#[derive(Debug, Clone)]
pub struct PlaneCommit {
    /// Plane to configure
    pub plane: PlaneId,
    /// Content to scan out
    pub source: PlaneSource,
    /// Source rectangle in buffer coordinates
    pub src: Rectangle<f64, BufferCoords>,
    /// Destination rectangle on the output
    pub dst: Rectangle<i32, Physical>,
    /// Transform to apply while scanning out
    pub transform: Transform,
    /// Blending with planes below
    pub blend: BlendMode,
    /// Stacking position, ascending
    pub zpos: usize,
    /// The driver must not read the framebuffer before this fence signaled
    pub acquire: Fence,
}

/// Description of one atomic hardware commit
#[derive(Debug, Clone, Default)]
pub struct Commit {
    /// Planes to enable, every other plane of the crtc gets disabled
    pub planes: Vec<PlaneCommit>,
    /// Mode to switch to as part of this commit
    pub mode: Option<DisplayMode>,
    /// Output HDR mode
    pub hdr: HdrMode,
    /// Capture the composed output into this framebuffer
    pub writeback: Option<FramebufferId>,
}

/// A layer handed to the fallback renderer
#[derive(Debug, Clone)]
pub struct RenderLayer {
    /// Buffer to read from, `None` for side-channel content
    pub buffer: Option<BufferHandle>,
    /// Side-channel stream to draw instead of a buffer
    pub sideband: Option<StreamHandle>,
    /// Source rectangle in buffer coordinates, empty for the whole buffer
    pub src: Rectangle<f64, BufferCoords>,
    /// Destination rectangle on the output
    pub dst: Rectangle<i32, Physical>,
    /// Transform to apply
    pub transform: Transform,
    /// Blending with layers below
    pub blend: BlendMode,
    /// The renderer must not read the buffer before this fence signaled
    pub acquire: Fence,
}

/// Errors thrown by a [`Driver`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The driver encountered an access error
    #[error("Driver access error: {0}")]
    Access(String),
    /// A buffer could not be imported as a framebuffer
    #[error("Failed to import buffer `{0:?}`")]
    ImportFailed(BufferHandle),
    /// The commit was rejected by the hardware
    #[error("Commit on crtc `{0:?}` was rejected")]
    CommitFailed(CrtcId),
    /// The connector does not exist (anymore)
    #[error("No such connector `{0:?}`")]
    NoSuchConnector(ConnectorId),
    /// The crtc does not exist
    #[error("No such crtc `{0:?}`")]
    NoSuchCrtc(CrtcId),
    /// The resource is in use, the operation may succeed later
    #[error("Crtc `{0:?}` is busy")]
    Busy(CrtcId),
    /// The sink went away while the operation was running
    #[error("Connector `{0:?}` is disconnected")]
    Disconnected(ConnectorId),
    /// Allocation of a buffer failed
    #[error("Failed to allocate a {size:?} buffer of format {format}")]
    AllocationFailed {
        /// Requested size
        size: Size<i32, BufferCoords>,
        /// Requested format
        format: Fourcc,
    },
}

/// Hardware abstraction the engine runs on
///
/// All methods are called with bounded blocking, except for the `wait_*` methods
/// which are only called from background threads.
pub trait Driver: fmt::Debug + Send + Sync + 'static {
    /// Enumerate all connectors with their current state
    fn connectors(&self) -> Result<Vec<ConnectorInfo>, DriverError>;
    /// Enumerate all timing engines
    fn crtcs(&self) -> Result<Vec<CrtcId>, DriverError>;
    /// Catalogue of scan-out planes
    fn planes(&self) -> Result<Planes, DriverError>;
    /// Largest output the hardware writeback path can capture, `None` if there is no such path
    fn writeback_limit(&self) -> Option<Size<i32, Physical>>;
    /// Whether the HDR metadata parser of the platform is available
    fn has_metadata_parser(&self) -> bool {
        true
    }

    /// Bind a connector to a timing engine with the given mode and enable it
    fn bind(&self, crtc: CrtcId, connector: ConnectorId, mode: &DisplayMode) -> Result<(), DriverError>;
    /// Disable a timing engine and release its display resources
    fn unbind(&self, crtc: CrtcId) -> Result<(), DriverError>;

    /// Query geometry and format of a client buffer
    fn buffer_info(&self, buffer: BufferHandle) -> Result<BufferInfo, DriverError>;
    /// Import a client buffer into a hardware-addressable framebuffer
    fn import_buffer(&self, buffer: BufferHandle) -> Result<FramebufferId, DriverError>;
    /// Release a framebuffer previously returned by [`Driver::import_buffer`]
    fn release_framebuffer(&self, framebuffer: FramebufferId);
    /// Allocate a buffer the engine owns, used for writeback
    fn allocate_buffer(
        &self,
        size: Size<i32, BufferCoords>,
        format: Fourcc,
    ) -> Result<BufferHandle, DriverError>;
    /// Free a buffer returned by [`Driver::allocate_buffer`]
    fn free_buffer(&self, buffer: BufferHandle);

    /// Submit an atomic commit, returning a fence signaled once the hardware latched it
    fn commit(&self, crtc: CrtcId, commit: &Commit) -> Result<Fence, DriverError>;
    /// Scan out a single full-screen framebuffer, the last resort if plane commits fail
    fn commit_fallback(
        &self,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        acquire: &Fence,
    ) -> Result<Fence, DriverError>;
    /// Compose layers with the opaque software/GPU renderer
    ///
    /// The returned buffer is owned by the renderer and stays valid until the returned fence
    /// of the next call signaled.
    fn render_fallback(
        &self,
        size: Size<i32, Physical>,
        format: Fourcc,
        layers: &[RenderLayer],
    ) -> Result<(BufferHandle, Fence), DriverError>;
    /// Copy and convert `src` into `dst` using the 2D accelerator
    fn blit(&self, src: BufferHandle, acquire: &Fence, dst: BufferHandle) -> Result<Fence, DriverError>;

    /// Block until the connector configuration changed or `timeout` expired
    ///
    /// Returns `true` if a change was detected.
    fn wait_hotplug(&self, timeout: Duration) -> Result<bool, DriverError>;
    /// Block until the next vertical blank of any enabled crtc or `timeout` expired
    fn wait_vblank(&self, timeout: Duration) -> Result<Option<VblankEvent>, DriverError>;
}
