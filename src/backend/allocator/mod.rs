//! Buffer descriptions and pixel formats.
//!
//! Client buffers are opaque to the engine. The driver reports their geometry and
//! [`Format`] through [`BufferInfo`], which layers cache per buffer identity.

pub mod format;

pub use drm_fourcc::{
    DrmFormat as Format, DrmFourcc as Fourcc, DrmModifier as Modifier, DrmVendor as Vendor,
    UnrecognizedFourcc, UnrecognizedVendor,
};

use crate::utils::{Buffer as BufferCoords, Size};

/// Geometry and pixel layout of a client buffer, as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Size of the buffer in pixels
    pub size: Size<i32, BufferCoords>,
    /// Pixel format and compression layout
    pub format: Format,
}

impl BufferInfo {
    /// Create a new description of a buffer with the given size and format
    pub fn new(size: impl Into<Size<i32, BufferCoords>>, code: Fourcc, modifier: Modifier) -> Self {
        BufferInfo {
            size: size.into(),
            format: Format { code, modifier },
        }
    }

    /// Width of the two-dimensional buffer
    pub fn width(&self) -> i32 {
        self.size.w
    }

    /// Height of the two-dimensional buffer
    pub fn height(&self) -> i32 {
        self.size.h
    }

    /// Returns true if the buffer holds video content, i.e. uses a YUV layout
    pub fn is_video(&self) -> bool {
        format::is_yuv(self.format.code)
    }
}
