//! Format info tables for DRM formats.
//!
//! This module provides lookup functions used by plane matching and the
//! HDR policy: [`get_opaque`], [`has_alpha`], [`get_bpp`], [`is_yuv`] and
//! [`is_wide`].
//!
//! ```
//! # use scanout::backend::allocator::Fourcc;
//! # use scanout::backend::allocator::format::{get_opaque, has_alpha, is_yuv};
//! assert_eq!(Some(Fourcc::Xrgb8888), get_opaque(Fourcc::Argb8888));
//! assert!(has_alpha(Fourcc::Argb8888));
//! assert!(is_yuv(Fourcc::Nv12));
//! ```

/// Macro to generate table lookup functions for formats.
///
/// See the module documentation for usage details.
macro_rules! format_tables {
    (
        $($fourcc: ident {
            $(opaque: $opaque: ident,)?
            alpha: $alpha: expr,
            bpp: $bpp: expr,
            yuv: $yuv: expr,
            wide: $wide: expr $(,)?
        }),*
    ) => {
        /// Returns the opaque alternative of the specified format.
        ///
        /// Unknown formats will always return [`None`].
        pub const fn get_opaque(
            fourcc: $crate::backend::allocator::Fourcc,
        ) -> Option<$crate::backend::allocator::Fourcc> {
            match fourcc {
                $($(
                    $crate::backend::allocator::Fourcc::$fourcc
                        => Some($crate::backend::allocator::Fourcc::$opaque),
                )?)*
                _ => None,
            }
        }

        /// Returns true if the format has an alpha channel.
        ///
        /// Unknown formats will always return `false`.
        pub const fn has_alpha(fourcc: $crate::backend::allocator::Fourcc) -> bool {
            match fourcc {
                $(
                    $crate::backend::allocator::Fourcc::$fourcc => $alpha,
                )*
                _ => false,
            }
        }

        /// Returns the bits per pixel of the specified format.
        ///
        /// For multi-planar YUV formats this is the average over all planes.
        /// Unknown formats will always return [`None`].
        pub const fn get_bpp(
            fourcc: $crate::backend::allocator::Fourcc,
        ) -> Option<usize> {
            match fourcc {
                $($crate::backend::allocator::Fourcc::$fourcc => Some($bpp),)*
                _ => None,
            }
        }

        /// Returns true if the format stores luma/chroma samples, which is what video decoders produce.
        ///
        /// Unknown formats will always return `false`.
        pub const fn is_yuv(fourcc: $crate::backend::allocator::Fourcc) -> bool {
            match fourcc {
                $(
                    $crate::backend::allocator::Fourcc::$fourcc => $yuv,
                )*
                _ => false,
            }
        }

        /// Returns true if the format carries more than 8 bits per color channel.
        ///
        /// Unknown formats will always return `false`.
        pub const fn is_wide(fourcc: $crate::backend::allocator::Fourcc) -> bool {
            match fourcc {
                $(
                    $crate::backend::allocator::Fourcc::$fourcc => $wide,
                )*
                _ => false,
            }
        }

        /// All formats known to the lookup tables
        pub fn known_formats() -> &'static [$crate::backend::allocator::Fourcc] {
            &[
                $(
                    $crate::backend::allocator::Fourcc::$fourcc,
                )*
            ]
        }
    };
}

format_tables! {
    // 16-bit bpp RGB
    Rgb565 { alpha: false, bpp: 16, yuv: false, wide: false },

    Bgr565 { alpha: false, bpp: 16, yuv: false, wide: false },

    // 24-bit bpp RGB
    Rgb888 { alpha: false, bpp: 24, yuv: false, wide: false },

    Bgr888 { alpha: false, bpp: 24, yuv: false, wide: false },

    // 32-bit bpp RGB, 8 bits per channel
    Argb8888 {
        opaque: Xrgb8888,
        alpha: true,
        bpp: 32,
        yuv: false,
        wide: false,
    },

    Xrgb8888 { alpha: false, bpp: 32, yuv: false, wide: false },

    Abgr8888 {
        opaque: Xbgr8888,
        alpha: true,
        bpp: 32,
        yuv: false,
        wide: false,
    },

    Xbgr8888 { alpha: false, bpp: 32, yuv: false, wide: false },

    Rgba8888 {
        opaque: Rgbx8888,
        alpha: true,
        bpp: 32,
        yuv: false,
        wide: false,
    },

    Rgbx8888 { alpha: false, bpp: 32, yuv: false, wide: false },

    Bgra8888 {
        opaque: Bgrx8888,
        alpha: true,
        bpp: 32,
        yuv: false,
        wide: false,
    },

    Bgrx8888 { alpha: false, bpp: 32, yuv: false, wide: false },

    // 32-bit bpp RGB with 10-bits per color channel
    Argb2101010 {
        opaque: Xrgb2101010,
        alpha: true,
        bpp: 32,
        yuv: false,
        wide: true,
    },

    Xrgb2101010 { alpha: false, bpp: 32, yuv: false, wide: true },

    Abgr2101010 {
        opaque: Xbgr2101010,
        alpha: true,
        bpp: 32,
        yuv: false,
        wide: true,
    },

    Xbgr2101010 { alpha: false, bpp: 32, yuv: false, wide: true },

    // Floating point 64bpp RGB
    Abgr16161616f {
        opaque: Xbgr16161616f,
        alpha: true,
        bpp: 64,
        yuv: false,
        wide: true,
    },

    Xbgr16161616f { alpha: false, bpp: 64, yuv: false, wide: true },

    // packed 4:2:2
    Yuyv { alpha: false, bpp: 16, yuv: true, wide: false },

    Uyvy { alpha: false, bpp: 16, yuv: true, wide: false },

    // 2 plane 4:2:0
    Nv12 { alpha: false, bpp: 12, yuv: true, wide: false },

    Nv21 { alpha: false, bpp: 12, yuv: true, wide: false },

    // 2 plane 4:2:0 / 4:2:2, 10 bits per sample in 16-bit containers
    P010 { alpha: false, bpp: 24, yuv: true, wide: true },

    P210 { alpha: false, bpp: 32, yuv: true, wide: true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::allocator::Fourcc;

    #[test]
    fn opaque_variants_drop_alpha() {
        for fourcc in known_formats() {
            if let Some(opaque) = get_opaque(*fourcc) {
                assert!(has_alpha(*fourcc), "{fourcc} has an opaque variant but no alpha");
                assert!(!has_alpha(opaque), "{opaque} is listed as opaque but has alpha");
                assert_eq!(get_bpp(*fourcc), get_bpp(opaque));
                assert_eq!(is_wide(*fourcc), is_wide(opaque));
            }
        }
    }

    #[test]
    fn video_formats() {
        assert!(is_yuv(Fourcc::Nv12));
        assert!(is_yuv(Fourcc::P010));
        assert!(is_wide(Fourcc::P010));
        assert!(!is_wide(Fourcc::Nv12));
        assert!(!is_yuv(Fourcc::Argb8888));
        // unknown to the table
        assert!(!is_yuv(Fourcc::C8));
        assert_eq!(get_bpp(Fourcc::C8), None);
    }
}
