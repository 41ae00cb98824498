//! Pixel formats shared by the 2D engine and the display pipeline.
//!
//! Formats are identified by their DRM fourcc codes. Only the two layouts the
//! engine and the scanout hardware agree on are modelled:
//!
//! - `Argb8888`: one packed plane, 4 bytes per pixel, little-endian
//!   (`B, G, R, A` in memory, `0xAARRGGBB` as a `u32`).
//! - `Nv12`: a full-resolution luma plane followed by a half-resolution
//!   interleaved `U, V` plane with the same stride.

use std::fmt;

/// `DRM_FORMAT_ARGB8888` ("AR24").
pub const DRM_FORMAT_ARGB8888: u32 = 0x3432_5241;
/// `DRM_FORMAT_NV12` ("NV12").
pub const DRM_FORMAT_NV12: u32 = 0x3231_564E;

/// Pixel format of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit ARGB, single plane.
    Argb8888,
    /// 2-plane YUV 4:2:0 (luma + interleaved chroma).
    Nv12,
}

impl PixelFormat {
    /// DRM fourcc code of the format.
    #[must_use]
    pub const fn fourcc(self) -> u32 {
        match self {
            Self::Argb8888 => DRM_FORMAT_ARGB8888,
            Self::Nv12 => DRM_FORMAT_NV12,
        }
    }

    /// Look a format up by its fourcc code.
    #[must_use]
    pub const fn from_fourcc(fourcc: u32) -> Option<Self> {
        match fourcc {
            DRM_FORMAT_ARGB8888 => Some(Self::Argb8888),
            DRM_FORMAT_NV12 => Some(Self::Nv12),
            _ => None,
        }
    }

    /// Bytes per pixel of the primary plane.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Argb8888 => 4,
            Self::Nv12 => 1,
        }
    }

    /// Number of memory planes.
    #[must_use]
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Argb8888 => 1,
            Self::Nv12 => 2,
        }
    }

    #[must_use]
    pub const fn is_yuv(self) -> bool {
        matches!(self, Self::Nv12)
    }

    /// Smallest legal stride for a surface `width` pixels wide, or `None`
    /// when a row does not fit in 32 bits.
    #[must_use]
    pub const fn min_stride(self, width: u32) -> Option<u32> {
        width.checked_mul(self.bytes_per_pixel())
    }

    /// Rows in the chroma plane of a `height` pixel tall surface.
    #[must_use]
    pub const fn chroma_rows(self, height: u32) -> u32 {
        match self {
            Self::Argb8888 => 0,
            Self::Nv12 => height / 2,
        }
    }

    /// Byte size of the primary plane.
    #[must_use]
    pub const fn luma_size(self, stride: u32, height: u32) -> usize {
        stride as usize * height as usize
    }

    /// Byte size of the chroma plane (zero for packed formats).
    #[must_use]
    pub const fn chroma_size(self, stride: u32, height: u32) -> usize {
        stride as usize * self.chroma_rows(height) as usize
    }

    /// Total bytes needed when all planes are laid out back to back.
    #[must_use]
    pub const fn frame_size(self, stride: u32, height: u32) -> usize {
        self.luma_size(stride, height) + self.chroma_size(stride, height)
    }

    /// Short human readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Argb8888 => "ARGB8888",
            Self::Nv12 => "NV12",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pack ARGB channels into a `0xAARRGGBB` word.
#[must_use]
pub const fn pack_argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    ((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Split a `0xAARRGGBB` word into `[a, r, g, b]`.
#[must_use]
pub const fn unpack_argb(argb: u32) -> [u8; 4] {
    [
        (argb >> 24) as u8,
        (argb >> 16) as u8,
        (argb >> 8) as u8,
        argb as u8,
    ]
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// BT.601 limited-range RGB to YUV. Alpha is discarded.
#[must_use]
pub fn argb_to_yuv(argb: u32) -> (u8, u8, u8) {
    let [_, r, g, b] = unpack_argb(argb);
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (clamp_u8(y), clamp_u8(u), clamp_u8(v))
}

/// BT.601 limited-range YUV to opaque ARGB.
#[must_use]
pub fn yuv_to_argb(y: u8, u: u8, v: u8) -> u32 {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let r = clamp_u8((298 * c + 409 * e + 128) >> 8);
    let g = clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8);
    let b = clamp_u8((298 * c + 516 * d + 128) >> 8);
    pack_argb(0xFF, r, g, b)
}
