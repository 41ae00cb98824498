//! Image descriptors: typed views of buffer memory as 2D surfaces.
//!
//! A descriptor never owns memory. It borrows either a CPU mapping of a
//! buffer object or an exported PRIME handle, and describes the geometry
//! and pixel format the engine should use to interpret it.

use std::fmt;
use std::sync::Arc;

use crate::drm::{Mapping, PrimeFd};
use crate::drm::GemObject;
use crate::format::PixelFormat;
use crate::rga::ops::Rect;
use crate::rga::surface::{PlaneRef, Surface};

/// How the memory behind a descriptor is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    /// CPU mapping of a buffer object.
    Mapped,
    /// Shareable PRIME handle.
    Shared,
}

/// Memory referenced by a descriptor.
#[derive(Debug, Clone, Copy)]
pub enum Backing<'a> {
    Mapped(Mapping<'a>),
    Shared(&'a PrimeFd),
}

impl<'a> Backing<'a> {
    #[must_use]
    pub fn kind(&self) -> BackingKind {
        match self {
            Self::Mapped(_) => BackingKind::Mapped,
            Self::Shared(_) => BackingKind::Shared,
        }
    }

    /// Size of the referenced memory in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.gem().size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn gem(&self) -> &'a Arc<GemObject> {
        match *self {
            Self::Mapped(map) => map.gem(),
            Self::Shared(fd) => fd.gem(),
        }
    }

    fn plane(&self, offset: usize) -> PlaneRef {
        PlaneRef {
            gem: Arc::clone(self.gem()),
            offset,
            // A PRIME handle holds its own reference; a mapping is only as
            // good as the GEM handle it came from.
            requires_open: self.kind() == BackingKind::Mapped,
        }
    }
}

impl<'a> From<Mapping<'a>> for Backing<'a> {
    fn from(map: Mapping<'a>) -> Self {
        Self::Mapped(map)
    }
}

impl<'a> From<&'a PrimeFd> for Backing<'a> {
    fn from(fd: &'a PrimeFd) -> Self {
        Self::Shared(fd)
    }
}

/// Why a descriptor cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("surface is empty ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("stride {stride} is below the minimum {min} for {format}")]
    StrideTooSmall {
        stride: u32,
        min: u32,
        format: PixelFormat,
    },

    #[error("{width} pixel wide {format} rows overflow a 32-bit stride")]
    TooLarge { width: u32, format: PixelFormat },

    #[error("{format} requires even dimensions, got {width}x{height}")]
    OddDimensions {
        width: u32,
        height: u32,
        format: PixelFormat,
    },

    #[error("{plane} plane needs {needed} bytes, backing has {available}")]
    BackingTooSmall {
        plane: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("{0} has a single plane, a chroma backing is not allowed")]
    UnexpectedChroma(PixelFormat),

    #[error("chroma backing aliases the luma backing")]
    ChromaAliasesLuma,

    #[error("cache flush requested on a mapped backing")]
    FlushOnMapped,
}

/// Surface view over buffer memory.
#[derive(Clone, Copy)]
pub struct RgaImage<'a> {
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the primary plane. NV12 chroma rows use the same stride.
    pub stride: u32,
    pub format: PixelFormat,
    pub backing: Backing<'a>,
    /// Separate NV12 chroma plane, starting at offset 0. Without one the
    /// chroma plane follows the luma plane in `backing`.
    pub chroma: Option<Backing<'a>>,
    /// Colour used by solid fills, `0xAARRGGBB`.
    pub fill_color: u32,
    /// Request a cache sync of the backing once a batch touching it completes.
    pub flush: bool,
}

impl<'a> RgaImage<'a> {
    /// Tightly packed `width` x `height` surface of `format`.
    ///
    /// A width whose rows cannot be addressed is kept as is and reported by
    /// [`validate`](Self::validate).
    pub fn new(backing: impl Into<Backing<'a>>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride: format.min_stride(width).unwrap_or(u32::MAX),
            format,
            backing: backing.into(),
            chroma: None,
            fill_color: 0,
            flush: false,
        }
    }

    /// Same memory, different geometry and format.
    #[must_use]
    pub fn with_geometry(self, width: u32, height: u32, stride: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride,
            format,
            ..self
        }
    }

    #[must_use]
    pub fn with_stride(self, stride: u32) -> Self {
        Self { stride, ..self }
    }

    #[must_use]
    pub fn with_fill_color(self, fill_color: u32) -> Self {
        Self { fill_color, ..self }
    }

    #[must_use]
    pub fn with_chroma(self, chroma: impl Into<Backing<'a>>) -> Self {
        Self {
            chroma: Some(chroma.into()),
            ..self
        }
    }

    #[must_use]
    pub fn with_flush(self, flush: bool) -> Self {
        Self { flush, ..self }
    }

    /// Rectangle covering the whole surface.
    #[must_use]
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Check geometry, format and backing coverage.
    pub fn validate(&self) -> Result<(), ImageError> {
        self.resolve().map(|_| ())
    }

    pub(crate) fn resolve(&self) -> Result<Surface, ImageError> {
        let format = self.format;
        if self.width == 0 || self.height == 0 {
            return Err(ImageError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        let min = format.min_stride(self.width).ok_or(ImageError::TooLarge {
            width: self.width,
            format,
        })?;
        if self.stride < min {
            return Err(ImageError::StrideTooSmall {
                stride: self.stride,
                min,
                format,
            });
        }
        if format.is_yuv() && (self.width % 2 != 0 || self.height % 2 != 0) {
            return Err(ImageError::OddDimensions {
                width: self.width,
                height: self.height,
                format,
            });
        }
        if self.flush
            && (self.backing.kind() == BackingKind::Mapped
                || self.chroma.map(|c| c.kind()) == Some(BackingKind::Mapped))
        {
            return Err(ImageError::FlushOnMapped);
        }

        let luma_size = format.luma_size(self.stride, self.height);
        let chroma_size = format.chroma_size(self.stride, self.height);

        let chroma = match (format.plane_count(), self.chroma) {
            (1, Some(_)) => return Err(ImageError::UnexpectedChroma(format)),
            (1, None) => {
                check_coverage("primary", luma_size, &self.backing)?;
                None
            }
            (_, None) => {
                check_coverage("luma+chroma", luma_size + chroma_size, &self.backing)?;
                Some(self.backing.plane(luma_size))
            }
            (_, Some(chroma)) => {
                if Arc::ptr_eq(chroma.gem(), self.backing.gem()) {
                    return Err(ImageError::ChromaAliasesLuma);
                }
                check_coverage("luma", luma_size, &self.backing)?;
                check_coverage("chroma", chroma_size, &chroma)?;
                Some(chroma.plane(0))
            }
        };

        Ok(Surface {
            width: self.width,
            height: self.height,
            stride: self.stride,
            format,
            luma: self.backing.plane(0),
            chroma,
            flush: self.flush,
        })
    }
}

fn check_coverage(plane: &'static str, needed: usize, backing: &Backing<'_>) -> Result<(), ImageError> {
    let available = backing.len();
    if needed > available {
        return Err(ImageError::BackingTooSmall {
            plane,
            needed,
            available,
        });
    }
    Ok(())
}

impl fmt::Debug for RgaImage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgaImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("backing", &self.backing.kind())
            .field("gem", &self.backing.gem().handle())
            .field("fill_color", &format_args!("{:#010x}", self.fill_color))
            .field("flush", &self.flush)
            .finish()
    }
}
