//! Operations accepted by the accelerator context.

use std::fmt;

use crate::rga::batch::Command;
use crate::rga::image::{ImageError, RgaImage};
use crate::rga::surface::Surface;

/// Pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// One past the last column, widened so it cannot overflow.
    #[must_use]
    pub const fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    #[must_use]
    pub const fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    #[must_use]
    pub const fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Same origin, width and height swapped.
    #[must_use]
    pub const fn transposed(&self) -> Self {
        Self::new(self.x, self.y, self.height, self.width)
    }

    #[must_use]
    pub const fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width as u64 && self.bottom() <= height as u64
    }

    #[must_use]
    pub const fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && (x as u64) < self.right() && (y as u64) < self.bottom()
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Clockwise rotation angles the engine supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    #[must_use]
    pub const fn degrees(self) -> u32 {
        match self {
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Whether the destination footprint is the transpose of the source.
    #[must_use]
    pub const fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    /// Destination size for a `width` x `height` source.
    #[must_use]
    pub const fn output_size(self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = InvalidOperation;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(InvalidOperation::UnsupportedRotation(other)),
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Alpha compositing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Source over destination using only the global alpha factors.
    #[default]
    ConstantOver,
    /// Source over destination, per-pixel alpha scaled by the global factors.
    PixelOver,
}

/// Blend parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blend {
    pub mode: BlendMode,
    pub src_alpha: u8,
    pub dst_alpha: u8,
}

impl Blend {
    #[must_use]
    pub const fn constant(src_alpha: u8, dst_alpha: u8) -> Self {
        Self {
            mode: BlendMode::ConstantOver,
            src_alpha,
            dst_alpha,
        }
    }

    #[must_use]
    pub const fn per_pixel(src_alpha: u8, dst_alpha: u8) -> Self {
        Self {
            mode: BlendMode::PixelOver,
            src_alpha,
            dst_alpha,
        }
    }
}

/// Reasons an operation is refused at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidOperation {
    #[error("{role} image: {source}")]
    Image {
        role: &'static str,
        #[source]
        source: ImageError,
    },

    #[error("{role} rect is empty")]
    EmptyRect { role: &'static str },

    #[error("{role} rect {rect} exceeds {width}x{height} surface")]
    RectOutOfBounds {
        role: &'static str,
        rect: Rect,
        width: u32,
        height: u32,
    },

    #[error("copy needs equal sizes, got {src} and {dst}")]
    SizeMismatch { src: Rect, dst: Rect },

    #[error("{rotation} rotation of {src} needs a {width}x{height} destination, got {dst}")]
    RotationFootprint {
        rotation: Rotation,
        src: Rect,
        dst: Rect,
        width: u32,
        height: u32,
    },

    #[error("unsupported rotation angle {0}")]
    UnsupportedRotation(u32),
}

/// One accelerator operation over borrowed descriptors.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    SolidFill {
        dst: &'a RgaImage<'a>,
        rect: Rect,
        color: u32,
    },
    Copy {
        src: &'a RgaImage<'a>,
        dst: &'a RgaImage<'a>,
        src_rect: Rect,
        dst_rect: Rect,
    },
    ScaledCopy {
        src: &'a RgaImage<'a>,
        dst: &'a RgaImage<'a>,
        src_rect: Rect,
        dst_rect: Rect,
    },
    RotatedCopy {
        src: &'a RgaImage<'a>,
        dst: &'a RgaImage<'a>,
        src_rect: Rect,
        dst_rect: Rect,
        rotation: Rotation,
    },
    AlphaBlend {
        src: &'a RgaImage<'a>,
        dst: &'a RgaImage<'a>,
        src_rect: Rect,
        dst_rect: Rect,
        blend: Blend,
    },
}

impl Operation<'_> {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SolidFill { .. } => "fill",
            Self::Copy { .. } => "copy",
            Self::ScaledCopy { .. } => "scale",
            Self::RotatedCopy { .. } => "rotate",
            Self::AlphaBlend { .. } => "blend",
        }
    }

    /// Validate the operation and turn it into an engine command.
    pub(crate) fn resolve(&self) -> Result<Command, InvalidOperation> {
        match *self {
            Self::SolidFill { dst, rect, color } => {
                let dst = surface("destination", dst, rect)?;
                Ok(Command::Fill { dst, rect, color })
            }
            Self::Copy {
                src,
                dst,
                src_rect,
                dst_rect,
            } => {
                let (src, dst) = pair(src, dst, src_rect, dst_rect)?;
                if (src_rect.width, src_rect.height) != (dst_rect.width, dst_rect.height) {
                    return Err(InvalidOperation::SizeMismatch {
                        src: src_rect,
                        dst: dst_rect,
                    });
                }
                Ok(Command::Copy {
                    src,
                    dst,
                    src_rect,
                    dst_rect,
                })
            }
            Self::ScaledCopy {
                src,
                dst,
                src_rect,
                dst_rect,
            } => {
                let (src, dst) = pair(src, dst, src_rect, dst_rect)?;
                Ok(Command::Scale {
                    src,
                    dst,
                    src_rect,
                    dst_rect,
                })
            }
            Self::RotatedCopy {
                src,
                dst,
                src_rect,
                dst_rect,
                rotation,
            } => {
                let (src, dst) = pair(src, dst, src_rect, dst_rect)?;
                let (width, height) = rotation.output_size(src_rect.width, src_rect.height);
                if (dst_rect.width, dst_rect.height) != (width, height) {
                    return Err(InvalidOperation::RotationFootprint {
                        rotation,
                        src: src_rect,
                        dst: dst_rect,
                        width,
                        height,
                    });
                }
                Ok(Command::Rotate {
                    src,
                    dst,
                    src_rect,
                    dst_rect,
                    rotation,
                })
            }
            Self::AlphaBlend {
                src,
                dst,
                src_rect,
                dst_rect,
                blend,
            } => {
                let (src, dst) = pair(src, dst, src_rect, dst_rect)?;
                Ok(Command::Blend {
                    src,
                    dst,
                    src_rect,
                    dst_rect,
                    blend,
                })
            }
        }
    }
}

fn surface(role: &'static str, image: &RgaImage<'_>, rect: Rect) -> Result<Surface, InvalidOperation> {
    let surface = image
        .resolve()
        .map_err(|source| InvalidOperation::Image { role, source })?;
    if rect.is_empty() {
        return Err(InvalidOperation::EmptyRect { role });
    }
    if !rect.fits_within(surface.width, surface.height) {
        return Err(InvalidOperation::RectOutOfBounds {
            role,
            rect,
            width: surface.width,
            height: surface.height,
        });
    }
    Ok(surface)
}

fn pair(
    src: &RgaImage<'_>,
    dst: &RgaImage<'_>,
    src_rect: Rect,
    dst_rect: Rect,
) -> Result<(Surface, Surface), InvalidOperation> {
    Ok((
        surface("source", src, src_rect)?,
        surface("destination", dst, dst_rect)?,
    ))
}
