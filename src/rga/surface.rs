//! Resolved surfaces as the engine sees them.

use std::fmt;
use std::sync::Arc;

use crate::drm::GemObject;
use crate::format::PixelFormat;

/// One memory plane of a surface.
#[derive(Clone)]
pub struct PlaneRef {
    pub(crate) gem: Arc<GemObject>,
    pub(crate) offset: usize,
    /// The plane is reached through a mapping and dies with its GEM handle.
    pub(crate) requires_open: bool,
}

impl PlaneRef {
    #[must_use]
    pub fn gem(&self) -> &Arc<GemObject> {
        &self.gem
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the memory behind the plane has been released.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.requires_open && self.gem.is_closed()
    }
}

impl fmt::Debug for PlaneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gem{}+{}", self.gem.handle(), self.offset)
    }
}

/// A validated image descriptor holding its own references to the memory.
///
/// Commands keep surfaces instead of descriptors so a batch does not borrow
/// the caller's mappings.
#[derive(Debug, Clone)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub luma: PlaneRef,
    pub chroma: Option<PlaneRef>,
    pub flush: bool,
}

impl Surface {
    fn luma_len(&self) -> usize {
        self.format.luma_size(self.stride, self.height)
    }

    fn chroma_len(&self) -> usize {
        self.format.chroma_size(self.stride, self.height)
    }

    /// Planes of the surface.
    pub fn planes(&self) -> impl Iterator<Item = &PlaneRef> {
        std::iter::once(&self.luma).chain(self.chroma.as_ref())
    }

    /// First plane whose memory has been released.
    #[must_use]
    pub fn stale_plane(&self) -> Option<&PlaneRef> {
        self.planes().find(|p| p.is_stale())
    }

    /// Run `f` over the plane bytes, each slice starting at its plane.
    pub fn with_planes<R>(&self, f: impl FnOnce(&[u8], Option<&[u8]>) -> R) -> R {
        let luma_len = self.luma_len();
        let luma_off = self.luma.offset;
        match &self.chroma {
            None => {
                let bytes = self.luma.gem.lock();
                f(&bytes[luma_off..luma_off + luma_len], None)
            }
            Some(chroma) if Arc::ptr_eq(&chroma.gem, &self.luma.gem) => {
                let bytes = self.luma.gem.lock();
                let c = &bytes[chroma.offset..chroma.offset + self.chroma_len()];
                f(&bytes[luma_off..luma_off + luma_len], Some(c))
            }
            Some(chroma) => {
                let luma = self.luma.gem.lock();
                let c = chroma.gem.lock();
                f(
                    &luma[luma_off..luma_off + luma_len],
                    Some(&c[chroma.offset..chroma.offset + self.chroma_len()]),
                )
            }
        }
    }

    /// Mutable counterpart of [`with_planes`](Self::with_planes).
    pub fn with_planes_mut<R>(&self, f: impl FnOnce(&mut [u8], Option<&mut [u8]>) -> R) -> R {
        let luma_len = self.luma_len();
        let chroma_len = self.chroma_len();
        let luma_off = self.luma.offset;
        match &self.chroma {
            None => {
                let mut bytes = self.luma.gem.lock();
                f(&mut bytes[luma_off..luma_off + luma_len], None)
            }
            Some(chroma) if Arc::ptr_eq(&chroma.gem, &self.luma.gem) => {
                // Chroma follows luma in the same buffer.
                let mut bytes = self.luma.gem.lock();
                let (head, tail) = bytes.split_at_mut(chroma.offset);
                f(
                    &mut head[luma_off..luma_off + luma_len],
                    Some(&mut tail[..chroma_len]),
                )
            }
            Some(chroma) => {
                let mut luma = self.luma.gem.lock();
                let mut c = chroma.gem.lock();
                f(
                    &mut luma[luma_off..luma_off + luma_len],
                    Some(&mut c[chroma.offset..chroma.offset + chroma_len]),
                )
            }
        }
    }
}
