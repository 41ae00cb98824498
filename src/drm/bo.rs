//! Buffer objects: GEM allocations with CPU mappings and PRIME export.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use log::{debug, warn};

use crate::drm::device::{DrmDevice, GemObject};
use crate::drm::prime::PrimeFd;

bitflags! {
    /// Allocation flags understood by the GEM allocator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BoFlags: u32 {
        /// Physically contiguous memory.
        const CONTIG = 1 << 0;
        /// CPU-cached mapping.
        const CACHABLE = 1 << 1;
        /// Write-combined mapping.
        const WRITE_COMBINE = 1 << 2;
        /// Device-only memory, never CPU mappable.
        const SECURE = 1 << 3;
    }
}

/// Why an allocation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocFailure {
    #[error("size is zero")]
    ZeroSize,

    #[error("out of device memory ({available} bytes available)")]
    OutOfMemory { available: u64 },

    #[error("unsupported flag combination {0:?}")]
    UnsupportedFlags(BoFlags),
}

/// Buffer object errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoError {
    #[error("allocation of {size} bytes failed: {reason}")]
    Allocation { size: usize, reason: AllocFailure },

    #[error("cannot map buffer {handle}: {reason}")]
    Map { handle: u32, reason: &'static str },

    #[error("cannot export buffer {handle}: {reason}")]
    Export { handle: u32, reason: &'static str },
}

/// One allocation of device memory.
///
/// The GEM handle is closed when the object is destroyed or dropped.
/// Framebuffers and [`PrimeFd`]s created from it keep the memory itself
/// alive, the same way dma-buf references do.
pub struct BufferObject {
    device: Arc<DrmDevice>,
    gem: Arc<GemObject>,
}

impl BufferObject {
    /// Allocate `size` bytes on `device`.
    pub fn create(device: &Arc<DrmDevice>, size: usize, flags: BoFlags) -> Result<Self, BoError> {
        let gem = device.gem_create(size, flags)?;
        Ok(Self {
            device: Arc::clone(device),
            gem,
        })
    }

    #[must_use]
    pub fn handle(&self) -> u32 {
        self.gem.handle()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.gem.size()
    }

    #[must_use]
    pub fn flags(&self) -> BoFlags {
        self.gem.flags()
    }

    #[must_use]
    pub fn device(&self) -> &Arc<DrmDevice> {
        &self.device
    }

    pub(crate) fn gem(&self) -> &Arc<GemObject> {
        &self.gem
    }

    /// Map the buffer for CPU access.
    ///
    /// The mapping borrows the buffer object, so it cannot be destroyed while
    /// any mapping is alive.
    pub fn map(&self) -> Result<Mapping<'_>, BoError> {
        if self.flags().contains(BoFlags::SECURE) {
            return Err(BoError::Map {
                handle: self.handle(),
                reason: "secure buffers are not CPU mappable",
            });
        }
        Ok(Mapping { bo: self })
    }

    /// Export a new PRIME handle for the buffer.
    ///
    /// Every call yields an independent handle, released when it is closed
    /// or dropped.
    pub fn export(&self) -> Result<PrimeFd, BoError> {
        let fd = self.device.prime_handle_to_fd(&self.gem)?;
        Ok(PrimeFd::new(fd, Arc::clone(&self.gem), Arc::clone(&self.device)))
    }

    /// Close the GEM handle and release the memory accounting.
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        self.device.gem_close(self.gem.handle());
    }
}

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("handle", &self.handle())
            .field("size", &self.size())
            .field("flags", &self.flags())
            .finish()
    }
}

/// CPU view of a mapped buffer object.
#[derive(Clone, Copy)]
pub struct Mapping<'bo> {
    bo: &'bo BufferObject,
}

impl<'bo> Mapping<'bo> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.bo.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn buffer(&self) -> &'bo BufferObject {
        self.bo
    }

    pub(crate) fn gem(&self) -> &'bo Arc<GemObject> {
        self.bo.gem()
    }

    /// Run `f` over the mapped bytes.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.bo.gem.with_bytes(f)
    }

    /// Run `f` over the mapped bytes, mutably.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.bo.gem.with_bytes_mut(f)
    }

    /// Copy of the mapped bytes.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.read(<[u8]>::to_vec)
    }

    /// Little-endian `u32` at byte offset `offset`, if in range.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        self.read(|bytes| {
            let word = bytes.get(offset..offset.checked_add(4)?)?;
            Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        })
    }
}

impl fmt::Debug for Mapping<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("handle", &self.bo.handle())
            .field("len", &self.len())
            .finish()
    }
}

/// Allocate a buffer and check that it can be mapped.
///
/// The allocation is destroyed again when it cannot be mapped.
pub fn create_mapped_buffer(
    device: &Arc<DrmDevice>,
    size: usize,
    flags: BoFlags,
) -> Result<BufferObject, BoError> {
    let bo = BufferObject::create(device, size, flags)?;
    if let Err(err) = bo.map() {
        warn!("failed to map buffer {}: {}", bo.handle(), err);
        bo.destroy();
        return Err(err);
    }
    debug!("created mapped buffer {} ({} bytes)", bo.handle(), bo.size());
    Ok(bo)
}
