//! PRIME handles: shareable references to buffer memory.

use std::fmt;
use std::sync::Arc;

use crate::drm::device::{DrmDevice, GemObject};

/// An exported, shareable buffer handle.
///
/// Holds its own reference to the buffer memory, so it stays usable after
/// the originating `BufferObject` is destroyed. The handle is released
/// exactly once, by [`PrimeFd::close`] or on drop.
pub struct PrimeFd {
    fd: i32,
    gem: Arc<GemObject>,
    device: Arc<DrmDevice>,
}

impl PrimeFd {
    pub(crate) fn new(fd: i32, gem: Arc<GemObject>, device: Arc<DrmDevice>) -> Self {
        Self { fd, gem, device }
    }

    /// File descriptor number of the handle.
    #[must_use]
    pub fn fd(&self) -> i32 {
        self.fd
    }

    /// Size of the shared memory in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.gem.size()
    }

    /// GEM handle the export was made from.
    #[must_use]
    pub fn gem_handle(&self) -> u32 {
        self.gem.handle()
    }

    /// Number of cache syncs the shared memory has received.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.gem.sync_count()
    }

    pub(crate) fn gem(&self) -> &Arc<GemObject> {
        &self.gem
    }

    /// Run `f` over the shared bytes.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.gem.with_bytes(f)
    }

    /// Release the handle.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for PrimeFd {
    fn drop(&mut self) {
        self.device.prime_close(self.fd);
    }
}

impl fmt::Debug for PrimeFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimeFd")
            .field("fd", &self.fd)
            .field("gem_handle", &self.gem.handle())
            .finish()
    }
}
