//! Software model of an opened DRM device node.
//!
//! The device owns every kernel-side object the pipeline talks to:
//!
//! - the GEM object table (handles, backing memory, memory accounting),
//! - the PRIME handle table (exported, shareable buffer references),
//! - the KMS topology and the framebuffer / CRTC state (see [`super::kms`]),
//! - the exclusive claim on the 2D engine.
//!
//! All tables live behind one `parking_lot::Mutex`; buffer memory is guarded
//! per object so the engine can read one buffer while writing another.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};

use crate::drm::bo::{AllocFailure, BoError, BoFlags};
use crate::drm::kms::{CrtcBinding, Framebuffer, KmsTopology};

/// Driver name accepted by [`DrmDevice::open`].
pub const DRIVER_NAME: &str = "rockchip";

/// Errors raised while opening a device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("no DRM driver named {0:?}")]
    UnknownDriver(String),

    #[error("invalid device configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Limits of the scanout pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayCaps {
    pub max_width: u32,
    pub max_height: u32,
    /// Required alignment of every framebuffer pitch, in bytes.
    pub pitch_align: u32,
}

impl Default for DisplayCaps {
    fn default() -> Self {
        Self {
            max_width: 4096,
            max_height: 4096,
            pitch_align: 2,
        }
    }
}

/// Static description of the modelled hardware.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Bytes of buffer memory the device can hand out.
    pub memory_limit: u64,
    /// Maximum number of simultaneously open PRIME handles.
    pub max_prime_fds: usize,
    /// Whether the device exposes a 2D raster engine.
    pub has_rga: bool,
    pub display: DisplayCaps,
    pub topology: KmsTopology,
}

impl DeviceConfig {
    /// One HDMI output with 1080p, 720p and VGA modes, 256 MiB of memory.
    #[must_use]
    pub fn rockchip_default() -> Self {
        Self {
            memory_limit: 256 * 1024 * 1024,
            max_prime_fds: 1024,
            has_rga: true,
            display: DisplayCaps::default(),
            topology: KmsTopology::single_output(
                31,
                30,
                29,
                &[(1920, 1080, 60), (1280, 720, 60), (640, 480, 60)],
            ),
        }
    }

    /// Same device with a single mode of the given size.
    #[must_use]
    pub fn with_single_mode(width: u32, height: u32) -> Self {
        Self {
            topology: KmsTopology::single_output(31, 30, 29, &[(width, height, 60)]),
            ..Self::rockchip_default()
        }
    }

    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.memory_limit == 0 {
            return Err(DeviceError::InvalidConfig("memory limit must be non-zero"));
        }
        if self.display.pitch_align == 0 {
            return Err(DeviceError::InvalidConfig("pitch alignment must be non-zero"));
        }
        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::rockchip_default()
    }
}

/// Kernel side of a buffer object.
///
/// Shared by the owning `BufferObject`, every `PrimeFd` exported from it,
/// framebuffers built on it and pending engine commands. Closing the GEM
/// handle does not free the memory while such references remain.
pub struct GemObject {
    handle: u32,
    size: usize,
    flags: BoFlags,
    data: Mutex<Vec<u8>>,
    closed: AtomicBool,
    syncs: AtomicU64,
}

impl GemObject {
    fn new(handle: u32, size: usize, flags: BoFlags) -> Self {
        Self {
            handle,
            size,
            flags,
            data: Mutex::new(vec![0; size]),
            closed: AtomicBool::new(false),
            syncs: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn handle(&self) -> u32 {
        self.handle
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn flags(&self) -> BoFlags {
        self.flags
    }

    /// Whether the GEM handle has been closed by its owner.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of cache syncs performed on completion of engine jobs.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    pub(crate) fn sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock()
    }

    /// Run `f` over the buffer contents.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock())
    }

    /// Run `f` over the mutable buffer contents.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.lock())
    }
}

impl fmt::Debug for GemObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GemObject")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Mutable tables of the device.
pub(crate) struct DeviceState {
    pub(crate) gem_objects: HashMap<u32, Arc<GemObject>>,
    next_handle: u32,
    resident_bytes: u64,
    prime_fds: HashMap<i32, u32>,
    next_fd: i32,
    pub(crate) framebuffers: HashMap<u32, Framebuffer>,
    pub(crate) next_fb_id: u32,
    pub(crate) crtc_bindings: HashMap<u32, CrtcBinding>,
    engine_claimed: bool,
}

impl DeviceState {
    // Low ids are taken by connectors, encoders and CRTCs.
    const FIRST_FB_ID: u32 = 64;
    const FIRST_FD: i32 = 3;

    fn new() -> Self {
        Self {
            gem_objects: HashMap::new(),
            next_handle: 1,
            resident_bytes: 0,
            prime_fds: HashMap::new(),
            next_fd: Self::FIRST_FD,
            framebuffers: HashMap::new(),
            next_fb_id: Self::FIRST_FB_ID,
            crtc_bindings: HashMap::new(),
            engine_claimed: false,
        }
    }

    fn alloc_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        handle
    }

    fn alloc_fd(&mut self) -> i32 {
        while self.prime_fds.contains_key(&self.next_fd) {
            self.next_fd += 1;
        }
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }
}

/// An opened DRM device.
pub struct DrmDevice {
    name: String,
    config: DeviceConfig,
    pub(crate) state: Mutex<DeviceState>,
}

impl DrmDevice {
    /// Open the device driven by `driver`.
    pub fn open(driver: &str, config: DeviceConfig) -> Result<Arc<Self>, DeviceError> {
        if driver != DRIVER_NAME {
            return Err(DeviceError::UnknownDriver(driver.to_string()));
        }
        config.validate()?;
        info!(
            "opened DRM device {} ({} MiB, rga: {})",
            driver,
            config.memory_limit / (1024 * 1024),
            config.has_rga
        );
        Ok(Arc::new(Self {
            name: driver.to_string(),
            config,
            state: Mutex::new(DeviceState::new()),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Bytes currently accounted to open GEM handles.
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        self.state.lock().resident_bytes
    }

    /// Number of open GEM handles.
    #[must_use]
    pub fn gem_count(&self) -> usize {
        self.state.lock().gem_objects.len()
    }

    /// Number of open PRIME handles.
    #[must_use]
    pub fn open_prime_fds(&self) -> usize {
        self.state.lock().prime_fds.len()
    }

    pub(crate) fn gem_create(&self, size: usize, flags: BoFlags) -> Result<Arc<GemObject>, BoError> {
        if size == 0 {
            return Err(BoError::Allocation {
                size,
                reason: AllocFailure::ZeroSize,
            });
        }
        if flags.contains(BoFlags::CACHABLE | BoFlags::WRITE_COMBINE) {
            return Err(BoError::Allocation {
                size,
                reason: AllocFailure::UnsupportedFlags(flags),
            });
        }

        let mut state = self.state.lock();
        let available = self.config.memory_limit.saturating_sub(state.resident_bytes);
        if size as u64 > available {
            return Err(BoError::Allocation {
                size,
                reason: AllocFailure::OutOfMemory { available },
            });
        }

        let handle = state.alloc_handle();
        let gem = Arc::new(GemObject::new(handle, size, flags));
        state.gem_objects.insert(handle, Arc::clone(&gem));
        state.resident_bytes += size as u64;
        debug!("gem create: handle={} size={} flags={:?}", handle, size, flags);
        Ok(gem)
    }

    pub(crate) fn gem_close(&self, handle: u32) {
        let mut state = self.state.lock();
        if let Some(gem) = state.gem_objects.remove(&handle) {
            gem.closed.store(true, Ordering::Release);
            state.resident_bytes = state.resident_bytes.saturating_sub(gem.size as u64);
            debug!("gem close: handle={}", handle);
        }
    }

    pub(crate) fn prime_handle_to_fd(&self, gem: &GemObject) -> Result<i32, BoError> {
        let mut state = self.state.lock();
        if !state.gem_objects.contains_key(&gem.handle) {
            return Err(BoError::Export {
                handle: gem.handle,
                reason: "GEM handle is not open on this device",
            });
        }
        if state.prime_fds.len() >= self.config.max_prime_fds {
            return Err(BoError::Export {
                handle: gem.handle,
                reason: "too many open PRIME handles",
            });
        }
        let fd = state.alloc_fd();
        state.prime_fds.insert(fd, gem.handle);
        debug!("prime export: handle={} fd={}", gem.handle, fd);
        Ok(fd)
    }

    pub(crate) fn prime_close(&self, fd: i32) {
        let mut state = self.state.lock();
        if state.prime_fds.remove(&fd).is_some() {
            debug!("prime close: fd={}", fd);
            if fd < state.next_fd {
                state.next_fd = fd.max(DeviceState::FIRST_FD);
            }
        }
    }

    /// Take the exclusive claim on the 2D engine.
    pub(crate) fn claim_engine(&self) -> bool {
        let mut state = self.state.lock();
        if !self.config.has_rga || state.engine_claimed {
            return false;
        }
        state.engine_claimed = true;
        true
    }

    pub(crate) fn release_engine(&self) {
        self.state.lock().engine_claimed = false;
    }
}

impl fmt::Debug for DrmDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrmDevice").field("name", &self.name).finish_non_exhaustive()
    }
}
