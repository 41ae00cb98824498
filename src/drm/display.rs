//! Display target: framebuffer binding, mode-set and scanout readback.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::drm::bo::BufferObject;
use crate::drm::device::DrmDevice;
use crate::drm::kms::{Framebuffer, ModeInfo, ModeSelection};
use crate::format::{unpack_argb, yuv_to_argb, PixelFormat};

/// Display errors.
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("framebuffer error: {0}")]
    Framebuffer(String),

    #[error("modeset failed: {0}")]
    Modeset(String),

    #[error("failed to write {path}: {source}")]
    Dump {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Id of a framebuffer registered through a [`DisplayTarget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(u32);

impl FramebufferId {
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FramebufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fb{}", self.0)
    }
}

/// Lifecycle of a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferState {
    Bound,
    Presented,
    Released,
}

/// Decoded contents of a scanout.
#[derive(Debug, Clone)]
pub struct ScanoutFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8.
    pub rgba: Vec<u8>,
}

impl ScanoutFrame {
    /// Pixel at `(x, y)` as `0xAARRGGBB`.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let p = &self.rgba[i..i + 4];
        Some(u32::from_be_bytes([p[3], p[0], p[1], p[2]]))
    }

    /// Write the frame as a PNG file.
    pub fn save_png(&self, path: &Path) -> Result<(), DisplayError> {
        let dump_err = |source| DisplayError::Dump {
            path: path.to_path_buf(),
            source,
        };
        let image = image::RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
            .ok_or_else(|| {
                dump_err(image::ImageError::Parameter(
                    image::error::ParameterError::from_kind(
                        image::error::ParameterErrorKind::DimensionMismatch,
                    ),
                ))
            })?;
        image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(dump_err)
    }
}

/// Binds buffer objects as framebuffers and presents them on an output.
pub struct DisplayTarget {
    device: Arc<DrmDevice>,
    framebuffers: HashMap<FramebufferId, FramebufferState>,
}

impl DisplayTarget {
    #[must_use]
    pub fn new(device: &Arc<DrmDevice>) -> Self {
        Self {
            device: Arc::clone(device),
            framebuffers: HashMap::new(),
        }
    }

    /// Register `bo` as a `width` x `height` framebuffer of `format`.
    ///
    /// Both NV12 planes come from the same buffer: luma pitch and chroma
    /// pitch equal the width, chroma starts right after the luma plane.
    pub fn bind(
        &mut self,
        bo: &BufferObject,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<FramebufferId, DisplayError> {
        let layout = format.min_stride(width).and_then(|pitch| match format {
            PixelFormat::Argb8888 => Some(([pitch, 0], [0, 0])),
            PixelFormat::Nv12 => Some(([pitch, pitch], [0, pitch.checked_mul(height)?])),
        });
        let Some((pitches, offsets)) = layout else {
            return Err(DisplayError::Framebuffer(format!(
                "{}x{} {} framebuffer cannot be addressed",
                width, height, format
            )));
        };
        let id = self.device.add_framebuffer(Framebuffer {
            gem: Arc::clone(bo.gem()),
            width,
            height,
            format,
            pitches,
            offsets,
        })?;
        let id = FramebufferId(id);
        self.framebuffers.insert(id, FramebufferState::Bound);
        Ok(id)
    }

    /// Mode-set `fb` onto `connector_id` through `crtc_id`.
    ///
    /// May be repeated to re-commit after the buffer contents changed.
    pub fn present(
        &mut self,
        fb: FramebufferId,
        connector_id: u32,
        crtc_id: u32,
        mode: &ModeInfo,
    ) -> Result<(), DisplayError> {
        match self.framebuffers.get(&fb) {
            Some(FramebufferState::Bound | FramebufferState::Presented) => {}
            Some(FramebufferState::Released) => {
                return Err(DisplayError::Framebuffer(format!("{} was released", fb)));
            }
            None => {
                return Err(DisplayError::Framebuffer(format!(
                    "{} is not bound to this display",
                    fb
                )));
            }
        }
        self.device.set_crtc(crtc_id, fb.0, connector_id, mode)?;
        self.framebuffers.insert(fb, FramebufferState::Presented);
        Ok(())
    }

    /// [`present`](Self::present) on a resolved selection.
    pub fn present_on(&mut self, fb: FramebufferId, sel: &ModeSelection) -> Result<(), DisplayError> {
        self.present(fb, sel.connector_id, sel.crtc_id, &sel.mode)
    }

    /// Remove `fb`. The buffer object itself stays allocated.
    pub fn release(&mut self, fb: FramebufferId) -> Result<(), DisplayError> {
        match self.framebuffers.get(&fb) {
            Some(FramebufferState::Bound | FramebufferState::Presented) => {
                self.device.remove_framebuffer(fb.0)?;
                self.framebuffers.insert(fb, FramebufferState::Released);
                debug!("released {}", fb);
                Ok(())
            }
            Some(FramebufferState::Released) => Err(DisplayError::Framebuffer(format!(
                "{} was already released",
                fb
            ))),
            None => Err(DisplayError::Framebuffer(format!(
                "{} is not bound to this display",
                fb
            ))),
        }
    }

    #[must_use]
    pub fn state(&self, fb: FramebufferId) -> Option<FramebufferState> {
        self.framebuffers.get(&fb).copied()
    }

    /// Decode what `crtc_id` currently scans out.
    pub fn read_scanout(&self, crtc_id: u32) -> Result<ScanoutFrame, DisplayError> {
        let (_, fb) = self
            .device
            .scanout_framebuffer(crtc_id)
            .ok_or_else(|| DisplayError::Modeset(format!("CRTC {} is disabled", crtc_id)))?;
        Ok(decode_framebuffer(&fb))
    }

    /// Write the scanout of `crtc_id` to `path` as PNG.
    pub fn dump_png(&self, crtc_id: u32, path: &Path) -> Result<(), DisplayError> {
        let frame = self.read_scanout(crtc_id)?;
        frame.save_png(path)?;
        debug!("dumped crtc {} to {}", crtc_id, path.display());
        Ok(())
    }
}

impl Drop for DisplayTarget {
    fn drop(&mut self) {
        for (fb, state) in &self.framebuffers {
            if *state != FramebufferState::Released {
                if let Err(err) = self.device.remove_framebuffer(fb.0) {
                    warn!("failed to remove {}: {}", fb, err);
                }
            }
        }
    }
}

fn decode_framebuffer(fb: &Framebuffer) -> ScanoutFrame {
    let (w, h) = (fb.width as usize, fb.height as usize);
    let mut rgba = Vec::with_capacity(w * h * 4);
    fb.gem.with_bytes(|bytes| {
        for y in 0..h {
            for x in 0..w {
                let argb = match fb.format {
                    PixelFormat::Argb8888 => {
                        let i = fb.offsets[0] as usize + y * fb.pitches[0] as usize + x * 4;
                        u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
                    }
                    PixelFormat::Nv12 => {
                        let luma = bytes[fb.offsets[0] as usize + y * fb.pitches[0] as usize + x];
                        let c = fb.offsets[1] as usize
                            + (y / 2) * fb.pitches[1] as usize
                            + (x / 2) * 2;
                        yuv_to_argb(luma, bytes[c], bytes[c + 1])
                    }
                };
                let [a, r, g, b] = unpack_argb(argb);
                rgba.extend_from_slice(&[r, g, b, a]);
            }
        }
    });
    ScanoutFrame {
        width: fb.width,
        height: fb.height,
        rgba,
    }
}
