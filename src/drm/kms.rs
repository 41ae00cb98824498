//! Kernel mode setting objects and mode discovery.
//!
//! A connector is a physical output, an encoder converts the pixel stream
//! for it and a CRTC scans a framebuffer out through the encoder. The
//! device keeps the framebuffer table and the per-CRTC scanout state.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info};

use crate::drm::device::{DrmDevice, GemObject};
use crate::drm::display::DisplayError;
use crate::format::PixelFormat;

/// A display mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeInfo {
    /// Mode name, e.g. "1920x1080".
    pub name: String,
    pub hdisplay: u32,
    pub vdisplay: u32,
    pub vrefresh: u32,
}

impl ModeInfo {
    #[must_use]
    pub fn new(width: u32, height: u32, refresh: u32) -> Self {
        Self {
            name: format!("{}x{}", width, height),
            hdisplay: width,
            vdisplay: height,
            vrefresh: refresh,
        }
    }
}

impl fmt::Display for ModeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.vrefresh)
    }
}

/// A physical output.
#[derive(Debug, Clone)]
pub struct Connector {
    pub id: u32,
    /// Currently attached encoder.
    pub encoder_id: Option<u32>,
    /// Compatible encoders.
    pub encoder_ids: Vec<u32>,
    pub modes: Vec<ModeInfo>,
}

#[derive(Debug, Clone)]
pub struct Encoder {
    pub id: u32,
    /// CRTC currently driving the encoder.
    pub crtc_id: Option<u32>,
    /// CRTCs able to drive the encoder.
    pub possible_crtcs: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crtc {
    pub id: u32,
}

/// Connectors, encoders and CRTCs of a device.
#[derive(Debug, Clone, Default)]
pub struct KmsTopology {
    pub connectors: Vec<Connector>,
    pub encoders: Vec<Encoder>,
    pub crtcs: Vec<Crtc>,
}

impl KmsTopology {
    /// One connector wired through one encoder to one CRTC.
    ///
    /// `modes` are `(width, height, refresh)` triples, preferred mode first.
    #[must_use]
    pub fn single_output(
        connector_id: u32,
        encoder_id: u32,
        crtc_id: u32,
        modes: &[(u32, u32, u32)],
    ) -> Self {
        Self {
            connectors: vec![Connector {
                id: connector_id,
                encoder_id: Some(encoder_id),
                encoder_ids: vec![encoder_id],
                modes: modes
                    .iter()
                    .map(|&(w, h, refresh)| ModeInfo::new(w, h, refresh))
                    .collect(),
            }],
            encoders: vec![Encoder {
                id: encoder_id,
                crtc_id: Some(crtc_id),
                possible_crtcs: vec![crtc_id],
            }],
            crtcs: vec![Crtc { id: crtc_id }],
        }
    }

    #[must_use]
    pub fn connector(&self, id: u32) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn encoder(&self, id: u32) -> Option<&Encoder> {
        self.encoders.iter().find(|e| e.id == id)
    }

    #[must_use]
    pub fn crtc(&self, id: u32) -> Option<&Crtc> {
        self.crtcs.iter().find(|c| c.id == id)
    }

    /// Whether `crtc_id` can drive `connector` through any of its encoders.
    #[must_use]
    pub fn can_drive(&self, connector: &Connector, crtc_id: u32) -> bool {
        connector
            .encoder_ids
            .iter()
            .filter_map(|&id| self.encoder(id))
            .any(|e| e.possible_crtcs.contains(&crtc_id))
    }
}

/// Error parsing a `connector[@crtc]:mode` argument.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid connector spec {input:?}: expected <connector_id>[@<crtc_id>]:<mode>")]
pub struct ParseConnectorSpecError {
    pub input: String,
}

/// Output selection as given on the command line: `connector[@crtc]:mode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSpec {
    pub connector_id: u32,
    /// Explicit CRTC, otherwise the one driving the connector's encoder.
    pub crtc_id: Option<u32>,
    pub mode_name: String,
}

impl FromStr for ConnectorSpec {
    type Err = ParseConnectorSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseConnectorSpecError {
            input: s.to_string(),
        };
        let (ids, mode) = s.split_once(':').ok_or_else(err)?;
        if mode.is_empty() {
            return Err(err());
        }
        let (connector, crtc) = match ids.split_once('@') {
            Some((connector, crtc)) => (connector, Some(crtc)),
            None => (ids, None),
        };
        let connector_id = connector.trim().parse().map_err(|_| err())?;
        let crtc_id = crtc
            .map(|c| c.trim().parse::<u32>())
            .transpose()
            .map_err(|_| err())?;
        Ok(Self {
            connector_id,
            crtc_id,
            mode_name: mode.to_string(),
        })
    }
}

impl fmt::Display for ConnectorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.connector_id)?;
        if let Some(crtc) = self.crtc_id {
            write!(f, "@{}", crtc)?;
        }
        write!(f, ":{}", self.mode_name)
    }
}

/// A resolved connector, CRTC and mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSelection {
    pub connector_id: u32,
    pub crtc_id: u32,
    pub mode: ModeInfo,
}

/// Resolve `spec` against the device's KMS resources.
pub fn find_mode(device: &DrmDevice, spec: &ConnectorSpec) -> Result<ModeSelection, DisplayError> {
    let topology = &device.config().topology;

    let connector = topology.connector(spec.connector_id).ok_or_else(|| {
        DisplayError::Modeset(format!("could not find connector {}", spec.connector_id))
    })?;

    let mode = connector
        .modes
        .iter()
        .find(|m| m.name == spec.mode_name)
        .ok_or_else(|| {
            DisplayError::Modeset(format!(
                "failed to find mode \"{}\" on connector {}",
                spec.mode_name, connector.id
            ))
        })?;

    let encoder = connector
        .encoder_id
        .and_then(|id| topology.encoder(id))
        .ok_or_else(|| {
            DisplayError::Modeset(format!("no encoder attached to connector {}", connector.id))
        })?;

    let crtc_id = match spec.crtc_id {
        Some(id) => id,
        None => encoder.crtc_id.ok_or_else(|| {
            DisplayError::Modeset(format!("encoder {} is not driven by any CRTC", encoder.id))
        })?,
    };

    debug!(
        "selected connector {} crtc {} mode {}",
        connector.id, crtc_id, mode
    );
    Ok(ModeSelection {
        connector_id: connector.id,
        crtc_id,
        mode: mode.clone(),
    })
}

/// A registered framebuffer.
#[derive(Debug, Clone)]
pub(crate) struct Framebuffer {
    pub(crate) gem: Arc<GemObject>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) format: PixelFormat,
    pub(crate) pitches: [u32; 2],
    pub(crate) offsets: [u32; 2],
}

/// Scanout state of an enabled CRTC.
#[derive(Debug, Clone)]
pub(crate) struct CrtcBinding {
    pub(crate) fb_id: u32,
    pub(crate) connector_id: u32,
    pub(crate) mode: ModeInfo,
}

fn fb_err(msg: String) -> DisplayError {
    DisplayError::Framebuffer(msg)
}

impl DrmDevice {
    /// Register `fb` and return its id.
    pub(crate) fn add_framebuffer(&self, fb: Framebuffer) -> Result<u32, DisplayError> {
        let caps = self.config().display;
        if fb.width == 0 || fb.height == 0 {
            return Err(fb_err(format!("empty framebuffer {}x{}", fb.width, fb.height)));
        }
        if fb.width > caps.max_width || fb.height > caps.max_height {
            return Err(fb_err(format!(
                "{}x{} exceeds display limit {}x{}",
                fb.width, fb.height, caps.max_width, caps.max_height
            )));
        }
        if fb.format.is_yuv() && (fb.width % 2 != 0 || fb.height % 2 != 0) {
            return Err(fb_err(format!(
                "{} requires even dimensions, got {}x{}",
                fb.format, fb.width, fb.height
            )));
        }

        let planes = fb.format.plane_count();
        for plane in 0..planes {
            let pitch = fb.pitches[plane];
            let rows = if plane == 0 {
                fb.height
            } else {
                fb.format.chroma_rows(fb.height)
            };
            if pitch % caps.pitch_align != 0 {
                return Err(fb_err(format!(
                    "plane {} pitch {} is not aligned to {}",
                    plane, pitch, caps.pitch_align
                )));
            }
            if fb.format.min_stride(fb.width).map_or(true, |min| pitch < min) {
                return Err(fb_err(format!(
                    "plane {} pitch {} is too small for width {}",
                    plane, pitch, fb.width
                )));
            }
            let end = fb.offsets[plane] as usize + pitch as usize * rows as usize;
            if end > fb.gem.size() {
                return Err(fb_err(format!(
                    "plane {} needs {} bytes, buffer {} has {}",
                    plane,
                    end,
                    fb.gem.handle(),
                    fb.gem.size()
                )));
            }
        }

        let mut state = self.state.lock();
        let id = state.next_fb_id;
        state.next_fb_id += 1;
        debug!(
            "add fb {}: {}x{} {} pitches {:?} offsets {:?}",
            id, fb.width, fb.height, fb.format, fb.pitches, fb.offsets
        );
        state.framebuffers.insert(id, fb);
        Ok(id)
    }

    /// Point `crtc_id` at framebuffer `fb_id` and drive `connector_id` with `mode`.
    pub(crate) fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        connector_id: u32,
        mode: &ModeInfo,
    ) -> Result<(), DisplayError> {
        let topology = &self.config().topology;
        let connector = topology
            .connector(connector_id)
            .ok_or_else(|| DisplayError::Modeset(format!("unknown connector {}", connector_id)))?;
        if topology.crtc(crtc_id).is_none() {
            return Err(DisplayError::Modeset(format!("unknown CRTC {}", crtc_id)));
        }
        if !connector.modes.contains(mode) {
            return Err(DisplayError::Modeset(format!(
                "mode {} not supported by connector {}",
                mode, connector_id
            )));
        }
        if !topology.can_drive(connector, crtc_id) {
            return Err(DisplayError::Modeset(format!(
                "CRTC {} cannot drive connector {}",
                crtc_id, connector_id
            )));
        }

        let mut state = self.state.lock();
        let fb = state
            .framebuffers
            .get(&fb_id)
            .ok_or_else(|| fb_err(format!("unknown framebuffer {}", fb_id)))?;
        if fb.width != mode.hdisplay || fb.height != mode.vdisplay {
            return Err(DisplayError::Modeset(format!(
                "framebuffer {} is {}x{}, mode {} needs {}x{}",
                fb_id, fb.width, fb.height, mode.name, mode.hdisplay, mode.vdisplay
            )));
        }

        state.crtc_bindings.insert(
            crtc_id,
            CrtcBinding {
                fb_id,
                connector_id,
                mode: mode.clone(),
            },
        );
        info!(
            "modeset: crtc {} -> connector {} fb {} mode {}",
            crtc_id, connector_id, fb_id, mode
        );
        Ok(())
    }

    /// Remove framebuffer `fb_id`, disabling every CRTC scanning it out.
    pub(crate) fn remove_framebuffer(&self, fb_id: u32) -> Result<(), DisplayError> {
        let mut state = self.state.lock();
        if state.framebuffers.remove(&fb_id).is_none() {
            return Err(fb_err(format!("unknown framebuffer {}", fb_id)));
        }
        state.crtc_bindings.retain(|crtc, binding| {
            let keep = binding.fb_id != fb_id;
            if !keep {
                debug!("crtc {} disabled, fb {} removed", crtc, fb_id);
            }
            keep
        });
        Ok(())
    }

    /// Framebuffer currently scanned out by `crtc_id`.
    pub(crate) fn scanout_framebuffer(&self, crtc_id: u32) -> Option<(CrtcBinding, Framebuffer)> {
        let state = self.state.lock();
        let binding = state.crtc_bindings.get(&crtc_id)?;
        let fb = state.framebuffers.get(&binding.fb_id)?;
        Some((binding.clone(), fb.clone()))
    }

    /// Framebuffer id scanned out by `crtc_id`, if the CRTC is enabled.
    #[must_use]
    pub fn active_framebuffer(&self, crtc_id: u32) -> Option<u32> {
        self.state.lock().crtc_bindings.get(&crtc_id).map(|b| b.fb_id)
    }

    /// Connector driven by `crtc_id`, if the CRTC is enabled.
    #[must_use]
    pub fn active_connector(&self, crtc_id: u32) -> Option<u32> {
        self.state
            .lock()
            .crtc_bindings
            .get(&crtc_id)
            .map(|b| b.connector_id)
    }
}
