//! DRM device model: GEM buffer objects, PRIME sharing and KMS display.

pub mod bo;
pub mod device;
pub mod display;
pub mod kms;
pub mod prime;

pub use bo::{create_mapped_buffer, AllocFailure, BoError, BoFlags, BufferObject, Mapping};
pub use device::{DeviceConfig, DeviceError, DisplayCaps, DrmDevice, GemObject, DRIVER_NAME};
pub use display::{DisplayError, DisplayTarget, FramebufferId, FramebufferState, ScanoutFrame};
pub use kms::{
    find_mode, Connector, ConnectorSpec, Crtc, Encoder, KmsTopology, ModeInfo, ModeSelection,
    ParseConnectorSpecError,
};
pub use prime::PrimeFd;
