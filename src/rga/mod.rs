//! 2D raster accelerator: image descriptors, operations and command batches.

pub mod batch;
pub mod context;
pub mod engine;
pub mod image;
pub mod ops;
pub mod raster;
pub mod surface;

pub use batch::{BatchConfig, BatchStats, Command};
pub use context::{RgaContext, RgaError};
pub use engine::{Engine, EngineFault, SoftEngine};
pub use image::{Backing, BackingKind, ImageError, RgaImage};
pub use ops::{Blend, BlendMode, InvalidOperation, Operation, Rect, Rotation};
pub use raster::composite;
pub use surface::{PlaneRef, Surface};
