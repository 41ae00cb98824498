// Rockchip RGA test library
// Software model of the 2D raster accelerator and its DRM display path

pub mod cli;
pub mod config;
pub mod drm;
pub mod format;
pub mod logging;
pub mod rga;
pub mod scenario;

pub use cli::Cli;
pub use config::Options;
pub use format::PixelFormat;
pub use logging::LogLevel;
