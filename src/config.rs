//! Run options, from `rga.cfg` and the command line.
//!
//! The config file is a property file: `key = value` lines, `#` starts a
//! comment. Command-line values are merged on top (see [`crate::cli`]).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;

use crate::drm::{ConnectorSpec, DeviceConfig, DRIVER_NAME};
use crate::logging::LogLevel;
use crate::rga::BatchConfig;

/// Errors reading `rga.cfg`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Options that can be set via CLI or config file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    // Commandline-only options
    pub connector: Option<ConnectorSpec>,
    pub dump: Option<PathBuf>,
    pub seed: Option<u64>,
    pub log_file: Option<String>,

    // Commandline and config file options
    pub driver: Option<String>,
    pub memory_limit: Option<u64>,
    pub max_commands: Option<usize>,
    pub iterations: Option<u32>,
    pub pause: Option<bool>,
    pub blend_src: Option<Resolution>,
    pub blend_dst: Option<Resolution>,
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Options {
    pub const DEFAULT_ITERATIONS: u32 = 10;
    pub const DEFAULT_BLEND_SRC: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
    pub const DEFAULT_BLEND_DST: Resolution = Resolution {
        width: 3840,
        height: 2160,
    };

    #[must_use]
    pub fn driver(&self) -> &str {
        self.driver.as_deref().unwrap_or(DRIVER_NAME)
    }

    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations.unwrap_or(Self::DEFAULT_ITERATIONS)
    }

    #[must_use]
    pub fn pause(&self) -> bool {
        self.pause.unwrap_or(true)
    }

    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        self.log_level.unwrap_or_default()
    }

    #[must_use]
    pub fn blend_src(&self) -> Resolution {
        self.blend_src.unwrap_or(Self::DEFAULT_BLEND_SRC)
    }

    #[must_use]
    pub fn blend_dst(&self) -> Resolution {
        self.blend_dst.unwrap_or(Self::DEFAULT_BLEND_DST)
    }

    /// Device description with the configured overrides applied.
    #[must_use]
    pub fn device_config(&self) -> DeviceConfig {
        let mut config = DeviceConfig::rockchip_default();
        if let Some(limit) = self.memory_limit {
            config.memory_limit = limit;
        }
        config
    }

    #[must_use]
    pub fn batch_config(&self) -> BatchConfig {
        self.max_commands
            .map_or_else(BatchConfig::standard, BatchConfig::with_max_commands)
    }

    /// Apply one `key = value` entry from the config file.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason,
        };
        match key {
            "device.driver" => self.driver = Some(value.to_string()),
            "device.memory_limit" => {
                self.memory_limit = Some(parse_byte_size(value).map_err(|e| invalid(format!("{e:#}")))?);
            }
            "batch.max_commands" => {
                self.max_commands = Some(value.parse().map_err(|e| invalid(format!("{e}")))?);
            }
            "test.iterations" => {
                let iterations: u32 = value.parse().map_err(|e| invalid(format!("{e}")))?;
                if iterations == 0 {
                    return Err(invalid("must be at least 1".to_string()));
                }
                self.iterations = Some(iterations);
            }
            "test.pause" => self.pause = Some(parse_bool(value).map_err(invalid)?),
            "test.blend_src" => {
                self.blend_src = Some(parse_resolution(value).map_err(|e| invalid(format!("{e:#}")))?);
            }
            "test.blend_dst" => {
                self.blend_dst = Some(parse_resolution(value).map_err(|e| invalid(format!("{e:#}")))?);
            }
            "log.level" => self.log_level = Some(value.parse().map_err(invalid)?),
            _ => warn!("ignoring unknown config key {}", key),
        }
        Ok(())
    }
}

/// Split property file text into `(key, value)` pairs.
///
/// Blank lines and `#` comments are skipped, keys and values are trimmed and
/// a trailing `#` comment ends the value. Lines without `=` are dropped with
/// a warning.
pub fn parse_propfile(data: &str, handler: &mut dyn FnMut(&str, &str)) {
    for (lineno, raw) in data.lines().enumerate() {
        let line = match raw.find('#') {
            Some(hash) => &raw[..hash],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => handler(key.trim(), value.trim()),
            _ => warn!("rga.cfg line {}: key without value", lineno + 1),
        }
    }
}

/// Parse config file text into options.
pub fn parse_config(data: &str) -> Result<Options, ConfigError> {
    let mut opts = Options::default();
    let mut first_err = None;
    parse_propfile(data, &mut |key, value| {
        if first_err.is_none() {
            if let Err(err) = opts.apply(key, value) {
                first_err = Some(err);
            }
        }
    });
    match first_err {
        Some(err) => Err(err),
        None => Ok(opts),
    }
}

/// Load options from `path`, or defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<Options, ConfigError> {
    let Some(path) = path else {
        return Ok(Options::default());
    };
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&data)
}

/// Parse a resolution string in the format "WIDTHxHEIGHT"
pub fn parse_resolution(s: &str) -> Result<Resolution> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        anyhow::bail!("Resolution must be in WIDTHxHEIGHT format");
    }

    let width: u32 = parts[0].trim().parse().context("Invalid width value")?;
    let height: u32 = parts[1].trim().parse().context("Invalid height value")?;

    if width == 0 || height == 0 {
        anyhow::bail!("Resolution values must be positive");
    }

    Ok(Resolution { width, height })
}

/// Parse a byte count with an optional `K`, `M` or `G` suffix.
pub fn parse_byte_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, shift) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 10),
        Some('M') => (&s[..s.len() - 1], 20),
        Some('G') => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };
    let value: u64 = digits.trim().parse().context("Invalid size value")?;
    if value == 0 {
        anyhow::bail!("Size must be positive");
    }
    value
        .checked_mul(1u64 << shift)
        .context("Size is too large")
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err("expected true or false".to_string()),
    }
}
