//! Command batches.
//!
//! Validated operations are queued as [`Command`]s holding their own
//! references to buffer memory. A batch is drained completely on every
//! execute, whether the engine accepted the job or not.

use std::fmt;

use crate::rga::ops::{Blend, Rect, Rotation};
use crate::rga::surface::Surface;

/// A validated operation ready for the engine.
#[derive(Clone)]
pub enum Command {
    Fill {
        dst: Surface,
        rect: Rect,
        color: u32,
    },
    Copy {
        src: Surface,
        dst: Surface,
        src_rect: Rect,
        dst_rect: Rect,
    },
    Scale {
        src: Surface,
        dst: Surface,
        src_rect: Rect,
        dst_rect: Rect,
    },
    Rotate {
        src: Surface,
        dst: Surface,
        src_rect: Rect,
        dst_rect: Rect,
        rotation: Rotation,
    },
    Blend {
        src: Surface,
        dst: Surface,
        src_rect: Rect,
        dst_rect: Rect,
        blend: Blend,
    },
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fill { .. } => "fill",
            Self::Copy { .. } => "copy",
            Self::Scale { .. } => "scale",
            Self::Rotate { .. } => "rotate",
            Self::Blend { .. } => "blend",
        }
    }

    #[must_use]
    pub fn source(&self) -> Option<&Surface> {
        match self {
            Self::Fill { .. } => None,
            Self::Copy { src, .. }
            | Self::Scale { src, .. }
            | Self::Rotate { src, .. }
            | Self::Blend { src, .. } => Some(src),
        }
    }

    #[must_use]
    pub fn destination(&self) -> &Surface {
        match self {
            Self::Fill { dst, .. }
            | Self::Copy { dst, .. }
            | Self::Scale { dst, .. }
            | Self::Rotate { dst, .. }
            | Self::Blend { dst, .. } => dst,
        }
    }

    /// Source (if any) then destination.
    pub fn surfaces(&self) -> impl Iterator<Item = &Surface> {
        self.source().into_iter().chain(std::iter::once(self.destination()))
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fill { dst, rect, color } => f
                .debug_struct("Fill")
                .field("dst", &dst.luma)
                .field("rect", rect)
                .field("color", &format_args!("{:#010x}", color))
                .finish(),
            Self::Copy {
                src,
                dst,
                src_rect,
                dst_rect,
            }
            | Self::Scale {
                src,
                dst,
                src_rect,
                dst_rect,
            } => f
                .debug_struct(if matches!(self, Self::Copy { .. }) {
                    "Copy"
                } else {
                    "Scale"
                })
                .field("src", &src.luma)
                .field("dst", &dst.luma)
                .field("src_rect", src_rect)
                .field("dst_rect", dst_rect)
                .finish(),
            Self::Rotate {
                src,
                dst,
                src_rect,
                dst_rect,
                rotation,
            } => f
                .debug_struct("Rotate")
                .field("src", &src.luma)
                .field("dst", &dst.luma)
                .field("src_rect", src_rect)
                .field("dst_rect", dst_rect)
                .field("rotation", rotation)
                .finish(),
            Self::Blend {
                src,
                dst,
                src_rect,
                dst_rect,
                blend,
            } => f
                .debug_struct("Blend")
                .field("src", &src.luma)
                .field("dst", &dst.luma)
                .field("src_rect", src_rect)
                .field("dst_rect", dst_rect)
                .field("blend", blend)
                .finish(),
        }
    }
}

/// Batch configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Depth of the engine's command list.
    pub max_commands: usize,
}

impl BatchConfig {
    pub const DEFAULT_MAX_COMMANDS: usize = 32;
    /// Hard limit of the command list.
    pub const MAX_COMMANDS_LIMIT: usize = 1024;

    #[must_use]
    pub const fn standard() -> Self {
        Self {
            max_commands: Self::DEFAULT_MAX_COMMANDS,
        }
    }

    #[must_use]
    pub const fn with_max_commands(max_commands: usize) -> Self {
        Self { max_commands }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_commands == 0 {
            return Err("max_commands must be at least 1");
        }
        if self.max_commands > Self::MAX_COMMANDS_LIMIT {
            return Err("max_commands exceeds the command list limit");
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Batch statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchStats {
    /// Commands waiting for the next execute.
    pub pending: usize,
    pub capacity: usize,
    pub batches_executed: u64,
    pub commands_executed: u64,
    pub failed_batches: u64,
}

impl BatchStats {
    pub fn utilization(self) -> f32 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.pending as f32 / self.capacity as f32) * 100.0
        }
    }
}

/// Ordered, bounded list of pending commands.
#[derive(Debug)]
pub(crate) struct CommandBatch {
    commands: Vec<Command>,
    capacity: usize,
}

impl CommandBatch {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.commands.len() >= self.capacity
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `command`, handing it back if the batch is full.
    pub(crate) fn push(&mut self, command: Command) -> Result<(), Command> {
        if self.is_full() {
            return Err(command);
        }
        self.commands.push(command);
        Ok(())
    }

    pub(crate) fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drop every pending command, returning how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let n = self.commands.len();
        self.commands.clear();
        n
    }
}
