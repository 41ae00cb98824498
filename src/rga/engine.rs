//! Execution backends for command batches.

use log::trace;

use crate::rga::batch::Command;
use crate::rga::raster;

/// Failure reported by an engine for a whole job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineFault {
    /// A command references memory whose GEM handle was closed.
    #[error("command {index} ({command}) references released buffer {handle}")]
    StaleBuffer {
        index: usize,
        command: &'static str,
        handle: u32,
    },

    #[error("job rejected: {0}")]
    Rejected(String),

    #[error("job timed out")]
    Timeout,
}

/// A 2D engine able to run a batch of commands.
///
/// `run` blocks until every command completed or the job failed. On failure
/// the destinations may hold partial results.
pub trait Engine: Send {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Run `commands` in order.
    fn run(&mut self, commands: &[Command]) -> Result<(), EngineFault>;
}

/// CPU implementation of the 2D engine.
#[derive(Debug, Default)]
pub struct SoftEngine {
    jobs: u64,
}

impl SoftEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs completed so far.
    #[must_use]
    pub fn jobs(&self) -> u64 {
        self.jobs
    }

    fn check(commands: &[Command]) -> Result<(), EngineFault> {
        for (index, command) in commands.iter().enumerate() {
            if let Some(plane) = command.surfaces().find_map(|s| s.stale_plane()) {
                return Err(EngineFault::StaleBuffer {
                    index,
                    command: command.name(),
                    handle: plane.gem().handle(),
                });
            }
        }
        Ok(())
    }
}

impl Engine for SoftEngine {
    fn name(&self) -> &str {
        "soft"
    }

    fn run(&mut self, commands: &[Command]) -> Result<(), EngineFault> {
        // The job is rejected as a whole before any command touches memory.
        Self::check(commands)?;

        for command in commands {
            trace!("soft engine: {:?}", command);
            match command {
                Command::Fill { dst, rect, color } => raster::fill(dst, *rect, *color),
                Command::Copy {
                    src,
                    dst,
                    src_rect,
                    dst_rect,
                } => raster::copy(src, dst, *src_rect, *dst_rect),
                Command::Scale {
                    src,
                    dst,
                    src_rect,
                    dst_rect,
                } => raster::scale(src, dst, *src_rect, *dst_rect),
                Command::Rotate {
                    src,
                    dst,
                    src_rect,
                    dst_rect,
                    rotation,
                } => raster::rotate(src, dst, *src_rect, *dst_rect, *rotation),
                Command::Blend {
                    src,
                    dst,
                    src_rect,
                    dst_rect,
                    blend,
                } => raster::blend(src, dst, *src_rect, *dst_rect, *blend),
            }
        }
        self.jobs += 1;
        Ok(())
    }
}
