//! Accelerator context: the open connection to the 2D engine.
//!
//! Operations are validated and queued by [`RgaContext::enqueue`] and run
//! as one job by [`RgaContext::execute`]. Only one context may hold a
//! device's engine at a time.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::drm::{DrmDevice, GemObject};
use crate::rga::batch::{BatchConfig, BatchStats, CommandBatch};
use crate::rga::engine::{Engine, EngineFault, SoftEngine};
use crate::rga::image::RgaImage;
use crate::rga::ops::{Blend, InvalidOperation, Operation, Rect, Rotation};

/// Accelerator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RgaError {
    #[error("cannot open 2D engine on {device}: {reason}")]
    DeviceOpen { device: String, reason: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(#[from] InvalidOperation),

    #[error("batch is full ({capacity} commands)")]
    BatchFull { capacity: usize },

    #[error("batch execution failed: {0}")]
    Execution(#[from] EngineFault),
}

/// An open 2D engine with its pending batch.
pub struct RgaContext {
    device: Arc<DrmDevice>,
    engine: Box<dyn Engine>,
    batch: CommandBatch,
    batches_executed: u64,
    commands_executed: u64,
    failed_batches: u64,
}

impl RgaContext {
    /// Open the device's engine with the default batch configuration.
    pub fn open(device: &Arc<DrmDevice>) -> Result<Self, RgaError> {
        Self::with_config(device, BatchConfig::standard())
    }

    pub fn with_config(device: &Arc<DrmDevice>, config: BatchConfig) -> Result<Self, RgaError> {
        Self::with_engine(device, config, Box::new(SoftEngine::new()))
    }

    /// Open the device's engine, running batches on `engine`.
    pub fn with_engine(
        device: &Arc<DrmDevice>,
        config: BatchConfig,
        engine: Box<dyn Engine>,
    ) -> Result<Self, RgaError> {
        let open_err = |reason: &str| RgaError::DeviceOpen {
            device: device.name().to_string(),
            reason: reason.to_string(),
        };
        config.validate().map_err(open_err)?;
        if !device.config().has_rga {
            return Err(open_err("device has no 2D engine"));
        }
        if !device.claim_engine() {
            return Err(open_err("engine is busy"));
        }
        info!(
            "rga context opened on {} ({} engine, {} commands per batch)",
            device.name(),
            engine.name(),
            config.max_commands
        );
        Ok(Self {
            device: Arc::clone(device),
            engine,
            batch: CommandBatch::new(config.max_commands),
            batches_executed: 0,
            commands_executed: 0,
            failed_batches: 0,
        })
    }

    #[must_use]
    pub fn device(&self) -> &Arc<DrmDevice> {
        &self.device
    }

    /// Number of commands waiting for [`execute`](Self::execute).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    #[must_use]
    pub fn stats(&self) -> BatchStats {
        BatchStats {
            pending: self.batch.len(),
            capacity: self.batch.capacity(),
            batches_executed: self.batches_executed,
            commands_executed: self.commands_executed,
            failed_batches: self.failed_batches,
        }
    }

    /// Validate `op` and append it to the batch.
    ///
    /// On error the batch is left exactly as it was.
    pub fn enqueue(&mut self, op: Operation<'_>) -> Result<(), RgaError> {
        if self.batch.is_full() {
            return Err(RgaError::BatchFull {
                capacity: self.batch.capacity(),
            });
        }
        let command = op.resolve().map_err(|err| {
            debug!("rejected {}: {}", op.name(), err);
            err
        })?;
        self.batch.push(command).map_err(|_| RgaError::BatchFull {
            capacity: self.batch.capacity(),
        })
    }

    /// Fill `rect` of `dst` with `dst.fill_color`.
    pub fn solid_fill(&mut self, dst: &RgaImage<'_>, rect: Rect) -> Result<(), RgaError> {
        self.enqueue(Operation::SolidFill {
            dst,
            rect,
            color: dst.fill_color,
        })
    }

    pub fn copy(
        &mut self,
        src: &RgaImage<'_>,
        dst: &RgaImage<'_>,
        src_rect: Rect,
        dst_rect: Rect,
    ) -> Result<(), RgaError> {
        self.enqueue(Operation::Copy {
            src,
            dst,
            src_rect,
            dst_rect,
        })
    }

    pub fn copy_with_scale(
        &mut self,
        src: &RgaImage<'_>,
        dst: &RgaImage<'_>,
        src_rect: Rect,
        dst_rect: Rect,
    ) -> Result<(), RgaError> {
        self.enqueue(Operation::ScaledCopy {
            src,
            dst,
            src_rect,
            dst_rect,
        })
    }

    pub fn copy_with_rotate(
        &mut self,
        src: &RgaImage<'_>,
        dst: &RgaImage<'_>,
        src_rect: Rect,
        dst_rect: Rect,
        rotation: Rotation,
    ) -> Result<(), RgaError> {
        self.enqueue(Operation::RotatedCopy {
            src,
            dst,
            src_rect,
            dst_rect,
            rotation,
        })
    }

    pub fn blend(
        &mut self,
        src: &RgaImage<'_>,
        dst: &RgaImage<'_>,
        src_rect: Rect,
        dst_rect: Rect,
        blend: Blend,
    ) -> Result<(), RgaError> {
        self.enqueue(Operation::AlphaBlend {
            src,
            dst,
            src_rect,
            dst_rect,
            blend,
        })
    }

    /// Run the pending batch and block until it completes.
    ///
    /// The batch is cleared whether or not the engine succeeds.
    pub fn execute(&mut self) -> Result<(), RgaError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let result = self.engine.run(self.batch.commands());
        let count = self.batch.len();

        match result {
            Ok(()) => {
                for gem in self.flush_targets() {
                    gem.sync();
                }
                self.batch.clear();
                self.batches_executed += 1;
                self.commands_executed += count as u64;
                debug!("executed batch of {} commands", count);
                Ok(())
            }
            Err(fault) => {
                self.batch.clear();
                self.failed_batches += 1;
                warn!("batch of {} commands failed: {}", count, fault);
                Err(RgaError::Execution(fault))
            }
        }
    }

    /// Distinct buffers of flush-flagged surfaces in the batch.
    fn flush_targets(&self) -> Vec<Arc<GemObject>> {
        let mut gems: Vec<Arc<GemObject>> = Vec::new();
        let planes = self
            .batch
            .commands()
            .iter()
            .flat_map(|c| c.surfaces())
            .filter(|s| s.flush)
            .flat_map(|s| s.planes());
        for plane in planes {
            if !gems.iter().any(|g| Arc::ptr_eq(g, plane.gem())) {
                gems.push(Arc::clone(plane.gem()));
            }
        }
        gems
    }

    /// Release the engine. Pending commands are discarded.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for RgaContext {
    fn drop(&mut self) {
        let discarded = self.batch.clear();
        if discarded > 0 {
            warn!("rga context closed with {} pending commands", discarded);
        }
        self.device.release_engine();
        debug!("rga context closed on {}", self.device.name());
    }
}
