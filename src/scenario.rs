//! The RGA test scenarios.
//!
//! Binds an NV12 framebuffer to the selected output, then runs colour fill,
//! copy, scale, rotate and blend through the 2D engine, writing into the
//! displayed buffer so every step is visible. Each timed loop logs its
//! per-iteration cost. The first failing stage aborts the run.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{Options, Resolution};
use crate::drm::{
    create_mapped_buffer, find_mode, BoFlags, ConnectorSpec, DisplayTarget, DrmDevice,
    ModeSelection, ScanoutFrame,
};
use crate::format::PixelFormat;
use crate::rga::{Blend, BatchConfig, Rect, RgaContext, RgaImage, Rotation};

/// Scenarios in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ColorFill,
    Copy,
    Scale,
    Rotate,
    Blend,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::ColorFill,
        Stage::Copy,
        Stage::Scale,
        Stage::Rotate,
        Stage::Blend,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::ColorFill => "color fill",
            Stage::Copy => "copy",
            Stage::Scale => "scale",
            Stage::Rotate => "rotate",
            Stage::Blend => "blend",
        })
    }
}

/// Decides when to move on to the next scenario.
pub trait Pacer {
    /// Called after each scenario; `last` is set after the final one.
    fn wait(&mut self, last: bool) -> Result<()>;
}

/// Waits for <ENTER> on stdin.
#[derive(Debug, Default)]
pub struct StdinPacer;

impl Pacer for StdinPacer {
    fn wait(&mut self, last: bool) -> Result<()> {
        println!(
            "press <ENTER> to {}",
            if last {
                "exit test application"
            } else {
                "skip to next test"
            }
        );
        io::stdout().flush().context("Failed to flush stdout")?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        Ok(())
    }
}

/// Never waits.
#[derive(Debug, Default)]
pub struct NoPause;

impl Pacer for NoPause {
    fn wait(&mut self, _last: bool) -> Result<()> {
        Ok(())
    }
}

/// Settings of one run.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Executions per timed loop.
    pub iterations: u32,
    pub blend_src: Resolution,
    pub blend_dst: Resolution,
    pub batch: BatchConfig,
    /// Fixed seed for the fill colours, otherwise seeded from entropy.
    pub seed: Option<u64>,
    /// Write the final scanout here.
    pub dump: Option<PathBuf>,
}

impl ScenarioConfig {
    #[must_use]
    pub fn from_options(opts: &Options) -> Self {
        Self {
            iterations: opts.iterations(),
            blend_src: opts.blend_src(),
            blend_dst: opts.blend_dst(),
            batch: opts.batch_config(),
            seed: opts.seed,
            dump: opts.dump.clone(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::from_options(&Options::default())
    }
}

/// Timing of one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTiming {
    pub stage: Stage,
    pub iterations: u32,
    pub total: Duration,
}

impl StageTiming {
    /// Mean cost of one timed execution, in microseconds.
    #[must_use]
    pub fn usecs_per_iteration(&self) -> u128 {
        self.total.as_micros() / u128::from(self.iterations.max(1))
    }
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct Report {
    pub selection: ModeSelection,
    pub timings: Vec<StageTiming>,
    /// What the output showed after the last scenario.
    pub final_frame: ScanoutFrame,
}

/// Run every scenario against `device` on the output named by `spec`.
pub fn run(
    device: &Arc<DrmDevice>,
    spec: &ConnectorSpec,
    config: &ScenarioConfig,
    pacer: &mut dyn Pacer,
) -> Result<Report> {
    let selection = find_mode(device, spec).context("Failed to find usable connector")?;
    let (width, height) = (selection.mode.hdisplay, selection.mode.vdisplay);
    if width == 0 || height == 0 {
        anyhow::bail!("Failed to find sane resolution on connector");
    }
    info!("screen width = {}, screen height = {}", width, height);

    let frame_bytes = width as usize * height as usize * 4;
    let dst_bo = create_mapped_buffer(device, frame_bytes, BoFlags::empty())
        .context("Failed to create destination fb")?;
    let src_bo = create_mapped_buffer(device, frame_bytes, BoFlags::empty())
        .context("Failed to create source fb")?;

    let mut display = DisplayTarget::new(device);
    let fb = display
        .bind(&dst_bo, width, height, PixelFormat::Nv12)
        .context("Failed to add framebuffer")?;
    display
        .present_on(fb, &selection)
        .context("Failed to set mode")?;

    let mut ctx = RgaContext::with_config(device, config.batch).context("Failed to open rga")?;

    let dst_fd = dst_bo.export().context("Failed to export destination fb")?;
    let src_fd = src_bo.export().context("Failed to export source fb")?;
    let dst = RgaImage::new(&dst_fd, width, height, PixelFormat::Nv12);
    let src = RgaImage::new(&src_fd, width, height, PixelFormat::Argb8888);

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut timings = Vec::with_capacity(Stage::ALL.len());
    for stage in Stage::ALL {
        let timing = match stage {
            Stage::ColorFill => color_fill(&mut ctx, &dst, &mut rng, config.iterations),
            Stage::Copy => copy(&mut ctx, &src, &dst, config.iterations),
            Stage::Scale => scale(&mut ctx, &src, &dst, config.iterations),
            Stage::Rotate => rotate(&mut ctx, &src, &dst, config.iterations),
            Stage::Blend => blend(&mut ctx, device, &dst, config),
        }
        .with_context(|| format!("Failed at {} test", stage))?;
        timings.push(timing);

        // The engine wrote the scanout buffer in place; commit it again.
        display
            .present_on(fb, &selection)
            .with_context(|| format!("Failed to present after {} test", stage))?;

        if stage == Stage::Blend {
            if let Some(path) = &config.dump {
                display
                    .dump_png(selection.crtc_id, path)
                    .context("Failed to dump scanout")?;
                info!("scanout written to {}", path.display());
            }
        }
        pacer.wait(stage == Stage::Blend)?;
    }

    let final_frame = display
        .read_scanout(selection.crtc_id)
        .context("Failed to read scanout")?;
    display.release(fb).context("Failed to remove framebuffer")?;
    ctx.close();

    Ok(Report {
        selection,
        timings,
        final_frame,
    })
}

/// Run `iterations` executions of whatever `enqueue` queues, timing them.
fn timed(
    ctx: &mut RgaContext,
    stage: Stage,
    iterations: u32,
    mut enqueue: impl FnMut(&mut RgaContext) -> Result<()>,
) -> Result<StageTiming> {
    let start = Instant::now();
    for _ in 0..iterations {
        enqueue(ctx)?;
        ctx.execute()?;
    }
    Ok(StageTiming {
        stage,
        iterations,
        total: start.elapsed(),
    })
}

fn color_fill(
    ctx: &mut RgaContext,
    dst: &RgaImage<'_>,
    rng: &mut StdRng,
    iterations: u32,
) -> Result<StageTiming> {
    info!("color fill test.");
    let timing = timed(ctx, Stage::ColorFill, iterations, |ctx| {
        let color = 0xFF00_0000 | (rng.gen::<u32>() & 0x00FF_FFFF);
        let dst = dst.with_fill_color(color);
        ctx.solid_fill(&dst, dst.bounds())?;
        Ok(())
    })?;
    info!(
        "*[RGA DEBUG]* : solid fill a {}*{} NV12 buffer use {} usecs",
        dst.width,
        dst.height,
        timing.usecs_per_iteration()
    );
    Ok(timing)
}

fn copy(
    ctx: &mut RgaContext,
    src: &RgaImage<'_>,
    dst: &RgaImage<'_>,
    iterations: u32,
) -> Result<StageTiming> {
    info!("copy test.");
    let blue = src.with_fill_color(0xFF00_00FF);
    ctx.solid_fill(&blue, blue.bounds())?;
    // Clear the screen.
    let clear = dst.with_fill_color(0x0000_00FF);
    ctx.solid_fill(&clear, clear.bounds())?;
    ctx.execute()?;

    let rect = dst.bounds();
    let timing = timed(ctx, Stage::Copy, iterations, |ctx| {
        ctx.copy(src, dst, rect, rect)?;
        Ok(())
    })?;
    info!(
        "*[RGA DEBUG]* : copy a {}*{} ARGB8888 buffer to NV12 buffer use {} usecs",
        dst.width,
        dst.height,
        timing.usecs_per_iteration()
    );
    Ok(timing)
}

/// Three horizontal bars (blue, green, red) over `rect` of `img`.
fn color_bars(ctx: &mut RgaContext, img: &RgaImage<'_>, rect: Rect) -> Result<()> {
    let bar = rect.height / 3;
    for (i, color) in [0xFF00_00FFu32, 0xFF00_FF00, 0xFFFF_0000].into_iter().enumerate() {
        let band = img.with_fill_color(color);
        ctx.solid_fill(&band, Rect::new(rect.x, rect.y + bar * i as u32, rect.width, bar))?;
    }
    ctx.execute()?;
    Ok(())
}

fn clear(ctx: &mut RgaContext, img: &RgaImage<'_>) -> Result<()> {
    let black = img.with_fill_color(0);
    ctx.solid_fill(&black, black.bounds())?;
    ctx.execute()?;
    Ok(())
}

fn scale(
    ctx: &mut RgaContext,
    src: &RgaImage<'_>,
    dst: &RgaImage<'_>,
    iterations: u32,
) -> Result<StageTiming> {
    info!("scale test.");
    let src_rect = Rect::new(0, 0, dst.width / 2, dst.height / 2);
    color_bars(ctx, src, src_rect)?;
    clear(ctx, dst)?;

    let dst_rect = dst.bounds();
    let timing = timed(ctx, Stage::Scale, iterations, |ctx| {
        ctx.copy_with_scale(src, dst, src_rect, dst_rect)?;
        Ok(())
    })?;
    info!(
        "*[RGA DEBUG]* : scale a {}*{} ARGB8888 buffer to {}*{} NV12 use {} usecs",
        src_rect.width,
        src_rect.height,
        dst.width,
        dst.height,
        timing.usecs_per_iteration()
    );
    Ok(timing)
}

fn rotate(
    ctx: &mut RgaContext,
    src: &RgaImage<'_>,
    dst: &RgaImage<'_>,
    iterations: u32,
) -> Result<StageTiming> {
    info!("rotate test.");
    // Reinterpret the source memory as a portrait NV12 surface.
    let (src_w, src_h) = (dst.height, dst.width);
    let portrait = src.with_geometry(src_w, src_h, src_w, PixelFormat::Nv12);
    let src_rect = portrait.bounds();
    color_bars(ctx, &portrait, src_rect)?;
    clear(ctx, dst)?;

    let dst_rect = dst.bounds();
    let timing = timed(ctx, Stage::Rotate, iterations, |ctx| {
        ctx.copy_with_rotate(&portrait, dst, src_rect, dst_rect, Rotation::Deg90)?;
        Ok(())
    })?;
    info!(
        "*[RGA DEBUG]* : rotate a {}*{} NV12 use {} usecs",
        src_w,
        src_h,
        timing.usecs_per_iteration()
    );
    Ok(timing)
}

fn blend(
    ctx: &mut RgaContext,
    device: &Arc<DrmDevice>,
    dst: &RgaImage<'_>,
    config: &ScenarioConfig,
) -> Result<StageTiming> {
    info!("blend test.");
    let (sw, sh) = (config.blend_src.width, config.blend_src.height);
    let (dw, dh) = (config.blend_dst.width, config.blend_dst.height);

    let src_bo = create_mapped_buffer(device, sw as usize * sh as usize * 4, BoFlags::empty())
        .context("Failed to create blend source")?;
    let dst_bo = create_mapped_buffer(device, dw as usize * dh as usize * 4, BoFlags::empty())
        .context("Failed to create blend destination")?;
    let src_fd = src_bo.export()?;
    let dst_fd = dst_bo.export()?;

    let test1 = RgaImage::new(&src_fd, sw, sh, PixelFormat::Argb8888)
        .with_flush(true)
        .with_fill_color(0x0000_00FF);
    let test2 = RgaImage::new(&dst_fd, dw, dh, PixelFormat::Argb8888)
        .with_flush(true)
        .with_fill_color(0xFF00_FF00);

    ctx.solid_fill(&test1, test1.bounds())?;
    ctx.execute()?;
    ctx.solid_fill(&test2, Rect::new(dw / 4, dh / 4, dw / 2, dh / 2))?;
    ctx.execute()?;

    let timing = timed(ctx, Stage::Blend, 1, |ctx| {
        ctx.blend(
            &test1,
            &test2,
            test1.bounds(),
            test2.bounds(),
            Blend::constant(0xFF, 0x80),
        )?;
        Ok(())
    })?;
    info!(
        "*[RGA DEBUG]* : blend {}*{} ARGB8888 and {}*{} ARGB8888 buffers use {} usecs",
        sw,
        sh,
        dw,
        dh,
        timing.usecs_per_iteration()
    );

    // Show the outcome.
    ctx.copy_with_scale(&test2, dst, test2.bounds(), dst.bounds())?;
    ctx.execute()?;
    Ok(timing)
}
