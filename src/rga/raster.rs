//! Software rasterizer used by [`SoftEngine`](crate::rga::SoftEngine).
//!
//! Every operation reads its source pixels into a scratch buffer before the
//! destination is locked for writing, so source and destination may share
//! memory. Pixels travel as `0xAARRGGBB`; NV12 surfaces are converted on the
//! way in and out.

use crate::format::{argb_to_yuv, pack_argb, unpack_argb, yuv_to_argb, PixelFormat};
use crate::rga::ops::{Blend, BlendMode, Rect, Rotation};
use crate::rga::surface::Surface;

/// Read `rect` of `surface` row by row.
pub(crate) fn read_rect(surface: &Surface, rect: Rect) -> Vec<u32> {
    let stride = surface.stride as usize;
    let mut out = Vec::with_capacity(rect.area());
    surface.with_planes(|luma, chroma| {
        for y in rect.y as usize..rect.bottom() as usize {
            for x in rect.x as usize..rect.right() as usize {
                let pixel = match (surface.format, chroma) {
                    (PixelFormat::Nv12, Some(chroma)) => {
                        let c = (y / 2) * stride + (x / 2) * 2;
                        yuv_to_argb(luma[y * stride + x], chroma[c], chroma[c + 1])
                    }
                    _ => {
                        let i = y * stride + x * 4;
                        u32::from_le_bytes([luma[i], luma[i + 1], luma[i + 2], luma[i + 3]])
                    }
                };
                out.push(pixel);
            }
        }
    });
    out
}

/// Write `pixels` (row-major, `rect.area()` long) into `rect` of `surface`.
///
/// For NV12 every luma sample in the rect is written; a chroma sample is
/// written when the top-left pixel of its 2x2 block lies in the rect, using
/// the average of the block's pixels inside the rect.
pub(crate) fn write_rect(surface: &Surface, rect: Rect, pixels: &[u32]) {
    debug_assert_eq!(pixels.len(), rect.area());
    let stride = surface.stride as usize;
    let (rx, ry) = (rect.x as usize, rect.y as usize);
    let (rw, rh) = (rect.width as usize, rect.height as usize);

    surface.with_planes_mut(|luma, chroma| match (surface.format, chroma) {
        (PixelFormat::Nv12, Some(chroma)) => {
            for (row, line) in pixels.chunks_exact(rw).enumerate() {
                let y = ry + row;
                for (col, &px) in line.iter().enumerate() {
                    luma[y * stride + rx + col] = argb_to_yuv(px).0;
                }
            }
            let first_x = rx + rx % 2;
            let first_y = ry + ry % 2;
            for by in (first_y..ry + rh).step_by(2) {
                for bx in (first_x..rx + rw).step_by(2) {
                    let (mut u, mut v, mut n) = (0u32, 0u32, 0u32);
                    for y in by..(by + 2).min(ry + rh) {
                        for x in bx..(bx + 2).min(rx + rw) {
                            let (_, pu, pv) = argb_to_yuv(pixels[(y - ry) * rw + (x - rx)]);
                            u += u32::from(pu);
                            v += u32::from(pv);
                            n += 1;
                        }
                    }
                    let c = (by / 2) * stride + bx;
                    chroma[c] = ((u + n / 2) / n) as u8;
                    chroma[c + 1] = ((v + n / 2) / n) as u8;
                }
            }
        }
        _ => {
            for (row, line) in pixels.chunks_exact(rw).enumerate() {
                let start = (ry + row) * stride + rx * 4;
                for (dst, px) in luma[start..start + rw * 4].chunks_exact_mut(4).zip(line) {
                    dst.copy_from_slice(&px.to_le_bytes());
                }
            }
        }
    });
}

pub(crate) fn fill(dst: &Surface, rect: Rect, color: u32) {
    write_rect(dst, rect, &vec![color; rect.area()]);
}

pub(crate) fn copy(src: &Surface, dst: &Surface, src_rect: Rect, dst_rect: Rect) {
    let pixels = read_rect(src, src_rect);
    write_rect(dst, dst_rect, &pixels);
}

/// Nearest-neighbour resample of a `src_w` x `src_h` block to `dst_w` x `dst_h`.
pub(crate) fn resample_nearest(
    pixels: &[u32],
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
) -> Vec<u32> {
    if (src_w, src_h) == (dst_w, dst_h) {
        return pixels.to_vec();
    }
    let (sw, sh) = (src_w as u64, src_h as u64);
    let (dw, dh) = (dst_w as u64, dst_h as u64);
    let mut out = Vec::with_capacity(dst_w as usize * dst_h as usize);
    for dy in 0..dh {
        let sy = (dy * sh / dh) as usize;
        let row = &pixels[sy * src_w as usize..(sy + 1) * src_w as usize];
        for dx in 0..dw {
            out.push(row[(dx * sw / dw) as usize]);
        }
    }
    out
}

pub(crate) fn scale(src: &Surface, dst: &Surface, src_rect: Rect, dst_rect: Rect) {
    let pixels = read_rect(src, src_rect);
    let scaled = resample_nearest(
        &pixels,
        src_rect.width,
        src_rect.height,
        dst_rect.width,
        dst_rect.height,
    );
    write_rect(dst, dst_rect, &scaled);
}

/// Rotate a `width` x `height` block clockwise.
pub(crate) fn rotate_pixels(pixels: &[u32], width: u32, height: u32, rotation: Rotation) -> Vec<u32> {
    let (w, h) = (width as usize, height as usize);
    let (out_w, out_h) = rotation.output_size(width, height);
    let (out_w, out_h) = (out_w as usize, out_h as usize);
    let mut out = Vec::with_capacity(w * h);
    for y in 0..out_h {
        for x in 0..out_w {
            let (sx, sy) = match rotation {
                Rotation::Deg90 => (y, h - 1 - x),
                Rotation::Deg180 => (w - 1 - x, h - 1 - y),
                Rotation::Deg270 => (w - 1 - y, x),
            };
            out.push(pixels[sy * w + sx]);
        }
    }
    out
}

pub(crate) fn rotate(src: &Surface, dst: &Surface, src_rect: Rect, dst_rect: Rect, rotation: Rotation) {
    let pixels = read_rect(src, src_rect);
    let rotated = rotate_pixels(&pixels, src_rect.width, src_rect.height, rotation);
    write_rect(dst, dst_rect, &rotated);
}

/// Composite one source pixel over one destination pixel.
#[must_use]
pub fn composite(src: u32, dst: u32, blend: Blend) -> u32 {
    let [sa, sr, sg, sb] = unpack_argb(src);
    let [da, dr, dg, db] = unpack_argb(dst);
    let (src_alpha, dst_alpha) = (u32::from(blend.src_alpha), u32::from(blend.dst_alpha));
    let (a_s, a_d) = match blend.mode {
        BlendMode::ConstantOver => (src_alpha, dst_alpha),
        BlendMode::PixelOver => (
            (u32::from(sa) * src_alpha + 127) / 255,
            (u32::from(da) * dst_alpha + 127) / 255,
        ),
    };
    if a_s == 0 {
        return dst;
    }

    let inv = 255 - a_s;
    let denom = a_s * 255 + a_d * inv;
    let mix = |cs: u8, cd: u8| -> u8 {
        let num = u32::from(cs) * a_s * 255 + u32::from(cd) * a_d * inv;
        ((num + denom / 2) / denom) as u8
    };
    let a_o = a_s + (a_d * inv + 127) / 255;
    pack_argb(a_o.min(255) as u8, mix(sr, dr), mix(sg, dg), mix(sb, db))
}

pub(crate) fn blend(src: &Surface, dst: &Surface, src_rect: Rect, dst_rect: Rect, blend: Blend) {
    // A zero constant source alpha leaves every destination pixel as is.
    if blend.mode == BlendMode::ConstantOver && blend.src_alpha == 0 {
        return;
    }
    let pixels = read_rect(src, src_rect);
    let scaled = resample_nearest(
        &pixels,
        src_rect.width,
        src_rect.height,
        dst_rect.width,
        dst_rect.height,
    );
    let mut out = read_rect(dst, dst_rect);
    for (d, &s) in out.iter_mut().zip(&scaled) {
        *d = composite(s, *d, blend);
    }
    write_rect(dst, dst_rect, &out);
}
