//! Property tests for the raster operations.
//!
//! Fill touches exactly its rectangle, copies are exact, scaling a solid
//! source stays solid and rotations compose.

use std::sync::Arc;

use proptest::prelude::*;
use rga_rust::drm::{BoFlags, BufferObject, DeviceConfig, DrmDevice, Mapping, DRIVER_NAME};
use rga_rust::format::PixelFormat;
use rga_rust::rga::{composite, Blend, Rect, RgaContext, RgaImage, Rotation};

const SIZE: u32 = 16;

fn device() -> Arc<DrmDevice> {
    DrmDevice::open(DRIVER_NAME, DeviceConfig::rockchip_default()).unwrap()
}

fn argb_buffer(dev: &Arc<DrmDevice>, w: u32, h: u32) -> BufferObject {
    BufferObject::create(dev, (w * h * 4) as usize, BoFlags::empty()).unwrap()
}

fn pixels(map: Mapping<'_>) -> Vec<u32> {
    map.to_vec()
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn load(map: Mapping<'_>, px: &[u32]) {
    map.write(|bytes| {
        for (chunk, p) in bytes.chunks_exact_mut(4).zip(px) {
            chunk.copy_from_slice(&p.to_le_bytes());
        }
    });
}

/// A non-empty rectangle inside a `SIZE` x `SIZE` surface.
fn arb_rect() -> impl Strategy<Value = Rect> {
    (0..SIZE, 0..SIZE).prop_flat_map(|(x, y)| {
        (1..=SIZE - x, 1..=SIZE - y).prop_map(move |(w, h)| Rect::new(x, y, w, h))
    })
}

fn arb_pixels(w: u32, h: u32) -> impl Strategy<Value = Vec<u32>> {
    proptest::collection::vec(any::<u32>(), (w * h) as usize)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Fill changes every pixel inside the rect and nothing outside.
    #[test]
    fn fill_touches_only_its_rect(rect in arb_rect(), color in 1u32..) {
        let dev = device();
        let bo = argb_buffer(&dev, SIZE, SIZE);
        let map = bo.map().unwrap();
        let img = RgaImage::new(map, SIZE, SIZE, PixelFormat::Argb8888).with_fill_color(color);
        let mut ctx = RgaContext::open(&dev).unwrap();
        ctx.solid_fill(&img, rect).unwrap();
        ctx.execute().unwrap();

        for (i, px) in pixels(map).into_iter().enumerate() {
            let (x, y) = (i as u32 % SIZE, i as u32 / SIZE);
            let expected = if rect.contains_point(x, y) { color } else { 0 };
            prop_assert_eq!(px, expected, "pixel ({}, {})", x, y);
        }
    }

    /// An ARGB copy reproduces the source rect bit for bit.
    #[test]
    fn copy_is_exact(src_px in arb_pixels(SIZE, SIZE), rect in arb_rect()) {
        let dev = device();
        let src_bo = argb_buffer(&dev, SIZE, SIZE);
        let dst_bo = argb_buffer(&dev, SIZE, SIZE);
        let (src_map, dst_map) = (src_bo.map().unwrap(), dst_bo.map().unwrap());
        load(src_map, &src_px);
        let src = RgaImage::new(src_map, SIZE, SIZE, PixelFormat::Argb8888);
        let dst = RgaImage::new(dst_map, SIZE, SIZE, PixelFormat::Argb8888);

        let mut ctx = RgaContext::open(&dev).unwrap();
        ctx.copy(&src, &dst, rect, rect).unwrap();
        ctx.execute().unwrap();

        let out = pixels(dst_map);
        for (i, (&got, &want)) in out.iter().zip(&src_px).enumerate() {
            let (x, y) = (i as u32 % SIZE, i as u32 / SIZE);
            if rect.contains_point(x, y) {
                prop_assert_eq!(got, want);
            } else {
                prop_assert_eq!(got, 0);
            }
        }
    }

    /// Scaling a solid source yields a solid destination rect.
    #[test]
    fn scaled_solid_stays_solid(
        sw in 1u32..=SIZE,
        sh in 1u32..=SIZE,
        dst_rect in arb_rect(),
        color in any::<u32>(),
    ) {
        let dev = device();
        let src_bo = argb_buffer(&dev, sw, sh);
        let dst_bo = argb_buffer(&dev, SIZE, SIZE);
        let (src_map, dst_map) = (src_bo.map().unwrap(), dst_bo.map().unwrap());
        let src = RgaImage::new(src_map, sw, sh, PixelFormat::Argb8888).with_fill_color(color);
        let dst = RgaImage::new(dst_map, SIZE, SIZE, PixelFormat::Argb8888);

        let mut ctx = RgaContext::open(&dev).unwrap();
        ctx.solid_fill(&src, src.bounds()).unwrap();
        ctx.copy_with_scale(&src, &dst, src.bounds(), dst_rect).unwrap();
        ctx.execute().unwrap();

        for (i, px) in pixels(dst_map).into_iter().enumerate() {
            let (x, y) = (i as u32 % SIZE, i as u32 / SIZE);
            if dst_rect.contains_point(x, y) {
                prop_assert_eq!(px, color);
            }
        }
    }

    /// Four quarter turns, or two half turns, restore the source.
    #[test]
    fn rotations_compose(w in 1u32..=8, h in 1u32..=8, seed_px in arb_pixels(8, 8)) {
        let dev = device();
        let a_bo = argb_buffer(&dev, 8, 8);
        let b_bo = argb_buffer(&dev, 8, 8);
        let (a_map, b_map) = (a_bo.map().unwrap(), b_bo.map().unwrap());
        load(a_map, &seed_px);
        let a = RgaImage::new(a_map, 8, 8, PixelFormat::Argb8888);
        let b = RgaImage::new(b_map, 8, 8, PixelFormat::Argb8888);
        let wide = Rect::new(0, 0, w, h);
        let tall = wide.transposed();

        let mut ctx = RgaContext::open(&dev).unwrap();
        ctx.copy_with_rotate(&a, &b, wide, tall, Rotation::Deg90).unwrap();
        ctx.copy_with_rotate(&b, &a, tall, wide, Rotation::Deg270).unwrap();
        ctx.execute().unwrap();
        prop_assert_eq!(pixels(a_map), seed_px.clone());

        ctx.copy_with_rotate(&a, &b, wide, wide, Rotation::Deg180).unwrap();
        ctx.copy_with_rotate(&b, &a, wide, wide, Rotation::Deg180).unwrap();
        ctx.execute().unwrap();
        prop_assert_eq!(pixels(a_map), seed_px);
    }

    /// Two quarter turns equal one half turn.
    #[test]
    fn double_quarter_turn_is_half_turn(w in 1u32..=8, h in 1u32..=8, seed_px in arb_pixels(8, 8)) {
        let dev = device();
        let bufs: Vec<BufferObject> = (0..4).map(|_| argb_buffer(&dev, 8, 8)).collect();
        let maps: Vec<Mapping<'_>> = bufs.iter().map(|b| b.map().unwrap()).collect();
        load(maps[0], &seed_px);
        let imgs: Vec<RgaImage<'_>> = maps
            .iter()
            .map(|&m| RgaImage::new(m, 8, 8, PixelFormat::Argb8888))
            .collect();
        let wide = Rect::new(0, 0, w, h);

        let mut ctx = RgaContext::open(&dev).unwrap();
        ctx.copy_with_rotate(&imgs[0], &imgs[1], wide, wide.transposed(), Rotation::Deg90).unwrap();
        ctx.copy_with_rotate(&imgs[1], &imgs[2], wide.transposed(), wide, Rotation::Deg90).unwrap();
        ctx.copy_with_rotate(&imgs[0], &imgs[3], wide, wide, Rotation::Deg180).unwrap();
        ctx.execute().unwrap();
        prop_assert_eq!(pixels(maps[2]), pixels(maps[3]));
    }

    /// Compositing never lowers the alpha of an opaque destination and a
    /// fully opaque constant source replaces the colour.
    #[test]
    fn composite_bounds(src in any::<u32>(), dst_rgb in 0u32..0x0100_0000, dst_alpha in any::<u8>()) {
        let dst = 0xFF00_0000 | dst_rgb;
        let out = composite(src, dst, Blend::constant(0x80, dst_alpha));
        prop_assert!(out >> 24 >= 0x80);

        let replaced = composite(src, dst, Blend::constant(0xFF, dst_alpha));
        prop_assert_eq!(replaced & 0x00FF_FFFF, src & 0x00FF_FFFF);
        prop_assert_eq!(replaced >> 24, 0xFF);
    }
}
